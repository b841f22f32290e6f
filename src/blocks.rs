use core::ptr::NonNull;

use crate::{
    alignment::{checked_align_up, is_aligned},
    boundary_tag::BoundaryTag,
    provider::HeapProvider,
    ALIGNMENT, BLOCK_OVERHEAD, FOOTER_SIZE, HEADER_SIZE, MIN_BLOCK_SIZE, USIZE_ALIGNMENT,
    USIZE_SIZE,
};

/// Computes the total size of the block needed to hold a payload of the given
/// size: the payload plus header and footer, rounded up to [`ALIGNMENT`], and
/// never smaller than [`MIN_BLOCK_SIZE`].
///
/// Returns `None` if the size can't be represented.
pub fn required_block_size(payload_size: usize) -> Option<usize> {
    let with_overhead = payload_size.checked_add(BLOCK_OVERHEAD)?;
    let aligned = checked_align_up(with_overhead, ALIGNMENT)?;
    Some(core::cmp::max(aligned, MIN_BLOCK_SIZE))
}

/// A handle to a block in the heap, stored as the offset of its header from
/// the start of the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block(usize);

impl Block {
    pub fn at_offset(offset: usize) -> Self {
        Self(offset)
    }

    /// The offset of this block's header from the start of the heap.
    pub fn offset(self) -> usize {
        self.0
    }

    /// The block starting `size` bytes after this one.
    pub fn offset_by(self, size: usize) -> Self {
        Self(self.0 + size)
    }
}

/// A bounds-checked view over the heap memory of a [`HeapProvider`].
///
/// All reads and writes of block metadata go through this type, addressed by
/// offsets from the start of the heap, and every one of them is checked
/// against the current heap bounds.
#[derive(Debug)]
pub struct HeapArena<P> {
    provider: P,
}

impl<P: HeapProvider> HeapArena<P> {
    pub const fn new(provider: P) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// The address where the heap starts.
    pub fn low(&self) -> usize {
        self.provider.heap_low()
    }

    /// The current size of the heap in bytes.
    pub fn len(&self) -> usize {
        self.provider.heap_high() - self.provider.heap_low()
    }

    /// Grows the heap by `bytes` bytes, returning the offset at which the new
    /// region starts.
    pub fn grow(&mut self, bytes: usize) -> Option<usize> {
        let old_len = self.len();
        let region_addr = self.provider.grow(bytes)?;
        let offset = region_addr - self.low();
        debug_assert_eq!(offset, old_len, "the heap did not grow contiguously");
        Some(offset)
    }

    fn word_ptr(&self, offset: usize) -> *mut usize {
        assert!(
            offset
                .checked_add(USIZE_SIZE)
                .map_or(false, |end| end <= self.len()),
            "heap word at offset {:#x} is out of bounds",
            offset
        );
        let addr = self.low() + offset;
        debug_assert!(is_aligned(addr, USIZE_ALIGNMENT));
        addr as *mut usize
    }

    pub fn read_word(&self, offset: usize) -> usize {
        // SAFETY: `word_ptr` checked that the word lies inside the heap, which the
        // provider guarantees to be valid and owned by us.
        unsafe { self.word_ptr(offset).read() }
    }

    pub fn write_word(&mut self, offset: usize, value: usize) {
        // SAFETY: see `read_word`.
        unsafe { self.word_ptr(offset).write(value) }
    }

    /// Reads the header of the given block.
    pub fn tag(&self, block: Block) -> BoundaryTag {
        BoundaryTag::unpack(self.read_word(block.offset()))
    }

    /// Reads the footer of the given block, as located by its header.
    pub fn footer(&self, block: Block) -> BoundaryTag {
        let size = self.tag(block).size();
        BoundaryTag::unpack(self.read_word(block.offset() + size - FOOTER_SIZE))
    }

    /// Writes only the header of the given block.
    pub fn write_header(&mut self, block: Block, tag: BoundaryTag) {
        self.write_word(block.offset(), tag.pack());
    }

    /// Writes both the header and the footer of the given block.
    pub fn write_tags(&mut self, block: Block, tag: BoundaryTag) {
        self.write_word(block.offset(), tag.pack());
        self.write_word(block.offset() + tag.size() - FOOTER_SIZE, tag.pack());
    }

    /// Returns the block that physically follows the given block, if the given
    /// block is not the last one in the heap.
    pub fn next_block(&self, block: Block) -> Option<Block> {
        let next = block.offset_by(self.tag(block).size());
        (next.offset() < self.len()).then_some(next)
    }

    /// Returns the block that physically precedes the given block, found through
    /// the footer right before it. `first_block` is the lowest block in the
    /// heap, which has no predecessor.
    pub fn prev_block(&self, block: Block, first_block: Block) -> Option<Block> {
        if block == first_block {
            return None;
        }

        let prev_footer = BoundaryTag::unpack(self.read_word(block.offset() - FOOTER_SIZE));
        let prev = Block::at_offset(block.offset() - prev_footer.size());
        debug_assert_eq!(self.tag(prev), prev_footer, "header and footer disagree");
        Some(prev)
    }

    /// Returns a pointer to the payload of the given block.
    pub fn payload_ptr(&self, block: Block) -> NonNull<u8> {
        let addr = self.low() + block.offset() + HEADER_SIZE;
        // SAFETY: the provider guarantees `heap_low` is non-null, and offsets only
        // grow from there.
        unsafe { NonNull::new_unchecked(addr as *mut u8) }
    }

    /// Returns the block whose payload starts at the given pointer.
    pub fn block_of_payload(&self, payload: NonNull<u8>) -> Block {
        Block::at_offset(payload.as_ptr() as usize - HEADER_SIZE - self.low())
    }
}
