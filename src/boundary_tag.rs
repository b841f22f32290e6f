use crate::ALIGNMENT;

const ALLOCATED_BIT: usize = 1;

/// The size and allocation state of a block, as stored in its header and
/// footer.
///
/// In memory both fields are packed into a single `usize`: block sizes are
/// always multiples of [`ALIGNMENT`], so the lowest bit of the size is free to
/// hold the allocation flag. Packing only happens in [`BoundaryTag::pack`] and
/// [`BoundaryTag::unpack`], everything else works on the two separate fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundaryTag {
    size: usize,
    allocated: bool,
}

impl BoundaryTag {
    /// A tag for a free block of the given size.
    pub fn free(size: usize) -> Self {
        Self::new(size, false)
    }

    /// A tag for an allocated block of the given size.
    pub fn allocated(size: usize) -> Self {
        Self::new(size, true)
    }

    fn new(size: usize, allocated: bool) -> Self {
        debug_assert!(
            size % ALIGNMENT == 0,
            "block size {} is not a multiple of the alignment",
            size
        );
        Self { size, allocated }
    }

    /// The full size of the block, including its header and footer.
    pub fn size(self) -> usize {
        self.size
    }

    pub fn is_allocated(self) -> bool {
        self.allocated
    }

    pub fn is_free(self) -> bool {
        !self.allocated
    }

    /// Packs the tag into the word that is written to the heap.
    pub fn pack(self) -> usize {
        self.size | usize::from(self.allocated)
    }

    /// Reads back a tag packed by [`BoundaryTag::pack`].
    pub fn unpack(word: usize) -> Self {
        Self {
            size: word & !ALLOCATED_BIT,
            allocated: word & ALLOCATED_BIT != 0,
        }
    }
}
