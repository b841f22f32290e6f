#![no_std]

//! This is a first-fit memory allocator built on boundary tags, providing the
//! classic `malloc`, `free` and `realloc` trio over a single contiguous heap.
//! The heap is obtained from a [`HeapProvider`], which can only grow it at its
//! high end, in the same way `sbrk` moves the program break. Memory is never
//! returned to the provider.
//!
//! ## Block layout
//!
//! Every block starts with a header word and ends with a footer word, both
//! holding the block's size with the allocation flag packed into the lowest
//! bit. Free blocks additionally store the links of the free registry right
//! after their header. Block sizes are multiples of [`ALIGNMENT`] and at least
//! [`MIN_BLOCK_SIZE`], and payloads are always aligned to [`ALIGNMENT`].
//!
//! ```text
//!   allocated:  | header | payload ...                   | footer |
//!   free:       | header | next | prev | ...             | footer |
//! ```
//!
//! Free blocks are kept in a circular doubly linked list, and allocations take
//! the first free block that is large enough, splitting off the rest if it is
//! big enough to be a block of its own. On release, the footers let a block
//! find its left neighbour in constant time, so adjacent free blocks are always
//! merged immediately.
//!
//! ## Usage
//!
//! ```ignore
//! use boundary_tag_allocator::{Allocator, FixedRegion};
//!
//! let region = unsafe { FixedRegion::new(heap_start, heap_size) };
//! let mut allocator = Allocator::new(region);
//! allocator.init()?;
//!
//! let ptr = allocator.allocate(40)?;
//! unsafe { allocator.release(ptr) };
//! ```
//!
//! The allocator itself is single threaded; every operation takes `&mut self`.
//!
//! ## Features
//!
//! - **`spin`** (default): Provide a `SpinLockedAllocator` type that implements
//!   the `GlobalAlloc` trait by using a spinlock.

#[cfg(test)]
#[macro_use]
extern crate std;

mod alignment;
mod blocks;
mod boundary_tag;
mod check;
mod free_registry;
mod provider;

#[cfg(test)]
mod tests;

use core::{fmt, ptr::NonNull};

use alignment::checked_align_up;
use blocks::*;
use boundary_tag::BoundaryTag;
pub use check::{BlockInfo, HeapBlocks, HeapInconsistency};
use free_registry::FreeRegistry;
pub use provider::{FixedRegion, HeapProvider};
use static_assertions::const_assert;

/// The alignment of every payload, and the granularity of every block size.
pub const ALIGNMENT: usize = 16;

/// The size of the smallest block, including its header and footer.
pub const MIN_BLOCK_SIZE: usize = 32;

const USIZE_ALIGNMENT: usize = core::mem::align_of::<usize>();
const USIZE_SIZE: usize = core::mem::size_of::<usize>();
const HEADER_SIZE: usize = USIZE_SIZE;
const FOOTER_SIZE: usize = USIZE_SIZE;
const BLOCK_OVERHEAD: usize = HEADER_SIZE + FOOTER_SIZE;

const_assert!(ALIGNMENT.is_power_of_two());
// the allocation flag lives in the lowest bit of the size.
const_assert!(ALIGNMENT >= 2);
const_assert!(MIN_BLOCK_SIZE % ALIGNMENT == 0);
// a free block must fit its header, both registry links and its footer.
const_assert!(MIN_BLOCK_SIZE >= HEADER_SIZE + 2 * USIZE_SIZE + FOOTER_SIZE);
const_assert!(ALIGNMENT % USIZE_ALIGNMENT == 0);

/// The reasons an allocation can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// The heap-growth provider could not supply more memory.
    HeapExhausted,
    /// The requested size is too large to be represented as a block.
    SizeOverflow,
    /// The allocator was used before `init` succeeded.
    Uninitialized,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocError::HeapExhausted => f.write_str("the heap could not be grown any further"),
            AllocError::SizeOverflow => f.write_str("the requested size is too large"),
            AllocError::Uninitialized => f.write_str("the allocator was not initialized"),
        }
    }
}

/// A first-fit, boundary tag memory allocator over a heap supplied by a
/// [`HeapProvider`].
#[derive(Debug)]
pub struct Allocator<P: HeapProvider> {
    arena: HeapArena<P>,
    registry: FreeRegistry,
    first_block: Option<Block>,
}

impl<P: HeapProvider> Allocator<P> {
    /// Creates an allocator which will take its heap from the given provider.
    ///
    /// To initialize this allocator, use the `init` method.
    pub const fn new(provider: P) -> Self {
        Self {
            arena: HeapArena::new(provider),
            registry: FreeRegistry::new(),
            first_block: None,
        }
    }

    /// Checks if the allocator was already initialized by calling `init`.
    pub fn was_initialized(&self) -> bool {
        self.first_block.is_some()
    }

    /// Returns the heap-growth provider of this allocator.
    pub fn provider(&self) -> &P {
        self.arena.provider()
    }

    /// Initializes the allocator.
    ///
    /// Blocks are laid out starting at the current end of the provider's heap.
    /// The heap is first grown by just enough bytes that the payload of the first
    /// block is aligned to [`ALIGNMENT`].
    ///
    /// If the allocator was already initialized, this function will panic.
    pub fn init(&mut self) -> Result<(), AllocError> {
        if self.was_initialized() {
            panic!("the heap was already initialized");
        }

        let heap_high = self.arena.low() + self.arena.len();
        let first_payload_addr = heap_high
            .checked_add(HEADER_SIZE)
            .and_then(|addr| checked_align_up(addr, ALIGNMENT))
            .ok_or(AllocError::HeapExhausted)?;
        let padding = first_payload_addr - HEADER_SIZE - heap_high;

        let Some(padding_offset) = self.arena.grow(padding) else {
            log::warn!("failed to grow the heap by {} bytes of initial padding", padding);
            return Err(AllocError::HeapExhausted);
        };

        self.registry = FreeRegistry::new();
        self.first_block = Some(Block::at_offset(padding_offset + padding));

        log::debug!(
            "initialized heap at {:#x}, first block at offset {:#x}",
            self.arena.low(),
            padding_offset + padding
        );

        Ok(())
    }

    /// Allocates a block with room for at least `size` bytes of payload.
    ///
    /// Returns `Ok(None)` if `size` is 0.
    pub fn allocate(&mut self, size: usize) -> Result<Option<NonNull<u8>>, AllocError> {
        if !self.was_initialized() {
            return Err(AllocError::Uninitialized);
        }

        if size == 0 {
            return Ok(None);
        }

        self.allocate_non_zero(size).map(Some)
    }

    fn allocate_non_zero(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        let required_size = required_block_size(size).ok_or(AllocError::SizeOverflow)?;

        let block = match self.registry.find_first_fit(&self.arena, required_size) {
            Some(block) => {
                self.place(block, required_size);
                block
            }
            None => self.grow_allocated_block(required_size)?,
        };

        Ok(self.arena.payload_ptr(block))
    }

    /// Grows the heap by exactly `size` bytes and formats the new region as a
    /// single allocated block.
    fn grow_allocated_block(&mut self, size: usize) -> Result<Block, AllocError> {
        let Some(offset) = self.arena.grow(size) else {
            log::warn!("failed to grow the heap by {} bytes", size);
            return Err(AllocError::HeapExhausted);
        };

        log::trace!("grew the heap by {} bytes at offset {:#x}", size, offset);

        let block = Block::at_offset(offset);
        self.arena.write_tags(block, BoundaryTag::allocated(size));
        Ok(block)
    }

    /// Allocates `required_size` bytes from the start of the given free block.
    ///
    /// If the rest of the block is large enough to form a block, it is split
    /// off as a new free block which takes the place of the given block in the
    /// free registry. Otherwise the whole block is allocated.
    fn place(&mut self, block: Block, required_size: usize) {
        let block_size = self.arena.tag(block).size();
        debug_assert!(block_size >= required_size);

        let remainder_size = block_size - required_size;
        if remainder_size >= MIN_BLOCK_SIZE {
            let remainder = block.offset_by(required_size);
            self.arena
                .write_tags(remainder, BoundaryTag::free(remainder_size));
            self.registry.replace(&mut self.arena, block, remainder);
            self.arena
                .write_tags(block, BoundaryTag::allocated(required_size));
        } else {
            self.registry.remove(&mut self.arena, block);
            self.arena
                .write_tags(block, BoundaryTag::allocated(block_size));
        }
    }

    /// Releases a block previously returned from `allocate` or `resize`.
    ///
    /// Releasing `None` does nothing.
    ///
    /// # Safety
    ///
    /// `ptr` must be `None` or a pointer returned by this allocator which has
    /// not been released yet.
    pub unsafe fn release(&mut self, ptr: Option<NonNull<u8>>) {
        let Some(ptr) = ptr else {
            return;
        };

        let block = self.arena.block_of_payload(ptr);
        let tag = self.arena.tag(block);
        debug_assert!(tag.is_allocated(), "releasing a block which is already free");

        self.arena.write_tags(block, BoundaryTag::free(tag.size()));
        self.registry.insert(&mut self.arena, block);
        self.coalesce(block);
    }

    /// Merges the given free block with its free physical neighbours, and
    /// returns the block that covers the merged region.
    fn coalesce(&mut self, block: Block) -> Block {
        let mut merged = block;
        let mut merged_size = self.arena.tag(block).size();

        // the right neighbour goes first, the left lookup only depends on where
        // `block` starts.
        if let Some(next) = self.arena.next_block(block) {
            let next_tag = self.arena.tag(next);
            if next_tag.is_free() {
                self.registry.remove(&mut self.arena, next);
                merged_size += next_tag.size();
                self.arena
                    .write_header(block, BoundaryTag::free(merged_size));
            }
        }

        if let Some(first_block) = self.first_block {
            if let Some(prev) = self.arena.prev_block(block, first_block) {
                let prev_tag = self.arena.tag(prev);
                if prev_tag.is_free() {
                    self.registry.remove(&mut self.arena, block);
                    merged_size += prev_tag.size();
                    merged = prev;
                }
            }
        }

        self.arena
            .write_tags(merged, BoundaryTag::free(merged_size));
        merged
    }

    /// Resizes a block previously returned from `allocate` or `resize`.
    ///
    /// Resizing `None` allocates, and resizing to 0 releases and returns
    /// `Ok(None)`. If the payload size of the block already equals `size`, the
    /// same pointer is returned. Otherwise a new block is allocated, the payload
    /// is copied over and the old block is released.
    ///
    /// If the new allocation fails, the original block is left untouched.
    ///
    /// # Safety
    ///
    /// `ptr` must be `None` or a pointer returned by this allocator which has
    /// not been released yet.
    pub unsafe fn resize(
        &mut self,
        ptr: Option<NonNull<u8>>,
        size: usize,
    ) -> Result<Option<NonNull<u8>>, AllocError> {
        let Some(old_ptr) = ptr else {
            return self.allocate(size);
        };

        if size == 0 {
            self.release(Some(old_ptr));
            return Ok(None);
        }

        let old_size = self.usable_size(old_ptr);
        if old_size == size {
            return Ok(Some(old_ptr));
        }

        let new_ptr = self.allocate_non_zero(size)?;

        // SAFETY: the old block is still allocated, so the new block cannot overlap
        // it, and both payloads hold at least the copied amount of bytes.
        core::ptr::copy_nonoverlapping(
            old_ptr.as_ptr(),
            new_ptr.as_ptr(),
            core::cmp::min(old_size, size),
        );
        self.release(Some(old_ptr));

        Ok(Some(new_ptr))
    }

    /// The amount of payload bytes available in the given allocated block.
    ///
    /// # Safety
    ///
    /// `ptr` must be a pointer returned by this allocator which has not been
    /// released yet.
    pub unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        let block = self.arena.block_of_payload(ptr);
        self.arena.tag(block).size() - BLOCK_OVERHEAD
    }

    /// The amount of blocks that are currently free.
    pub fn free_block_count(&self) -> usize {
        self.registry.len()
    }

    /// The current size of the heap in bytes, including the initial padding.
    pub fn heap_size(&self) -> usize {
        self.arena.len()
    }
}

/// A spin locked memory allocator that can be used as the global allocator.
#[cfg(feature = "spin")]
pub struct SpinLockedAllocator<P: HeapProvider>(spin::Mutex<Allocator<P>>);

#[cfg(feature = "spin")]
impl<P: HeapProvider> SpinLockedAllocator<P> {
    /// Creates a locked allocator which will take its heap from the given
    /// provider.
    ///
    /// Until `init` is called, allocation requests return null.
    pub const fn new(provider: P) -> Self {
        Self(spin::Mutex::new(Allocator::new(provider)))
    }

    /// Replaces the provider with the given one and initializes the allocator.
    ///
    /// If the allocator was already initialized, this function will panic.
    pub fn init(&self, provider: P) -> Result<(), AllocError> {
        let mut allocator = self.0.lock();
        if allocator.was_initialized() {
            panic!("the heap was already initialized");
        }
        *allocator = Allocator::new(provider);
        allocator.init()
    }

    /// Checks if the allocator was already initialized by calling init.
    pub fn was_initialized(&self) -> bool {
        let allocator = self.0.lock();
        allocator.was_initialized()
    }

    /// Locks the allocator and runs the given closure on it.
    pub fn with_locked<R>(&self, f: impl FnOnce(&mut Allocator<P>) -> R) -> R {
        let mut allocator = self.0.lock();
        f(&mut allocator)
    }
}

#[cfg(feature = "spin")]
unsafe impl<P: HeapProvider> core::alloc::GlobalAlloc for SpinLockedAllocator<P> {
    unsafe fn alloc(&self, layout: core::alloc::Layout) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return core::ptr::null_mut();
        }

        let mut allocator = self.0.lock();
        match allocator.allocate(layout.size()) {
            Ok(Some(ptr)) => ptr.as_ptr(),
            Ok(None) | Err(_) => core::ptr::null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: core::alloc::Layout) {
        let mut allocator = self.0.lock();
        allocator.release(NonNull::new(ptr))
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: core::alloc::Layout, new_size: usize) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return core::ptr::null_mut();
        }

        let mut allocator = self.0.lock();
        match allocator.resize(NonNull::new(ptr), new_size) {
            Ok(Some(ptr)) => ptr.as_ptr(),
            Ok(None) | Err(_) => core::ptr::null_mut(),
        }
    }
}
