use core::fmt;

use crate::{
    alignment::is_aligned,
    blocks::{Block, HeapArena},
    provider::HeapProvider,
    Allocator, ALIGNMENT, HEADER_SIZE, MIN_BLOCK_SIZE,
};

/// A description of a single block in the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// The address of the block's header.
    pub addr: usize,
    /// The full size of the block, including its header and footer.
    pub size: usize,
    pub allocated: bool,
}

impl BlockInfo {
    /// The address of the block's payload.
    pub fn payload_addr(&self) -> usize {
        self.addr + HEADER_SIZE
    }
}

/// An iterator over all the blocks in the heap, from low to high addresses.
///
/// The walk stops early if it reaches a block whose size would make it run in
/// place or past the end of the heap.
pub struct HeapBlocks<'a, P> {
    arena: &'a HeapArena<P>,
    cursor: Option<Block>,
}

impl<'a, P: HeapProvider> Iterator for HeapBlocks<'a, P> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<BlockInfo> {
        let block = self.cursor.take()?;
        if block.offset() >= self.arena.len() {
            return None;
        }

        let tag = self.arena.tag(block);
        let end = block.offset().checked_add(tag.size())?;
        if tag.size() == 0 || end > self.arena.len() {
            return None;
        }

        self.cursor = Some(block.offset_by(tag.size()));
        Some(BlockInfo {
            addr: self.arena.low() + block.offset(),
            size: tag.size(),
            allocated: tag.is_allocated(),
        })
    }
}

impl<'a, P: HeapProvider> core::iter::FusedIterator for HeapBlocks<'a, P> {}

/// A violation of the heap's structural invariants, found by
/// [`Allocator::check_heap`]. Addresses are those of block headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapInconsistency {
    /// A block size is not a multiple of the alignment, or is smaller than the
    /// minimum block size.
    BadBlockSize { addr: usize, size: usize },
    /// A block extends past the end of the heap.
    BlockOverrunsHeap { addr: usize, size: usize },
    /// The header and footer of a block differ.
    TagMismatch { addr: usize },
    /// Two physically adjacent blocks are both free.
    AdjacentFreeBlocks { addr: usize },
    /// A free block in the heap is missing from the free registry.
    UnregisteredFreeBlock { addr: usize },
    /// The free registry references something which is not a free block.
    BadRegistryEntry { addr: usize },
    /// The free registry holds a different amount of blocks than the heap.
    RegistryCountMismatch { in_heap: usize, in_registry: usize },
}

impl fmt::Display for HeapInconsistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HeapInconsistency::BadBlockSize { addr, size } => {
                write!(f, "block at {:#x} has invalid size {}", addr, size)
            }
            HeapInconsistency::BlockOverrunsHeap { addr, size } => {
                write!(f, "block at {:#x} of size {} overruns the heap", addr, size)
            }
            HeapInconsistency::TagMismatch { addr } => {
                write!(f, "block at {:#x} has a footer that differs from its header", addr)
            }
            HeapInconsistency::AdjacentFreeBlocks { addr } => {
                write!(f, "free block at {:#x} follows another free block", addr)
            }
            HeapInconsistency::UnregisteredFreeBlock { addr } => {
                write!(f, "free block at {:#x} is not in the free registry", addr)
            }
            HeapInconsistency::BadRegistryEntry { addr } => {
                write!(f, "free registry entry {:#x} is not a free block", addr)
            }
            HeapInconsistency::RegistryCountMismatch {
                in_heap,
                in_registry,
            } => write!(
                f,
                "heap has {} free blocks but the free registry has {}",
                in_heap, in_registry
            ),
        }
    }
}

impl<P: HeapProvider> Allocator<P> {
    /// Returns an iterator over all the blocks in the heap, from low to high
    /// addresses. The iterator is empty if the allocator was not initialized.
    pub fn blocks(&self) -> HeapBlocks<'_, P> {
        HeapBlocks {
            arena: &self.arena,
            cursor: self.first_block,
        }
    }

    /// Walks the whole heap and the free registry, and checks that:
    ///
    ///  - the blocks cover the heap exactly, with valid sizes;
    ///  - every header equals its footer;
    ///  - no two adjacent blocks are free;
    ///  - the free registry holds exactly the free blocks of the heap.
    ///
    /// This takes quadratic time in the amount of free blocks.
    pub fn check_heap(&self) -> Result<(), HeapInconsistency> {
        let Some(first_block) = self.first_block else {
            return Ok(());
        };

        let heap_len = self.arena.len();
        let mut cursor = first_block;
        let mut prev_was_free = false;
        let mut free_in_heap = 0;

        while cursor.offset() < heap_len {
            let addr = self.arena.low() + cursor.offset();
            let tag = self.arena.tag(cursor);

            if tag.size() < MIN_BLOCK_SIZE || !is_aligned(tag.size(), ALIGNMENT) {
                return Err(HeapInconsistency::BadBlockSize {
                    addr,
                    size: tag.size(),
                });
            }
            if cursor
                .offset()
                .checked_add(tag.size())
                .map_or(true, |end| end > heap_len)
            {
                return Err(HeapInconsistency::BlockOverrunsHeap {
                    addr,
                    size: tag.size(),
                });
            }
            if self.arena.footer(cursor) != tag {
                return Err(HeapInconsistency::TagMismatch { addr });
            }

            if tag.is_free() {
                if prev_was_free {
                    return Err(HeapInconsistency::AdjacentFreeBlocks { addr });
                }
                let registered = self
                    .registry
                    .iter(&self.arena)
                    .take(self.registry.len() + 1)
                    .any(|block| block == cursor);
                if !registered {
                    return Err(HeapInconsistency::UnregisteredFreeBlock { addr });
                }
                free_in_heap += 1;
            }

            prev_was_free = tag.is_free();
            cursor = cursor.offset_by(tag.size());
        }

        // bounded in case the links form a cycle that skips the sentinel.
        let mut in_registry = 0;
        for block in self.registry.iter(&self.arena).take(free_in_heap + 1) {
            let addr = self.arena.low() + block.offset();
            let is_free_block = self.blocks().any(|info| info.addr == addr && !info.allocated);
            if !is_free_block {
                return Err(HeapInconsistency::BadRegistryEntry { addr });
            }
            in_registry += 1;
        }

        for in_registry in [in_registry, self.registry.len()] {
            if in_registry != free_in_heap {
                return Err(HeapInconsistency::RegistryCountMismatch {
                    in_heap: free_in_heap,
                    in_registry,
                });
            }
        }

        Ok(())
    }
}
