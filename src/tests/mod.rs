mod resize_tests;

use core::{alloc::Layout, ptr::NonNull};
use std::vec::Vec;

use super::*;

/// The padding `init` puts in front of the first block when the heap starts at
/// an address aligned to `ALIGNMENT`.
const INITIAL_PADDING: usize = ALIGNMENT - HEADER_SIZE;

/// A memory region reserved from the system allocator, which is freed when
/// dropped.
struct Region {
    addr: usize,
    layout: Layout,
}

impl Region {
    fn reserve(capacity: usize) -> Self {
        let layout = Layout::from_size_align(capacity, ALIGNMENT).unwrap();
        let addr = unsafe { std::alloc::alloc(layout) as usize };
        assert_ne!(addr, 0, "failed to reserve memory for the test heap");
        Self { addr, layout }
    }

    fn provider(&self) -> FixedRegion {
        unsafe { FixedRegion::new(self.addr, self.layout.size()) }
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        unsafe { std::alloc::dealloc(self.addr as *mut u8, self.layout) }
    }
}

/// A guard that initializes an allocator over a freshly reserved region, and
/// frees that region when dropped.
struct HeapGuard {
    allocator: Allocator<FixedRegion>,
    region: Region,
}

impl HeapGuard {
    fn new(capacity: usize) -> Self {
        let region = Region::reserve(capacity);
        let mut allocator = Allocator::new(region.provider());
        allocator.init().unwrap();
        Self { allocator, region }
    }

    /// The address of the header of the first block in the heap.
    fn first_block_addr(&self) -> usize {
        self.region.addr + INITIAL_PADDING
    }

    fn alloc(&mut self, size: usize) -> NonNull<u8> {
        self.allocator
            .allocate(size)
            .unwrap()
            .expect("non zero allocation returned no object")
    }

    fn release(&mut self, ptr: NonNull<u8>) {
        unsafe { self.allocator.release(Some(ptr)) }
    }

    fn blocks(&self) -> Vec<BlockInfo> {
        self.allocator.blocks().collect()
    }

    fn free_blocks(&self) -> Vec<BlockInfo> {
        self.allocator.blocks().filter(|block| !block.allocated).collect()
    }

    fn block_of(&self, ptr: NonNull<u8>) -> BlockInfo {
        self.allocator
            .blocks()
            .find(|block| block.payload_addr() == ptr.as_ptr() as usize)
            .expect("pointer does not belong to any block")
    }

    #[track_caller]
    fn assert_consistent(&self) {
        if let Err(inconsistency) = self.allocator.check_heap() {
            panic!("heap is inconsistent: {}", inconsistency);
        }
    }

    /// Asserts that the whole heap, after the initial padding, is one free
    /// block.
    #[track_caller]
    fn assert_only_1_free_block(&self) {
        self.assert_consistent();
        assert_eq!(
            self.blocks(),
            vec![BlockInfo {
                addr: self.first_block_addr(),
                size: self.allocator.heap_size() - INITIAL_PADDING,
                allocated: false,
            }]
        );
        assert_eq!(self.allocator.free_block_count(), 1);
    }
}

fn fill(ptr: NonNull<u8>, len: usize, byte: u8) {
    unsafe { ptr.as_ptr().write_bytes(byte, len) }
}

#[track_caller]
fn assert_filled(ptr: NonNull<u8>, len: usize, byte: u8) {
    let content = unsafe { core::slice::from_raw_parts(ptr.as_ptr(), len) };
    assert!(
        content.iter().all(|&b| b == byte),
        "payload at {:p} was overwritten",
        ptr
    );
}
