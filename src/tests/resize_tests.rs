use super::*;

#[test]
fn resize_none_allocates() {
    let mut guard = HeapGuard::new(256);

    let ptr = unsafe { guard.allocator.resize(None, 40) }.unwrap().unwrap();

    assert!(guard.block_of(ptr).allocated);
    assert!(unsafe { guard.allocator.usable_size(ptr) } >= 40);
    guard.assert_consistent();
}

#[test]
fn resize_none_to_zero_returns_no_object() {
    let mut guard = HeapGuard::new(256);

    assert_eq!(unsafe { guard.allocator.resize(None, 0) }, Ok(None));
    assert_eq!(guard.allocator.heap_size(), INITIAL_PADDING);
}

#[test]
fn resize_to_zero_releases() {
    let mut guard = HeapGuard::new(256);

    let ptr = guard.alloc(40);
    assert_eq!(unsafe { guard.allocator.resize(Some(ptr), 0) }, Ok(None));

    guard.assert_only_1_free_block();
}

#[test]
fn resize_to_same_payload_size_returns_same_pointer() {
    let mut guard = HeapGuard::new(256);

    let ptr = guard.alloc(64 - BLOCK_OVERHEAD);
    let heap_size = guard.allocator.heap_size();

    let resized = unsafe { guard.allocator.resize(Some(ptr), 64 - BLOCK_OVERHEAD) };

    assert_eq!(resized, Ok(Some(ptr)));
    assert_eq!(guard.allocator.heap_size(), heap_size);
    guard.assert_consistent();
}

#[test]
fn resize_shrink_preserves_prefix() {
    let mut guard = HeapGuard::new(1024);

    let ptr = guard.alloc(200);
    fill(ptr, 200, 0xab);

    let shrunk = unsafe { guard.allocator.resize(Some(ptr), 50) }
        .unwrap()
        .unwrap();

    assert_filled(shrunk, 50, 0xab);
    assert!(unsafe { guard.allocator.usable_size(shrunk) } >= 50);
    guard.assert_consistent();
}

#[test]
fn resize_grow_preserves_data() {
    let mut guard = HeapGuard::new(1024);

    let ptr = guard.alloc(40);
    let old_size = unsafe { guard.allocator.usable_size(ptr) };
    fill(ptr, old_size, 0x5a);
    let _next = guard.alloc(8);

    let grown = unsafe { guard.allocator.resize(Some(ptr), 300) }
        .unwrap()
        .unwrap();

    // there is no room after the old block, so the data moved.
    assert_ne!(grown, ptr);
    assert_filled(grown, old_size, 0x5a);
    assert!(unsafe { guard.allocator.usable_size(grown) } >= 300);

    // the old block was released.
    assert!(!guard.block_of(ptr).allocated);
    guard.assert_consistent();
}

#[test]
fn resize_reuses_free_blocks() {
    let mut guard = HeapGuard::new(1024);

    let big = guard.alloc(200);
    let _separator = guard.alloc(8);
    let small = guard.alloc(8);
    fill(small, 8, 0x11);
    guard.release(big);

    let heap_size = guard.allocator.heap_size();
    let grown = unsafe { guard.allocator.resize(Some(small), 100) }
        .unwrap()
        .unwrap();

    assert_eq!(grown, big);
    assert_filled(grown, 8, 0x11);
    assert_eq!(guard.allocator.heap_size(), heap_size);
    guard.assert_consistent();
}

#[test]
fn resize_failure_leaves_the_block_untouched() {
    let mut guard = HeapGuard::new(256);

    let ptr = guard.alloc(40);
    fill(ptr, 40, 0x77);
    let block = guard.block_of(ptr);

    let result = unsafe { guard.allocator.resize(Some(ptr), 4096) };

    assert_eq!(result, Err(AllocError::HeapExhausted));
    assert_filled(ptr, 40, 0x77);
    assert_eq!(guard.block_of(ptr), block);
    assert_eq!(guard.allocator.free_block_count(), 0);
    guard.assert_consistent();
}
