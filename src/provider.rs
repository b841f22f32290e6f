/// The source of heap memory for an [`Allocator`](crate::Allocator).
///
/// A provider manages one contiguous region that starts at
/// [`heap_low`](HeapProvider::heap_low) and ends right before
/// [`heap_high`](HeapProvider::heap_high). The region only ever grows, at its
/// high end, through [`grow`](HeapProvider::grow).
///
/// # Safety
///
/// Implementors must guarantee that:
///
///  - `heap_low` is non-null and does not change once the first `grow` call has
///    succeeded.
///  - Every byte in `heap_low()..heap_high()` is valid for reads and writes and
///    is not used by anything other than the allocator that owns the provider.
///  - A successful `grow(n)` returns the previous `heap_high()` and advances
///    `heap_high()` by exactly `n`.
pub unsafe trait HeapProvider {
    /// Extends the heap by `bytes` bytes and returns the address where the new
    /// region starts, or `None` if no more memory is available.
    fn grow(&mut self, bytes: usize) -> Option<usize>;

    /// The lowest valid heap address.
    fn heap_low(&self) -> usize;

    /// One past the highest valid heap address.
    fn heap_high(&self) -> usize;
}

/// A heap-growth provider over a fixed, pre-reserved memory range.
///
/// The range is handed out front to back by moving a break offset, in the
/// same way `sbrk` moves the program break. Growing past the end of the range
/// fails.
#[derive(Debug)]
pub struct FixedRegion {
    start_addr: usize,
    capacity: usize,
    brk: usize,
}

impl FixedRegion {
    /// Creates a provider without any memory, which refuses every growth
    /// request.
    pub const fn empty() -> Self {
        Self {
            start_addr: 0,
            capacity: 0,
            brk: 0,
        }
    }

    /// Creates a provider that hands out the memory range
    /// `start_addr..start_addr + capacity`.
    ///
    /// # Safety
    ///
    /// The memory range must be valid for reads and writes, must not be used by
    /// anything else, and must stay valid for as long as the provider (and any
    /// pointer allocated from it) is in use.
    pub const unsafe fn new(start_addr: usize, capacity: usize) -> Self {
        Self {
            start_addr,
            capacity,
            brk: 0,
        }
    }

    /// The total amount of bytes this provider can hand out.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The amount of bytes that can still be handed out.
    pub fn remaining(&self) -> usize {
        self.capacity - self.brk
    }
}

unsafe impl HeapProvider for FixedRegion {
    fn grow(&mut self, bytes: usize) -> Option<usize> {
        if self.start_addr == 0 {
            return None;
        }

        let new_brk = self.brk.checked_add(bytes)?;
        if new_brk > self.capacity {
            return None;
        }

        let region_start = self.start_addr + self.brk;
        self.brk = new_brk;
        Some(region_start)
    }

    fn heap_low(&self) -> usize {
        self.start_addr
    }

    fn heap_high(&self) -> usize {
        self.start_addr + self.brk
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_region_never_grows() {
        let mut region = FixedRegion::empty();
        assert_eq!(region.grow(0), None);
        assert_eq!(region.grow(16), None);
        assert_eq!(region.heap_high(), region.heap_low());
    }

    #[test]
    fn grow_returns_previous_high_and_advances_it() {
        // the region is never dereferenced, so any non-null address will do.
        let mut region = unsafe { FixedRegion::new(0x1000, 256) };

        assert_eq!(region.grow(64), Some(0x1000));
        assert_eq!(region.heap_high(), 0x1040);
        assert_eq!(region.grow(32), Some(0x1040));
        assert_eq!(region.heap_high(), 0x1060);
        assert_eq!(region.heap_low(), 0x1000);
        assert_eq!(region.remaining(), 256 - 96);
    }

    #[test]
    fn grow_past_capacity_fails_without_moving_the_break() {
        let mut region = unsafe { FixedRegion::new(0x1000, 128) };

        assert_eq!(region.grow(96), Some(0x1000));
        assert_eq!(region.grow(48), None);
        assert_eq!(region.heap_high(), 0x1060);
        assert_eq!(region.grow(usize::MAX), None);
        assert_eq!(region.grow(32), Some(0x1060));
        assert_eq!(region.remaining(), 0);
    }
}
