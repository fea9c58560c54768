//! Unpack Buffer Allocation
//!
//! The decompressor does not decide where section memory comes from. It asks
//! a [`SectionAllocator`] for a zeroed buffer and hands it back on failure.

use alloc::vec::Vec;

/// Allocator for unpacked section buffers
pub trait SectionAllocator {
    /// Allocate `len` zeroed bytes, `None` if memory is exhausted
    fn allocate(&self, len: usize) -> Option<Vec<u8>>;

    /// Return a buffer obtained from [`allocate`](Self::allocate)
    fn release(&self, buffer: Vec<u8>) {
        drop(buffer);
    }
}

impl<A: SectionAllocator + ?Sized> SectionAllocator for &A {
    fn allocate(&self, len: usize) -> Option<Vec<u8>> {
        (**self).allocate(len)
    }

    fn release(&self, buffer: Vec<u8>) {
        (**self).release(buffer)
    }
}

/// Heap-backed allocator that reports exhaustion instead of aborting
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemAllocator;

impl SectionAllocator for SystemAllocator {
    fn allocate(&self, len: usize) -> Option<Vec<u8>> {
        let mut buffer = Vec::new();
        buffer.try_reserve_exact(len).ok()?;
        buffer.resize(len, 0);
        Some(buffer)
    }
}

// =============================================================================
// TESTS
// =============================================================================
