//! Raw arena buffer shared by the pool implementations.
//!
//! One contiguous allocation, owned for the lifetime of the pool, freed
//! exactly once on drop. Never resized.

use std::alloc::{Layout, alloc, dealloc};
use std::ptr::NonNull;

use crate::error::PoolError;

/// Exclusively-owned contiguous byte buffer.
pub(crate) struct RawArena {
    data: NonNull<u8>,
    layout: Layout,
}

// Safety: the arena is a plain byte buffer; the owning pool decides how
// access is synchronized.
unsafe impl Send for RawArena {}
unsafe impl Sync for RawArena {}

impl RawArena {
    /// Allocate `size` bytes at `align` alignment from the global allocator.
    pub(crate) fn new(size: usize, align: usize) -> Result<Self, PoolError> {
        let layout = Layout::from_size_align(size, align)
            .map_err(|_| PoolError::InvalidLayout { size, align })?;

        let data = unsafe {
            let ptr = alloc(layout);
            NonNull::new(ptr).ok_or(PoolError::AllocationFailed { bytes: size })?
        };

        Ok(Self { data, layout })
    }

    /// Base address of the buffer.
    #[inline]
    pub(crate) fn base(&self) -> NonNull<u8> {
        self.data
    }

    /// Buffer length in bytes.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.layout.size()
    }

    /// Whether `ptr` falls inside `[base, base + len)`.
    #[inline]
    pub(crate) fn contains(&self, ptr: *const u8) -> bool {
        let addr = ptr as usize;
        let start = self.data.as_ptr() as usize;
        addr >= start && addr < start + self.layout.size()
    }
}

impl Drop for RawArena {
    fn drop(&mut self) {
        unsafe {
            dealloc(self.data.as_ptr(), self.layout);
        }
    }
}
