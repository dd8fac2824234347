//! Typed allocator adapter over a shared fixed-block pool.
//!
//! [`PoolAllocator<T>`] gives containers and handles a typed allocation
//! surface backed by one [`LockFreeFixedPool`]. Single-object requests that
//! fit the pool's block size take the pool fast path; anything else falls
//! back to the global allocator with a warning. The routing decision is made
//! per call and `deallocate` re-derives it from the pointer itself
//! (`n == 1 && owns(ptr)`), so pool and fallback allocations can be freely
//! intermixed.
//!
//! The underlying pool is held through an `Arc`: copies of the allocator —
//! including rebound ones for a different element type — share it, and it
//! outlives every user.

use std::alloc::{Layout, alloc, dealloc, handle_alloc_error};
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::sync::Arc;

use tracing::warn;

use crate::align::MAX_ALIGN;
use crate::concurrent::LockFreeFixedPool;
use crate::error::PoolError;
use crate::stats::StatsSnapshot;

/// Structural contract a pool must satisfy to back a [`PoolAllocator`].
///
/// This is the allocator seam: `allocate_block`/`deallocate_block` mirror
/// the pool surface, `owns` drives the per-call routing decision, and
/// `block_size` bounds what a single block can hold.
pub trait RawPool {
    /// Hand out one raw block, or `None` when exhausted.
    fn allocate_block(&self) -> Option<NonNull<u8>>;

    /// Return one block previously obtained from `allocate_block`.
    fn deallocate_block(&self, ptr: NonNull<u8>);

    /// Whether `ptr` points into this pool's arena.
    fn owns(&self, ptr: *const u8) -> bool;

    /// Size of one block in bytes.
    fn block_size(&self) -> usize;
}

impl RawPool for LockFreeFixedPool {
    fn allocate_block(&self) -> Option<NonNull<u8>> {
        self.allocate()
    }

    fn deallocate_block(&self, ptr: NonNull<u8>) {
        self.deallocate(ptr)
    }

    fn owns(&self, ptr: *const u8) -> bool {
        LockFreeFixedPool::owns(self, ptr)
    }

    fn block_size(&self) -> usize {
        LockFreeFixedPool::block_size(self)
    }
}

/// Typed allocator over a shared fixed-block pool.
///
/// Equality compares pool identity: two allocators are equal iff they draw
/// from the same pool instance, regardless of element type.
pub struct PoolAllocator<T> {
    pool: Arc<LockFreeFixedPool>,
    _marker: PhantomData<T>,
}

impl<T> PoolAllocator<T> {
    /// Create an allocator with a private pool of `block_count` blocks sized
    /// for `T`.
    pub fn new(block_count: usize) -> Result<Self, PoolError> {
        let pool = LockFreeFixedPool::new(size_of::<T>().max(1), block_count)?;
        Ok(Self::with_pool(Arc::new(pool)))
    }

    /// Create an allocator over an externally shared pool.
    #[must_use]
    pub fn with_pool(pool: Arc<LockFreeFixedPool>) -> Self {
        Self {
            pool,
            _marker: PhantomData,
        }
    }

    /// Allocate storage for `n` values of `T`.
    ///
    /// `n == 1` with `T` fitting one block routes to the pool; an exhausted
    /// pool is reported as [`PoolError::Exhausted`]. Larger requests, and
    /// types whose size or alignment exceeds what a block can hold, fall
    /// back to the global allocator. Blocks are only [`MAX_ALIGN`]-aligned,
    /// so over-aligned types must never take the pool path.
    ///
    /// The storage is uninitialized; callers placement-write values and must
    /// drop them in place before `deallocate`.
    pub fn allocate(&self, n: usize) -> Result<NonNull<T>, PoolError> {
        if n == 0 {
            return Ok(NonNull::dangling());
        }

        if n == 1 && size_of::<T>() <= self.pool.block_size() && align_of::<T>() <= MAX_ALIGN {
            return self
                .pool
                .allocate_block()
                .map(NonNull::cast)
                .ok_or(PoolError::Exhausted);
        }

        warn!(
            n,
            value_size = size_of::<T>(),
            value_align = align_of::<T>(),
            block_size = self.pool.block_size(),
            "request does not fit pool granularity, using the global allocator"
        );
        self.global_allocate(n)
    }

    /// Release storage for `n` values previously obtained from
    /// [`allocate`](Self::allocate) with the same `n`.
    ///
    /// Routing is re-derived per call: the pool takes the pointer iff
    /// `n == 1` and the pointer lies in its arena, otherwise the global
    /// allocator frees it.
    pub fn deallocate(&self, ptr: NonNull<T>, n: usize) {
        if n == 0 {
            return;
        }

        if n == 1 && self.pool.owns(ptr.as_ptr().cast()) {
            self.pool.deallocate_block(ptr.cast());
            return;
        }

        // Fallback allocations always come from the global allocator with
        // this exact layout.
        let Ok(layout) = Layout::array::<T>(n) else {
            warn!(n, "deallocate with a layout that could never have been allocated");
            return;
        };
        if layout.size() == 0 {
            return;
        }
        unsafe {
            dealloc(ptr.as_ptr().cast(), layout);
        }
    }

    /// Produce an allocator for element type `U` drawing from the same pool.
    ///
    /// Required for node-based containers whose internal node type differs
    /// from `T`. Values of `U` larger than the pool's block size simply take
    /// the fallback path on every allocation.
    #[must_use]
    pub fn rebind<U>(&self) -> PoolAllocator<U> {
        PoolAllocator {
            pool: Arc::clone(&self.pool),
            _marker: PhantomData,
        }
    }

    /// The shared pool backing this allocator.
    #[must_use]
    pub fn pool(&self) -> &Arc<LockFreeFixedPool> {
        &self.pool
    }

    /// Counters of the backing pool.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.pool.stats()
    }

    fn global_allocate(&self, n: usize) -> Result<NonNull<T>, PoolError> {
        let layout = Layout::array::<T>(n).map_err(|_| PoolError::InvalidConfig {
            reason: format!("array layout overflows: {n} * {}", size_of::<T>()),
        })?;
        if layout.size() == 0 {
            return Ok(NonNull::dangling());
        }
        let ptr = unsafe { alloc(layout) };
        match NonNull::new(ptr.cast::<T>()) {
            Some(ptr) => Ok(ptr),
            None => handle_alloc_error(layout),
        }
    }
}

impl<T> Clone for PoolAllocator<T> {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
            _marker: PhantomData,
        }
    }
}

impl<T> PartialEq for PoolAllocator<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.pool, &other.pool)
    }
}

impl<T> Eq for PoolAllocator<T> {}

impl<T> std::fmt::Debug for PoolAllocator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolAllocator")
            .field("block_size", &self.pool.block_size())
            .field("capacity", &self.pool.capacity())
            .finish()
    }
}

/// Owned, pool-backed value. Returns its block to the pool on drop.
///
/// The typed counterpart of handing out raw blocks: construction
/// placement-writes the value, drop runs the destructor in place and
/// releases the storage.
pub struct PoolBox<T> {
    ptr: NonNull<T>,
    allocator: PoolAllocator<T>,
}

impl<T> PoolBox<T> {
    /// Move `value` into pool-backed storage.
    pub fn new(allocator: &PoolAllocator<T>, value: T) -> Result<Self, PoolError> {
        let ptr = allocator.allocate(1)?;
        unsafe {
            ptr.as_ptr().write(value);
        }
        Ok(Self {
            ptr,
            allocator: allocator.clone(),
        })
    }
}

impl<T> Deref for PoolBox<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // Safety: ptr holds a live T for the lifetime of the box.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T> DerefMut for PoolBox<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // Safety: ptr holds a live T and we have exclusive access.
        unsafe { self.ptr.as_mut() }
    }
}

impl<T> Drop for PoolBox<T> {
    fn drop(&mut self) {
        unsafe {
            self.ptr.as_ptr().drop_in_place();
        }
        self.allocator.deallocate(self.ptr, 1);
    }
}

// Safety: PoolBox owns its value; the pool itself is Sync.
unsafe impl<T: Send> Send for PoolBox<T> {}
unsafe impl<T: Sync> Sync for PoolBox<T> {}
