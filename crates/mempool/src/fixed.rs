//! Fixed-block pool: one arena split into equal blocks, managed by an
//! index-based free list.
//!
//! The free list lives in a side array of indices rather than inside the
//! blocks themselves, so free blocks are never reinterpreted as pointers.
//! Allocation and deallocation are O(1): pop/push of the list head.
//!
//! # Memory layout
//! ```text
//! ┌────────┬────────┬────────┬────────┐
//! │ Block0 │ Block1 │ Block2 │ Block3 │   arena (one allocation)
//! └────────┴────────┴────────┴────────┘
//!   next[0] → next[1] → next[2] → NIL     side free list
//! ```
//!
//! # Known risks
//! `deallocate` only range-checks the pointer. Double-free and freeing a
//! pointer that was never returned by `allocate` corrupt the free list
//! silently — this is a documented simplification, not a guarantee.

use std::ptr::NonNull;

use tracing::{debug, error, warn};

use crate::align::{MAX_ALIGN, align_up};
use crate::arena::RawArena;
use crate::error::PoolError;
use crate::stats::MemoryStats;

/// Sentinel index terminating the free list.
const NIL: usize = usize::MAX;

/// Single-threaded fixed-block pool.
///
/// All blocks have the same size, rounded up to at least one pointer width
/// and a multiple of [`MAX_ALIGN`]. The pool never constructs or destroys
/// objects; callers placement-write into the returned blocks and are
/// responsible for running destructors before `deallocate`.
pub struct FixedBlockPool {
    arena: RawArena,
    block_size: usize,
    block_count: usize,
    /// Head of the free list, `NIL` when exhausted.
    free_head: usize,
    /// `next[i]` is the free-list successor of block `i`. Only meaningful
    /// while block `i` is free.
    next: Box<[usize]>,
    used_blocks: usize,
    stats: MemoryStats,
}

impl FixedBlockPool {
    /// Create a pool of `block_count` blocks of (at least) `block_size` bytes.
    ///
    /// The effective block size is reported by [`block_size`](Self::block_size)
    /// after rounding.
    pub fn new(block_size: usize, block_count: usize) -> Result<Self, PoolError> {
        if block_count == 0 {
            return Err(PoolError::InvalidConfig {
                reason: "block_count must be > 0".into(),
            });
        }

        let block_size = align_up(block_size.max(size_of::<usize>()), MAX_ALIGN);
        let total_size = block_size
            .checked_mul(block_count)
            .ok_or_else(|| PoolError::InvalidConfig {
                reason: format!("arena size overflows: {block_size} * {block_count}"),
            })?;

        let arena = RawArena::new(total_size, MAX_ALIGN)?;

        // Thread the free list back to front so block 0 is handed out first.
        let mut next = vec![NIL; block_count].into_boxed_slice();
        let mut free_head = NIL;
        for i in (0..block_count).rev() {
            next[i] = free_head;
            free_head = i;
        }

        debug!(
            block_size,
            block_count, total_size, "fixed-block pool initialized"
        );

        Ok(Self {
            arena,
            block_size,
            block_count,
            free_head,
            next,
            used_blocks: 0,
            stats: MemoryStats::new(),
        })
    }

    /// Pop one block off the free list.
    ///
    /// Returns `None` when the pool is exhausted. O(1), never touches the
    /// heap after construction.
    pub fn allocate(&mut self) -> Option<NonNull<u8>> {
        if self.free_head == NIL {
            warn!(
                capacity = self.block_count,
                "fixed-block pool exhausted"
            );
            return None;
        }

        let index = self.free_head;
        self.free_head = self.next[index];
        self.used_blocks += 1;
        self.stats.record_allocation(self.block_size);

        Some(self.block_ptr(index))
    }

    /// Push a block back onto the free list.
    ///
    /// Pointers outside the arena are reported and ignored; the free list is
    /// left untouched. Double-free is not detected.
    pub fn deallocate(&mut self, ptr: NonNull<u8>) {
        if !self.owns(ptr.as_ptr()) {
            error!(ptr = ?ptr.as_ptr(), "attempted to free a pointer not owned by this pool");
            return;
        }

        let offset = ptr.as_ptr() as usize - self.arena.base().as_ptr() as usize;
        debug_assert_eq!(offset % self.block_size, 0, "pointer is not a block start");
        let index = offset / self.block_size;

        self.next[index] = self.free_head;
        self.free_head = index;
        self.used_blocks -= 1;
        self.stats.record_deallocation(self.block_size);
    }

    /// Whether `ptr` falls inside this pool's arena. Pure range check.
    #[must_use]
    pub fn owns(&self, ptr: *const u8) -> bool {
        self.arena.contains(ptr)
    }

    /// Effective block size after rounding, in bytes.
    #[must_use]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Total number of blocks.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.block_count
    }

    /// Number of blocks currently handed out.
    #[must_use]
    pub fn used_blocks(&self) -> usize {
        self.used_blocks
    }

    /// Number of blocks on the free list.
    #[must_use]
    pub fn free_blocks(&self) -> usize {
        self.block_count - self.used_blocks
    }

    /// Whether every block is handed out.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.free_head == NIL
    }

    /// Per-block freedom map, built by walking the free list.
    ///
    /// `true` means free. Intended for occupancy rendering and invariant
    /// checks, not hot paths.
    #[must_use]
    pub fn free_map(&self) -> Vec<bool> {
        let mut map = vec![false; self.block_count];
        let mut cursor = self.free_head;
        while cursor != NIL {
            map[cursor] = true;
            cursor = self.next[cursor];
        }
        map
    }

    /// This pool's counters.
    #[must_use]
    pub fn stats(&self) -> &MemoryStats {
        &self.stats
    }

    #[inline]
    fn block_ptr(&self, index: usize) -> NonNull<u8> {
        debug_assert!(index < self.block_count);
        // Safety: index < block_count, so the offset stays inside the arena.
        unsafe { NonNull::new_unchecked(self.arena.base().as_ptr().add(index * self.block_size)) }
    }
}

impl Drop for FixedBlockPool {
    fn drop(&mut self) {
        let outstanding = self.stats.current_usage();
        if outstanding > 0 {
            warn!(
                outstanding_bytes = outstanding,
                used_blocks = self.used_blocks,
                "fixed-block pool dropped with blocks still allocated"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_size_is_rounded_up() {
        let pool = FixedBlockPool::new(1, 4).unwrap();
        assert_eq!(pool.block_size(), MAX_ALIGN.max(size_of::<usize>()));

        let pool = FixedBlockPool::new(17, 4).unwrap();
        assert_eq!(pool.block_size() % MAX_ALIGN, 0);
        assert!(pool.block_size() >= 17);
    }

    #[test]
    fn zero_blocks_rejected() {
        assert!(matches!(
            FixedBlockPool::new(32, 0),
            Err(PoolError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn allocations_stay_inside_arena() {
        let mut pool = FixedBlockPool::new(32, 3).unwrap();
        let span = pool.block_size() * pool.capacity();

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        let c = pool.allocate().unwrap();
        for p in [a, b, c] {
            assert!(pool.owns(p.as_ptr()));
            let offset = p.as_ptr() as usize - a.as_ptr() as usize;
            assert!(offset < span);
        }

        // Fourth allocation fails; freeing one block makes its address
        // immediately reusable.
        assert!(pool.allocate().is_none());
        assert!(pool.is_exhausted());
        pool.deallocate(b);
        let again = pool.allocate().unwrap();
        assert_eq!(again, b);
    }

    #[test]
    fn first_allocation_is_block_zero() {
        let mut pool = FixedBlockPool::new(64, 8).unwrap();
        let first = pool.allocate().unwrap();
        assert_eq!(first.as_ptr() as usize % MAX_ALIGN, 0);

        let second = pool.allocate().unwrap();
        assert_eq!(
            second.as_ptr() as usize - first.as_ptr() as usize,
            pool.block_size()
        );
    }

    #[test]
    fn lifo_reuse_returns_same_address() {
        let mut pool = FixedBlockPool::new(size_of::<i32>(), 5).unwrap();
        let a = pool.allocate().unwrap();
        pool.deallocate(a);
        let b = pool.allocate().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn foreign_pointer_free_is_ignored() {
        let mut pool = FixedBlockPool::new(32, 2).unwrap();
        let _held = pool.allocate().unwrap();

        let mut outside = 0u8;
        let free_before = pool.free_blocks();
        let snap_before = pool.stats().snapshot();
        pool.deallocate(NonNull::from(&mut outside));

        assert_eq!(pool.free_blocks(), free_before);
        assert_eq!(pool.stats().snapshot(), snap_before);
    }

    #[test]
    fn free_map_partitions_the_arena() {
        let mut pool = FixedBlockPool::new(16, 6).unwrap();
        let held: Vec<_> = (0..3).map(|_| pool.allocate().unwrap()).collect();

        let map = pool.free_map();
        assert_eq!(map.iter().filter(|free| **free).count(), 3);
        assert_eq!(map.len(), pool.capacity());
        assert_eq!(pool.used_blocks() + pool.free_blocks(), pool.capacity());

        for p in held {
            pool.deallocate(p);
        }
        assert!(pool.free_map().iter().all(|free| *free));
    }

    #[test]
    fn exact_capacity_allocations_then_failure() {
        let mut pool = FixedBlockPool::new(32, 16).unwrap();
        let held: Vec<_> = (0..16).map(|_| pool.allocate().unwrap()).collect();
        assert!(pool.allocate().is_none());

        // All addresses distinct.
        let mut addrs: Vec<_> = held.iter().map(|p| p.as_ptr() as usize).collect();
        addrs.sort_unstable();
        addrs.dedup();
        assert_eq!(addrs.len(), 16);
    }

    #[test]
    fn stats_track_block_traffic() {
        let mut pool = FixedBlockPool::new(32, 4).unwrap();
        let bs = pool.block_size();

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        pool.deallocate(a);
        pool.deallocate(b);

        let snap = pool.stats().snapshot();
        assert_eq!(snap.total_allocated, 2 * bs);
        assert_eq!(snap.total_freed, 2 * bs);
        assert_eq!(snap.current_usage, 0);
        assert_eq!(snap.peak_usage, 2 * bs);
        assert_eq!(snap.allocation_count, 2);
        assert_eq!(snap.deallocation_count, 2);
    }
}
