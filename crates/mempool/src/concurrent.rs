//! Thread-safe fixed-block pool with a lock-free free list.
//!
//! The free list is a Treiber stack: `allocate` pops the head and
//! `deallocate` pushes it back, both via compare-exchange retry loops. No
//! mutex on the hot path; statistics updates take a short-lived
//! `parking_lot::Mutex` separately.
//!
//! On 64-bit targets the head packs a 32-bit generation counter with a
//! 32-bit block index. The generation increments on every successful CAS,
//! which keeps a head that was popped and pushed back from being mistaken
//! for an unchanged one (the classic ABA hazard of lock-free stacks).
//! Double-free is still undetected: a block freed twice is threaded into
//! the list twice and corrupts it silently.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::align::{MAX_ALIGN, align_up};
use crate::arena::RawArena;
use crate::error::PoolError;
use crate::stats::{MemoryStats, StatsSnapshot};

/// Sentinel index terminating the free list.
const NIL: u32 = u32::MAX;

// Tagged head: upper 32 bits = generation, lower 32 bits = block index.
#[cfg(target_pointer_width = "64")]
const TAG_BITS: usize = 32;
#[cfg(target_pointer_width = "64")]
const INDEX_MASK: usize = 0xFFFF_FFFF;
#[cfg(target_pointer_width = "64")]
const MAX_POOL_BLOCKS: usize = (u32::MAX - 1) as usize;

#[inline(always)]
#[cfg(target_pointer_width = "64")]
fn pack_tagged(generation: u32, index: u32) -> usize {
    ((generation as usize) << TAG_BITS) | (index as usize)
}

#[inline(always)]
#[cfg(target_pointer_width = "64")]
fn unpack_generation(tagged: usize) -> u32 {
    (tagged >> TAG_BITS) as u32
}

#[inline(always)]
#[cfg(target_pointer_width = "64")]
fn unpack_index(tagged: usize) -> u32 {
    (tagged & INDEX_MASK) as u32
}

// 32-bit fallback: plain indices, no generation tag.
#[cfg(not(target_pointer_width = "64"))]
const MAX_POOL_BLOCKS: usize = (u32::MAX - 1) as usize;

#[cfg(not(target_pointer_width = "64"))]
#[inline(always)]
fn pack_tagged(_generation: u32, index: u32) -> usize {
    index as usize
}

#[cfg(not(target_pointer_width = "64"))]
#[inline(always)]
fn unpack_generation(_tagged: usize) -> u32 {
    0
}

#[cfg(not(target_pointer_width = "64"))]
#[inline(always)]
fn unpack_index(tagged: usize) -> u32 {
    tagged as u32
}

/// Fixed-block pool safe for concurrent `allocate`/`deallocate`.
///
/// Same external contract as [`FixedBlockPool`](crate::FixedBlockPool),
/// but all operations take `&self` and are safe to call from multiple
/// threads. Retries are bounded only by contention: `allocate` returns
/// `None` only when the list is observed truly empty, never as a spurious
/// transient failure.
pub struct LockFreeFixedPool {
    arena: RawArena,
    block_size: usize,
    block_count: usize,
    /// Tagged free-list head.
    head: AtomicUsize,
    /// `next[i]` holds the free-list successor index of block `i`
    /// (`NIL as usize` terminates). Only meaningful while `i` is free.
    next: Box<[AtomicUsize]>,
    allocated: AtomicUsize,
    stats: Mutex<MemoryStats>,
}

impl LockFreeFixedPool {
    /// Create a pool of `block_count` blocks of (at least) `block_size` bytes.
    pub fn new(block_size: usize, block_count: usize) -> Result<Self, PoolError> {
        if block_count == 0 {
            return Err(PoolError::InvalidConfig {
                reason: "block_count must be > 0".into(),
            });
        }
        if block_count > MAX_POOL_BLOCKS {
            return Err(PoolError::InvalidConfig {
                reason: format!("block_count {block_count} exceeds tagged-index limit"),
            });
        }

        let block_size = align_up(block_size.max(size_of::<usize>()), MAX_ALIGN);
        let total_size = block_size
            .checked_mul(block_count)
            .ok_or_else(|| PoolError::InvalidConfig {
                reason: format!("arena size overflows: {block_size} * {block_count}"),
            })?;

        let arena = RawArena::new(total_size, MAX_ALIGN)?;

        // Pre-thread the free list: i → i + 1, last block terminates.
        let next: Box<[AtomicUsize]> = (0..block_count)
            .map(|i| {
                AtomicUsize::new(if i + 1 < block_count {
                    i + 1
                } else {
                    NIL as usize
                })
            })
            .collect();

        debug!(
            block_size,
            block_count, total_size, "lock-free fixed pool initialized"
        );

        Ok(Self {
            arena,
            block_size,
            block_count,
            head: AtomicUsize::new(pack_tagged(0, 0)),
            next,
            allocated: AtomicUsize::new(0),
            stats: Mutex::new(MemoryStats::new()),
        })
    }

    /// Pop one block off the free list.
    ///
    /// Lock-free; retries under contention and returns `None` only when the
    /// pool is exhausted.
    pub fn allocate(&self) -> Option<NonNull<u8>> {
        loop {
            let head_tagged = self.head.load(Ordering::Acquire);
            let head_index = unpack_index(head_tagged);
            if head_index == NIL {
                return None; // Pool exhausted
            }

            let next_index = self.next[head_index as usize].load(Ordering::Acquire);
            let new_generation = unpack_generation(head_tagged).wrapping_add(1);
            let new_tagged = pack_tagged(new_generation, next_index as u32);

            if self
                .head
                .compare_exchange_weak(
                    head_tagged,
                    new_tagged,
                    Ordering::Release,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                self.allocated.fetch_add(1, Ordering::Relaxed);
                self.stats.lock().record_allocation(self.block_size);
                return Some(self.block_ptr(head_index as usize));
            }
        }
    }

    /// Push a block back onto the free list.
    ///
    /// Pointers outside the arena are reported and ignored. Freeing the same
    /// block twice corrupts the list (documented risk, amplified by
    /// concurrency).
    pub fn deallocate(&self, ptr: NonNull<u8>) {
        if !self.owns(ptr.as_ptr()) {
            error!(ptr = ?ptr.as_ptr(), "attempted to free a pointer not owned by this pool");
            return;
        }

        let offset = ptr.as_ptr() as usize - self.arena.base().as_ptr() as usize;
        debug_assert_eq!(offset % self.block_size, 0, "pointer is not a block start");
        let index = offset / self.block_size;

        loop {
            let head_tagged = self.head.load(Ordering::Acquire);
            let head_index = unpack_index(head_tagged);
            self.next[index].store(head_index as usize, Ordering::Release);

            let new_generation = unpack_generation(head_tagged).wrapping_add(1);
            let new_tagged = pack_tagged(new_generation, index as u32);

            if self
                .head
                .compare_exchange_weak(
                    head_tagged,
                    new_tagged,
                    Ordering::Release,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                self.allocated.fetch_sub(1, Ordering::Relaxed);
                self.stats.lock().record_deallocation(self.block_size);
                return;
            }
        }
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

    /// Number of blocks currently handed out. Eventually consistent under
    /// concurrent traffic.
    #[must_use]
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Whether every block is handed out.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.allocated() >= self.block_count
    }

    /// Walk the free list and count its blocks.
    ///
    /// Only meaningful while no other thread is mutating the pool; intended
    /// for post-hoc invariant checks, not hot paths.
    #[must_use]
    pub fn free_blocks(&self) -> usize {
        let mut count = 0;
        let mut cursor = unpack_index(self.head.load(Ordering::Acquire));
        while cursor != NIL && count <= self.block_count {
            count += 1;
            cursor = self.next[cursor as usize].load(Ordering::Acquire) as u32;
        }
        count
    }

    /// Copy of this pool's counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.lock().snapshot()
    }

    #[inline]
    fn block_ptr(&self, index: usize) -> NonNull<u8> {
        debug_assert!(index < self.block_count);
        // Safety: index < block_count, so the offset stays inside the arena.
        unsafe { NonNull::new_unchecked(self.arena.base().as_ptr().add(index * self.block_size)) }
    }
}

impl Drop for LockFreeFixedPool {
    fn drop(&mut self) {
        let outstanding = self.stats.lock().current_usage();
        if outstanding > 0 {
            warn!(
                outstanding_bytes = outstanding,
                "lock-free pool dropped with blocks still allocated"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn single_threaded_contract_matches_fixed_pool() {
        let pool = LockFreeFixedPool::new(32, 3).unwrap();

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        let c = pool.allocate().unwrap();
        assert!(pool.allocate().is_none());
        assert!(pool.is_exhausted());

        pool.deallocate(b);
        let again = pool.allocate().unwrap();
        assert_eq!(again, b);

        pool.deallocate(a);
        pool.deallocate(c);
        pool.deallocate(again);
        assert_eq!(pool.allocated(), 0);
        assert_eq!(pool.free_blocks(), 3);
    }

    #[test]
    fn capacity_limit_enforced() {
        assert!(matches!(
            LockFreeFixedPool::new(16, 0),
            Err(PoolError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn foreign_pointer_free_is_ignored() {
        let pool = LockFreeFixedPool::new(32, 2).unwrap();
        let _held = pool.allocate().unwrap();

        let mut outside = 0u8;
        pool.deallocate(NonNull::from(&mut outside));
        assert_eq!(pool.allocated(), 1);
        assert_eq!(pool.free_blocks(), 1);
    }

    #[test]
    fn concurrent_cycles_preserve_the_partition() {
        const THREADS: usize = 8;
        const CYCLES: usize = 1000;

        let pool = Arc::new(LockFreeFixedPool::new(64, THREADS).unwrap());

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    for i in 0..CYCLES {
                        let ptr = loop {
                            if let Some(p) = pool.allocate() {
                                break p;
                            }
                            thread::yield_now();
                        };
                        // Touch the block to make races visible under sanitizers.
                        unsafe { ptr.as_ptr().write(i as u8) };
                        pool.deallocate(ptr);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        // Post-hoc, single threaded: free list holds every block exactly once.
        assert_eq!(pool.allocated(), 0);
        assert_eq!(pool.free_blocks(), THREADS);

        let snap = pool.stats();
        assert_eq!(snap.allocation_count, THREADS * CYCLES);
        assert_eq!(snap.deallocation_count, THREADS * CYCLES);
        assert_eq!(snap.current_usage, 0);
    }

    #[test]
    fn rapid_recycle_under_contention() {
        // Two blocks, four threads: maximizes head churn, the ABA-prone shape.
        let pool = Arc::new(LockFreeFixedPool::new(32, 2).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    for i in 0..2000 {
                        if let Some(ptr) = pool.allocate() {
                            pool.deallocate(ptr);
                        }
                        if i % 64 == 0 {
                            thread::yield_now();
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(pool.allocated(), 0);
        assert_eq!(pool.free_blocks(), 2);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn tagged_head_packs_round_trip() {
        let tagged = pack_tagged(7, 42);
        assert_eq!(unpack_generation(tagged), 7);
        assert_eq!(unpack_index(tagged), 42);

        let wrapped = pack_tagged(u32::MAX, NIL);
        assert_eq!(unpack_generation(wrapped), u32::MAX);
        assert_eq!(unpack_index(wrapped), NIL);
    }
}
