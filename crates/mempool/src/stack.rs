//! Stack allocator: bump-pointer arena with marker-based bulk rollback.
//!
//! Allocation advances a single offset — no per-allocation bookkeeping, which
//! is the performance edge over the fixed-block pool. There is deliberately
//! no per-pointer `deallocate`: memory is reclaimed only by rewinding to a
//! previously captured [`Marker`] (LIFO discipline) or by [`clear`].
//!
//! ```text
//! ┌─────────────────────────────────┐
//! │░░░░░░░░░ used ░░░░░░            │
//! └─────────────────────────────────┘
//!  ↑                   ↑           ↑
//! base              offset    capacity
//! ```
//!
//! [`clear`]: StackAllocator::clear

use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

use tracing::{debug, error, warn};

use crate::align::{MAX_ALIGN, align_up, is_power_of_two};
use crate::arena::RawArena;
use crate::error::PoolError;
use crate::stats::MemoryStats;

/// Snapshot of the allocator's offset, used for bulk rollback.
///
/// Only markers captured from the same allocator are meaningful. Restoring a
/// marker captured *after* further allocations were rolled back (a "future"
/// marker) is a programmer error that [`StackAllocator::free_to_marker`]
/// rejects when it can detect it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Marker {
    offset: usize,
}

/// Single-threaded bump-pointer allocator over one fixed arena.
pub struct StackAllocator {
    arena: RawArena,
    capacity: usize,
    offset: usize,
    markers: Vec<Marker>,
    stats: MemoryStats,
}

impl StackAllocator {
    /// Create an allocator with `capacity` bytes of arena.
    pub fn new(capacity: usize) -> Result<Self, PoolError> {
        if capacity == 0 {
            return Err(PoolError::InvalidConfig {
                reason: "capacity must be > 0".into(),
            });
        }

        let arena = RawArena::new(capacity, MAX_ALIGN)?;
        debug!(capacity, "stack allocator initialized");

        Ok(Self {
            arena,
            capacity,
            offset: 0,
            markers: Vec::new(),
            stats: MemoryStats::new(),
        })
    }

    /// Allocate `size` bytes at the default ([`MAX_ALIGN`]) alignment.
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        self.allocate_aligned(size, MAX_ALIGN)
    }

    /// Allocate `size` bytes aligned to `alignment` (a power of two).
    ///
    /// Fails without mutating any state when the aligned request does not
    /// fit in the remaining capacity.
    pub fn allocate_aligned(&mut self, size: usize, alignment: usize) -> Option<NonNull<u8>> {
        if !is_power_of_two(alignment) {
            error!(alignment, "alignment must be a power of two");
            return None;
        }

        let base = self.arena.base().as_ptr() as usize;
        let current = base + self.offset;
        let aligned = align_up(current, alignment);
        let padding = aligned - current;

        let Some(new_offset) = self
            .offset
            .checked_add(padding)
            .and_then(|offset| offset.checked_add(size))
        else {
            warn!(
                requested = size,
                padding,
                used = self.offset,
                capacity = self.capacity,
                "stack allocator request overflows the address space"
            );
            return None;
        };
        if new_offset > self.capacity {
            warn!(
                requested = size,
                padding,
                used = self.offset,
                capacity = self.capacity,
                "stack allocator out of space"
            );
            return None;
        }

        // Padding is accounted as allocated so rollback accounting matches.
        let consumed = new_offset - self.offset;
        self.offset = new_offset;
        self.stats.record_allocation(consumed);

        // Safety: aligned lies inside [base, base + capacity).
        Some(unsafe { NonNull::new_unchecked(aligned as *mut u8) })
    }

    /// Capture the current offset for later rollback.
    #[must_use]
    pub fn marker(&self) -> Marker {
        Marker {
            offset: self.offset,
        }
    }

    /// Rewind to `marker`, releasing everything allocated after it.
    ///
    /// A marker ahead of the current offset is an invariant violation; it is
    /// reported and ignored.
    pub fn free_to_marker(&mut self, marker: Marker) {
        if marker.offset > self.offset {
            error!(
                marker_offset = marker.offset,
                current_offset = self.offset,
                "cannot restore a marker ahead of the current offset"
            );
            return;
        }

        let freed = self.offset - marker.offset;
        self.offset = marker.offset;
        if freed > 0 {
            self.stats.record_deallocation(freed);
        }
    }

    /// Release everything; equivalent to rewinding to offset zero.
    pub fn clear(&mut self) {
        self.free_to_marker(Marker { offset: 0 });
    }

    /// Save the current offset on the internal marker stack.
    pub fn push_marker(&mut self) {
        let marker = self.marker();
        self.markers.push(marker);
    }

    /// Rewind to the most recently pushed marker.
    pub fn pop_marker(&mut self) {
        match self.markers.pop() {
            Some(marker) => self.free_to_marker(marker),
            None => error!("marker stack is empty"),
        }
    }

    /// Bytes currently in use (current offset).
    #[must_use]
    pub fn used(&self) -> usize {
        self.offset
    }

    /// Bytes remaining.
    #[must_use]
    pub fn available(&self) -> usize {
        self.capacity - self.offset
    }

    /// Total arena size in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Used fraction in `[0.0, 1.0]`, for occupancy rendering.
    #[must_use]
    pub fn fill_ratio(&self) -> f64 {
        self.offset as f64 / self.capacity as f64
    }

    /// This allocator's counters.
    #[must_use]
    pub fn stats(&self) -> &MemoryStats {
        &self.stats
    }
}

impl Drop for StackAllocator {
    fn drop(&mut self) {
        if self.offset > 0 {
            warn!(
                outstanding_bytes = self.offset,
                "stack allocator dropped with bytes still allocated"
            );
        }
    }
}

/// RAII rollback scope over a [`StackAllocator`].
///
/// Construction pushes a marker; drop pops it and rewinds, releasing every
/// allocation made through the scope — including on unwind.
///
/// Derefs to the allocator, so allocations go through the scope value:
///
/// ```
/// # use mempool::{StackAllocator, StackScope};
/// let mut alloc = StackAllocator::new(256).unwrap();
/// {
///     let mut scope = StackScope::new(&mut alloc);
///     scope.allocate(64).unwrap();
/// }
/// assert_eq!(alloc.used(), 0);
/// ```
pub struct StackScope<'a> {
    allocator: &'a mut StackAllocator,
}

impl<'a> StackScope<'a> {
    /// Open a scope, capturing the allocator's current offset.
    pub fn new(allocator: &'a mut StackAllocator) -> Self {
        allocator.push_marker();
        Self { allocator }
    }
}

impl Drop for StackScope<'_> {
    fn drop(&mut self) {
        self.allocator.pop_marker();
    }
}

impl Deref for StackScope<'_> {
    type Target = StackAllocator;

    fn deref(&self) -> &Self::Target {
        self.allocator
    }
}

impl DerefMut for StackScope<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.allocator
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_capacity_rejected() {
        assert!(matches!(
            StackAllocator::new(0),
            Err(PoolError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn mixed_alignment_session() {
        // allocate(100) → used ≥ 100; aligned allocate(200, 16) is 16-aligned;
        // clear() → used == 0.
        let mut alloc = StackAllocator::new(1024).unwrap();

        alloc.allocate(100).unwrap();
        assert!(alloc.used() >= 100);
        let used_after_first = alloc.used();

        let p = alloc.allocate_aligned(200, 16).unwrap();
        assert_eq!(p.as_ptr() as usize % 16, 0);
        assert!(alloc.used() >= used_after_first + 200);

        alloc.clear();
        assert_eq!(alloc.used(), 0);
        assert_eq!(alloc.available(), 1024);
    }

    #[test]
    fn failed_allocation_leaves_state_untouched() {
        let mut alloc = StackAllocator::new(128).unwrap();
        alloc.allocate(100).unwrap();
        let used = alloc.used();
        let snap = alloc.stats().snapshot();

        assert!(alloc.allocate(64).is_none());
        assert_eq!(alloc.used(), used);
        assert_eq!(alloc.stats().snapshot(), snap);
    }

    #[test]
    fn address_space_overflow_fails_like_capacity() {
        let mut alloc = StackAllocator::new(128).unwrap();
        alloc.allocate(64).unwrap();
        let used = alloc.used();
        let snap = alloc.stats().snapshot();

        assert!(alloc.allocate(usize::MAX).is_none());
        assert!(alloc.allocate_aligned(usize::MAX - 8, 16).is_none());
        assert_eq!(alloc.used(), used);
        assert_eq!(alloc.stats().snapshot(), snap);
    }

    #[test]
    fn cumulative_overflow_fails_at_the_boundary() {
        let mut alloc = StackAllocator::new(64).unwrap();
        assert!(alloc.allocate(32).is_some());
        assert!(alloc.allocate(32).is_some());
        assert!(alloc.allocate(1).is_none());
        assert_eq!(alloc.used(), 64);
    }

    #[test]
    fn marker_round_trip_restores_used() {
        let mut alloc = StackAllocator::new(512).unwrap();
        alloc.allocate(48).unwrap();
        let marker = alloc.marker();
        let used_at_marker = alloc.used();

        alloc.allocate(64).unwrap();
        alloc.allocate_aligned(32, 8).unwrap();
        assert!(alloc.used() > used_at_marker);

        alloc.free_to_marker(marker);
        assert_eq!(alloc.used(), used_at_marker);
    }

    #[test]
    fn forward_marker_restore_is_rejected() {
        let mut alloc = StackAllocator::new(256).unwrap();
        alloc.allocate(128).unwrap();
        let marker = alloc.marker();
        alloc.clear();

        // marker is now ahead of the offset
        alloc.free_to_marker(marker);
        assert_eq!(alloc.used(), 0);
    }

    #[test]
    fn alignment_requests_are_honored() {
        let mut alloc = StackAllocator::new(1024).unwrap();
        alloc.allocate_aligned(1, 1).unwrap();
        for align in [2usize, 4, 8, 16, 64] {
            let p = alloc.allocate_aligned(3, align).unwrap();
            assert_eq!(p.as_ptr() as usize % align, 0, "alignment {align}");
        }
    }

    #[test]
    fn non_power_of_two_alignment_fails() {
        let mut alloc = StackAllocator::new(64).unwrap();
        assert!(alloc.allocate_aligned(8, 3).is_none());
        assert_eq!(alloc.used(), 0);
    }

    #[test]
    fn scope_rolls_back_on_drop() {
        let mut alloc = StackAllocator::new(256).unwrap();
        alloc.allocate(32).unwrap();
        let outer_used = alloc.used();

        {
            let mut scope = StackScope::new(&mut alloc);
            scope.allocate(64).unwrap();
            scope.allocate(16).unwrap();
            assert!(scope.used() > outer_used);
        }

        assert_eq!(alloc.used(), outer_used);
    }

    #[test]
    fn nested_scopes_unwind_in_order() {
        let mut alloc = StackAllocator::new(512).unwrap();
        {
            let mut outer = StackScope::new(&mut alloc);
            outer.allocate(64).unwrap();
            let mid = outer.used();
            {
                let mut inner = StackScope::new(&mut outer);
                inner.allocate(128).unwrap();
            }
            assert_eq!(outer.used(), mid);
        }
        assert_eq!(alloc.used(), 0);
    }

    #[test]
    fn scope_rolls_back_on_panic() {
        let mut alloc = StackAllocator::new(256).unwrap();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut scope = StackScope::new(&mut alloc);
            scope.allocate(64).unwrap();
            panic!("boom");
        }));
        assert!(result.is_err());
        assert_eq!(alloc.used(), 0);
    }

    #[test]
    fn pop_on_empty_marker_stack_is_a_no_op() {
        let mut alloc = StackAllocator::new(64).unwrap();
        alloc.allocate(16).unwrap();
        let used = alloc.used();
        alloc.pop_marker();
        assert_eq!(alloc.used(), used);
    }

    #[test]
    fn stats_account_for_padding_symmetrically() {
        let mut alloc = StackAllocator::new(1024).unwrap();
        alloc.allocate_aligned(1, 1).unwrap();
        alloc.allocate_aligned(8, 64).unwrap();
        let snap = alloc.stats().snapshot();
        assert_eq!(snap.total_allocated, alloc.used());

        alloc.clear();
        let snap = alloc.stats().snapshot();
        assert_eq!(snap.total_allocated, snap.total_freed);
        assert_eq!(alloc.stats().leaked_bytes(), 0);
    }
}
