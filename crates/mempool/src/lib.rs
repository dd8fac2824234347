//! Fixed-block, stack and lock-free memory pools with per-pool statistics.
//!
//! Each pool pre-allocates one contiguous arena at construction and serves
//! `allocate`/`deallocate` purely from its own bookkeeping — the global
//! allocator is touched exactly twice per pool, at construction and at drop.
//!
//! # Pool types
//! - [`FixedBlockPool`] — equal-size blocks on an index-based free list,
//!   O(1) allocate/free, single-threaded.
//! - [`StackAllocator`] — bump-pointer arena with [`Marker`] rollback and
//!   the [`StackScope`] RAII guard; no per-pointer free by design.
//! - [`LockFreeFixedPool`] — the fixed-block contract under concurrency,
//!   via a tagged-head Treiber stack.
//! - [`PoolAllocator`] / [`PoolBox`] — typed adapter and owning handle over
//!   a shared lock-free pool.
//!
//! # Example
//! ```
//! use mempool::FixedBlockPool;
//!
//! let mut pool = FixedBlockPool::new(32, 8)?;
//! let block = pool.allocate().expect("pool is fresh");
//! assert!(pool.owns(block.as_ptr()));
//! pool.deallocate(block);
//! assert_eq!(pool.stats().leaked_bytes(), 0);
//! # Ok::<(), mempool::PoolError>(())
//! ```
//!
//! # Safety model
//! Pools hand out raw, uninitialized blocks and never run constructors or
//! destructors; callers placement-write values and drop them in place (or
//! use [`PoolBox`], which does both). Double-free and use-after-free are
//! *not* detected beyond a pointer range check — see the module docs of
//! [`fixed`] and [`concurrent`] for the documented risks.

pub mod align;
pub mod adapter;
mod arena;
pub mod concurrent;
pub mod error;
pub mod fixed;
pub mod stack;
pub mod stats;

pub use adapter::{PoolAllocator, PoolBox, RawPool};
pub use concurrent::LockFreeFixedPool;
pub use error::PoolError;
pub use fixed::FixedBlockPool;
pub use stack::{Marker, StackAllocator, StackScope};
pub use stats::{MemoryStats, StatsSnapshot};
