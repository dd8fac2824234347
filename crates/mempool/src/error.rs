//! Error types for pool construction and the typed adapter.

use thiserror::Error;

/// Pool error types
#[derive(Debug, Error)]
pub enum PoolError {
    /// Rejected constructor parameters
    #[error("Invalid pool configuration: {reason}")]
    InvalidConfig {
        /// What was wrong with the requested geometry
        reason: String,
    },

    /// Arena size/alignment combination rejected by the layout rules
    #[error("Invalid arena layout: size {size}, alignment {align}")]
    InvalidLayout {
        /// Requested arena size in bytes
        size: usize,
        /// Requested arena alignment in bytes
        align: usize,
    },

    /// The backing allocation for an arena (or an adapter fallback) failed
    #[error("Failed to allocate {bytes} bytes")]
    AllocationFailed {
        /// Size of the failed allocation in bytes
        bytes: usize,
    },

    /// Adapter-level allocation against an empty pool
    #[error("Pool exhausted")]
    Exhausted,
}
