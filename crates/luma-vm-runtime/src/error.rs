//! Runtime error types

use thiserror::Error;

/// Errors surfaced by the runtime layer.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The runtime has been closed
    #[error("runtime is closed")]
    Closed,

    /// The memory quota would be exceeded
    #[error("memory quota exceeded: {requested} bytes requested")]
    MemQuotaExceeded {
        /// Bytes the failed requirement asked for
        requested: u64,
    },

    /// The CPU quota would be exceeded
    #[error("cpu quota exceeded: {requested} ticks requested")]
    CpuQuotaExceeded {
        /// Ticks the failed requirement asked for
        requested: u64,
    },

    /// A script-level finalizer failed. Caught and logged by the
    /// runtime, never propagated out of finalization driving.
    #[error("finalizer failed: {0}")]
    Finalizer(String),
}

/// Result alias for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
