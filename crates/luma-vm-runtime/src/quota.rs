//! Resource quota seam.
//!
//! The real quota manager lives outside this subsystem; the runtime only
//! needs the trait surface so allocation paths can consult it.
//! [`NoQuotas`] is the default policy: every requirement succeeds and
//! every accounting reads zero.

use crate::error::RuntimeResult;

/// CPU and memory accounting consulted by runtime allocation paths.
pub trait QuotaPolicy: Send + Sync {
    /// Require `bytes` of memory headroom before an allocation.
    fn require_mem(&self, bytes: u64) -> RuntimeResult<()>;

    /// Return `bytes` of memory to the accounting.
    fn release_mem(&self, bytes: u64);

    /// Require `ticks` of CPU headroom.
    fn require_cpu(&self, ticks: u64) -> RuntimeResult<()>;

    /// Memory currently accounted, in bytes.
    fn mem_used(&self) -> u64;

    /// Memory limit in bytes; 0 means unlimited.
    fn mem_limit(&self) -> u64;

    /// CPU currently accounted, in ticks.
    fn cpu_used(&self) -> u64;

    /// CPU limit in ticks; 0 means unlimited.
    fn cpu_limit(&self) -> u64;

    /// Forget all accounting.
    fn reset(&self);

    /// Whether this policy actually enforces anything.
    fn enforced(&self) -> bool {
        true
    }
}

/// The no-op policy: nothing is counted, nothing ever fails.
pub struct NoQuotas;

impl QuotaPolicy for NoQuotas {
    fn require_mem(&self, _bytes: u64) -> RuntimeResult<()> {
        Ok(())
    }

    fn release_mem(&self, _bytes: u64) {}

    fn require_cpu(&self, _ticks: u64) -> RuntimeResult<()> {
        Ok(())
    }

    fn mem_used(&self) -> u64 {
        0
    }

    fn mem_limit(&self) -> u64 {
        0
    }

    fn cpu_used(&self) -> u64 {
        0
    }

    fn cpu_limit(&self) -> u64 {
        0
    }

    fn reset(&self) {}

    fn enforced(&self) -> bool {
        false
    }
}
