//! # Luma VM Weak References
//!
//! Weak refs and the weak-ref pool the Luma runtime uses to drive
//! script-level finalizers (`__gc`) and runtime-internal resource
//! release on garbage-collected values.
//!
//! ## Design
//!
//! - **Liveness through the collector**: the pool registers a
//!   post-mortem observer with the host collector and never pins the
//!   values it tracks; its registry and slots are untraced storage
//! - **Tri-state handles**: reading a value through a [`WeakRef`] marks
//!   it `Resurrected`, which cancels the death the collector may already
//!   have scheduled; the value gets another chance to die quietly in a
//!   later cycle
//! - **Reverse mark order**: every extraction returns the most recently
//!   marked value first, matching the script-visible finalizer contract
//! - **One lock**: a single mutex guards the registry, both pending
//!   queues, the mark counter, and every slot's state; the
//!   pre-finalization hook and all callbacks run outside it

#![warn(clippy::all)]
#![warn(missing_docs)]

mod handle;
mod pool;

pub use handle::WeakRef;
pub use pool::{PrefinalizeHook, WeakRefPool};

/// What the runtime wants to happen when a marked value dies.
///
/// A small bitset: unknown bits are masked off on construction.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct MarkFlags(u8);

impl MarkFlags {
    /// No post-mortem action.
    pub const NONE: MarkFlags = MarkFlags(0);
    /// Run the value's script-level finalizer after it dies.
    pub const FINALIZE: MarkFlags = MarkFlags(1);
    /// Release the value's native resources after it dies (and after
    /// any finalizer has run).
    pub const RELEASE: MarkFlags = MarkFlags(1 << 1);

    const ALL: u8 = 0b11;

    /// Build from raw bits, ignoring unknown bits.
    #[inline]
    pub fn from_bits(bits: u8) -> Self {
        Self(bits & Self::ALL)
    }

    /// The raw bits.
    #[inline]
    pub fn bits(self) -> u8 {
        self.0
    }

    /// True if every bit of `other` is set in `self`.
    #[inline]
    pub fn contains(self, other: MarkFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// The union of both flag sets.
    #[inline]
    pub fn union(self, other: MarkFlags) -> Self {
        Self(self.0 | other.0)
    }

    /// `self` with the bits of `other` removed.
    #[inline]
    pub fn without(self, other: MarkFlags) -> Self {
        Self(self.0 & !other.0)
    }

    /// True if no flag is set.
    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for MarkFlags {
    type Output = MarkFlags;

    fn bitor(self, rhs: MarkFlags) -> MarkFlags {
        self.union(rhs)
    }
}

impl std::fmt::Debug for MarkFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();
        if self.contains(MarkFlags::FINALIZE) {
            parts.push("FINALIZE");
        }
        if self.contains(MarkFlags::RELEASE) {
            parts.push("RELEASE");
        }
        if parts.is_empty() {
            parts.push("NONE");
        }
        write!(f, "MarkFlags({})", parts.join("|"))
    }
}
