//! Weak handles and their tri-state lifecycle.

use std::cell::Cell;
use std::sync::{Arc, Weak};

use luma_vm_core::Value;

use crate::pool::PoolShared;
use crate::MarkFlags;

/// Lifecycle of a pooled weak slot.
///
/// A slot starts `Alive`. When the collector's post-mortem observer
/// fires: `Alive -> Dead` (enqueue if marked), `Resurrected -> Alive`
/// (re-arm). When a caller reads the value: `Alive | Resurrected ->
/// Resurrected`, `Dead` stays `Dead` and the read yields nothing.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum WeakStatus {
    Alive,
    Resurrected,
    Dead,
}

/// One record per tracked heap value, owned by the pool.
pub(crate) struct WeakSlot {
    /// Untraced copy of the value. The pool's storage is not a GC root,
    /// so holding this does not keep the value alive; it reconstructs
    /// the value as long as the object has not been swept.
    pub(crate) handle: Value,
    pub(crate) status: Cell<WeakStatus>,
    /// 0 = never marked, otherwise the pool's monotonic mark sequence.
    pub(crate) mark_order: Cell<u64>,
    pub(crate) flags: Cell<MarkFlags>,
}

// SAFETY: every field is read and written only while the owning pool's
// mutex is held (by pool methods, the post-mortem observer, and
// WeakRef::value).
unsafe impl Send for WeakSlot {}
unsafe impl Sync for WeakSlot {}

impl WeakSlot {
    pub(crate) fn new(handle: Value) -> Arc<Self> {
        Arc::new(Self {
            handle,
            status: Cell::new(WeakStatus::Alive),
            mark_order: Cell::new(0),
            flags: Cell::new(MarkFlags::NONE),
        })
    }
}

enum Inner {
    /// Canonical pooled handle.
    Slot {
        slot: Arc<WeakSlot>,
        pool: Weak<PoolShared>,
    },
    /// Degenerate strong handle for values without heap identity: the
    /// value is simply retained and `value()` always yields it.
    Pinned(Value),
}

/// A weak reference to a value.
///
/// Obtained from [`crate::WeakRefPool::get`]. Holding a `WeakRef` does
/// not keep its referent alive; [`WeakRef::value`] returns the referent
/// while it is, and `None` once the collector has reclaimed it.
pub struct WeakRef {
    inner: Inner,
}

// SAFETY: the single-logical-owner model; the contained Value is only
// touched under the pool mutex (Slot) or is immutable (Pinned).
unsafe impl Send for WeakRef {}
unsafe impl Sync for WeakRef {}

impl WeakRef {
    pub(crate) fn from_slot(slot: Arc<WeakSlot>, pool: Weak<PoolShared>) -> Self {
        Self {
            inner: Inner::Slot { slot, pool },
        }
    }

    pub(crate) fn pinned(value: Value) -> Self {
        Self {
            inner: Inner::Pinned(value),
        }
    }

    /// The referent, if it is still alive.
    ///
    /// A successful read resurrects the referent: the caller now holds a
    /// strong reference, so a death the collector may already have
    /// scheduled is cancelled and deferred to a later cycle in which no
    /// caller revived the value.
    pub fn value(&self) -> Option<Value> {
        match &self.inner {
            Inner::Pinned(value) => Some(value.clone()),
            Inner::Slot { slot, pool } => {
                // A discarded pool means the runtime has shut down; the
                // handle lazily reports its referent dead.
                let shared = pool.upgrade()?;
                let _guard = shared.state.lock();
                match slot.status.get() {
                    WeakStatus::Dead => None,
                    _ => {
                        slot.status.set(WeakStatus::Resurrected);
                        Some(slot.handle.clone())
                    }
                }
            }
        }
    }
}

impl PartialEq for WeakRef {
    /// Two handles are equal when they are the same canonical pooled
    /// slot, or pinned handles to equal values.
    fn eq(&self, other: &Self) -> bool {
        match (&self.inner, &other.inner) {
            (Inner::Slot { slot: a, .. }, Inner::Slot { slot: b, .. }) => Arc::ptr_eq(a, b),
            (Inner::Pinned(a), Inner::Pinned(b)) => a == b,
            _ => false,
        }
    }
}

impl std::fmt::Debug for WeakRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            Inner::Pinned(value) => write!(f, "WeakRef(pinned {value:?})"),
            Inner::Slot { slot, .. } => f
                .debug_struct("WeakRef")
                .field("status", &slot.status.get())
                .field("mark_order", &slot.mark_order.get())
                .field("flags", &slot.flags.get())
                .finish(),
        }
    }
}
