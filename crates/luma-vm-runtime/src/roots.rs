//! Explicit GC root tracking.
//!
//! Reachability in the Luma heap flows exclusively through the root set
//! the runtime hands to the collector. `RootSet` keeps registered values
//! alive under stable `u64` handles until they are unregistered.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use luma_vm_core::gc::GcHeader;
use luma_vm_core::Value;

/// Tracks values the embedder or interpreter holds strongly.
pub struct RootSet {
    entries: Mutex<FxHashMap<u64, Value>>,
    next_id: AtomicU64,
}

// SAFETY: accessed only from the runtime's logical owner; the mutex
// provides the interior mutability shared with the collection driver.
unsafe impl Send for RootSet {}
unsafe impl Sync for RootSet {}

impl RootSet {
    /// Create an empty root set.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(FxHashMap::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `value` as a root; returns the handle to unregister it.
    pub fn register(&self, value: Value) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().insert(id, value);
        id
    }

    /// Remove the root registered under `id`.
    pub fn remove(&self, id: u64) {
        self.entries.lock().remove(&id);
    }

    /// Number of registered roots.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True if no roots are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Headers of all rooted heap values, for the collector.
    pub fn headers(&self) -> Vec<*const GcHeader> {
        let entries = self.entries.lock();
        entries
            .values()
            .filter_map(|v| v.gc_header().map(|h| h as *const GcHeader))
            .collect()
    }
}

impl Default for RootSet {
    fn default() -> Self {
        Self::new()
    }
}
