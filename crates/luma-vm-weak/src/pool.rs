//! The weak-ref pool: registry, pending queues, and extraction.

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use luma_vm_core::gc::AllocationRegistry;
use luma_vm_core::{Value, ValueId};
use luma_vm_gc::{GcHeader, Reclaim};

use crate::handle::{WeakRef, WeakSlot, WeakStatus};
use crate::MarkFlags;

/// Order-preserving transform applied to every extracted batch, outside
/// the pool lock. Must not call back into the pool with blocking
/// semantics.
pub type PrefinalizeHook = Box<dyn Fn(Vec<Value>) -> Vec<Value> + Send + Sync>;

/// A value waiting for extraction, with the mark order it died under.
struct Pending {
    value: Value,
    order: u64,
}

/// State guarded by the single pool mutex.
pub(crate) struct PoolState {
    /// Canonical slot per tracked heap value; at most one entry per
    /// identity token. Untraced storage: does not keep values alive.
    registry: FxHashMap<ValueId, Arc<WeakSlot>>,
    /// Dead finalize-marked values awaiting extraction.
    pending_finalize: Vec<Pending>,
    /// Dead release-marked values awaiting extraction.
    pending_release: Vec<Pending>,
    /// Monotonic mark counter; 0 means "never marked".
    last_mark_order: u64,
}

/// Shared pool core: the mutex-guarded state plus the pre-finalization
/// hook. The collector's post-mortem observer holds a `Weak` to this.
pub(crate) struct PoolShared {
    pub(crate) state: Mutex<PoolState>,
    prefinalizer: RwLock<Option<PrefinalizeHook>>,
}

// SAFETY: all Values inside are reached only under the state mutex; the
// pool follows the single-logical-owner model with the post-mortem
// observer as the only asynchronous entrant, and it takes the same
// mutex.
unsafe impl Send for PoolShared {}
unsafe impl Sync for PoolShared {}

impl PoolShared {
    /// The collector's post-mortem observer: runs when the host GC has
    /// found a tracked value unreachable.
    fn on_reclaim(&self, header: *const GcHeader) -> Reclaim {
        let mut state = self.state.lock();
        let id = ValueId::from_header(header);

        // Spurious callback: the token is unknown, nothing to do.
        let Some(slot) = state.registry.remove(&id) else {
            return Reclaim::Continue;
        };

        // Someone read the value through a WeakRef since the last
        // callback; cancel this death and watch for the next one.
        if slot.status.get() == WeakStatus::Resurrected {
            slot.status.set(WeakStatus::Alive);
            state.registry.insert(id, slot);
            return Reclaim::Rearm;
        }

        slot.status.set(WeakStatus::Dead);
        let flags = slot.flags.get();
        let order = slot.mark_order.get();
        if flags.contains(MarkFlags::FINALIZE) {
            state.pending_finalize.push(Pending {
                value: slot.handle.clone(),
                order,
            });
        }
        if flags.contains(MarkFlags::RELEASE) {
            state.pending_release.push(Pending {
                value: slot.handle.clone(),
                order,
            });
        }
        Reclaim::Continue
    }

    fn run_prefinalizer(&self, values: Vec<Value>) -> Vec<Value> {
        let hook = self.prefinalizer.read();
        match hook.as_ref() {
            Some(hook) => hook(values),
            None => values,
        }
    }
}

/// Which pending queue / mark flag an extraction operates on.
#[derive(Clone, Copy)]
enum Channel {
    Finalize,
    Release,
}

impl Channel {
    fn flag(self) -> MarkFlags {
        match self {
            Channel::Finalize => MarkFlags::FINALIZE,
            Channel::Release => MarkFlags::RELEASE,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Channel::Finalize => "finalize",
            Channel::Release => "release",
        }
    }
}

/// The pool of weak references the runtime uses to track finalizable
/// values.
///
/// One instance per runtime. Construction installs the pool's
/// post-mortem observer into the given collector registry; the pool
/// then tracks exactly the values handed to [`WeakRefPool::get`] and
/// [`WeakRefPool::mark`], observing their deaths through the collector
/// without keeping them alive.
pub struct WeakRefPool {
    shared: Arc<PoolShared>,
}

impl WeakRefPool {
    /// Create a pool and install its post-mortem observer into
    /// `registry`.
    pub fn new(registry: &AllocationRegistry) -> Self {
        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState {
                registry: FxHashMap::default(),
                pending_finalize: Vec::new(),
                pending_release: Vec::new(),
                last_mark_order: 0,
            }),
            prefinalizer: RwLock::new(None),
        });

        let observer: Weak<PoolShared> = Arc::downgrade(&shared);
        registry.set_post_mortem_hook(Arc::new(move |header| match observer.upgrade() {
            Some(shared) => shared.on_reclaim(header),
            None => Reclaim::Continue,
        }));

        Self { shared }
    }

    /// The canonical weak handle for `v`, created on first use.
    ///
    /// Repeated calls with the same value return the same canonical
    /// handle, with flags and state untouched. Values without heap
    /// identity get a degenerate strong handle whose `value()` always
    /// yields the original.
    pub fn get(&self, v: &Value) -> WeakRef {
        let Some(id) = v.identity() else {
            return WeakRef::pinned(v.clone());
        };
        let slot = {
            let mut state = self.shared.state.lock();
            Self::slot_for(&mut state, v, id)
        };
        WeakRef::from_slot(slot, Arc::downgrade(&self.shared))
    }

    /// Mark `v` for post-mortem processing.
    ///
    /// Ensures `v` has a slot (as by [`WeakRefPool::get`]), assigns it
    /// the next mark order, and unions `flags` into its flags.
    /// Remarking an already-marked value moves it later in extraction
    /// order. Values without heap identity are silently ignored.
    pub fn mark(&self, v: &Value, flags: MarkFlags) {
        let Some(id) = v.identity() else {
            tracing::trace!(
                target: "luma::weak",
                ty = v.type_name(),
                "mark ignored for value without heap identity"
            );
            return;
        };
        let mut state = self.shared.state.lock();
        let slot = Self::slot_for(&mut state, v, id);
        state.last_mark_order += 1;
        slot.mark_order.set(state.last_mark_order);
        slot.flags.set(slot.flags.get().union(flags));
    }

    /// Install the pre-finalization hook applied to every extracted
    /// batch.
    pub fn set_prefinalizer(&self, hook: PrefinalizeHook) {
        *self.shared.prefinalizer.write() = Some(hook);
    }

    /// Dead finalize-marked values that arrived since the last call,
    /// most recently marked first.
    pub fn extract_pending_finalize(&self) -> Vec<Value> {
        self.extract_pending(Channel::Finalize)
    }

    /// Dead release-marked values that arrived since the last call,
    /// most recently marked first.
    pub fn extract_pending_release(&self) -> Vec<Value> {
        self.extract_pending(Channel::Release)
    }

    /// Every finalize-marked value, dead or alive, most recently marked
    /// first; clears the finalize mark on each so no later extraction
    /// returns it again. Used at runtime shutdown.
    pub fn extract_all_marked_finalize(&self) -> Vec<Value> {
        self.extract_all_marked(Channel::Finalize)
    }

    /// Every release-marked value, dead or alive, most recently marked
    /// first; clears the release mark on each. Used at runtime shutdown.
    pub fn extract_all_marked_release(&self) -> Vec<Value> {
        self.extract_all_marked(Channel::Release)
    }

    /// Headers of all values currently awaiting extraction.
    ///
    /// The runtime includes these in every collection's root set so
    /// queued values stay reconstructible until extracted.
    pub fn pending_root_headers(&self) -> Vec<*const GcHeader> {
        let state = self.shared.state.lock();
        state
            .pending_finalize
            .iter()
            .chain(state.pending_release.iter())
            .filter_map(|p| p.value.gc_header().map(|h| h as *const GcHeader))
            .collect()
    }

    fn slot_for(state: &mut PoolState, v: &Value, id: ValueId) -> Arc<WeakSlot> {
        if let Some(slot) = state.registry.get(&id) {
            return slot.clone();
        }
        // First sighting: arm the collector's observer for the object.
        if let Some(header) = v.gc_header() {
            header.arm_post_mortem();
        }
        let slot = WeakSlot::new(v.clone());
        state.registry.insert(id, slot.clone());
        slot
    }

    fn extract_pending(&self, channel: Channel) -> Vec<Value> {
        let batch = {
            let mut state = self.shared.state.lock();
            match channel {
                Channel::Finalize => std::mem::take(&mut state.pending_finalize),
                Channel::Release => std::mem::take(&mut state.pending_release),
            }
        };
        self.finish(batch, channel)
    }

    fn extract_all_marked(&self, channel: Channel) -> Vec<Value> {
        let flag = channel.flag();
        let batch = {
            let mut state = self.shared.state.lock();
            let mut batch = match channel {
                Channel::Finalize => std::mem::take(&mut state.pending_finalize),
                Channel::Release => std::mem::take(&mut state.pending_release),
            };
            for slot in state.registry.values() {
                let flags = slot.flags.get();
                if flags.contains(flag) {
                    batch.push(Pending {
                        value: slot.handle.clone(),
                        order: slot.mark_order.get(),
                    });
                    // Only the mark matching this extraction is cleared;
                    // the other channel can still fire for this slot.
                    slot.flags.set(flags.without(flag));
                }
            }
            batch
        };
        self.finish(batch, channel)
    }

    /// Sort a batch in reverse mark order and hand it to the
    /// pre-finalization hook, outside the state lock.
    fn finish(&self, mut batch: Vec<Pending>, channel: Channel) -> Vec<Value> {
        if batch.is_empty() {
            // The common case, worth exiting early.
            return Vec::new();
        }
        batch.sort_by(|a, b| b.order.cmp(&a.order));
        tracing::debug!(
            target: "luma::weak",
            count = batch.len(),
            channel = channel.name(),
            "extracting marked values"
        );
        let values = batch.into_iter().map(|p| p.value).collect();
        self.shared.run_prefinalizer(values)
    }
}
