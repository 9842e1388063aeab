//! The runtime: owns the heap, the weak-ref pool, and the finalization
//! pipeline.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use luma_vm_core::gc::{AllocationRegistry, GcHeader, RegistryStats};
use luma_vm_core::object::tags;
use luma_vm_core::{GcRef, Table, UserData, Value};
use luma_vm_weak::{MarkFlags, WeakRef, WeakRefPool};

use crate::error::{RuntimeError, RuntimeResult};
use crate::quota::{NoQuotas, QuotaPolicy};
use crate::roots::RootSet;

/// Script-level finalizer callback (the `__gc` dispatch), supplied by
/// the interpreter. Errors are caught by the runtime and logged.
pub type FinalizeHandler = Box<dyn Fn(&Value) -> RuntimeResult<()> + Send + Sync>;

/// A Luma runtime instance.
///
/// Owns the collector registry, the weak-ref pool wired into it, and
/// the explicit root set. Periodically call
/// [`Runtime::collect_garbage`] and [`Runtime::run_pending_finalizers`];
/// call [`Runtime::close`] (or just drop the runtime) to drain every
/// still-marked value at shutdown.
pub struct Runtime {
    registry: Arc<AllocationRegistry>,
    pool: WeakRefPool,
    roots: RootSet,
    finalize_handler: RwLock<Option<FinalizeHandler>>,
    quota: Box<dyn QuotaPolicy>,
    closed: AtomicBool,
}

impl Runtime {
    /// Create a runtime with the default (no-op) quota policy.
    pub fn new() -> Self {
        Self::with_quota(Box::new(NoQuotas))
    }

    /// Create a runtime with a custom quota policy.
    pub fn with_quota(quota: Box<dyn QuotaPolicy>) -> Self {
        let registry = Arc::new(AllocationRegistry::new());
        let pool = WeakRefPool::new(&registry);
        Self {
            registry,
            pool,
            roots: RootSet::new(),
            finalize_handler: RwLock::new(None),
            quota,
            closed: AtomicBool::new(false),
        }
    }

    /// Install the script-level finalizer dispatch.
    pub fn set_finalize_handler(&self, handler: FinalizeHandler) {
        *self.finalize_handler.write() = Some(handler);
    }

    /// Allocate an empty table.
    pub fn create_table(&self) -> RuntimeResult<Value> {
        self.ensure_open()?;
        self.quota
            .require_mem(std::mem::size_of::<Table>() as u64)?;
        Ok(Value::Table(GcRef::alloc_in(
            &self.registry,
            tags::TABLE,
            Table::new(),
        )))
    }

    /// Allocate a userdata object wrapping `payload`.
    pub fn create_userdata(
        &self,
        type_name: &str,
        payload: Box<dyn Any>,
    ) -> RuntimeResult<Value> {
        self.ensure_open()?;
        self.quota
            .require_mem(std::mem::size_of::<UserData>() as u64)?;
        Ok(Value::UserData(GcRef::alloc_in(
            &self.registry,
            tags::USERDATA,
            UserData::new(type_name, payload),
        )))
    }

    /// Register `value` as a GC root; returns a handle for
    /// [`Runtime::unroot`].
    pub fn root(&self, value: &Value) -> u64 {
        self.roots.register(value.clone())
    }

    /// Drop the root registered under `id`.
    pub fn unroot(&self, id: u64) {
        self.roots.remove(id);
    }

    /// The canonical weak handle for `value`.
    pub fn weak_ref(&self, value: &Value) -> WeakRef {
        self.pool.get(value)
    }

    /// Mark `value` for post-mortem finalization and/or release.
    pub fn mark(&self, value: &Value, flags: MarkFlags) {
        self.pool.mark(value, flags);
    }

    /// The active quota policy.
    pub fn quota(&self) -> &dyn QuotaPolicy {
        &*self.quota
    }

    /// Collector statistics.
    pub fn gc_stats(&self) -> RegistryStats {
        self.registry.stats()
    }

    /// Run a full collection over the current roots.
    ///
    /// The root set is the registered roots plus every value the pool
    /// has queued for extraction. Returns bytes reclaimed.
    pub fn collect_garbage(&self) -> usize {
        let mut headers: Vec<*const GcHeader> = self.roots.headers();
        headers.extend(self.pool.pending_root_headers());
        self.registry.collect(&headers)
    }

    /// Drive finalizers and releases for values that died since the
    /// last call.
    ///
    /// Finalizers run first (most recently marked first), then
    /// releases, matching the script contract that resources disappear
    /// only after the finalizer has observed the value.
    pub fn run_pending_finalizers(&self) {
        for value in self.pool.extract_pending_finalize() {
            self.run_finalizer(&value);
        }
        for value in self.pool.extract_pending_release() {
            Self::release_value(&value);
        }
    }

    /// Shut the runtime down: every still-marked value is drained and
    /// its finalizer/release runs synchronously, collected or not.
    ///
    /// Idempotent; also invoked by `Drop`.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(target: "luma::runtime", "closing runtime, draining marked values");
        for value in self.pool.extract_all_marked_finalize() {
            self.run_finalizer(&value);
        }
        for value in self.pool.extract_all_marked_release() {
            Self::release_value(&value);
        }
    }

    /// True once [`Runtime::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> RuntimeResult<()> {
        if self.is_closed() {
            return Err(RuntimeError::Closed);
        }
        Ok(())
    }

    /// Dispatch one finalizer. Script errors are caught here and
    /// logged; they never abort the drain.
    fn run_finalizer(&self, value: &Value) {
        let handler = self.finalize_handler.read();
        if let Some(handler) = handler.as_ref() {
            if let Err(err) = handler(value) {
                tracing::warn!(
                    target: "luma::runtime",
                    error = %err,
                    ty = value.type_name(),
                    "finalizer failed"
                );
            }
        }
    }

    /// Release the native resources of one extracted value.
    fn release_value(value: &Value) {
        if let Some(ud) = value.as_userdata() {
            if ud.release().is_some() {
                tracing::trace!(
                    target: "luma::runtime",
                    ty = ud.type_name(),
                    "released userdata resources"
                );
            }
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.close();
    }
}
