//! Allocation tracking and stop-the-world mark/sweep collection.
//!
//! ## Design
//!
//! - **Non-moving**: objects are individually allocated and never move,
//!   so a `GcHeader` address is a stable identity for the object's
//!   lifetime
//! - **Explicit roots**: `collect()` takes the root set as a slice of
//!   header pointers and marks transitively from there
//! - **Cycle-stamped marks**: each registry numbers its collections and
//!   stamps marks with that number, so opening a cycle invalidates every
//!   old mark with one counter increment (see [`crate::object`])
//! - **Post-mortem observers**: an unreachable object whose header is
//!   armed is reported to the registry's hook instead of being freed; it
//!   survives the cycle that discovered it and is freed by a later cycle
//!   once disarmed (the hook can also re-arm it)

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::object::{GcAllocation, GcHeader, MarkColor};

/// Drop function for an allocation: drops the value in place and frees
/// the backing memory.
pub type DropFn = unsafe fn(*mut u8);

/// Trace function for an allocation: visits the headers of every object
/// the value strongly references.
pub type TraceFn = unsafe fn(*const u8, &mut dyn FnMut(*const GcHeader));

/// Decision returned by a post-mortem hook for an unreachable armed
/// object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reclaim {
    /// Disarm the observer. The object still survives the current cycle
    /// and is freed by a later one if it stays unreachable.
    Continue,
    /// Keep the observer armed: the object was resurrected and must get
    /// another chance to die quietly.
    Rearm,
}

/// Post-mortem hook invoked during sweep for each unreachable armed
/// object. Receives the object's header.
///
/// The hook runs while the registry's allocation list is locked: it must
/// not allocate from or collect this registry.
pub type PostMortemHook = Arc<dyn Fn(*const GcHeader) -> Reclaim + Send + Sync>;

/// One tracked allocation.
struct Allocation {
    /// Pointer to the GcHeader at the start of the allocation
    header: *mut GcHeader,
    /// Size of the allocation (header + value)
    size: usize,
    /// Drop function for this allocation
    drop_fn: DropFn,
    /// Trace function for this allocation
    trace_fn: Option<TraceFn>,
}

// SAFETY: Allocation contains raw pointers but they are managed
// exclusively by the owning AllocationRegistry behind its mutex.
unsafe impl Send for Allocation {}
unsafe impl Sync for Allocation {}

/// Central registry tracking all GC-managed allocations.
///
/// Owns the mark/sweep machinery and the post-mortem observer channel.
/// One registry per runtime; shared via `Arc`.
pub struct AllocationRegistry {
    /// All live allocations.
    allocations: Mutex<Vec<Allocation>>,
    /// Collection cycle counter. Marks stamped under earlier cycles
    /// read as White; see [`GcHeader::mark`].
    cycle: AtomicU64,
    /// Total bytes allocated.
    total_bytes: AtomicUsize,
    /// Threshold for triggering GC (default 1MB)
    gc_threshold: AtomicUsize,
    /// Number of collections performed
    collection_count: AtomicUsize,
    /// Bytes reclaimed in last collection
    last_reclaimed: AtomicUsize,
    /// Total pause time in nanoseconds (accumulated across collections)
    total_pause_nanos: AtomicU64,
    /// Last pause time in nanoseconds
    last_pause_nanos: AtomicU64,
    /// Post-mortem observer hook, installed once by the weak-ref pool.
    post_mortem_hook: RwLock<Option<PostMortemHook>>,
}

impl AllocationRegistry {
    /// Create a new allocation registry
    pub fn new() -> Self {
        Self {
            allocations: Mutex::new(Vec::new()),
            cycle: AtomicU64::new(1),
            total_bytes: AtomicUsize::new(0),
            gc_threshold: AtomicUsize::new(1024 * 1024), // 1MB default
            collection_count: AtomicUsize::new(0),
            last_reclaimed: AtomicUsize::new(0),
            total_pause_nanos: AtomicU64::new(0),
            last_pause_nanos: AtomicU64::new(0),
            post_mortem_hook: RwLock::new(None),
        }
    }

    /// Create a new registry with a custom GC threshold
    pub fn with_threshold(threshold: usize) -> Self {
        let registry = Self::new();
        registry.gc_threshold.store(threshold, Ordering::Relaxed);
        registry
    }

    /// Register a new allocation.
    ///
    /// # Safety
    /// - `header` must point to a valid GcHeader at the start of an
    ///   allocation laid out as [`GcAllocation`]
    /// - `drop_fn` must correctly drop and deallocate the memory
    /// - The allocation must remain valid until removed by a sweep
    pub unsafe fn register(
        &self,
        header: *mut GcHeader,
        size: usize,
        drop_fn: DropFn,
        trace_fn: Option<TraceFn>,
    ) {
        self.allocations.lock().push(Allocation {
            header,
            size,
            drop_fn,
            trace_fn,
        });
        self.total_bytes.fetch_add(size, Ordering::Relaxed);
    }

    /// Install the post-mortem observer hook.
    ///
    /// The weak-ref pool installs exactly one hook per registry; a later
    /// call replaces the previous hook.
    pub fn set_post_mortem_hook(&self, hook: PostMortemHook) {
        *self.post_mortem_hook.write() = Some(hook);
    }

    /// Get total allocated bytes
    pub fn total_bytes(&self) -> usize {
        self.total_bytes.load(Ordering::Relaxed)
    }

    /// Get GC threshold
    pub fn gc_threshold(&self) -> usize {
        self.gc_threshold.load(Ordering::Relaxed)
    }

    /// Set GC threshold
    pub fn set_gc_threshold(&self, threshold: usize) {
        self.gc_threshold.store(threshold, Ordering::Relaxed);
    }

    /// Check if GC should be triggered
    pub fn should_gc(&self) -> bool {
        self.total_bytes() >= self.gc_threshold()
    }

    /// Get the number of live allocations.
    pub fn allocation_count(&self) -> usize {
        self.allocations.lock().len()
    }

    /// Get collection statistics
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            total_bytes: self.total_bytes(),
            allocation_count: self.allocation_count(),
            collection_count: self.collection_count.load(Ordering::Relaxed),
            last_reclaimed: self.last_reclaimed.load(Ordering::Relaxed),
            total_pause_time: Duration::from_nanos(self.total_pause_nanos.load(Ordering::Relaxed)),
            last_pause_time: Duration::from_nanos(self.last_pause_nanos.load(Ordering::Relaxed)),
        }
    }

    /// Perform a full mark/sweep collection.
    ///
    /// `roots` are the headers of all externally reachable objects;
    /// marking proceeds transitively from them. Returns bytes reclaimed.
    pub fn collect(&self, roots: &[*const GcHeader]) -> usize {
        let start = Instant::now();

        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "luma::gc",
            roots = roots.len(),
            heap_bytes = self.total_bytes(),
            "GC cycle starting"
        );

        let mut allocations = self.allocations.lock();

        // Phase 1: open a new cycle; every existing mark goes stale
        let cycle = self.cycle.fetch_add(1, Ordering::AcqRel) + 1;

        // Phase 2: mark from roots
        let trace_lookup = Self::build_trace_lookup(allocations.as_slice());
        Self::mark(&trace_lookup, roots, cycle);

        // Phase 2b: whatever an unreachable armed object references must
        // outlive it for its observer, so mark the referents. The armed
        // objects themselves are kept White, even inside reference
        // cycles, so the sweep below reports every one of them.
        Self::mark_finalizable_referents(allocations.as_slice(), &trace_lookup, cycle);

        // Phase 3: sweep unmarked objects, consulting the post-mortem
        // hook for armed ones
        let hook = self.post_mortem_hook.read().clone();
        let (dead, reclaimed) = Self::sweep(&mut *allocations, hook.as_ref(), cycle);

        self.total_bytes.fetch_sub(reclaimed, Ordering::Relaxed);
        drop(allocations);

        // Call drop functions after releasing the allocation list
        for entry in dead {
            // SAFETY: entry was removed from the registry and is
            // unreachable; drop_fn matches the allocation.
            unsafe {
                (entry.drop_fn)(entry.header as *mut u8);
            }
        }

        let elapsed_nanos = start.elapsed().as_nanos() as u64;
        self.collection_count.fetch_add(1, Ordering::Relaxed);
        self.last_reclaimed.store(reclaimed, Ordering::Relaxed);
        self.total_pause_nanos
            .fetch_add(elapsed_nanos, Ordering::Relaxed);
        self.last_pause_nanos.store(elapsed_nanos, Ordering::Relaxed);

        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "luma::gc",
            reclaimed_bytes = reclaimed,
            pause_us = start.elapsed().as_micros() as u64,
            live_bytes = self.total_bytes(),
            "GC cycle complete"
        );

        reclaimed
    }

    /// Build a lookup table mapping header addresses to trace functions,
    /// built once per GC cycle for O(1) lookup during the mark phase.
    fn build_trace_lookup(allocations: &[Allocation]) -> FxHashMap<usize, Option<TraceFn>> {
        let mut map = FxHashMap::default();
        for entry in allocations {
            map.insert(entry.header as usize, entry.trace_fn);
        }
        map
    }

    /// Mark phase: trace from roots and mark all reachable objects
    fn mark(
        trace_lookup: &FxHashMap<usize, Option<TraceFn>>,
        roots: &[*const GcHeader],
        cycle: u64,
    ) {
        let mut worklist: Vec<*const GcHeader> = Vec::new();

        for &root in roots {
            if !root.is_null() && trace_lookup.contains_key(&(root as usize)) {
                // SAFETY: root is a tracked allocation, so its header is
                // valid.
                unsafe {
                    if (*root).mark(cycle) == MarkColor::White {
                        (*root).set_mark(cycle, MarkColor::Gray);
                        worklist.push(root);
                    }
                }
            }
        }

        while let Some(ptr) = worklist.pop() {
            // SAFETY: only tracked headers enter the worklist.
            unsafe {
                let header = &*ptr;
                if header.mark(cycle) == MarkColor::Black {
                    continue;
                }

                if let Some(Some(trace_fn)) = trace_lookup.get(&(ptr as usize)) {
                    let data_ptr = (ptr as *const u8).add(std::mem::size_of::<GcHeader>());
                    trace_fn(data_ptr, &mut |child| {
                        if !child.is_null()
                            && trace_lookup.contains_key(&(child as usize))
                            && (*child).mark(cycle) == MarkColor::White
                        {
                            (*child).set_mark(cycle, MarkColor::Gray);
                            worklist.push(child);
                        }
                    });
                }

                header.set_mark(cycle, MarkColor::Black);
            }
        }
    }

    /// Mark everything reachable from an unreachable armed object,
    /// without coloring such objects themselves.
    ///
    /// Referents must outlive the dying object so its observer (and any
    /// finalizer the runtime runs afterwards) can still traverse it.
    /// Objects awaiting post-mortem stay White here, even when a
    /// reference cycle leads back to one: each of them must be reported
    /// by every sweep until its own death is processed. Their referents
    /// are covered anyway, because the seeding loop below visits every
    /// awaiting object, not just the ones a traversal would reach.
    fn mark_finalizable_referents(
        allocations: &[Allocation],
        trace_lookup: &FxHashMap<usize, Option<TraceFn>>,
        cycle: u64,
    ) {
        let mut worklist: Vec<*const GcHeader> = Vec::new();

        for entry in allocations {
            // SAFETY: every tracked header is valid during collection.
            let header = unsafe { &*entry.header };
            if !header.awaiting_post_mortem(cycle) {
                continue;
            }
            if let Some(trace_fn) = entry.trace_fn {
                // SAFETY: the allocation is live (sweep has not run) and
                // trace_fn matches its type.
                unsafe {
                    let data_ptr =
                        (entry.header as *const u8).add(std::mem::size_of::<GcHeader>());
                    trace_fn(data_ptr, &mut |child| worklist.push(child));
                }
            }
        }

        while let Some(ptr) = worklist.pop() {
            if ptr.is_null() || !trace_lookup.contains_key(&(ptr as usize)) {
                continue;
            }
            // SAFETY: the pointer is a tracked allocation's header.
            unsafe {
                let header = &*ptr;
                if header.mark(cycle) != MarkColor::White {
                    continue;
                }
                // Awaiting objects stay White so the sweep reports them;
                // their own referents were seeded above.
                if header.post_mortem_armed() {
                    continue;
                }

                // Color before tracing, so cycles terminate.
                header.set_mark(cycle, MarkColor::Black);
                if let Some(Some(trace_fn)) = trace_lookup.get(&(ptr as usize)) {
                    let data_ptr = (ptr as *const u8).add(std::mem::size_of::<GcHeader>());
                    trace_fn(data_ptr, &mut |child| worklist.push(child));
                }
            }
        }
    }

    /// Sweep phase: partition allocations into live and dead.
    ///
    /// Objects awaiting post-mortem are reported to `hook` and kept
    /// alive for the current cycle; everything else White is freed.
    fn sweep(
        allocations: &mut Vec<Allocation>,
        hook: Option<&PostMortemHook>,
        cycle: u64,
    ) -> (Vec<Allocation>, usize) {
        let mut live = Vec::with_capacity(allocations.len());
        let mut dead = Vec::new();
        let mut reclaimed = 0usize;

        for entry in allocations.drain(..) {
            // SAFETY: entry.header is valid until the allocation is
            // dropped, which only happens below after partitioning.
            let header = unsafe { &*entry.header };

            if header.awaiting_post_mortem(cycle) {
                let decision = match hook {
                    Some(hook) => hook(entry.header as *const GcHeader),
                    None => Reclaim::Continue,
                };
                if decision == Reclaim::Continue {
                    header.disarm_post_mortem();
                }
                // Survives the cycle that discovered it; a later cycle
                // frees it once disarmed and still unreachable.
                live.push(entry);
                continue;
            }

            if header.mark(cycle) != MarkColor::White {
                live.push(entry);
                continue;
            }

            reclaimed += entry.size;
            dead.push(entry);
        }

        *allocations = live;
        (dead, reclaimed)
    }

    /// Deallocate ALL tracked allocations without marking.
    ///
    /// Use this when tearing down a runtime to reclaim all memory. No
    /// post-mortem hooks run. Every outstanding reference into the heap
    /// becomes dangling, so this must be the very last operation.
    pub fn dealloc_all(&self) -> usize {
        let entries: Vec<Allocation> = {
            let mut allocations = self.allocations.lock();
            allocations.drain(..).collect()
        };

        let total = self.total_bytes.swap(0, Ordering::Relaxed);
        for entry in entries {
            // SAFETY: the registry has been emptied; nothing observes
            // these allocations anymore.
            unsafe {
                (entry.drop_fn)(entry.header as *mut u8);
            }
        }
        total
    }
}

impl Default for AllocationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: the allocation list is behind a mutex and headers are only
// mutated through atomics.
unsafe impl Send for AllocationRegistry {}
unsafe impl Sync for AllocationRegistry {}

/// Statistics from the allocation registry
#[derive(Debug, Clone, Copy)]
pub struct RegistryStats {
    /// Total bytes currently allocated
    pub total_bytes: usize,
    /// Number of live allocations
    pub allocation_count: usize,
    /// Total number of collections performed
    pub collection_count: usize,
    /// Bytes reclaimed in last collection
    pub last_reclaimed: usize,
    /// Total pause time accumulated across all collections
    pub total_pause_time: Duration,
    /// Pause time of the last collection
    pub last_pause_time: Duration,
}

/// Allocate a GC-managed value in the given registry.
///
/// Returns a pointer to the value; the header sits immediately before it
/// (see [`GcAllocation`]).
///
/// # Safety
/// The caller must ensure the returned pointer is kept reachable through
/// the root set passed to `collect()` for as long as it is used.
pub unsafe fn gc_alloc_in<T>(registry: &AllocationRegistry, tag: u8, value: T) -> *mut T
where
    T: GcTraceable + 'static,
{
    let layout = std::alloc::Layout::new::<GcAllocation<T>>();

    let trace_fn: Option<TraceFn> = if T::NEEDS_TRACE {
        Some(trace_gc_box::<T>)
    } else {
        None
    };

    // SAFETY: layout is valid and non-zero sized (header is 8 bytes).
    let ptr = unsafe { std::alloc::alloc(layout) as *mut GcAllocation<T> };
    if ptr.is_null() {
        std::alloc::handle_alloc_error(layout);
    }

    // SAFETY: ptr is non-null and properly aligned for GcAllocation<T>.
    unsafe {
        std::ptr::write(&mut (*ptr).header, GcHeader::new(tag));
        std::ptr::write(&mut (*ptr).value, value);
        registry.register(
            ptr as *mut GcHeader,
            layout.size(),
            drop_gc_box::<T>,
            trace_fn,
        );
        &mut (*ptr).value as *mut T
    }
}

/// Recover the header pointer from a value pointer produced by
/// [`gc_alloc_in`].
///
/// # Safety
/// `ptr` must point to the `value` field of a live [`GcAllocation<T>`].
pub unsafe fn header_from_value_ptr<T>(ptr: *const T) -> *const GcHeader {
    // SAFETY: caller guarantees ptr points into a GcAllocation<T>.
    unsafe {
        (ptr as *const u8).sub(std::mem::offset_of!(GcAllocation<T>, value)) as *const GcHeader
    }
}

/// Drop function for GC boxes
unsafe fn drop_gc_box<T>(ptr: *mut u8) {
    let layout = std::alloc::Layout::new::<GcAllocation<T>>();
    let box_ptr = ptr as *mut GcAllocation<T>;
    // SAFETY: ptr is valid and points to an initialized GcAllocation<T>
    unsafe {
        std::ptr::drop_in_place(&mut (*box_ptr).value);
        std::alloc::dealloc(ptr, layout);
    }
}

/// Trace function for GC boxes
unsafe fn trace_gc_box<T: GcTraceable>(ptr: *const u8, tracer: &mut dyn FnMut(*const GcHeader)) {
    let value_ptr = ptr as *const T;
    // SAFETY: ptr is valid and points to an initialized T
    unsafe {
        (*value_ptr).trace(tracer);
    }
}

/// Trait for types that can be traced by the GC
pub trait GcTraceable {
    /// Whether this type contains GC references that need tracing
    const NEEDS_TRACE: bool;

    /// Trace all GC references in this value
    fn trace(&self, tracer: &mut dyn FnMut(*const GcHeader));
}

impl GcTraceable for () {
    const NEEDS_TRACE: bool = false;
    fn trace(&self, _tracer: &mut dyn FnMut(*const GcHeader)) {}
}

impl GcTraceable for i32 {
    const NEEDS_TRACE: bool = false;
    fn trace(&self, _tracer: &mut dyn FnMut(*const GcHeader)) {}
}

impl GcTraceable for i64 {
    const NEEDS_TRACE: bool = false;
    fn trace(&self, _tracer: &mut dyn FnMut(*const GcHeader)) {}
}

impl GcTraceable for f64 {
    const NEEDS_TRACE: bool = false;
    fn trace(&self, _tracer: &mut dyn FnMut(*const GcHeader)) {}
}

impl GcTraceable for String {
    const NEEDS_TRACE: bool = false;
    fn trace(&self, _tracer: &mut dyn FnMut(*const GcHeader)) {}
}
