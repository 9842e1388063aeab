//! End-to-end weak-ref pool scenarios against the real collector.
//!
//! Each test owns its registry and pool, so tests are independent and
//! can run in parallel. "Dropping" a value means not listing it in the
//! roots passed to `collect`.

use std::sync::{Arc, Mutex};

use luma_vm_core::gc::AllocationRegistry;
use luma_vm_core::object::tags;
use luma_vm_core::{GcRef, Table, UserData, Value};
use luma_vm_gc::GcHeader;
use luma_vm_weak::{MarkFlags, WeakRefPool};

fn new_heap() -> (AllocationRegistry, WeakRefPool) {
    let registry = AllocationRegistry::new();
    let pool = WeakRefPool::new(&registry);
    (registry, pool)
}

fn table(registry: &AllocationRegistry, name: &str) -> Value {
    let t = Table::new();
    t.set_field("name", Value::str(name));
    Value::Table(GcRef::alloc_in(registry, tags::TABLE, t))
}

fn name_of(v: &Value) -> String {
    match v.as_table().map(|t| t.get_field("name")) {
        Some(Value::Str(s)) => s.to_string(),
        _ => String::new(),
    }
}

/// Run a collection with `roots` plus whatever the pool has pending.
fn collect(registry: &AllocationRegistry, pool: &WeakRefPool, roots: &[&Value]) -> usize {
    let mut headers: Vec<*const GcHeader> = roots
        .iter()
        .filter_map(|v| v.gc_header().map(|h| h as *const GcHeader))
        .collect();
    headers.extend(pool.pending_root_headers());
    registry.collect(&headers)
}

#[test]
fn test_basic_weak_observation() {
    let (registry, pool) = new_heap();

    let a = table(&registry, "a");
    let weak = pool.get(&a);

    // Still rooted: the handle resolves
    collect(&registry, &pool, &[&a]);
    assert_eq!(weak.value(), Some(a.clone()));

    // The read above resurrected it, so the first unrooted cycle only
    // cancels that death; the second one makes it stick
    collect(&registry, &pool, &[]);
    collect(&registry, &pool, &[]);
    assert!(weak.value().is_none());
}

#[test]
fn test_unobserved_value_dies_in_one_cycle() {
    let (registry, pool) = new_heap();

    let a = table(&registry, "a");
    let weak = pool.get(&a);

    // No value() read since creation: one cycle is enough
    collect(&registry, &pool, &[]);
    assert!(weak.value().is_none());
}

#[test]
fn test_marked_finalization_order() {
    let (registry, pool) = new_heap();

    let a = table(&registry, "a");
    let b = table(&registry, "b");
    let c = table(&registry, "c");
    pool.mark(&a, MarkFlags::FINALIZE);
    pool.mark(&b, MarkFlags::FINALIZE);
    pool.mark(&c, MarkFlags::FINALIZE);

    collect(&registry, &pool, &[]);

    let extracted = pool.extract_pending_finalize();
    let names: Vec<String> = extracted.iter().map(name_of).collect();
    assert_eq!(names, ["c", "b", "a"]);

    // Each value is returned exactly once across all invocations
    assert!(pool.extract_pending_finalize().is_empty());
}

#[test]
fn test_resurrection_defers_death() {
    let (registry, pool) = new_heap();

    let a = table(&registry, "a");
    let weak = pool.get(&a);
    pool.mark(&a, MarkFlags::FINALIZE);

    // Revive through the handle, then drop all strong references
    assert_eq!(weak.value(), Some(a.clone()));
    drop(a);

    // Cycle 1: the observer sees the resurrection and re-arms
    collect(&registry, &pool, &[]);
    assert!(pool.extract_pending_finalize().is_empty());

    // Cycle 2: nobody revived it since, so now it dies
    collect(&registry, &pool, &[]);
    let extracted = pool.extract_pending_finalize();
    assert_eq!(extracted.len(), 1);
    assert_eq!(name_of(&extracted[0]), "a");
}

#[test]
fn test_dual_flags_fire_each_channel_once() {
    let (registry, pool) = new_heap();

    let a = table(&registry, "a");
    pool.mark(&a, MarkFlags::FINALIZE | MarkFlags::RELEASE);

    collect(&registry, &pool, &[]);

    assert_eq!(pool.extract_pending_finalize().len(), 1);
    assert_eq!(pool.extract_pending_release().len(), 1);
    assert!(pool.extract_pending_finalize().is_empty());
    assert!(pool.extract_pending_release().is_empty());
}

#[test]
fn test_flags_union_across_marks() {
    let (registry, pool) = new_heap();

    let a = table(&registry, "a");
    pool.mark(&a, MarkFlags::FINALIZE);
    pool.mark(&a, MarkFlags::RELEASE);

    collect(&registry, &pool, &[]);

    assert_eq!(pool.extract_pending_finalize().len(), 1);
    assert_eq!(pool.extract_pending_release().len(), 1);
}

#[test]
fn test_shutdown_drain_returns_live_marked_values() {
    let (registry, pool) = new_heap();

    let a = table(&registry, "a");
    let b = table(&registry, "b");
    pool.mark(&a, MarkFlags::FINALIZE);
    pool.mark(&b, MarkFlags::FINALIZE);

    // Never collected: both are still alive
    let drained = pool.extract_all_marked_finalize();
    let names: Vec<String> = drained.iter().map(name_of).collect();
    assert_eq!(names, ["b", "a"]);

    // The marks are cleared: an immediate re-drain is empty (and so is
    // the pending queue even after the values later die)
    assert!(pool.extract_all_marked_finalize().is_empty());
    collect(&registry, &pool, &[]);
    assert!(pool.extract_pending_finalize().is_empty());
}

#[test]
fn test_shutdown_drain_leaves_other_channel_marked() {
    let (registry, pool) = new_heap();

    let a = table(&registry, "a");
    pool.mark(&a, MarkFlags::FINALIZE | MarkFlags::RELEASE);

    assert_eq!(pool.extract_all_marked_finalize().len(), 1);

    // The release mark survives the finalize drain
    assert_eq!(pool.extract_all_marked_release().len(), 1);
    assert!(pool.extract_all_marked_release().is_empty());
}

#[test]
fn test_remarking_moves_value_forward() {
    let (registry, pool) = new_heap();

    let a = table(&registry, "a");
    let b = table(&registry, "b");
    pool.mark(&a, MarkFlags::FINALIZE);
    pool.mark(&b, MarkFlags::FINALIZE);
    pool.mark(&a, MarkFlags::FINALIZE); // remark: a now newest

    collect(&registry, &pool, &[]);

    let names: Vec<String> = pool.extract_pending_finalize().iter().map(name_of).collect();
    assert_eq!(names, ["a", "b"]);
}

#[test]
fn test_cyclic_marked_values_all_finalize() {
    let (registry, pool) = new_heap();

    // a and b reference each other; the cycle must not exempt either
    // from finalization
    let a = table(&registry, "a");
    let b = table(&registry, "b");
    if let (Some(ta), Some(tb)) = (a.as_table(), b.as_table()) {
        ta.set_field("peer", b.clone());
        tb.set_field("peer", a.clone());
    }
    pool.mark(&a, MarkFlags::FINALIZE);
    pool.mark(&b, MarkFlags::FINALIZE);

    collect(&registry, &pool, &[]);

    let names: Vec<String> = pool.extract_pending_finalize().iter().map(name_of).collect();
    assert_eq!(names, ["b", "a"]);
}

#[test]
fn test_pending_values_survive_until_extracted() {
    let (registry, pool) = new_heap();

    let a = table(&registry, "a");
    pool.mark(&a, MarkFlags::FINALIZE);
    drop(a);

    collect(&registry, &pool, &[]);
    // Dead but queued: the object is still reconstructible
    assert_eq!(registry.allocation_count(), 1);

    collect(&registry, &pool, &[]);
    assert_eq!(registry.allocation_count(), 1);

    let extracted = pool.extract_pending_finalize();
    assert_eq!(name_of(&extracted[0]), "a");

    // Extracted and unreferenced: the next cycle frees it
    drop(extracted);
    collect(&registry, &pool, &[]);
    assert_eq!(registry.allocation_count(), 0);
}

#[test]
fn test_userdata_participates_like_tables() {
    let (registry, pool) = new_heap();

    let ud = Value::UserData(GcRef::alloc_in(
        &registry,
        tags::USERDATA,
        UserData::new("socket", Box::new(7u32)),
    ));
    pool.mark(&ud, MarkFlags::RELEASE);
    drop(ud);

    collect(&registry, &pool, &[]);

    let extracted = pool.extract_pending_release();
    assert_eq!(extracted.len(), 1);
    assert!(extracted[0].as_userdata().is_some());
}

#[test]
fn test_prefinalizer_sees_ordered_batch() {
    let (registry, pool) = new_heap();
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let record = seen.clone();
    pool.set_prefinalizer(Box::new(move |values| {
        let mut seen = record.lock().unwrap();
        for v in &values {
            seen.push(name_of(v));
        }
        values
    }));

    let a = table(&registry, "a");
    let b = table(&registry, "b");
    pool.mark(&a, MarkFlags::FINALIZE);
    pool.mark(&b, MarkFlags::FINALIZE);

    collect(&registry, &pool, &[]);
    let extracted = pool.extract_pending_finalize();

    assert_eq!(*seen.lock().unwrap(), ["b", "a"]);
    assert_eq!(extracted.len(), 2);
}

#[test]
fn test_dropped_pool_reports_dead() {
    let registry = AllocationRegistry::new();
    let pool = WeakRefPool::new(&registry);

    let a = table(&registry, "a");
    let weak = pool.get(&a);
    assert!(weak.value().is_some());

    drop(pool);
    assert!(weak.value().is_none());
}

#[test]
fn test_spurious_callback_is_ignored() {
    let (registry, pool) = new_heap();

    // An armed object the pool has never seen: the observer fires with
    // an unknown token and must do nothing
    let stray = table(&registry, "stray");
    if let Some(header) = stray.gc_header() {
        header.arm_post_mortem();
    }
    drop(stray);

    collect(&registry, &pool, &[]);
    assert!(pool.extract_pending_finalize().is_empty());
    assert!(pool.extract_pending_release().is_empty());
}
