//! Garbage collection support
//!
//! This module provides the typed handle into the GC heap and re-exports
//! the collector types from luma-vm-gc.

use std::ptr::NonNull;

// Re-export GC types from luma-vm-gc
pub use luma_vm_gc::{
    AllocationRegistry, GcHeader, GcTraceable, MarkColor, Reclaim, RegistryStats,
};

/// Typed handle to a GC-managed object.
///
/// A `GcRef` is a bare pointer into the heap: copying it is free and it
/// does NOT keep its target alive. Reachability comes only from the root
/// set passed to [`AllocationRegistry::collect`]; dereferencing a
/// `GcRef` whose target was swept is undefined behavior, exactly like
/// the collector's raw API.
pub struct GcRef<T> {
    ptr: NonNull<T>,
}

impl<T> GcRef<T> {
    /// Allocate `value` in `registry` and return a handle to it.
    pub fn alloc_in(registry: &AllocationRegistry, tag: u8, value: T) -> Self
    where
        T: GcTraceable + 'static,
    {
        // SAFETY: rooting discipline is the caller's responsibility, as
        // documented on the type.
        let ptr = unsafe { luma_vm_gc::gc_alloc_in(registry, tag, value) };
        // SAFETY: gc_alloc_in never returns null (it aborts on OOM).
        Self {
            ptr: unsafe { NonNull::new_unchecked(ptr) },
        }
    }

    /// The object's GC header.
    #[inline]
    pub fn header(&self) -> &GcHeader {
        // SAFETY: the header sits immediately before the value in the
        // same allocation (GcAllocation layout).
        unsafe { &*luma_vm_gc::header_from_value_ptr(self.ptr.as_ptr()) }
    }

    /// Raw pointer to the object's GC header.
    #[inline]
    pub fn header_ptr(&self) -> *const GcHeader {
        // SAFETY: same layout argument as `header`.
        unsafe { luma_vm_gc::header_from_value_ptr(self.ptr.as_ptr()) }
    }

    /// Raw pointer to the value.
    #[inline]
    pub fn as_ptr(&self) -> *const T {
        self.ptr.as_ptr()
    }
}

impl<T> Clone for GcRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for GcRef<T> {}

impl<T> PartialEq for GcRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}

impl<T> Eq for GcRef<T> {}

impl<T> std::ops::Deref for GcRef<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // SAFETY: valid while the target is reachable; see type docs.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T> std::fmt::Debug for GcRef<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GcRef({:p})", self.ptr.as_ptr())
    }
}
