//! Heap objects: tables and userdata.
//!
//! Interior mutability is `RefCell`: objects belong to a single logical
//! runtime owner and are never mutated from the collector side.

use std::any::Any;
use std::cell::RefCell;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::gc::{GcHeader, GcTraceable};
use crate::value::Value;

pub use luma_vm_gc::object::tags;

/// A Luma table: a growable array part plus a string-keyed map part.
pub struct Table {
    array: RefCell<Vec<Value>>,
    map: RefCell<FxHashMap<Arc<str>, Value>>,
}

impl Table {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            array: RefCell::new(Vec::new()),
            map: RefCell::new(FxHashMap::default()),
        }
    }

    /// Append to the array part.
    pub fn push(&self, value: Value) {
        self.array.borrow_mut().push(value);
    }

    /// Length of the array part.
    pub fn len(&self) -> usize {
        self.array.borrow().len()
    }

    /// True if the array part is empty.
    pub fn is_empty(&self) -> bool {
        self.array.borrow().is_empty()
    }

    /// Read the array part at `index` (0-based); `Nil` when out of range.
    pub fn index(&self, index: usize) -> Value {
        self.array.borrow().get(index).cloned().unwrap_or(Value::Nil)
    }

    /// Set a named field.
    pub fn set_field(&self, key: impl Into<Arc<str>>, value: Value) {
        self.map.borrow_mut().insert(key.into(), value);
    }

    /// Read a named field; `Nil` when absent.
    pub fn get_field(&self, key: &str) -> Value {
        self.map.borrow().get(key).cloned().unwrap_or(Value::Nil)
    }
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}

impl GcTraceable for Table {
    const NEEDS_TRACE: bool = true;

    fn trace(&self, tracer: &mut dyn FnMut(*const GcHeader)) {
        for value in self.array.borrow().iter() {
            value.trace(tracer);
        }
        for value in self.map.borrow().values() {
            value.trace(tracer);
        }
    }
}

/// A userdata object: an opaque native payload plus one associated
/// script value.
pub struct UserData {
    type_name: Arc<str>,
    payload: RefCell<Option<Box<dyn Any>>>,
    user_value: RefCell<Value>,
}

impl UserData {
    /// Create userdata with the given type name and payload.
    pub fn new(type_name: impl Into<Arc<str>>, payload: Box<dyn Any>) -> Self {
        Self {
            type_name: type_name.into(),
            payload: RefCell::new(Some(payload)),
            user_value: RefCell::new(Value::Nil),
        }
    }

    /// The userdata's type name.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Take the native payload out, releasing the resources it owns.
    ///
    /// Returns `None` if the payload was already released.
    pub fn release(&self) -> Option<Box<dyn Any>> {
        self.payload.borrow_mut().take()
    }

    /// True once the payload has been released.
    pub fn is_released(&self) -> bool {
        self.payload.borrow().is_none()
    }

    /// The associated script value.
    pub fn user_value(&self) -> Value {
        self.user_value.borrow().clone()
    }

    /// Replace the associated script value.
    pub fn set_user_value(&self, value: Value) {
        *self.user_value.borrow_mut() = value;
    }
}

impl GcTraceable for UserData {
    const NEEDS_TRACE: bool = true;

    fn trace(&self, tracer: &mut dyn FnMut(*const GcHeader)) {
        self.user_value.borrow().trace(tracer);
    }
}
