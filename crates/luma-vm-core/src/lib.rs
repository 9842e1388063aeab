//! # Luma VM Core
//!
//! Value model for the Luma runtime: scalars, heap objects, and the
//! identity channel the weak-ref pool observes values through.
//!
//! ## Design Principles
//!
//! - **Cheap values**: `Value` is a small enum; heap variants are bare
//!   `GcRef` pointers, so cloning never allocates
//! - **Identity without retention**: `Value::identity` yields a token
//!   derived from the object's header address; holding the token (or an
//!   untraced `Value` copy) does not keep the object alive
//! - **Explicit rooting**: reachability flows exclusively through root
//!   sets handed to the collector

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod gc;
pub mod object;
pub mod value;

pub use gc::{AllocationRegistry, GcRef};
pub use object::{Table, UserData};
pub use value::{Value, ValueId};
