//! # Luma VM Garbage Collector
//!
//! Non-moving, stop-the-world mark/sweep collector with post-mortem
//! observers.
//!
//! ## Design
//!
//! - **Explicit roots**: the runtime hands `collect()` the full root set
//! - **Non-moving**: header addresses are stable identities, which the
//!   weak-ref pool relies on
//! - **Post-mortem observers**: the sweep reports unreachable armed
//!   objects to a registered hook instead of freeing them; the hook
//!   decides whether the observer stays armed (resurrection) or not.
//!   Armed objects stay unmarked even inside reference cycles, so every
//!   member of a dead cycle still gets reported
//! - **Cycle-stamped marks**: each registry numbers its collections;
//!   marks stamped under an earlier cycle read as unmarked, making the
//!   between-cycle reset a single counter increment

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod object;
pub mod registry;

pub use object::{GcAllocation, GcHeader, MarkColor};
pub use registry::{
    gc_alloc_in, header_from_value_ptr, AllocationRegistry, DropFn, GcTraceable, PostMortemHook,
    Reclaim, RegistryStats, TraceFn,
};
