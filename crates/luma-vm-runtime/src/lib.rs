//! # Luma VM Runtime
//!
//! Runtime glue for the Luma VM, providing:
//! - Explicit GC root tracking
//! - The finalization pipeline (periodic driving and shutdown drain)
//! - The native resource release driver
//! - The quota policy seam (with a no-op default)

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod error;
pub mod quota;
pub mod roots;
pub mod runtime;

pub use error::{RuntimeError, RuntimeResult};
pub use quota::{NoQuotas, QuotaPolicy};
pub use roots::RootSet;
pub use runtime::{FinalizeHandler, Runtime};
