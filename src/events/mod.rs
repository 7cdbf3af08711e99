//! Payloads pushed by the dependency-resolution demo hub
//!
//! The connection core treats payloads as opaque JSON; these types decode
//! the one event the demo hub publishes.

mod types;

pub use types::{ResolutionEvent, RESOLUTION_EVENT};
