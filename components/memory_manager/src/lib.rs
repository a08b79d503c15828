//! Memory Manager - object heap and garbage collector
//!
//! This component provides:
//! - A handle-indexed heap with monotonic, never reused handles
//! - Typed array storage, string objects and embedder payloads
//! - String interning for literal identity
//! - Packed per-object monitor words
//! - Stop-the-world mark-sweep collection over an explicit root set

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod gc;
pub mod heap;
pub mod monitor;
pub mod object;

// Re-export main types
pub use gc::{GcOutcome, RootSet};
pub use heap::{GcStats, Heap, DEFAULT_GC_THRESHOLD};
pub use monitor::{MonitorEnter, MonitorError, MonitorWord};
pub use object::{ArrayAccessError, ArrayData, HeapObject, HostObject, Payload};
