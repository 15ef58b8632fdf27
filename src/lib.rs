//! Borroso - Pure Rust approximate-computing accounting runtime
//!
//! This library is the accounting core for approximate-computing research:
//! instrumented call sites invoke it at every load, store, arithmetic
//! operation, and object creation/destruction. It classifies each event as
//! precise or approximate, counts it, time-integrates per-object memory
//! footprint (byte-milliseconds), and exports a JSON report at shutdown.
//! Bookkeeping failures never crash the host program.

pub mod counters;
pub mod creation;
pub mod error;
pub mod memory;
pub mod numeric;
pub mod reaper;
pub mod registry;
pub mod report;
pub mod runtime;

pub use error::RuntimeError;
pub use memory::{FieldDescriptor, FieldTable, LocalSlot, MemKind};
pub use numeric::{ArithOperator, Number, NumberKind};
pub use reaper::TrackHandle;
pub use registry::ObjId;
pub use report::Report;
pub use runtime::{Runtime, RuntimeConfig, Tracked};
