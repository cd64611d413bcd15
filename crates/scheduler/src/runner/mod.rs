//! Scheduler runner -- owns the worker pool and drives task execution.
//!
//! Split into focused submodules:
//! - `core`: Scheduler façade, engine, initialization, shutdown and accessors
//! - `submission`: task admission, blocking while the slot pool is exhausted
//! - `execution`: worker loop, call execution, completion and the hardware listener
//! - `sync`: waiting on handles, dependencies and owners

mod core;
mod execution;
mod submission;
mod sync;

pub use self::core::Scheduler;
