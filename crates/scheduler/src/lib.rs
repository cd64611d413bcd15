//! Asynchronous task scheduler for codec pipelines.
//!
//! Decode, encode and video-processing stages submit [`TaskDescription`]s
//! that name the buffers they read and produce. The [`Scheduler`] runs each
//! task on a fixed worker pool once every producer of its inputs has finished,
//! honoring priority, execution class and per-owner exclusivity, and hands
//! back a [`SyncHandle`] the caller can wait on.

mod admission;
mod deps;
mod dispatch;
pub mod metrics;
mod occupancy;
mod queue;
pub mod runner;
mod slot;
mod state;
pub mod task;
pub mod types;

pub use codecflow_core::{
    DependencyToken, ExecutionClass, OwnerId, Priority, SchedulerConfig, SchedulerError, ThreadingMode,
};
pub use metrics::SchedulerMetrics;
pub use runner::Scheduler;
pub use task::{routine, CallInfo, FnRoutine, TaskDescription, TaskReturn, TaskRoutine};
pub use types::{
    codes, PerformanceMessage, QueueDepth, SchedulerSnapshot, SyncHandle, TaskOutcome, TaskStatus,
};
