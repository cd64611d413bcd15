use serde::{Deserialize, Serialize};

use codecflow_core::{ExecutionClass, Priority, ThreadingMode};

/// Failure codes the scheduler itself assigns to tasks.
pub mod codes {
    /// The entry point or completion hook panicked.
    pub const UNKNOWN: i32 = -1;
    /// The scheduler was closed before the task finished.
    pub const ABORTED: i32 = -10;
}

/// Opaque handle to one submitted job: a slot index plus the slot's
/// generation at submission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncHandle {
    pub(crate) id: u32,
    pub(crate) generation: u32,
}

impl SyncHandle {
    /// A handle that never refers to a job.
    pub const NULL: SyncHandle = SyncHandle { id: 0, generation: 0 };

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn is_null(&self) -> bool {
        self.generation == 0
    }
}

impl std::fmt::Display for SyncHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.id, self.generation)
    }
}

/// Status of a live task record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TaskStatus {
    Pending,
    InProgress,
    Done,
    Failed(i32),
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed(_))
    }
}

/// What `synchronize` reports for a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TaskOutcome {
    Done,
    Failed(i32),
    /// The wait timed out before the job finished.
    InProgress,
}

impl TaskOutcome {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskOutcome::InProgress)
    }

    pub fn is_failed(self) -> bool {
        matches!(self, TaskOutcome::Failed(_))
    }
}

impl From<TaskStatus> for TaskOutcome {
    fn from(status: TaskStatus) -> Self {
        match status {
            TaskStatus::Done => TaskOutcome::Done,
            TaskStatus::Failed(code) => TaskOutcome::Failed(code),
            TaskStatus::Pending | TaskStatus::InProgress => TaskOutcome::InProgress,
        }
    }
}

/// Runtime adjustments accepted by `Scheduler::adjust_performance`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PerformanceMessage {
    /// Return to the default state (hardware listener stopped).
    ResetToDefaults,
    /// Start a thread that signals a hardware event periodically.
    StartHwListening,
    StopHwListening,
}

/// Number of queued tasks in one (priority, class) queue.
#[derive(Debug, Clone, Serialize)]
pub struct QueueDepth {
    pub priority: Priority,
    pub class: ExecutionClass,
    pub depth: usize,
}

/// Point-in-time view of the scheduler, taken under the scheduler lock.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerSnapshot {
    pub mode: ThreadingMode,
    pub worker_threads: usize,
    pub pool_capacity: usize,
    pub free_slots: usize,
    pub live_tasks: usize,
    /// Worker threads currently inside an entry point.
    pub busy_threads: usize,
    pub registered_dependencies: usize,
    pub active_owners: usize,
    pub hw_events: u64,
    pub hw_listening: bool,
    pub queues: Vec<QueueDepth>,
}
