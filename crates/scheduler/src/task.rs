use std::sync::Arc;

use codecflow_core::{DependencyToken, ExecutionClass, OwnerId, Priority};

use super::types::{SyncHandle, TaskOutcome};

/// What one invocation of an entry point reports back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskReturn {
    /// The task is finished.
    Done,
    /// More calls are needed; the task stays eligible.
    Continue,
    /// Waiting on hardware. The task is held until the busy period passes,
    /// a hardware event arrives, or its owner is reset.
    Busy,
    Failed(i32),
}

/// Per-invocation context handed to an entry point.
#[derive(Debug, Clone, Copy)]
pub struct CallInfo {
    pub handle: SyncHandle,
    /// Unique among the threads currently inside this task, below `required_threads`.
    pub thread_index: u32,
    /// Ordinal of this call for the task, starting at 0.
    pub call_index: u32,
    /// Index of the worker running the call (0 for the caller in single-threaded mode).
    pub worker: usize,
}

/// A unit of codec work the scheduler can execute.
///
/// Implementations wrap the decode/encode/VPP stages; the scheduler only
/// calls them and never looks at their state.
pub trait TaskRoutine: Send + Sync {
    /// Human-readable name for logging and metrics.
    fn name(&self) -> &str {
        "task"
    }

    /// Run one call of the task. May be called several times, concurrently
    /// when `required_threads > 1`.
    fn run(&self, call: &CallInfo) -> TaskReturn;

    /// Completion hook, run once after the last call with the task's verdict.
    /// An error turns a successful task into `Failed(code)`.
    fn complete(&self, _outcome: TaskOutcome) -> Result<(), i32> {
        Ok(())
    }
}

/// Closure-backed routine.
pub struct FnRoutine<F> {
    name: String,
    f: F,
}

impl<F> TaskRoutine for FnRoutine<F>
where
    F: Fn(&CallInfo) -> TaskReturn + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, call: &CallInfo) -> TaskReturn {
        (self.f)(call)
    }
}

/// Wrap a closure as a shareable routine.
pub fn routine<F>(name: &str, f: F) -> Arc<dyn TaskRoutine>
where
    F: Fn(&CallInfo) -> TaskReturn + Send + Sync + 'static,
{
    Arc::new(FnRoutine {
        name: name.to_string(),
        f,
    })
}

/// Everything the scheduler needs to admit a task.
#[derive(Clone)]
pub struct TaskDescription {
    pub(crate) routine: Option<Arc<dyn TaskRoutine>>,
    pub(crate) inputs: Vec<DependencyToken>,
    pub(crate) outputs: Vec<DependencyToken>,
    pub(crate) owner: OwnerId,
    pub(crate) priority: Priority,
    pub(crate) class: ExecutionClass,
    pub(crate) required_threads: u32,
    pub(crate) exclusive: bool,
}

impl TaskDescription {
    pub fn new(routine: Arc<dyn TaskRoutine>) -> Self {
        Self {
            routine: Some(routine),
            ..Self::empty()
        }
    }

    pub fn from_fn<F>(name: &str, f: F) -> Self
    where
        F: Fn(&CallInfo) -> TaskReturn + Send + Sync + 'static,
    {
        Self::new(routine(name, f))
    }

    /// A description without an entry point. Submitting it fails with `NullPointer`.
    pub fn empty() -> Self {
        Self {
            routine: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            owner: OwnerId::NONE,
            priority: Priority::Normal,
            class: ExecutionClass::General,
            required_threads: 1,
            exclusive: false,
        }
    }

    pub fn input(mut self, token: impl Into<DependencyToken>) -> Self {
        self.inputs.push(token.into());
        self
    }

    pub fn inputs<I, T>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<DependencyToken>,
    {
        self.inputs.extend(tokens.into_iter().map(Into::into));
        self
    }

    pub fn output(mut self, token: impl Into<DependencyToken>) -> Self {
        self.outputs.push(token.into());
        self
    }

    pub fn outputs<I, T>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<DependencyToken>,
    {
        self.outputs.extend(tokens.into_iter().map(Into::into));
        self
    }

    pub fn owner(mut self, owner: impl Into<OwnerId>) -> Self {
        self.owner = owner.into();
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn class(mut self, class: ExecutionClass) -> Self {
        self.class = class;
        self
    }

    /// Shorthand for `class(ExecutionClass::Dedicated)`.
    pub fn dedicated(self) -> Self {
        self.class(ExecutionClass::Dedicated)
    }

    /// How many threads may run this task at once; 0 means the whole pool.
    pub fn required_threads(mut self, threads: u32) -> Self {
        self.required_threads = threads;
        self
    }

    /// Never run concurrently with another exclusive task of the same owner;
    /// exclusive tasks of one owner run in submission order.
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    pub fn name(&self) -> &str {
        self.routine.as_ref().map(|r| r.name()).unwrap_or("<none>")
    }
}

impl std::fmt::Debug for TaskDescription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDescription")
            .field("name", &self.name())
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("owner", &self.owner)
            .field("priority", &self.priority)
            .field("class", &self.class)
            .field("required_threads", &self.required_threads)
            .field("exclusive", &self.exclusive)
            .finish()
    }
}
