//! Picking work for a thread and recording what each call reported.

use std::panic::Location;
use std::sync::Arc;
use std::time::{Duration, Instant};

use codecflow_core::{ExecutionClass, OwnerId, Priority};

use crate::state::SchedulerState;
use crate::task::{CallInfo, TaskReturn, TaskRoutine};
use crate::types::{codes, SyncHandle, TaskOutcome, TaskStatus};

/// Which queues a thread may take work from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WorkerRole {
    pub(crate) index: usize,
    pub(crate) dedicated: bool,
}

impl WorkerRole {
    /// The application thread driving a single-threaded scheduler.
    pub(crate) const CALLER: WorkerRole = WorkerRole {
        index: 0,
        dedicated: true,
    };

    fn classes(self) -> &'static [ExecutionClass] {
        if self.dedicated {
            &[ExecutionClass::Dedicated, ExecutionClass::General]
        } else {
            &[ExecutionClass::General]
        }
    }
}

/// One call handed to a thread. The routine is run outside the lock.
pub(crate) struct Dispatch {
    pub(crate) routine: Arc<dyn TaskRoutine>,
    pub(crate) call: CallInfo,
    pub(crate) owner: OwnerId,
}

/// State of a task after one of its calls returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallEnd {
    /// Still running or eligible. `wake` is set when other workers may now
    /// find work (a busy hold was lifted).
    Running { wake: bool },
    /// The last thread has left a task that reached a verdict. The caller
    /// owns its completion.
    Finished(TaskOutcome),
}

/// What `retire` reports about the task it removed.
pub(crate) struct Retired {
    pub(crate) name: String,
    pub(crate) submitted_at: Option<&'static Location<'static>>,
}

/// A task taken out of the scheduler during shutdown.
pub(crate) struct Aborted {
    pub(crate) handle: SyncHandle,
    pub(crate) routine: Arc<dyn TaskRoutine>,
}

impl SchedulerState {
    /// Whether a thread may enter task `id` right now.
    pub(crate) fn is_ready(&self, id: u32, now: Instant, busy_wait: Duration) -> bool {
        let Some(slot) = self.slots.get(id) else {
            return false;
        };
        if !matches!(slot.status, Some(TaskStatus::Pending | TaskStatus::InProgress)) {
            return false;
        }
        if slot.verdict.is_some() || slot.completing {
            return false;
        }
        if slot.waits_on.iter().any(|producer| self.slots.is_live(*producer)) {
            return false;
        }
        if slot.free_thread_index().is_none() {
            return false;
        }
        if slot.waiting {
            if slot.occupancy > 0 {
                return false;
            }
            let held_for = slot
                .last_enter
                .map_or(Duration::MAX, |entered| now.saturating_duration_since(entered));
            if held_for < busy_wait && self.hw_events == slot.hw_counter_at_enter {
                return false;
            }
        }
        true
    }

    /// Take the first ready task for `role`, scanning priorities from high to
    /// low and each queue in FIFO order.
    pub(crate) fn dispatch(&mut self, role: WorkerRole, now: Instant, busy_wait: Duration) -> Option<Dispatch> {
        for priority in Priority::ALL {
            for &class in role.classes() {
                let found = self
                    .queues
                    .ids(&self.slots, priority, class)
                    .find(|&id| self.is_ready(id, now, busy_wait));
                if let Some(id) = found {
                    return self.enter(id, role, now);
                }
            }
        }
        None
    }

    fn enter(&mut self, id: u32, role: WorkerRole, now: Instant) -> Option<Dispatch> {
        let handle = self.slots.handle(id);
        let hw_events = self.hw_events;
        let slot = self.slots.get_mut(id)?;
        let thread_index = slot.free_thread_index()?;
        let routine = slot.routine.clone()?;

        slot.thread_mask |= 1u64 << thread_index;
        slot.occupancy += 1;
        let call_index = slot.calls;
        slot.calls = slot.calls.wrapping_add(1);
        slot.status = Some(TaskStatus::InProgress);
        slot.last_enter = Some(now);
        slot.hw_counter_at_enter = hw_events;
        let owner = slot.owner;

        self.occupancy.thread_entered(owner);
        self.busy_threads += 1;

        Some(Dispatch {
            routine,
            call: CallInfo {
                handle,
                thread_index,
                call_index,
                worker: role.index,
            },
            owner,
        })
    }

    /// Record what a call returned.
    pub(crate) fn finish_call(&mut self, dispatch: &Dispatch, ret: TaskReturn) -> CallEnd {
        self.busy_threads = self.busy_threads.saturating_sub(1);
        self.occupancy.thread_left(dispatch.owner);

        let Some(slot) = self.slots.live_mut(dispatch.call.handle) else {
            return CallEnd::Running { wake: false };
        };
        slot.occupancy = slot.occupancy.saturating_sub(1);
        slot.thread_mask &= !(1u64 << dispatch.call.thread_index);

        let mut progressed = false;
        match ret {
            TaskReturn::Busy => slot.waiting = true,
            TaskReturn::Continue => progressed = true,
            TaskReturn::Done => {
                if slot.verdict.is_none() {
                    slot.verdict = Some(TaskStatus::Done);
                }
                progressed = true;
            }
            TaskReturn::Failed(code) => {
                if !matches!(slot.verdict, Some(TaskStatus::Failed(_))) {
                    slot.verdict = Some(TaskStatus::Failed(code));
                }
            }
        }

        let finished = match slot.verdict {
            Some(verdict) if slot.occupancy == 0 && !slot.completing => {
                slot.completing = true;
                Some(TaskOutcome::from(verdict))
            }
            _ => None,
        };

        // Progress by one task may unblock its owner's other held tasks.
        let released = progressed && self.reset_waiting(dispatch.owner);

        match finished {
            Some(outcome) => CallEnd::Finished(outcome),
            None => CallEnd::Running {
                wake: released || ret == TaskReturn::Continue,
            },
        }
    }

    /// Final bookkeeping for a completed task: record its outcome, release its
    /// outputs, unlink it and return the slot to the pool.
    ///
    /// Returns `None` if the handle is no longer live.
    pub(crate) fn retire(&mut self, handle: SyncHandle, outcome: TaskOutcome) -> Option<Retired> {
        let slot = self.slots.live_mut(handle)?;
        slot.status = Some(match outcome {
            TaskOutcome::Failed(code) => TaskStatus::Failed(code),
            _ => TaskStatus::Done,
        });
        let retired = Retired {
            name: slot.name().to_string(),
            submitted_at: slot.submitted_at,
        };
        let owner = slot.owner;
        let outputs = std::mem::take(&mut slot.outputs);

        for token in outputs {
            self.deps.release(token, handle);
        }
        self.queues.unlink(&mut self.slots, handle.id);
        if let Some(entry) = self.occupancy.get_mut(owner) {
            if entry.last_exclusive == Some(handle) {
                entry.last_exclusive = None;
            }
        }
        self.occupancy.detach(owner);
        self.slots.release(handle.id, outcome);
        Some(retired)
    }

    /// Mark every unfinished task as aborted and hand them to the caller for
    /// completion. Only valid once no thread is inside an entry point.
    pub(crate) fn abort_unfinished(&mut self) -> Vec<Aborted> {
        let handles: Vec<SyncHandle> = self.slots.live_handles().collect();
        let mut aborted = Vec::with_capacity(handles.len());
        for handle in handles {
            let Some(slot) = self.slots.live_mut(handle) else {
                continue;
            };
            if slot.completing {
                continue;
            }
            let Some(routine) = slot.routine.clone() else {
                continue;
            };
            slot.completing = true;
            slot.verdict = Some(TaskStatus::Failed(codes::ABORTED));
            aborted.push(Aborted { handle, routine });
        }
        aborted
    }
}
