use std::panic::Location;
use std::time::Instant;

use tracing::trace;

use codecflow_core::SchedulerError;

use crate::dispatch::WorkerRole;
use crate::state::SchedulerState;
use crate::task::TaskDescription;
use crate::types::SyncHandle;

use super::core::{Engine, MIN_POLL};
use super::Scheduler;

impl Scheduler {
    /// Admit a task and return a handle to synchronize on.
    ///
    /// Blocks while every task slot is taken. In single-threaded mode the
    /// caller runs ready tasks itself until a slot frees up.
    #[track_caller]
    pub fn submit(&self, task: TaskDescription) -> Result<SyncHandle, SchedulerError> {
        let submitted_at = Location::caller();
        let engine = self.engine()?;
        if task.routine.is_none() {
            return Err(SchedulerError::NullPointer("task entry point"));
        }
        engine.submit(task, submitted_at)
    }
}

impl Engine {
    fn submit(
        &self,
        task: TaskDescription,
        submitted_at: &'static Location<'static>,
    ) -> Result<SyncHandle, SchedulerError> {
        SchedulerState::check_description(&task, &self.limits)?;

        let mut state = self.lock();
        while state.slots.free_count() == 0 {
            if state.closing {
                return Err(SchedulerError::NotInitialized);
            }
            if self.is_single_threaded() {
                match state.dispatch(WorkerRole::CALLER, Instant::now(), self.limits.busy_wait) {
                    Some(dispatch) => state = self.execute(state, dispatch),
                    None => {
                        let poll = self.limits.busy_wait.max(MIN_POLL);
                        state = self.wait_timeout(&self.work_ready, state, poll);
                    }
                }
            } else {
                state = self.wait(&self.free_slot, state);
            }
        }

        let name = task.name().to_string();
        let admitted = match state.admit(task, &self.limits, submitted_at) {
            Ok(admitted) => admitted,
            Err(e) => {
                drop(state);
                // This submitter may have consumed the wakeup for the free slot.
                self.free_slot.notify_one();
                return Err(e);
            }
        };
        drop(state);

        trace!("Submitted {} as {} from {}", name, admitted.handle, submitted_at);
        if admitted.wake {
            self.work_ready.notify_all();
        }
        Ok(admitted.handle)
    }
}
