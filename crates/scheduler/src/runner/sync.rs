use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::debug;

use codecflow_core::{DependencyToken, OwnerId, SchedulerError};

use crate::dispatch::WorkerRole;
use crate::state::SchedulerState;
use crate::types::{SyncHandle, TaskOutcome};

use super::core::{Engine, MIN_POLL};
use super::Scheduler;

/// Outcome of `handle` if it is known without waiting.
///
/// A handle whose slot has moved on reports the outcome retained for its
/// generation, or `Done` when even that has been overwritten.
fn observe(state: &SchedulerState, handle: SyncHandle) -> Option<TaskOutcome> {
    let slot = state.slots.get(handle.id)?;
    if slot.generation == handle.generation {
        if let Some(status) = slot.status {
            return status.is_terminal().then(|| status.into());
        }
    }
    match slot.retired {
        Some((generation, outcome)) if generation == handle.generation => Some(outcome),
        _ => Some(TaskOutcome::Done),
    }
}

impl Engine {
    /// Block on the slot's condition variable until the job retires.
    fn wait_for_task(&self, handle: SyncHandle, deadline: Option<Instant>) -> TaskOutcome {
        let condvar = &self.task_done[handle.id as usize];
        let mut state = self.lock();
        loop {
            if let Some(outcome) = observe(&state, handle) {
                return outcome;
            }
            match deadline {
                None => state = self.wait(condvar, state),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return TaskOutcome::InProgress;
                    }
                    state = self.wait_timeout(condvar, state, deadline - now);
                }
            }
        }
    }

    /// Single-threaded mode: run ready tasks on the calling thread until the
    /// job retires.
    fn run_until(&self, handle: SyncHandle, deadline: Option<Instant>) -> TaskOutcome {
        let mut state = self.lock();
        loop {
            if let Some(outcome) = observe(&state, handle) {
                return outcome;
            }
            let now = Instant::now();
            if deadline.is_some_and(|deadline| now >= deadline) {
                return TaskOutcome::InProgress;
            }
            match state.dispatch(WorkerRole::CALLER, now, self.limits.busy_wait) {
                Some(dispatch) => state = self.execute(state, dispatch),
                None => {
                    let mut poll = self.limits.busy_wait.max(MIN_POLL);
                    if let Some(deadline) = deadline {
                        poll = poll.min(deadline - now);
                    }
                    state = self.wait_timeout(&self.work_ready, state, poll);
                }
            }
        }
    }
}

impl Scheduler {
    /// Wait for the job behind `handle` to finish.
    ///
    /// `timeout` of `None` waits indefinitely. Returns `InProgress` if the
    /// timeout passes first. Task failures come back as `Ok(Failed(code))`.
    pub fn synchronize(&self, handle: SyncHandle, timeout: Option<Duration>) -> Result<TaskOutcome, SchedulerError> {
        let engine = self.engine()?;
        if handle.is_null() || handle.id as usize >= engine.limits.pool_capacity {
            return Err(SchedulerError::NullHandle);
        }
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));

        if engine.is_single_threaded() {
            Ok(engine.run_until(handle, deadline))
        } else {
            Ok(engine.wait_for_task(handle, deadline))
        }
    }

    /// Wait until no task produces `token`. Returns at once if none does.
    pub fn wait_for_dependency(&self, token: DependencyToken) -> Result<(), SchedulerError> {
        let engine = self.engine()?;
        loop {
            let producer = engine.lock().deps.owner_of(token);
            match producer {
                Some(handle) => {
                    self.synchronize(handle, None)?;
                }
                None => return Ok(()),
            }
        }
    }

    /// Wait until every task `owner` has in flight right now has finished.
    ///
    /// Busy holds on the owner are lifted first. Handles are visited in turn
    /// with a short timeout each, so one slow task does not stall the check
    /// of the others.
    pub fn wait_for_all(&self, owner: OwnerId) -> Result<(), SchedulerError> {
        let engine = self.engine()?;
        if owner.is_none() {
            return Err(SchedulerError::NullPointer("owner"));
        }

        let mut pending: VecDeque<SyncHandle> = {
            let mut state = engine.lock();
            if state.reset_waiting(owner) {
                engine.work_ready.notify_all();
            }
            state.in_flight(owner).into()
        };
        debug!("Waiting for {} tasks of owner {}", pending.len(), owner);

        let slice = engine.config.wait_for_all_slice();
        while let Some(handle) = pending.pop_front() {
            if !self.synchronize(handle, Some(slice))?.is_terminal() {
                pending.push_back(handle);
            }
        }
        Ok(())
    }

    /// Lift busy holds on every task of `owner`. A no-op when uninitialized.
    pub fn reset_waiting(&self, owner: OwnerId) {
        let Some(engine) = self.engine.as_ref() else {
            return;
        };
        if engine.lock().reset_waiting(owner) {
            engine.work_ready.notify_all();
        }
    }
}
