use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, MutexGuard, PoisonError};
use std::time::Instant;

use tracing::{debug, info, trace, warn};

use codecflow_core::SchedulerError;

use crate::dispatch::{CallEnd, Dispatch, WorkerRole};
use crate::state::SchedulerState;
use crate::task::{TaskReturn, TaskRoutine};
use crate::types::{codes, SyncHandle, TaskOutcome};

use super::core::{Engine, HwListener, MIN_POLL};

/// Body of every pool thread: take ready work until the scheduler closes.
pub(super) fn worker_loop(engine: Arc<Engine>, role: WorkerRole) {
    debug!("Worker {} started (dedicated: {})", role.index, role.dedicated);

    let mut state = engine.lock();
    while !state.closing {
        match state.dispatch(role, Instant::now(), engine.limits.busy_wait) {
            Some(dispatch) => state = engine.execute(state, dispatch),
            // Busy holds expire by time, so poll instead of sleeping for good.
            None if state.has_waiting_tasks() => {
                let poll = engine.limits.busy_wait.max(MIN_POLL);
                state = engine.wait_timeout(&engine.work_ready, state, poll);
            }
            None => state = engine.wait(&engine.work_ready, state),
        }
    }
    drop(state);

    debug!("Worker {} stopped", role.index);
}

/// Run the completion hook, folding its result into the task's verdict.
fn run_completion_hook(routine: &dyn TaskRoutine, verdict: TaskOutcome) -> TaskOutcome {
    match panic::catch_unwind(AssertUnwindSafe(|| routine.complete(verdict))) {
        Ok(Ok(())) => verdict,
        Ok(Err(code)) if verdict == TaskOutcome::Done => TaskOutcome::Failed(code),
        Ok(Err(_)) => verdict,
        Err(_) => {
            warn!("Completion hook of {} panicked", routine.name());
            match verdict {
                TaskOutcome::Done => TaskOutcome::Failed(codes::UNKNOWN),
                other => other,
            }
        }
    }
}

impl Engine {
    /// Run one call of a dispatched task with the lock released, then record
    /// its result. Returns with the lock re-acquired.
    pub(super) fn execute<'a>(
        &'a self,
        state: MutexGuard<'a, SchedulerState>,
        dispatch: Dispatch,
    ) -> MutexGuard<'a, SchedulerState> {
        drop(state);

        trace!(
            "Worker {} entering {} ({}, call {})",
            dispatch.call.worker,
            dispatch.routine.name(),
            dispatch.call.handle,
            dispatch.call.call_index
        );
        let started = Instant::now();
        let ret = panic::catch_unwind(AssertUnwindSafe(|| dispatch.routine.run(&dispatch.call)))
            .unwrap_or_else(|_| {
                warn!("Task {} ({}) panicked", dispatch.routine.name(), dispatch.call.handle);
                TaskReturn::Failed(codes::UNKNOWN)
            });
        self.metrics
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .record_call(dispatch.routine.name(), started.elapsed());

        let mut state = self.lock();
        match state.finish_call(&dispatch, ret) {
            CallEnd::Running { wake } => {
                if wake {
                    self.work_ready.notify_all();
                }
                state
            }
            CallEnd::Finished(verdict) => {
                drop(state);
                let outcome = run_completion_hook(dispatch.routine.as_ref(), verdict);
                let mut state = self.lock();
                self.retire(&mut state, dispatch.call.handle, outcome);
                state
            }
        }
    }

    /// Retire a completed task and wake everyone who may care: waiters on the
    /// handle, a blocked submitter, and workers whose tasks it unblocks.
    pub(super) fn retire(&self, state: &mut SchedulerState, handle: SyncHandle, outcome: TaskOutcome) {
        let Some(retired) = state.retire(handle, outcome) else {
            return;
        };
        match (outcome, retired.submitted_at) {
            (TaskOutcome::Failed(code), Some(location)) => warn!(
                "Task {} ({}) submitted at {} failed with code {}",
                retired.name, handle, location, code
            ),
            (TaskOutcome::Failed(code), None) => warn!("Task {} ({}) failed with code {}", retired.name, handle, code),
            _ => trace!("Task {} ({}) completed", retired.name, handle),
        }
        self.metrics
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .record_outcome(&retired.name, outcome);

        if let Some(condvar) = self.task_done.get(handle.id as usize) {
            condvar.notify_all();
        }
        self.free_slot.notify_one();
        self.work_ready.notify_all();
    }

    /// Abort every unfinished task, running each completion hook with
    /// `Failed(codes::ABORTED)`. Returns how many were aborted.
    pub(super) fn abort_unfinished(&self) -> usize {
        let aborted = self.lock().abort_unfinished();
        let count = aborted.len();
        for task in aborted {
            let outcome = run_completion_hook(task.routine.as_ref(), TaskOutcome::Failed(codes::ABORTED));
            let mut state = self.lock();
            self.retire(&mut state, task.handle, outcome);
        }
        count
    }

    /// Record a hardware event and wake workers to re-check held tasks.
    pub(super) fn signal_hw_event(&self) {
        let mut state = self.lock();
        state.hw_events = state.hw_events.wrapping_add(1);
        drop(state);
        self.work_ready.notify_all();
    }

    pub(super) fn start_hw_listener(self: &Arc<Self>) -> Result<(), SchedulerError> {
        let mut listener = self.hw_listener.lock().unwrap_or_else(PoisonError::into_inner);
        if listener.is_some() {
            return Ok(());
        }

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let engine = Arc::clone(self);
        let interval = self.config.hw_poll_interval();
        let handle = std::thread::Builder::new()
            .name(format!("{}-hw", self.config.thread_name_prefix))
            .spawn(move || {
                while !thread_stop.load(Ordering::Acquire) {
                    std::thread::park_timeout(interval);
                    if thread_stop.load(Ordering::Acquire) {
                        break;
                    }
                    engine.signal_hw_event();
                }
            })
            .map_err(|e| SchedulerError::MemoryAllocation(format!("spawning hardware listener: {e}")))?;

        *listener = Some(HwListener { stop, handle });
        info!("Hardware listener started ({:?} interval)", interval);
        Ok(())
    }

    pub(super) fn stop_hw_listener(&self) {
        let listener = self
            .hw_listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(listener) = listener {
            listener.stop.store(true, Ordering::Release);
            listener.handle.thread().unpark();
            if listener.handle.join().is_err() {
                warn!("Hardware listener panicked");
            }
            info!("Hardware listener stopped");
        }
    }
}
