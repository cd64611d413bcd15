use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, warn};

use codecflow_core::{Priority, SchedulerConfig, SchedulerError, ThreadingMode};

use crate::dispatch::WorkerRole;
use crate::metrics::SchedulerMetrics;
use crate::state::{Limits, SchedulerState};
use crate::types::{PerformanceMessage, SchedulerSnapshot};

use super::execution::worker_loop;

/// Shortest sleep used when polling for busy holds to expire.
pub(super) const MIN_POLL: Duration = Duration::from_millis(1);

/// Background thread that periodically reports a hardware event.
pub(super) struct HwListener {
    pub(super) stop: Arc<AtomicBool>,
    pub(super) handle: JoinHandle<()>,
}

/// Shared scheduler internals. Workers and the façade hold it through an `Arc`.
pub(crate) struct Engine {
    pub(super) config: SchedulerConfig,
    pub(super) limits: Limits,
    state: Mutex<SchedulerState>,
    /// One per slot, signalled when the slot's job retires.
    pub(super) task_done: Vec<Condvar>,
    pub(super) free_slot: Condvar,
    pub(super) work_ready: Condvar,
    pub(super) metrics: RwLock<SchedulerMetrics>,
    pub(super) hw_listener: Mutex<Option<HwListener>>,
}

impl Engine {
    fn new(config: SchedulerConfig) -> Self {
        let limits = Limits::from_config(&config);
        let task_done = (0..limits.pool_capacity).map(|_| Condvar::new()).collect();
        Self {
            state: Mutex::new(SchedulerState::new(&limits)),
            task_done,
            free_slot: Condvar::new(),
            work_ready: Condvar::new(),
            metrics: RwLock::new(SchedulerMetrics::default()),
            hw_listener: Mutex::new(None),
            limits,
            config,
        }
    }

    pub(super) fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn wait<'a>(
        &self,
        condvar: &Condvar,
        guard: MutexGuard<'a, SchedulerState>,
    ) -> MutexGuard<'a, SchedulerState> {
        condvar.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn wait_timeout<'a>(
        &self,
        condvar: &Condvar,
        guard: MutexGuard<'a, SchedulerState>,
        timeout: Duration,
    ) -> MutexGuard<'a, SchedulerState> {
        match condvar.wait_timeout(guard, timeout) {
            Ok((guard, _)) => guard,
            Err(poisoned) => poisoned.into_inner().0,
        }
    }

    pub(super) fn is_single_threaded(&self) -> bool {
        self.config.mode == ThreadingMode::SingleThreaded
    }

    /// Role of the worker thread with the given index.
    pub(super) fn worker_role(&self, index: usize) -> WorkerRole {
        WorkerRole {
            index,
            dedicated: index < self.config.dedicated_threads,
        }
    }

    pub(super) fn snapshot(&self) -> SchedulerSnapshot {
        let listening = self
            .hw_listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some();
        self.lock().snapshot(&self.config, listening)
    }
}

/// Asynchronous task scheduler for codec work.
///
/// Created uninitialized; [`Scheduler::initialize`] starts the worker pool and
/// [`Scheduler::close`] (or drop) stops it. Every other operation on an
/// uninitialized scheduler returns [`SchedulerError::NotInitialized`].
pub struct Scheduler {
    pub(super) engine: Option<Arc<Engine>>,
    pub(super) workers: Vec<JoinHandle<()>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// Create an uninitialized scheduler.
    pub fn new() -> Self {
        Self {
            engine: None,
            workers: Vec::new(),
        }
    }

    /// Create and initialize in one step.
    pub fn with_config(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        let mut scheduler = Self::new();
        scheduler.initialize(config)?;
        Ok(scheduler)
    }

    /// Start the scheduler with `config`, closing any previous run first.
    pub fn initialize(&mut self, config: SchedulerConfig) -> Result<(), SchedulerError> {
        self.close();

        config
            .validate()
            .map_err(|e| SchedulerError::Unsupported(e.to_string()))?;
        if config.mode == ThreadingMode::MultiThreaded {
            match config.worker_threads {
                0 => {
                    return Err(SchedulerError::Unsupported(
                        "multi-threaded mode needs worker threads".into(),
                    ))
                }
                1 => {
                    return Err(SchedulerError::Unsupported(
                        "a single worker cannot make progress while a task waits on another".into(),
                    ))
                }
                _ => {}
            }
            if config.dedicated_threads == 0 || config.dedicated_threads > config.worker_threads {
                return Err(SchedulerError::Unsupported(format!(
                    "dedicated_threads must be between 1 and {}, got {}",
                    config.worker_threads, config.dedicated_threads
                )));
            }
        }

        let engine = Arc::new(Engine::new(config));
        if !engine.is_single_threaded() {
            for index in 0..engine.config.worker_threads {
                let mut builder = std::thread::Builder::new()
                    .name(format!("{}-{}", engine.config.thread_name_prefix, index));
                if let Some(stack_size) = engine.config.stack_size {
                    builder = builder.stack_size(stack_size);
                }

                let worker_engine = Arc::clone(&engine);
                let role = engine.worker_role(index);
                match builder.spawn(move || worker_loop(worker_engine, role)) {
                    Ok(handle) => self.workers.push(handle),
                    Err(e) => {
                        warn!("Failed to spawn worker {}: {}", index, e);
                        self.engine = Some(engine);
                        self.close();
                        return Err(SchedulerError::MemoryAllocation(format!(
                            "spawning worker thread {index}: {e}"
                        )));
                    }
                }
            }
        }

        engine.config.log_summary();
        info!(
            "Scheduler started in {:?} mode with {} workers, {} task slots",
            engine.config.mode,
            engine.config.effective_threads(),
            engine.limits.pool_capacity
        );
        self.engine = Some(engine);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.engine.is_some()
    }

    pub(super) fn engine(&self) -> Result<&Arc<Engine>, SchedulerError> {
        self.engine.as_ref().ok_or(SchedulerError::NotInitialized)
    }

    /// Stop the worker pool, then abort every unfinished task with
    /// `Failed(codes::ABORTED)`. A no-op on an uninitialized scheduler.
    ///
    /// Workers finish the call they are in before exiting, so an entry point
    /// that never returns blocks this call.
    pub fn close(&mut self) {
        let Some(engine) = self.engine.take() else {
            return;
        };
        engine.stop_hw_listener();

        engine.lock().closing = true;
        engine.work_ready.notify_all();
        engine.free_slot.notify_all();

        let workers = self.workers.len();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("Worker thread panicked during shutdown");
            }
        }
        debug!("Joined {} workers", workers);

        let aborted = engine.abort_unfinished();
        if aborted > 0 {
            warn!("Aborted {} unfinished tasks on close", aborted);
        }
        info!("Scheduler closed");
    }

    /// The configuration the scheduler is running with.
    pub fn get_parameters(&self) -> Result<SchedulerConfig, SchedulerError> {
        Ok(self.engine()?.config.clone())
    }

    /// Point-in-time view of slots, queues and workers.
    pub fn get_state(&self) -> Result<SchedulerSnapshot, SchedulerError> {
        Ok(self.engine()?.snapshot())
    }

    /// Snapshot of the operational metrics.
    pub fn metrics(&self) -> Result<SchedulerMetrics, SchedulerError> {
        let engine = self.engine()?;
        let snapshot = engine.snapshot();
        let mut metrics = engine
            .metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        metrics.tasks_pending = Priority::ALL
            .iter()
            .map(|&priority| {
                let depth = snapshot
                    .queues
                    .iter()
                    .filter(|q| q.priority == priority)
                    .map(|q| q.depth)
                    .sum();
                (priority, depth)
            })
            .collect();
        metrics.worker_utilization = snapshot.busy_threads as f64 / snapshot.worker_threads.max(1) as f64;
        Ok(metrics)
    }

    /// Runtime adjustment of hardware event handling. Ignored in
    /// single-threaded mode.
    pub fn adjust_performance(&self, message: PerformanceMessage) -> Result<(), SchedulerError> {
        let engine = self.engine()?;
        if engine.is_single_threaded() {
            debug!("Ignoring {:?} in single-threaded mode", message);
            return Ok(());
        }
        match message {
            PerformanceMessage::StartHwListening => engine.start_hw_listener(),
            PerformanceMessage::StopHwListening | PerformanceMessage::ResetToDefaults => {
                engine.stop_hw_listener();
                Ok(())
            }
        }
    }

    /// Report a hardware event: tasks held after a `Busy` return become
    /// eligible again.
    pub fn notify_hw_event(&self) -> Result<(), SchedulerError> {
        self.engine()?.signal_hw_event();
        Ok(())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.close();
    }
}
