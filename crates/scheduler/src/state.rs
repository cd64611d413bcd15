use std::time::Duration;

use codecflow_core::{ExecutionClass, OwnerId, Priority, SchedulerConfig};

use crate::deps::DependencyTable;
use crate::occupancy::OccupancyTable;
use crate::queue::TaskQueues;
use crate::slot::SlotArena;
use crate::types::{QueueDepth, SchedulerSnapshot, SyncHandle};

/// Highest number of threads that can share one task (width of the thread mask).
pub(crate) const MAX_THREADS_PER_TASK: u32 = u64::BITS;

/// Settings the state logic needs, resolved once from the config.
#[derive(Debug, Clone)]
pub(crate) struct Limits {
    /// Threads that can cooperate on one task.
    pub(crate) pool_threads: u32,
    pub(crate) pool_capacity: usize,
    pub(crate) max_dependencies: usize,
    pub(crate) busy_wait: Duration,
}

impl Limits {
    pub(crate) fn from_config(config: &SchedulerConfig) -> Self {
        let threads = config.effective_threads().clamp(1, MAX_THREADS_PER_TASK as usize);
        Self {
            pool_threads: threads as u32,
            pool_capacity: config.pool_capacity,
            max_dependencies: config.max_dependencies,
            busy_wait: config.busy_wait(),
        }
    }

    /// Clamp a requested thread count: 0 means the whole pool.
    pub(crate) fn saturate_threads(&self, requested: u32) -> u32 {
        if requested == 0 {
            self.pool_threads
        } else {
            requested.min(self.pool_threads)
        }
    }
}

/// Everything guarded by the scheduler lock.
///
/// Only reachable through the engine's mutex, so holding a `&mut
/// SchedulerState` means holding the lock.
pub(crate) struct SchedulerState {
    pub(crate) slots: SlotArena,
    pub(crate) deps: DependencyTable,
    pub(crate) occupancy: OccupancyTable,
    pub(crate) queues: TaskQueues,
    pub(crate) hw_events: u64,
    pub(crate) busy_threads: usize,
    pub(crate) closing: bool,
}

impl SchedulerState {
    pub(crate) fn new(limits: &Limits) -> Self {
        Self {
            slots: SlotArena::new(limits.pool_capacity),
            deps: DependencyTable::with_capacity(limits.pool_capacity * limits.max_dependencies),
            occupancy: OccupancyTable::with_capacity(limits.pool_capacity),
            queues: TaskQueues::default(),
            hw_events: 0,
            busy_threads: 0,
            closing: false,
        }
    }

    /// Lift the busy hold from every unfinished task of `owner`.
    /// Returns whether any task was released.
    pub(crate) fn reset_waiting(&mut self, owner: OwnerId) -> bool {
        let held: Vec<u32> = self
            .slots
            .live_handles()
            .filter_map(|h| {
                let slot = self.slots.get(h.id)?;
                (slot.owner == owner && slot.waiting && slot.verdict.is_none()).then_some(h.id)
            })
            .collect();

        for id in &held {
            if let Some(slot) = self.slots.get_mut(*id) {
                slot.waiting = false;
            }
        }
        !held.is_empty()
    }

    /// Whether any live task is on a busy hold.
    pub(crate) fn has_waiting_tasks(&self) -> bool {
        self.slots
            .live_handles()
            .any(|h| self.slots.get(h.id).is_some_and(|slot| slot.waiting))
    }

    /// Handles of every unfinished task belonging to `owner`.
    pub(crate) fn in_flight(&self, owner: OwnerId) -> Vec<SyncHandle> {
        self.slots
            .live_handles()
            .filter(|h| self.slots.get(h.id).is_some_and(|slot| slot.owner == owner))
            .collect()
    }

    pub(crate) fn snapshot(&self, config: &SchedulerConfig, hw_listening: bool) -> SchedulerSnapshot {
        let mut queues = Vec::with_capacity(Priority::ALL.len() * ExecutionClass::ALL.len());
        for priority in Priority::ALL {
            for class in ExecutionClass::ALL {
                queues.push(QueueDepth {
                    priority,
                    class,
                    depth: self.queues.len(priority, class),
                });
            }
        }

        SchedulerSnapshot {
            mode: config.mode,
            worker_threads: config.effective_threads(),
            pool_capacity: self.slots.capacity(),
            free_slots: self.slots.free_count(),
            live_tasks: self.slots.live_count(),
            busy_threads: self.busy_threads,
            registered_dependencies: self.deps.len(),
            active_owners: self.occupancy.len(),
            hw_events: self.hw_events,
            hw_listening,
            queues,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codecflow_core::ThreadingMode;

    #[test]
    fn limits_saturate_threads() {
        let limits = Limits::from_config(&SchedulerConfig::with_threads(4));
        assert_eq!(limits.pool_threads, 4);
        assert_eq!(limits.saturate_threads(0), 4);
        assert_eq!(limits.saturate_threads(2), 2);
        assert_eq!(limits.saturate_threads(16), 4);
    }

    #[test]
    fn single_threaded_limits_to_one() {
        let limits = Limits::from_config(&SchedulerConfig::single_threaded());
        assert_eq!(limits.pool_threads, 1);
        assert_eq!(limits.saturate_threads(0), 1);
    }

    #[test]
    fn huge_pools_clamp_to_mask_width() {
        let limits = Limits::from_config(&SchedulerConfig::with_threads(500));
        assert_eq!(limits.pool_threads, MAX_THREADS_PER_TASK);
    }

    #[test]
    fn snapshot_of_empty_state() {
        let config = SchedulerConfig {
            pool_capacity: 8,
            ..SchedulerConfig::with_threads(2)
        };
        let state = SchedulerState::new(&Limits::from_config(&config));
        let snap = state.snapshot(&config, false);
        assert_eq!(snap.mode, ThreadingMode::MultiThreaded);
        assert_eq!(snap.free_slots, 8);
        assert_eq!(snap.live_tasks, 0);
        assert_eq!(snap.queues.len(), 6);
        assert!(snap.queues.iter().all(|q| q.depth == 0));
    }
}
