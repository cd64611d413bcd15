//! Admission: turning a task description into a live, queued task record.

use std::panic::Location;

use tracing::trace;

use codecflow_core::SchedulerError;

use crate::state::{Limits, SchedulerState};
use crate::task::TaskDescription;
use crate::types::SyncHandle;

/// Result of admitting one task.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Admitted {
    pub(crate) handle: SyncHandle,
    /// Some worker has something new to look at: the task is runnable now, or
    /// admission lifted busy holds on its owner.
    pub(crate) wake: bool,
}

impl SchedulerState {
    /// Checks that depend only on the description, not on scheduler state.
    pub(crate) fn check_description(task: &TaskDescription, limits: &Limits) -> Result<(), SchedulerError> {
        if task.inputs.len() > limits.max_dependencies {
            return Err(SchedulerError::InvalidParam(format!(
                "{} input dependencies, at most {} allowed",
                task.inputs.len(),
                limits.max_dependencies
            )));
        }
        if task.outputs.len() > limits.max_dependencies {
            return Err(SchedulerError::InvalidParam(format!(
                "{} output dependencies, at most {} allowed",
                task.outputs.len(),
                limits.max_dependencies
            )));
        }
        // The ordering edge to the previous exclusive task takes one input position.
        if task.exclusive && task.inputs.len() + 1 > limits.max_dependencies {
            return Err(SchedulerError::InvalidParam(format!(
                "exclusive task has {} inputs, leaving no room for its ordering dependency",
                task.inputs.len()
            )));
        }
        Ok(())
    }

    /// Admit `task` into a free slot.
    ///
    /// Inputs are resolved against the dependency table before the task's own
    /// outputs are registered, so listing a token on both sides never makes a
    /// task wait on itself.
    pub(crate) fn admit(
        &mut self,
        task: TaskDescription,
        limits: &Limits,
        submitted_at: &'static Location<'static>,
    ) -> Result<Admitted, SchedulerError> {
        let routine = task.routine.clone().ok_or(SchedulerError::NullPointer("task entry point"))?;
        Self::check_description(&task, limits)?;

        if self.occupancy.attach(task.owner).is_none() {
            return Err(SchedulerError::UndefinedBehavior(format!(
                "occupancy table full ({} owners)",
                self.occupancy.len()
            )));
        }
        let Some(id) = self.slots.allocate() else {
            self.occupancy.detach(task.owner);
            return Err(SchedulerError::MemoryAllocation("no free task slot".into()));
        };
        let handle = self.slots.handle(id);

        let mut waits_on: Vec<SyncHandle> = Vec::with_capacity(task.inputs.len() + 1);
        for token in &task.inputs {
            if let Some(producer) = self.deps.owner_of(*token) {
                if producer != handle && self.slots.is_live(producer) && !waits_on.contains(&producer) {
                    waits_on.push(producer);
                }
            }
        }

        if task.exclusive {
            if let Some(entry) = self.occupancy.get_mut(task.owner) {
                if let Some(previous) = entry.last_exclusive.replace(handle) {
                    if self.slots.is_live(previous) && !waits_on.contains(&previous) {
                        waits_on.push(previous);
                    }
                }
            }
        }

        for token in &task.outputs {
            if let Some(previous) = self.deps.register(*token, handle) {
                if previous != handle && self.slots.is_live(previous) {
                    trace!(token = %token, previous = %previous, task = %handle, "dependency producer superseded");
                }
            }
        }

        let required_threads = limits.saturate_threads(task.required_threads).max(1);
        if let Some(slot) = self.slots.get_mut(id) {
            slot.routine = Some(routine);
            slot.outputs = task.outputs;
            slot.waits_on = waits_on;
            slot.owner = task.owner;
            slot.priority = task.priority;
            slot.class = task.class;
            slot.required_threads = required_threads;
            slot.submitted_at = Some(submitted_at);
        }
        self.queues.push_back(&mut self.slots, id);

        let released = self.reset_waiting(task.owner);
        let runnable = self.slots.get(id).is_some_and(|slot| slot.waits_on.is_empty());

        Ok(Admitted {
            handle,
            wake: runnable || released,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codecflow_core::{DependencyToken, OwnerId, SchedulerConfig};

    use crate::task::TaskReturn;
    use crate::types::TaskStatus;

    fn state(capacity: usize) -> (SchedulerState, Limits) {
        let config = SchedulerConfig {
            pool_capacity: capacity,
            max_dependencies: 2,
            ..SchedulerConfig::with_threads(4)
        };
        let limits = Limits::from_config(&config);
        (SchedulerState::new(&limits), limits)
    }

    fn noop(name: &str) -> TaskDescription {
        TaskDescription::from_fn(name, |_| TaskReturn::Done)
    }

    #[test]
    fn admitted_task_is_pending_and_queued() {
        let (mut state, limits) = state(4);
        let admitted = state.admit(noop("decode"), &limits, Location::caller()).unwrap();

        assert!(admitted.wake);
        let slot = state.slots.live(admitted.handle).unwrap();
        assert_eq!(slot.status, Some(TaskStatus::Pending));
        assert_eq!(slot.name(), "decode");
        assert_eq!(state.slots.free_count(), 3);
        assert_eq!(state.queues.head(slot.priority, slot.class), Some(admitted.handle.id()));
        assert!(slot.submitted_at.is_some());
    }

    #[test]
    fn inputs_resolve_to_live_producers() {
        let (mut state, limits) = state(4);
        let token = DependencyToken(11);
        let producer = state
            .admit(noop("decode").output(token), &limits, Location::caller())
            .unwrap();
        let consumer = state
            .admit(noop("encode").input(token), &limits, Location::caller())
            .unwrap();

        assert!(!consumer.wake);
        assert_eq!(state.slots.live(consumer.handle).unwrap().waits_on, vec![producer.handle]);
        assert_eq!(state.deps.owner_of(token), Some(producer.handle));
    }

    #[test]
    fn unknown_input_is_satisfied() {
        let (mut state, limits) = state(2);
        let admitted = state
            .admit(noop("encode").input(99u64), &limits, Location::caller())
            .unwrap();
        assert!(state.slots.live(admitted.handle).unwrap().waits_on.is_empty());
    }

    #[test]
    fn token_in_inputs_and_outputs_is_not_self_blocking() {
        let (mut state, limits) = state(2);
        let admitted = state
            .admit(noop("vpp").input(5u64).output(5u64), &limits, Location::caller())
            .unwrap();
        assert!(admitted.wake);
        assert_eq!(state.deps.owner_of(DependencyToken(5)), Some(admitted.handle));
    }

    #[test]
    fn too_many_dependencies_rejected() {
        let (mut state, limits) = state(4);
        let err = state
            .admit(noop("x").inputs([1u64, 2, 3]), &limits, Location::caller())
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidParam(_)));

        let err = state
            .admit(noop("x").outputs([1u64, 2, 3]), &limits, Location::caller())
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidParam(_)));
        assert_eq!(state.slots.free_count(), 4);
    }

    #[test]
    fn exclusive_needs_a_spare_dependency_position() {
        let (mut state, limits) = state(4);
        let err = state
            .admit(noop("enc").inputs([1u64, 2]).exclusive(), &limits, Location::caller())
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidParam(_)));

        assert!(state
            .admit(noop("enc").input(1u64).exclusive(), &limits, Location::caller())
            .is_ok());
    }

    #[test]
    fn exclusive_tasks_chain_per_owner() {
        let (mut state, limits) = state(4);
        let first = state
            .admit(noop("a").owner(OwnerId(1)).exclusive(), &limits, Location::caller())
            .unwrap();
        let other_owner = state
            .admit(noop("b").owner(OwnerId(2)).exclusive(), &limits, Location::caller())
            .unwrap();
        let second = state
            .admit(noop("c").owner(OwnerId(1)).exclusive(), &limits, Location::caller())
            .unwrap();

        assert!(other_owner.wake);
        assert_eq!(state.slots.live(second.handle).unwrap().waits_on, vec![first.handle]);
        assert_eq!(
            state.occupancy.get(OwnerId(1)).unwrap().last_exclusive,
            Some(second.handle)
        );
    }

    #[test]
    fn missing_entry_point_rejected() {
        let (mut state, limits) = state(1);
        let err = state
            .admit(TaskDescription::empty(), &limits, Location::caller())
            .unwrap_err();
        assert!(matches!(err, SchedulerError::NullPointer(_)));
    }

    #[test]
    fn required_threads_saturate_to_pool() {
        let (mut state, limits) = state(2);
        let all = state
            .admit(noop("wide").required_threads(0), &limits, Location::caller())
            .unwrap();
        let capped = state
            .admit(noop("wider").required_threads(64), &limits, Location::caller())
            .unwrap();
        assert_eq!(state.slots.live(all.handle).unwrap().required_threads, 4);
        assert_eq!(state.slots.live(capped.handle).unwrap().required_threads, 4);
    }
}
