//! Fixed-capacity arena of task records.
//!
//! Every slot carries a generation counter that is bumped each time the slot
//! goes back to the free pool. External references are `{id, generation}`
//! pairs, so anything holding an old handle can tell its job is gone.

use std::panic::Location;
use std::sync::Arc;
use std::time::Instant;

use codecflow_core::{DependencyToken, ExecutionClass, OwnerId, Priority};

use crate::task::TaskRoutine;
use crate::types::{SyncHandle, TaskOutcome, TaskStatus};

/// One task record. Fields are meaningful only while `status` is `Some`.
pub(crate) struct TaskSlot {
    pub(crate) generation: u32,
    /// `None` while the slot sits in the free pool.
    pub(crate) status: Option<TaskStatus>,
    pub(crate) routine: Option<Arc<dyn TaskRoutine>>,
    pub(crate) outputs: Vec<DependencyToken>,
    /// Producers resolved at admission; the task is blocked while any is live.
    pub(crate) waits_on: Vec<SyncHandle>,
    pub(crate) owner: OwnerId,
    pub(crate) priority: Priority,
    pub(crate) class: ExecutionClass,
    pub(crate) required_threads: u32,
    /// Next task in the same queue.
    pub(crate) next: Option<u32>,

    /// Threads currently inside the entry point.
    pub(crate) occupancy: u32,
    pub(crate) thread_mask: u64,
    pub(crate) calls: u32,
    /// First terminal result reported by a call. A failure is never replaced.
    pub(crate) verdict: Option<TaskStatus>,
    /// Held after a `Busy` return.
    pub(crate) waiting: bool,
    pub(crate) last_enter: Option<Instant>,
    pub(crate) hw_counter_at_enter: u64,
    /// The completion hook is running outside the lock.
    pub(crate) completing: bool,
    pub(crate) submitted_at: Option<&'static Location<'static>>,

    /// Outcome of the job this slot retired last, with that job's generation.
    pub(crate) retired: Option<(u32, TaskOutcome)>,
}

impl TaskSlot {
    fn empty() -> Self {
        Self {
            generation: 1,
            status: None,
            routine: None,
            outputs: Vec::new(),
            waits_on: Vec::new(),
            owner: OwnerId::NONE,
            priority: Priority::Normal,
            class: ExecutionClass::General,
            required_threads: 1,
            next: None,
            occupancy: 0,
            thread_mask: 0,
            calls: 0,
            verdict: None,
            waiting: false,
            last_enter: None,
            hw_counter_at_enter: 0,
            completing: false,
            submitted_at: None,
            retired: None,
        }
    }

    pub(crate) fn name(&self) -> &str {
        self.routine.as_ref().map(|r| r.name()).unwrap_or("<free>")
    }

    /// Lowest thread index not used by a thread already inside the task.
    pub(crate) fn free_thread_index(&self) -> Option<u32> {
        (0..self.required_threads).find(|i| self.thread_mask & (1u64 << i) == 0)
    }
}

pub(crate) struct SlotArena {
    slots: Vec<TaskSlot>,
    free: Vec<u32>,
}

impl SlotArena {
    pub(crate) fn new(capacity: usize) -> Self {
        let slots = (0..capacity).map(|_| TaskSlot::empty()).collect();
        // Pop order hands out slot 0 first.
        let free = (0..capacity as u32).rev().collect();
        Self { slots, free }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn free_count(&self) -> usize {
        self.free.len()
    }

    pub(crate) fn live_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub(crate) fn get(&self, id: u32) -> Option<&TaskSlot> {
        self.slots.get(id as usize)
    }

    pub(crate) fn get_mut(&mut self, id: u32) -> Option<&mut TaskSlot> {
        self.slots.get_mut(id as usize)
    }

    /// Current handle of a slot.
    pub(crate) fn handle(&self, id: u32) -> SyncHandle {
        SyncHandle {
            id,
            generation: self.slots[id as usize].generation,
        }
    }

    /// The record for `handle`, if that exact job is still live.
    pub(crate) fn live(&self, handle: SyncHandle) -> Option<&TaskSlot> {
        self.get(handle.id)
            .filter(|slot| slot.generation == handle.generation && slot.status.is_some())
    }

    pub(crate) fn live_mut(&mut self, handle: SyncHandle) -> Option<&mut TaskSlot> {
        self.get_mut(handle.id)
            .filter(|slot| slot.generation == handle.generation && slot.status.is_some())
    }

    pub(crate) fn is_live(&self, handle: SyncHandle) -> bool {
        self.live(handle).is_some()
    }

    /// Take a slot from the free pool and mark it pending.
    pub(crate) fn allocate(&mut self) -> Option<u32> {
        let id = self.free.pop()?;
        let slot = &mut self.slots[id as usize];
        debug_assert!(slot.status.is_none(), "free slot {id} is live");
        slot.status = Some(TaskStatus::Pending);
        Some(id)
    }

    /// Return a slot to the free pool, remembering the outcome of the job it
    /// held and bumping its generation.
    pub(crate) fn release(&mut self, id: u32, outcome: TaskOutcome) {
        let slot = &mut self.slots[id as usize];
        let retired_generation = slot.generation;
        let mut next_generation = retired_generation.wrapping_add(1);
        if next_generation == 0 {
            next_generation = 1;
        }

        *slot = TaskSlot {
            generation: next_generation,
            retired: Some((retired_generation, outcome)),
            ..TaskSlot::empty()
        };
        self.free.push(id);
    }

    /// Handles of every live task.
    pub(crate) fn live_handles(&self) -> impl Iterator<Item = SyncHandle> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.status.is_some())
            .map(|(id, slot)| SyncHandle {
                id: id as u32,
                generation: slot.generation,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_until_exhausted() {
        let mut arena = SlotArena::new(2);
        assert_eq!(arena.allocate(), Some(0));
        assert_eq!(arena.allocate(), Some(1));
        assert_eq!(arena.allocate(), None);
        assert_eq!(arena.free_count(), 0);
        assert_eq!(arena.live_count(), 2);
    }

    #[test]
    fn release_bumps_generation_once() {
        let mut arena = SlotArena::new(1);
        let id = arena.allocate().unwrap();
        let first = arena.handle(id);
        assert!(arena.is_live(first));

        arena.release(id, TaskOutcome::Failed(-4));
        assert!(!arena.is_live(first));
        assert_eq!(arena.get(id).unwrap().generation, first.generation + 1);
        assert_eq!(
            arena.get(id).unwrap().retired,
            Some((first.generation, TaskOutcome::Failed(-4)))
        );

        let id = arena.allocate().unwrap();
        let second = arena.handle(id);
        assert_ne!(first, second);
        assert!(arena.is_live(second));
        assert!(arena.live(first).is_none());
    }

    #[test]
    fn generation_skips_zero_on_wrap() {
        let mut arena = SlotArena::new(1);
        arena.get_mut(0).unwrap().generation = u32::MAX;
        let id = arena.allocate().unwrap();
        arena.release(id, TaskOutcome::Done);
        assert_eq!(arena.get(0).unwrap().generation, 1);
    }

    #[test]
    fn free_thread_index_respects_mask() {
        let mut slot = TaskSlot::empty();
        slot.required_threads = 3;
        assert_eq!(slot.free_thread_index(), Some(0));
        slot.thread_mask = 0b011;
        assert_eq!(slot.free_thread_index(), Some(2));
        slot.thread_mask = 0b111;
        assert_eq!(slot.free_thread_index(), None);
    }

    #[test]
    fn live_handles_lists_allocated_slots() {
        let mut arena = SlotArena::new(3);
        let a = arena.allocate().unwrap();
        let b = arena.allocate().unwrap();
        arena.release(a, TaskOutcome::Done);
        let handles: Vec<_> = arena.live_handles().collect();
        assert_eq!(handles, vec![arena.handle(b)]);
    }
}
