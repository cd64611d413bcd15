use codecflow_core::{ExecutionClass, Priority};

use crate::slot::SlotArena;

#[derive(Debug, Default, Clone, Copy)]
struct Fifo {
    head: Option<u32>,
    tail: Option<u32>,
    len: usize,
}

/// One FIFO per (priority, execution class), linked through the task
/// records' `next` field.
#[derive(Debug, Default)]
pub(crate) struct TaskQueues {
    fifos: [[Fifo; 2]; 3],
}

impl TaskQueues {
    fn fifo(&self, priority: Priority, class: ExecutionClass) -> &Fifo {
        &self.fifos[priority.index()][class.index()]
    }

    fn fifo_mut(&mut self, priority: Priority, class: ExecutionClass) -> &mut Fifo {
        &mut self.fifos[priority.index()][class.index()]
    }

    /// Append a task to the tail of its queue.
    pub(crate) fn push_back(&mut self, slots: &mut SlotArena, id: u32) {
        let Some(slot) = slots.get_mut(id) else { return };
        slot.next = None;
        let (priority, class) = (slot.priority, slot.class);

        let fifo = self.fifo_mut(priority, class);
        let old_tail = fifo.tail.replace(id);
        if fifo.head.is_none() {
            fifo.head = Some(id);
        }
        fifo.len += 1;

        if let Some(tail) = old_tail {
            if let Some(prev) = slots.get_mut(tail) {
                prev.next = Some(id);
            }
        }
    }

    /// Remove a task from wherever it sits in its queue.
    pub(crate) fn unlink(&mut self, slots: &mut SlotArena, id: u32) -> bool {
        let Some(slot) = slots.get(id) else { return false };
        let (priority, class, next) = (slot.priority, slot.class, slot.next);

        let mut prev: Option<u32> = None;
        let mut cursor = self.fifo(priority, class).head;
        while let Some(cur) = cursor {
            if cur == id {
                break;
            }
            prev = Some(cur);
            cursor = slots.get(cur).and_then(|s| s.next);
        }
        if cursor.is_none() {
            return false;
        }

        match prev {
            Some(p) => {
                if let Some(prev_slot) = slots.get_mut(p) {
                    prev_slot.next = next;
                }
            }
            None => self.fifo_mut(priority, class).head = next,
        }
        let fifo = self.fifo_mut(priority, class);
        if fifo.tail == Some(id) {
            fifo.tail = prev;
        }
        fifo.len -= 1;

        if let Some(slot) = slots.get_mut(id) {
            slot.next = None;
        }
        true
    }

    pub(crate) fn head(&self, priority: Priority, class: ExecutionClass) -> Option<u32> {
        self.fifo(priority, class).head
    }

    pub(crate) fn len(&self, priority: Priority, class: ExecutionClass) -> usize {
        self.fifo(priority, class).len
    }

    /// Queue ids in dispatch order for one queue.
    pub(crate) fn ids<'a>(
        &self,
        slots: &'a SlotArena,
        priority: Priority,
        class: ExecutionClass,
    ) -> impl Iterator<Item = u32> + 'a {
        let mut cursor = self.head(priority, class);
        std::iter::from_fn(move || {
            let id = cursor?;
            cursor = slots.get(id).and_then(|s| s.next);
            Some(id)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arena_with(entries: &[(Priority, ExecutionClass)]) -> (SlotArena, Vec<u32>) {
        let mut arena = SlotArena::new(entries.len());
        let ids = entries
            .iter()
            .map(|&(priority, class)| {
                let id = arena.allocate().unwrap();
                let slot = arena.get_mut(id).unwrap();
                slot.priority = priority;
                slot.class = class;
                id
            })
            .collect();
        (arena, ids)
    }

    #[test]
    fn fifo_order_per_queue() {
        let general = (Priority::Normal, ExecutionClass::General);
        let (mut arena, ids) = arena_with(&[general, general, general]);
        let mut queues = TaskQueues::default();
        for &id in &ids {
            queues.push_back(&mut arena, id);
        }

        let order: Vec<u32> = queues.ids(&arena, Priority::Normal, ExecutionClass::General).collect();
        assert_eq!(order, ids);
        assert_eq!(queues.len(Priority::Normal, ExecutionClass::General), 3);
        assert_eq!(queues.len(Priority::High, ExecutionClass::General), 0);
    }

    #[test]
    fn unlink_middle_head_and_tail() {
        let general = (Priority::Low, ExecutionClass::General);
        let (mut arena, ids) = arena_with(&[general, general, general, general]);
        let mut queues = TaskQueues::default();
        for &id in &ids {
            queues.push_back(&mut arena, id);
        }

        assert!(queues.unlink(&mut arena, ids[1]));
        assert!(queues.unlink(&mut arena, ids[0]));
        assert!(queues.unlink(&mut arena, ids[3]));
        assert!(!queues.unlink(&mut arena, ids[3]));

        let order: Vec<u32> = queues.ids(&arena, Priority::Low, ExecutionClass::General).collect();
        assert_eq!(order, vec![ids[2]]);

        // Tail was fixed up: appending lands after the survivor.
        queues.push_back(&mut arena, ids[0]);
        let order: Vec<u32> = queues.ids(&arena, Priority::Low, ExecutionClass::General).collect();
        assert_eq!(order, vec![ids[2], ids[0]]);
    }

    #[test]
    fn queues_are_partitioned() {
        let (mut arena, ids) = arena_with(&[
            (Priority::High, ExecutionClass::Dedicated),
            (Priority::High, ExecutionClass::General),
        ]);
        let mut queues = TaskQueues::default();
        queues.push_back(&mut arena, ids[0]);
        queues.push_back(&mut arena, ids[1]);

        assert_eq!(queues.head(Priority::High, ExecutionClass::Dedicated), Some(ids[0]));
        assert_eq!(queues.head(Priority::High, ExecutionClass::General), Some(ids[1]));
    }
}
