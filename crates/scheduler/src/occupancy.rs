use std::collections::HashMap;

use codecflow_core::OwnerId;

use crate::types::SyncHandle;

/// Per-owner bookkeeping.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct OccupancyEntry {
    /// Threads currently running this owner's tasks.
    pub(crate) active_threads: u32,
    /// Most recently admitted exclusive task.
    pub(crate) last_exclusive: Option<SyncHandle>,
    /// Live tasks referencing this entry.
    pub(crate) live_tasks: u32,
}

/// Occupancy entries keyed by owner. An entry exists only while some live
/// task refers to it.
#[derive(Debug)]
pub(crate) struct OccupancyTable {
    entries: HashMap<OwnerId, OccupancyEntry>,
    capacity: usize,
}

impl OccupancyTable {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            capacity,
        }
    }

    /// Entry for `owner`, created on first use. `None` when a new entry would
    /// exceed the table's capacity.
    pub(crate) fn attach(&mut self, owner: OwnerId) -> Option<&mut OccupancyEntry> {
        if !self.entries.contains_key(&owner) && self.entries.len() >= self.capacity {
            return None;
        }
        let entry = self.entries.entry(owner).or_default();
        entry.live_tasks += 1;
        Some(entry)
    }

    /// Drop one live-task reference, removing the entry once unused.
    pub(crate) fn detach(&mut self, owner: OwnerId) {
        if let Some(entry) = self.entries.get_mut(&owner) {
            entry.live_tasks = entry.live_tasks.saturating_sub(1);
            if entry.live_tasks == 0 && entry.active_threads == 0 {
                self.entries.remove(&owner);
            }
        }
    }

    pub(crate) fn thread_entered(&mut self, owner: OwnerId) {
        if let Some(entry) = self.entries.get_mut(&owner) {
            entry.active_threads += 1;
        }
    }

    pub(crate) fn thread_left(&mut self, owner: OwnerId) {
        if let Some(entry) = self.entries.get_mut(&owner) {
            entry.active_threads = entry.active_threads.saturating_sub(1);
        }
    }

    #[cfg(test)]
    pub(crate) fn get(&self, owner: OwnerId) -> Option<&OccupancyEntry> {
        self.entries.get(&owner)
    }

    pub(crate) fn get_mut(&mut self, owner: OwnerId) -> Option<&mut OccupancyEntry> {
        self.entries.get_mut(&owner)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_lives_while_referenced() {
        let mut table = OccupancyTable::with_capacity(4);
        let owner = OwnerId(3);
        table.attach(owner).unwrap();
        table.attach(owner).unwrap();
        assert_eq!(table.get(owner).unwrap().live_tasks, 2);

        table.detach(owner);
        assert!(table.get(owner).is_some());
        table.detach(owner);
        assert!(table.get(owner).is_none());
    }

    #[test]
    fn active_threads_track_dispatch() {
        let mut table = OccupancyTable::with_capacity(4);
        let owner = OwnerId(9);
        table.attach(owner).unwrap();
        table.thread_entered(owner);
        table.thread_entered(owner);
        assert_eq!(table.get(owner).unwrap().active_threads, 2);
        table.thread_left(owner);
        assert_eq!(table.get(owner).unwrap().active_threads, 1);
    }

    #[test]
    fn capacity_limits_distinct_owners() {
        let mut table = OccupancyTable::with_capacity(1);
        assert!(table.attach(OwnerId(1)).is_some());
        assert!(table.attach(OwnerId(1)).is_some());
        assert!(table.attach(OwnerId(2)).is_none());
        assert_eq!(table.len(), 1);
    }
}
