use std::collections::HashMap;

use codecflow_core::DependencyToken;

use crate::types::SyncHandle;

/// Maps each registered token to the task that currently produces it.
#[derive(Debug, Default)]
pub(crate) struct DependencyTable {
    owners: HashMap<DependencyToken, SyncHandle>,
}

impl DependencyTable {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            owners: HashMap::with_capacity(capacity),
        }
    }

    /// Current producer of `token`.
    pub(crate) fn owner_of(&self, token: DependencyToken) -> Option<SyncHandle> {
        self.owners.get(&token).copied()
    }

    /// Make `task` the producer of `token`, superseding any earlier producer.
    /// Tasks that already resolved the token keep waiting on the old one.
    pub(crate) fn register(&mut self, token: DependencyToken, task: SyncHandle) -> Option<SyncHandle> {
        self.owners.insert(token, task)
    }

    /// Drop `token` if `task` still owns it.
    pub(crate) fn release(&mut self, token: DependencyToken, task: SyncHandle) -> bool {
        if self.owners.get(&token) == Some(&task) {
            self.owners.remove(&token);
            true
        } else {
            false
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.owners.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(id: u32, generation: u32) -> SyncHandle {
        SyncHandle { id, generation }
    }

    #[test]
    fn register_and_release() {
        let mut table = DependencyTable::with_capacity(4);
        let token = DependencyToken(42);
        assert_eq!(table.owner_of(token), None);

        table.register(token, handle(1, 1));
        assert_eq!(table.owner_of(token), Some(handle(1, 1)));
        assert!(table.release(token, handle(1, 1)));
        assert_eq!(table.owner_of(token), None);
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn superseded_owner_does_not_release_new_entry() {
        let mut table = DependencyTable::default();
        let token = DependencyToken(7);
        table.register(token, handle(1, 1));
        let previous = table.register(token, handle(2, 5));
        assert_eq!(previous, Some(handle(1, 1)));

        assert!(!table.release(token, handle(1, 1)));
        assert_eq!(table.owner_of(token), Some(handle(2, 5)));
    }
}
