//! Connection registry
//!
//! Priority-sorted list of reading connections. Mutations build a new list
//! and swap it in, so workers iterating a snapshot never see a partially
//! updated list.

use std::sync::Arc;

use parking_lot::RwLock;

use super::packeter::Packeter;

/// Immutable view of the registry at one point in time
pub type Snapshot = Arc<Vec<Arc<Packeter>>>;

/// Copy-on-write, priority-ascending list of connections
#[derive(Default)]
pub struct ConnectionRegistry {
    entries: RwLock<Snapshot>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert after any entries of equal priority.
    /// Returns false if the connection is already registered.
    pub fn insert(&self, packeter: Arc<Packeter>) -> bool {
        let mut entries = self.entries.write();
        if entries.iter().any(|e| **e == *packeter) {
            return false;
        }
        let priority = packeter.priority();
        let mut next: Vec<Arc<Packeter>> = (**entries).clone();
        let at = next.partition_point(|e| e.priority() <= priority);
        next.insert(at, packeter);
        *entries = Arc::new(next);
        true
    }

    pub fn remove(&self, packeter: &Packeter) -> bool {
        let mut entries = self.entries.write();
        let Some(at) = entries.iter().position(|e| **e == *packeter) else {
            return false;
        };
        let mut next: Vec<Arc<Packeter>> = (**entries).clone();
        next.remove(at);
        *entries = Arc::new(next);
        true
    }

    /// Re-establish priority order after a priority change
    pub fn resort(&self) {
        let mut entries = self.entries.write();
        let mut next: Vec<Arc<Packeter>> = (**entries).clone();
        next.sort_by_key(|e| e.priority());
        *entries = Arc::new(next);
    }

    pub fn snapshot(&self) -> Snapshot {
        Arc::clone(&self.entries.read())
    }

    pub fn contains(&self, packeter: &Packeter) -> bool {
        self.entries.read().iter().any(|e| **e == *packeter)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
