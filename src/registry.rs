//! In-memory bookkeeping of running instances.
//!
//! Maps a project id to its container name. At most one entry exists
//! per id; a new run must retire the previous entry first. The
//! registry never talks to docker - it is advisory bookkeeping, and
//! the external container state remains the ground truth.

use std::collections::HashMap;

use tokio::sync::RwLock;

/// Concurrency-safe `id -> containerName` mapping.
#[derive(Debug, Default)]
pub struct InstanceRegistry {
    entries: RwLock<HashMap<String, String>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a running instance, replacing any previous entry.
    pub async fn insert(&self, id: &str, container_name: &str) {
        let mut entries = self.entries.write().await;
        entries.insert(id.to_string(), container_name.to_string());
    }

    /// Removes an instance, returning its container name. Removing an
    /// absent id is a no-op.
    pub async fn remove(&self, id: &str) -> Option<String> {
        let mut entries = self.entries.write().await;
        entries.remove(id)
    }

    /// Looks up the container name for an id.
    pub async fn get(&self, id: &str) -> Option<String> {
        let entries = self.entries.read().await;
        entries.get(id).cloned()
    }

    /// Returns an owned snapshot, never a live view.
    pub async fn snapshot(&self) -> HashMap<String, String> {
        let entries = self.entries.read().await;
        entries.clone()
    }

    pub async fn len(&self) -> usize {
        let entries = self.entries.read().await;
        entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
