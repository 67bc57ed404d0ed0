//! Per-terminal gate capacity

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Capacity value for one terminal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapacityEntry {
    pub terminal_id: String,
    pub capacity_per_hour: u32,
    pub updated_at: DateTime<Utc>,
}

/// Key/value store for terminal capacities.
///
/// Callers only see `get`/`put`, so a persistent backend can replace the
/// in-process map without touching the routes.
#[async_trait]
pub trait CapacityStore: Send + Sync {
    async fn get(&self, terminal_id: &str) -> Option<CapacityEntry>;

    async fn put(&self, terminal_id: &str, capacity_per_hour: u32) -> CapacityEntry;
}

/// Process-local capacity map. Concurrent writers race; last write wins.
#[derive(Default)]
pub struct InMemoryCapacityStore {
    entries: RwLock<HashMap<String, CapacityEntry>>,
}

impl InMemoryCapacityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CapacityStore for InMemoryCapacityStore {
    async fn get(&self, terminal_id: &str) -> Option<CapacityEntry> {
        self.entries.read().get(terminal_id).cloned()
    }

    async fn put(&self, terminal_id: &str, capacity_per_hour: u32) -> CapacityEntry {
        let entry = CapacityEntry {
            terminal_id: terminal_id.to_string(),
            capacity_per_hour,
            updated_at: Utc::now(),
        };
        self.entries
            .write()
            .insert(terminal_id.to_string(), entry.clone());
        entry
    }
}
