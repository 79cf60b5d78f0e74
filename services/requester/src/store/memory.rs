//! In-memory registry, used when no database is configured and in tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ApplianceStore, BindOutcome, Record, Registry, StoreResult};
use crate::appliance::{ApplianceRecord, ClusterBinding};

/// Records held in a sorted map behind a lock.
#[derive(Debug)]
pub struct MemoryStore<T> {
    records: RwLock<BTreeMap<String, T>>,
}

impl<T> MemoryStore<T> {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Record> Registry<T> for MemoryStore<T> {
    async fn insert_if_absent(&self, record: &T) -> StoreResult<bool> {
        let mut records = self.records.write().await;
        if records.contains_key(record.id()) {
            return Ok(false);
        }
        records.insert(record.id().to_string(), record.clone());
        Ok(true)
    }

    async fn find_by_id(&self, id: &str) -> StoreResult<Option<T>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn delete_by_id(&self, id: &str) -> StoreResult<bool> {
        Ok(self.records.write().await.remove(id).is_some())
    }

    async fn take_by_id(&self, id: &str) -> StoreResult<Option<T>> {
        Ok(self.records.write().await.remove(id))
    }

    async fn list_all(&self) -> StoreResult<Vec<T>> {
        Ok(self.records.read().await.values().cloned().collect())
    }
}

#[async_trait]
impl ApplianceStore for MemoryStore<ApplianceRecord> {
    async fn bind_cluster(&self, id: &str, binding: &ClusterBinding) -> StoreResult<BindOutcome> {
        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(id) else {
            return Ok(BindOutcome::Missing);
        };
        if record.is_bound() {
            return Ok(BindOutcome::AlreadyBound);
        }
        record.cluster = Some(binding.clone());
        Ok(BindOutcome::Bound(record.clone()))
    }

    async fn delete_unbound(&self, id: &str) -> StoreResult<bool> {
        let mut records = self.records.write().await;
        let unbound = records.get(id).is_some_and(|record| !record.is_bound());
        if unbound {
            records.remove(id);
        }
        Ok(unbound)
    }
}
