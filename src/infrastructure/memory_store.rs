use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::ports::{Record, Store, StoreError};

/// HashMap-backed [`Store`] for tests, development and single-process use.
///
/// Nothing survives a restart; production deployments plug a durable store in
/// behind the same trait. Clone-friendly via `Arc`.
#[derive(Debug, Clone)]
pub struct InMemoryStore<T> {
    records: Arc<RwLock<HashMap<String, T>>>,
}

impl<T> InMemoryStore<T> {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl<T> Default for InMemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Record> Store<T> for InMemoryStore<T> {
    async fn get(&self, id: &str) -> Result<Option<T>, StoreError> {
        let records = self.records.read().await;
        Ok(records.get(id).cloned())
    }

    async fn put(&self, record: T) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        records.insert(record.record_id().to_string(), record);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<Option<T>, StoreError> {
        let mut records = self.records.write().await;
        Ok(records.remove(id))
    }

    async fn values(&self) -> Result<Vec<T>, StoreError> {
        let records = self.records.read().await;
        Ok(records.values().cloned().collect())
    }
}
