/*
   Capabilities the delivery core consumes from its surroundings: durable
   storage, a timer to arm retries on, and a wall clock.
*/

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::time::Duration;
use time::OffsetDateTime;

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Store error: {0}")]
    Other(String),
}

/// Anything a [`Store`] can hold, addressed by a string id.
pub trait Record: Clone + Send + Sync + 'static {
    fn record_id(&self) -> &str;
}

/// Keyed record storage.
///
/// The registry and the ledger only ever talk to storage through this trait,
/// so an in-memory map and a database table are interchangeable.
#[async_trait]
pub trait Store<T: Record>: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<T>, StoreError>;

    /// Insert or overwrite the record stored under `record.record_id()`
    async fn put(&self, record: T) -> Result<(), StoreError>;

    /// Remove a record, returning it if it existed
    async fn delete(&self, id: &str) -> Result<Option<T>, StoreError>;

    async fn values(&self) -> Result<Vec<T>, StoreError>;
}

/// Handle returned by [`Timer::schedule`]; cancelling prevents the task from
/// starting if it has not fired yet.
pub struct TimerHandle {
    cancel: Box<dyn FnOnce() + Send + Sync>,
}

impl TimerHandle {
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Box::new(cancel),
        }
    }

    pub fn cancel(self) {
        (self.cancel)()
    }
}

impl std::fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerHandle").finish_non_exhaustive()
    }
}

/// Runs a task once after a delay.
pub trait Timer: Send + Sync {
    fn schedule(&self, delay: Duration, task: BoxFuture<'static, ()>) -> TimerHandle;
}

/// Source of wall-clock timestamps for delivery records
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}
