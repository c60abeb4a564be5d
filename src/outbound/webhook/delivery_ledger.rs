use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::domain::events::Event;
use crate::domain::ports::{Clock, Store, StoreError};
use crate::infrastructure::memory_store::InMemoryStore;
use crate::outbound::webhook::schemas::{Delivery, DeliveryState, DeliveryStats};
use crate::outbound::webhook::subscription::Subscription;

/// Durable home of delivery records.
///
/// The ledger calls [`DeliveryStore::persist`] on every state transition and
/// [`DeliveryStore::load_pending_deliveries`] on recovery.
#[async_trait]
pub trait DeliveryStore: Store<Delivery> {
    async fn load_pending_deliveries(&self) -> Result<Vec<Delivery>, StoreError> {
        Ok(self
            .values()
            .await?
            .into_iter()
            .filter(|d| !d.is_terminal())
            .collect())
    }

    async fn persist(&self, delivery: &Delivery) -> Result<(), StoreError> {
        self.put(delivery.clone()).await
    }
}

impl DeliveryStore for InMemoryStore<Delivery> {}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Delivery not found: {0}")]
    NotFound(String),

    #[error("Delivery {id} already exists for this event and subscription")]
    AlreadyExists { id: String },

    #[error("Delivery {id} is already {status:?}")]
    Terminal { id: String, status: DeliveryState },

    #[error("Delivery {id} has used all {attempts} attempt(s)")]
    AttemptBudgetExhausted { id: String, attempts: u32 },

    #[error("Invalid transition for delivery {id}: {reason}")]
    InvalidTransition { id: String, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Owner of every delivery record.
///
/// All mutation goes through the transition methods below. Each one holds a
/// per-record guard for its read-check-write cycle, so a transition is a
/// compare-and-set on the record's current state: nothing moves a record out
/// of `Delivered` or `PermanentFailure`. Different records never contend, and
/// a guard only lives while someone holds or waits on it.
pub struct DeliveryLedger {
    store: Arc<dyn DeliveryStore>,
    clock: Arc<dyn Clock>,
    guards: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DeliveryLedger {
    pub fn new(store: Arc<dyn DeliveryStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            guards: Mutex::new(HashMap::new()),
        }
    }

    pub fn now(&self) -> OffsetDateTime {
        self.clock.now()
    }

    /// Create the single delivery record for (event, subscription).
    ///
    /// Fails with [`LedgerError::AlreadyExists`] if that pair has one.
    pub async fn create(
        &self,
        event: &Event,
        subscription: &Subscription,
    ) -> Result<Delivery, LedgerError> {
        let delivery = Delivery::pending(event, subscription, self.clock.now());
        let id = delivery.id.clone();

        let guard = self.lock(&id).await;
        let result = self.insert(delivery).await;
        self.unlock(&id, guard).await;
        result
    }

    pub async fn get(&self, id: &str) -> Result<Option<Delivery>, LedgerError> {
        Ok(self.store.get(id).await?)
    }

    /// Count an attempt before it is sent.
    ///
    /// Fails if the record is terminal or its attempt budget is spent, which
    /// is what keeps a stale timer from resurrecting a finished delivery.
    pub async fn begin_attempt(&self, id: &str, max_attempts: u32) -> Result<Delivery, LedgerError> {
        self.transition(id, |delivery, _| {
            if delivery.attempt_count >= max_attempts {
                return Err(LedgerError::AttemptBudgetExhausted {
                    id: delivery.id.clone(),
                    attempts: delivery.attempt_count,
                });
            }
            delivery.attempt_count += 1;
            delivery.next_retry_at = None;
            Ok(())
        })
        .await
    }

    pub async fn mark_delivered(&self, id: &str, http_status: u16) -> Result<Delivery, LedgerError> {
        self.transition(id, |delivery, now| {
            if delivery.attempt_count == 0 {
                return Err(LedgerError::InvalidTransition {
                    id: delivery.id.clone(),
                    reason: "delivered without an attempt".to_string(),
                });
            }
            delivery.status = DeliveryState::Delivered;
            delivery.http_status = Some(http_status);
            delivery.error = None;
            delivery.next_retry_at = None;
            delivery.delivered_at = Some(now);
            Ok(())
        })
        .await
    }

    /// Record a failed attempt that will be retried at `next_retry_at`.
    ///
    /// `None` records the failure without a scheduled retry.
    pub async fn mark_retrying(
        &self,
        id: &str,
        http_status: Option<u16>,
        error: String,
        next_retry_at: Option<OffsetDateTime>,
    ) -> Result<Delivery, LedgerError> {
        self.transition(id, move |delivery, _| {
            delivery.status = DeliveryState::Retrying;
            delivery.http_status = http_status;
            delivery.error = Some(error);
            delivery.next_retry_at = next_retry_at;
            Ok(())
        })
        .await
    }

    /// Give up on a delivery whose `max_attempts` attempts all failed
    pub async fn mark_permanent_failure(
        &self,
        id: &str,
        http_status: Option<u16>,
        error: String,
        max_attempts: u32,
    ) -> Result<Delivery, LedgerError> {
        self.transition(id, move |delivery, _| {
            if delivery.attempt_count != max_attempts {
                return Err(LedgerError::InvalidTransition {
                    id: delivery.id.clone(),
                    reason: format!(
                        "permanent failure after {} of {max_attempts} attempts",
                        delivery.attempt_count
                    ),
                });
            }
            delivery.status = DeliveryState::PermanentFailure;
            delivery.http_status = http_status;
            delivery.error = Some(error);
            delivery.next_retry_at = None;
            Ok(())
        })
        .await
    }

    pub async fn stats(&self) -> Result<DeliveryStats, LedgerError> {
        let mut stats = DeliveryStats::default();
        for delivery in self.store.values().await? {
            stats.record(delivery.status);
        }
        Ok(stats)
    }

    /// Deliveries of one subscription, oldest first
    pub async fn list_for_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Vec<Delivery>, LedgerError> {
        let mut deliveries: Vec<Delivery> = self
            .store
            .values()
            .await?
            .into_iter()
            .filter(|d| d.subscription_id == subscription_id)
            .collect();
        deliveries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(deliveries)
    }

    pub async fn load_pending(&self) -> Result<Vec<Delivery>, LedgerError> {
        Ok(self.store.load_pending_deliveries().await?)
    }

    /// How many deliveries of `event_id` are not yet finished
    pub async fn outstanding_for_event(&self, event_id: &str) -> Result<usize, LedgerError> {
        Ok(self
            .store
            .values()
            .await?
            .iter()
            .filter(|d| d.event_id == event_id && !d.is_terminal())
            .count())
    }

    async fn insert(&self, delivery: Delivery) -> Result<Delivery, LedgerError> {
        if self.store.get(&delivery.id).await?.is_some() {
            return Err(LedgerError::AlreadyExists { id: delivery.id });
        }
        self.store.persist(&delivery).await?;

        debug!(
            delivery_id = %delivery.id,
            event_id = %delivery.event_id,
            subscription_id = %delivery.subscription_id,
            "Delivery created"
        );
        Ok(delivery)
    }

    async fn transition<F>(&self, id: &str, apply: F) -> Result<Delivery, LedgerError>
    where
        F: FnOnce(&mut Delivery, OffsetDateTime) -> Result<(), LedgerError> + Send,
    {
        let guard = self.lock(id).await;
        let result = self.apply(id, apply).await;
        self.unlock(id, guard).await;
        result
    }

    async fn apply<F>(&self, id: &str, apply: F) -> Result<Delivery, LedgerError>
    where
        F: FnOnce(&mut Delivery, OffsetDateTime) -> Result<(), LedgerError> + Send,
    {
        let mut delivery = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(id.to_string()))?;

        if delivery.is_terminal() {
            return Err(LedgerError::Terminal {
                id: delivery.id,
                status: delivery.status,
            });
        }

        let now = self.clock.now();
        apply(&mut delivery, now)?;
        delivery.updated_at = now;
        self.store.persist(&delivery).await?;
        Ok(delivery)
    }

    async fn lock(&self, id: &str) -> OwnedMutexGuard<()> {
        let guard = {
            let mut guards = self.guards.lock().await;
            guards.entry(id.to_string()).or_default().clone()
        };
        guard.lock_owned().await
    }

    /// Release a record guard, dropping its entry when no one else holds a
    /// clone of it.
    async fn unlock(&self, id: &str, guard: OwnedMutexGuard<()>) {
        drop(guard);
        let mut guards = self.guards.lock().await;
        if guards.get(id).is_some_and(|g| Arc::strong_count(g) == 1) {
            guards.remove(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::EventType;
    use crate::infrastructure::clock::SystemClock;
    use serde_json::json;

    fn fixtures() -> (Event, Subscription) {
        let ty = EventType::parse("incident.resolved").expect("valid event type");
        let subscription =
            Subscription::new("org_1", "https://example.com/hook", [ty], "secret").with_id("sub-1");
        (event("evt_1"), subscription)
    }

    fn event(id: &str) -> Event {
        let ty = EventType::parse("incident.resolved").expect("valid event type");
        Event::new(ty, "org_1", json!({})).with_id(id)
    }

    fn ledger() -> (DeliveryLedger, InMemoryStore<Delivery>) {
        let store = InMemoryStore::new();
        (
            DeliveryLedger::new(Arc::new(store.clone()), Arc::new(SystemClock)),
            store,
        )
    }

    #[tokio::test]
    async fn test_create_persists_pending_record() -> Result<(), LedgerError> {
        let (ledger, store) = ledger();
        let (event, subscription) = fixtures();

        let delivery = ledger.create(&event, &subscription).await?;

        assert_eq!(delivery.status, DeliveryState::Pending);
        assert_eq!(delivery.event_id, "evt_1");
        assert_eq!(delivery.subscription_id, "sub-1");
        assert_eq!(store.get(&delivery.id).await?, Some(delivery));
        Ok(())
    }

    #[tokio::test]
    async fn test_attempt_count_increments_by_one() -> Result<(), LedgerError> {
        let (ledger, _) = ledger();
        let (event, subscription) = fixtures();
        let delivery = ledger.create(&event, &subscription).await?;

        for expected in 1..=3 {
            let updated = ledger.begin_attempt(&delivery.id, 5).await?;
            assert_eq!(updated.attempt_count, expected);
            assert!(updated.updated_at >= delivery.updated_at);
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_attempt_budget_is_enforced() -> Result<(), LedgerError> {
        let (ledger, _) = ledger();
        let (event, subscription) = fixtures();
        let delivery = ledger.create(&event, &subscription).await?;

        ledger.begin_attempt(&delivery.id, 2).await?;
        ledger.begin_attempt(&delivery.id, 2).await?;
        let result = ledger.begin_attempt(&delivery.id, 2).await;

        assert!(matches!(
            result,
            Err(LedgerError::AttemptBudgetExhausted { attempts: 2, .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_delivered_is_terminal() -> Result<(), LedgerError> {
        let (ledger, _) = ledger();
        let (event, subscription) = fixtures();
        let delivery = ledger.create(&event, &subscription).await?;

        ledger.begin_attempt(&delivery.id, 5).await?;
        let delivered = ledger.mark_delivered(&delivery.id, 200).await?;

        assert_eq!(delivered.status, DeliveryState::Delivered);
        assert_eq!(delivered.http_status, Some(200));
        assert!(delivered.delivered_at.is_some());

        let stale = ledger.begin_attempt(&delivery.id, 5).await;
        assert!(matches!(stale, Err(LedgerError::Terminal { .. })));

        let stale = ledger
            .mark_retrying(&delivery.id, Some(500), "late".to_string(), None)
            .await;
        assert!(matches!(stale, Err(LedgerError::Terminal { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_delivered_requires_an_attempt() -> Result<(), LedgerError> {
        let (ledger, _) = ledger();
        let (event, subscription) = fixtures();
        let delivery = ledger.create(&event, &subscription).await?;

        let result = ledger.mark_delivered(&delivery.id, 200).await;
        assert!(matches!(result, Err(LedgerError::InvalidTransition { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_permanent_failure_requires_exhausted_budget() -> Result<(), LedgerError> {
        let (ledger, _) = ledger();
        let (event, subscription) = fixtures();
        let delivery = ledger.create(&event, &subscription).await?;

        ledger.begin_attempt(&delivery.id, 2).await?;
        let early = ledger
            .mark_permanent_failure(&delivery.id, Some(503), "down".to_string(), 2)
            .await;
        assert!(matches!(early, Err(LedgerError::InvalidTransition { .. })));

        ledger.begin_attempt(&delivery.id, 2).await?;
        let failed = ledger
            .mark_permanent_failure(&delivery.id, Some(503), "down".to_string(), 2)
            .await?;

        assert_eq!(failed.status, DeliveryState::PermanentFailure);
        assert_eq!(failed.attempt_count, 2);
        assert_eq!(failed.error.as_deref(), Some("down"));
        Ok(())
    }

    #[tokio::test]
    async fn test_retrying_records_failure_details() -> Result<(), LedgerError> {
        let (ledger, _) = ledger();
        let (event, subscription) = fixtures();
        let delivery = ledger.create(&event, &subscription).await?;

        ledger.begin_attempt(&delivery.id, 5).await?;
        let next = ledger.now() + time::Duration::seconds(1);
        let retrying = ledger
            .mark_retrying(&delivery.id, Some(500), "HTTP 500".to_string(), Some(next))
            .await?;

        assert_eq!(retrying.status, DeliveryState::Retrying);
        assert_eq!(retrying.http_status, Some(500));
        assert_eq!(retrying.next_retry_at, Some(next));

        let attempt = ledger.begin_attempt(&delivery.id, 5).await?;
        assert_eq!(attempt.status, DeliveryState::Retrying);
        assert!(attempt.next_retry_at.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_record() {
        let (ledger, _) = ledger();
        let result = ledger.begin_attempt("nope", 5).await;
        assert!(matches!(result, Err(LedgerError::NotFound(_))));
        assert!(ledger.guards.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_second_create_for_same_pair_is_refused() -> Result<(), LedgerError> {
        let (ledger, store) = ledger();
        let (event, subscription) = fixtures();

        let first = ledger.create(&event, &subscription).await?;
        ledger.begin_attempt(&first.id, 5).await?;

        let again = ledger.create(&event, &subscription).await;
        assert!(matches!(again, Err(LedgerError::AlreadyExists { ref id }) if *id == first.id));

        let stored = store.get(&first.id).await?.expect("delivery exists");
        assert_eq!(stored.attempt_count, 1);
        assert_eq!(store.len().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_guards_do_not_outlive_transitions() -> Result<(), LedgerError> {
        let (ledger, _) = ledger();
        let (event, subscription) = fixtures();

        let delivery = ledger.create(&event, &subscription).await?;
        ledger.begin_attempt(&delivery.id, 5).await?;
        ledger
            .mark_retrying(&delivery.id, Some(500), "HTTP 500".to_string(), None)
            .await?;

        // Left retrying, as after an unregister
        assert!(ledger.guards.lock().await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_outstanding_for_event() -> Result<(), LedgerError> {
        let (ledger, _) = ledger();
        let (event, subscription) = fixtures();
        let other = subscription.clone().with_id("sub-2");

        let first = ledger.create(&event, &subscription).await?;
        ledger.create(&event, &other).await?;
        assert_eq!(ledger.outstanding_for_event("evt_1").await?, 2);

        ledger.begin_attempt(&first.id, 5).await?;
        ledger.mark_delivered(&first.id, 200).await?;
        assert_eq!(ledger.outstanding_for_event("evt_1").await?, 1);
        assert_eq!(ledger.outstanding_for_event("evt_unknown").await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_stats_and_pending() -> Result<(), LedgerError> {
        let (ledger, _) = ledger();
        let (_, subscription) = fixtures();

        let delivered = ledger.create(&event("evt_1"), &subscription).await?;
        ledger.begin_attempt(&delivered.id, 1).await?;
        ledger.mark_delivered(&delivered.id, 204).await?;

        let failed = ledger.create(&event("evt_2"), &subscription).await?;
        ledger.begin_attempt(&failed.id, 1).await?;
        ledger
            .mark_permanent_failure(&failed.id, None, "timeout".to_string(), 1)
            .await?;

        let retrying = ledger.create(&event("evt_3"), &subscription).await?;
        ledger.begin_attempt(&retrying.id, 5).await?;
        ledger
            .mark_retrying(&retrying.id, Some(502), "bad gateway".to_string(), None)
            .await?;

        ledger.create(&event("evt_4"), &subscription).await?;

        let stats = ledger.stats().await?;
        assert_eq!(stats.total, 4);
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.retrying, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.success_rate, 0.25);

        assert_eq!(ledger.load_pending().await?.len(), 2);
        assert_eq!(ledger.list_for_subscription("sub-1").await?.len(), 4);
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_attempts_on_one_record_are_serialized() -> Result<(), LedgerError> {
        let (ledger, _) = ledger();
        let ledger = Arc::new(ledger);
        let (event, subscription) = fixtures();
        let delivery = ledger.create(&event, &subscription).await?;

        let mut tasks = Vec::new();
        for _ in 0..10 {
            let ledger = ledger.clone();
            let id = delivery.id.clone();
            tasks.push(tokio::spawn(
                async move { ledger.begin_attempt(&id, 5).await },
            ));
        }

        let mut granted = 0;
        for task in tasks {
            if task.await.expect("task panicked").is_ok() {
                granted += 1;
            }
        }

        assert_eq!(granted, 5);
        assert_eq!(
            ledger.get(&delivery.id).await?.map(|d| d.attempt_count),
            Some(5)
        );
        Ok(())
    }
}
