use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::events::EventType;
use crate::domain::ports::{Record, Store, StoreError};

/// Where, and for which event types, an owner wants to be notified.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: String,

    pub owner_id: String,

    pub url: String,

    pub event_types: HashSet<EventType>,

    /// HMAC key; only ever used to sign, never sent or serialized
    #[serde(skip_serializing, default)]
    pub secret: String,

    pub active: bool,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    #[serde(with = "time::serde::rfc3339::option", default)]
    pub last_triggered_at: Option<OffsetDateTime>,
}

impl Subscription {
    /// Create a new active subscription with a fresh id
    pub fn new(
        owner_id: impl Into<String>,
        url: impl Into<String>,
        event_types: impl IntoIterator<Item = EventType>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            id: format!("sub_{}", Uuid::new_v4().simple()),
            owner_id: owner_id.into(),
            url: url.into(),
            event_types: event_types.into_iter().collect(),
            secret: secret.into(),
            active: true,
            created_at: OffsetDateTime::now_utc(),
            last_triggered_at: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Check if this subscription should receive `event_type` for `owner_id`
    pub fn matches(&self, owner_id: &str, event_type: &EventType) -> bool {
        self.active && self.owner_id == owner_id && self.event_types.contains(event_type)
    }
}

impl Record for Subscription {
    fn record_id(&self) -> &str {
        &self.id
    }
}

type RouteKey = (String, EventType);

#[derive(Debug, Default)]
struct SubscriptionIndex {
    by_id: HashMap<String, Subscription>,

    /// (owner, event type) -> subscription ids, active or not
    by_route: HashMap<RouteKey, HashSet<String>>,
}

impl SubscriptionIndex {
    fn insert(&mut self, subscription: Subscription) {
        self.remove(&subscription.id);

        for event_type in &subscription.event_types {
            self.by_route
                .entry((subscription.owner_id.clone(), event_type.clone()))
                .or_default()
                .insert(subscription.id.clone());
        }
        self.by_id.insert(subscription.id.clone(), subscription);
    }

    fn remove(&mut self, id: &str) -> Option<Subscription> {
        let removed = self.by_id.remove(id)?;

        for event_type in &removed.event_types {
            let key = (removed.owner_id.clone(), event_type.clone());
            if let Some(ids) = self.by_route.get_mut(&key) {
                ids.remove(id);
                if ids.is_empty() {
                    self.by_route.remove(&key);
                }
            }
        }
        Some(removed)
    }
}

/// In-memory index of subscriptions keyed by owner and event type, written
/// through to a [`Store`].
pub struct SubscriptionRegistry {
    store: Arc<dyn Store<Subscription>>,
    index: RwLock<SubscriptionIndex>,
}

impl SubscriptionRegistry {
    pub fn new(store: Arc<dyn Store<Subscription>>) -> Self {
        Self {
            store,
            index: RwLock::new(SubscriptionIndex::default()),
        }
    }

    /// Rebuild the index from the backing store
    pub async fn load(&self) -> Result<usize, StoreError> {
        let subscriptions = self.store.values().await?;
        let count = subscriptions.len();

        let mut index = self.index.write().await;
        *index = SubscriptionIndex::default();
        for subscription in subscriptions {
            index.insert(subscription);
        }

        info!(count, "Loaded subscriptions");
        Ok(count)
    }

    /// Add or replace a subscription
    pub async fn register(&self, subscription: Subscription) -> Result<(), StoreError> {
        self.store.put(subscription.clone()).await?;

        debug!(
            subscription_id = %subscription.id,
            owner_id = %subscription.owner_id,
            event_types = subscription.event_types.len(),
            "Subscription registered"
        );
        self.index.write().await.insert(subscription);
        Ok(())
    }

    /// Remove a subscription, returning it if it existed
    pub async fn unregister(&self, id: &str) -> Result<Option<Subscription>, StoreError> {
        let stored = self.store.delete(id).await?;
        let indexed = self.index.write().await.remove(id);

        if indexed.is_some() || stored.is_some() {
            debug!(subscription_id = %id, "Subscription unregistered");
        }
        Ok(indexed.or(stored))
    }

    /// Enable or disable fan-out to a subscription without removing it
    pub async fn set_active(
        &self,
        id: &str,
        active: bool,
    ) -> Result<Option<Subscription>, StoreError> {
        let Some(mut subscription) = self.get(id).await else {
            return Ok(None);
        };
        subscription.active = active;
        self.register(subscription.clone()).await?;
        Ok(Some(subscription))
    }

    /// Active subscriptions of `owner_id` that listen for `event_type`
    pub async fn matching(&self, owner_id: &str, event_type: &EventType) -> Vec<Subscription> {
        let index = self.index.read().await;
        let key = (owner_id.to_string(), event_type.clone());

        let Some(ids) = index.by_route.get(&key) else {
            return Vec::new();
        };

        ids.iter()
            .filter_map(|id| index.by_id.get(id))
            .filter(|s| s.matches(owner_id, event_type))
            .cloned()
            .collect()
    }

    pub async fn get(&self, id: &str) -> Option<Subscription> {
        self.index.read().await.by_id.get(id).cloned()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.index.read().await.by_id.contains_key(id)
    }

    pub async fn list_for_owner(&self, owner_id: &str) -> Vec<Subscription> {
        let index = self.index.read().await;
        let mut subscriptions: Vec<Subscription> = index
            .by_id
            .values()
            .filter(|s| s.owner_id == owner_id)
            .cloned()
            .collect();
        subscriptions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        subscriptions
    }

    /// Stamp `last_triggered_at` after fan-out created a delivery
    pub async fn touch(&self, id: &str, at: OffsetDateTime) -> Result<(), StoreError> {
        let updated = {
            let mut index = self.index.write().await;
            match index.by_id.get_mut(id) {
                Some(subscription) => {
                    subscription.last_triggered_at = Some(at);
                    subscription.clone()
                }
                None => return Ok(()),
            }
        };
        self.store.put(updated).await
    }
}
