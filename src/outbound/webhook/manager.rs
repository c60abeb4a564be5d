use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::WebhookConfig;
use crate::domain::events::{Event, EventType};
use crate::domain::ports::{Clock, Store, Timer};
use crate::error::WebhookError;
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::memory_store::InMemoryStore;
use crate::infrastructure::tokio_timer::TokioTimer;
use crate::outbound::webhook::delivery_ledger::{DeliveryLedger, DeliveryStore};
use crate::outbound::webhook::delivery_service::{DEFAULT_CONCURRENCY_LIMIT, DeliveryService};
use crate::outbound::webhook::dispatcher::EventDispatcher;
use crate::outbound::webhook::http_client::{DEFAULT_TIMEOUT, WebhookHttpClient, WebhookTransport};
use crate::outbound::webhook::retry_scheduler::RetryScheduler;
use crate::outbound::webhook::retry_strategy::RetryStrategy;
use crate::outbound::webhook::schemas::{Delivery, DeliveryStats};
use crate::outbound::webhook::subscription::{Subscription, SubscriptionRegistry};

/// Input for [`WebhookManager::register_subscription`]
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSubscription {
    pub owner_id: String,
    pub url: String,
    pub event_types: Vec<String>,
    pub secret: String,
}

/// Administrative entry point to the delivery core.
///
/// Owns the registry, ledger, scheduler, executor and dispatcher and wires
/// them to the injected store, transport, timer and clock.
pub struct WebhookManager {
    registry: Arc<SubscriptionRegistry>,

    ledger: Arc<DeliveryLedger>,

    scheduler: Arc<RetryScheduler>,

    service: Arc<DeliveryService>,

    dispatcher: EventDispatcher,
}

impl WebhookManager {
    pub fn builder() -> WebhookManagerBuilder {
        WebhookManagerBuilder::default()
    }

    /// Validate and store a new subscription, returning it with its id
    pub async fn register_subscription(
        &self,
        request: NewSubscription,
    ) -> Result<Subscription, WebhookError> {
        if request.owner_id.trim().is_empty() {
            return Err(WebhookError::Validation("ownerId is required".to_string()));
        }
        validate_url(&request.url)?;
        if request.secret.trim().is_empty() {
            return Err(WebhookError::Validation("secret is required".to_string()));
        }
        if request.event_types.is_empty() {
            return Err(WebhookError::Validation(
                "at least one event type is required".to_string(),
            ));
        }
        let event_types = request
            .event_types
            .into_iter()
            .map(EventType::parse)
            .collect::<Result<HashSet<_>, _>>()?;

        let subscription =
            Subscription::new(request.owner_id, request.url, event_types, request.secret);
        self.registry.register(subscription.clone()).await?;

        info!(
            subscription_id = %subscription.id,
            owner_id = %subscription.owner_id,
            url = %subscription.url,
            "Webhook subscription registered"
        );
        Ok(subscription)
    }

    /// Remove a subscription and cancel its armed retries.
    ///
    /// Deliveries that were waiting on a retry stay `Retrying`.
    pub async fn unregister_subscription(&self, id: &str) -> Result<Subscription, WebhookError> {
        let removed = self
            .registry
            .unregister(id)
            .await?
            .ok_or_else(|| WebhookError::SubscriptionNotFound(id.to_string()))?;

        let cancelled = self.scheduler.cancel_subscription(id).await;
        info!(
            subscription_id = %id,
            cancelled_retries = cancelled,
            "Webhook subscription unregistered"
        );
        Ok(removed)
    }

    /// Pause or resume fan-out to a subscription
    pub async fn set_subscription_active(
        &self,
        id: &str,
        active: bool,
    ) -> Result<Subscription, WebhookError> {
        let subscription = self
            .registry
            .set_active(id, active)
            .await?
            .ok_or_else(|| WebhookError::SubscriptionNotFound(id.to_string()))?;

        info!(subscription_id = %id, active, "Webhook subscription toggled");
        Ok(subscription)
    }

    pub async fn get_subscription(&self, id: &str) -> Result<Subscription, WebhookError> {
        self.registry
            .get(id)
            .await
            .ok_or_else(|| WebhookError::SubscriptionNotFound(id.to_string()))
    }

    pub async fn list_subscriptions(&self, owner_id: &str) -> Vec<Subscription> {
        self.registry.list_for_owner(owner_id).await
    }

    /// Fan `event` out to its subscribers; returns the deliveries this call
    /// created, which is empty when the event id was already queued to every
    /// matching subscription
    pub async fn queue_event(&self, event: Event) -> Result<Vec<Delivery>, WebhookError> {
        Ok(self.dispatcher.dispatch(event).await?)
    }

    pub async fn get_delivery_status(&self, delivery_id: &str) -> Result<Delivery, WebhookError> {
        self.ledger
            .get(delivery_id)
            .await?
            .ok_or_else(|| WebhookError::DeliveryNotFound(delivery_id.to_string()))
    }

    pub async fn get_delivery_stats(&self) -> Result<DeliveryStats, WebhookError> {
        Ok(self.ledger.stats().await?)
    }

    pub async fn list_deliveries(
        &self,
        subscription_id: &str,
    ) -> Result<Vec<Delivery>, WebhookError> {
        Ok(self.ledger.list_for_subscription(subscription_id).await?)
    }

    /// Reload subscriptions and resume every unfinished delivery.
    ///
    /// Returns how many deliveries were resumed.
    pub async fn recover_pending(&self) -> Result<usize, WebhookError> {
        self.registry.load().await?;

        let pending = self.ledger.load_pending().await?;
        let mut resumed = 0;
        for delivery in &pending {
            match self.service.resume(delivery).await {
                Ok(()) => resumed += 1,
                Err(e) => warn!(
                    delivery_id = %delivery.id,
                    error = %e,
                    "Could not resume delivery"
                ),
            }
        }

        info!(found = pending.len(), resumed, "Recovered pending deliveries");
        Ok(resumed)
    }

    pub fn retry_strategy(&self) -> &RetryStrategy {
        self.service.retry_strategy()
    }
}

fn validate_url(url: &str) -> Result<(), WebhookError> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| WebhookError::InvalidUrl(format!("Invalid URL format: {e}")))?;

    match parsed.scheme() {
        "https" | "http" => {}
        scheme => {
            return Err(WebhookError::InvalidUrl(format!(
                "Unsupported URL scheme: {scheme}"
            )));
        }
    }

    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(WebhookError::InvalidUrl("URL must have a host".to_string()));
    }
    Ok(())
}

/// Wires a [`WebhookManager`] to its ports.
///
/// Anything not supplied falls back to the in-memory store, the reqwest
/// transport, the tokio timer and the system clock.
pub struct WebhookManagerBuilder {
    subscriptions: Option<Arc<dyn Store<Subscription>>>,
    deliveries: Option<Arc<dyn DeliveryStore>>,
    events: Option<Arc<dyn Store<Event>>>,
    transport: Option<Arc<dyn WebhookTransport>>,
    timer: Option<Arc<dyn Timer>>,
    clock: Option<Arc<dyn Clock>>,
    retry_strategy: RetryStrategy,
    request_timeout: Duration,
    concurrency_limit: usize,
    user_agent: String,
}

impl Default for WebhookManagerBuilder {
    fn default() -> Self {
        Self {
            subscriptions: None,
            deliveries: None,
            events: None,
            transport: None,
            timer: None,
            clock: None,
            retry_strategy: RetryStrategy::default(),
            request_timeout: DEFAULT_TIMEOUT,
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            user_agent: concat!("webhook-relay/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl WebhookManagerBuilder {
    /// Apply the `webhook` configuration section
    pub fn with_config(mut self, config: &WebhookConfig) -> Self {
        self.retry_strategy = config.retry_strategy();
        self.request_timeout = config.request_timeout();
        self.concurrency_limit = config.concurrency_limit;
        self.user_agent = config.user_agent.clone();
        self
    }

    pub fn subscription_store(mut self, store: Arc<dyn Store<Subscription>>) -> Self {
        self.subscriptions = Some(store);
        self
    }

    pub fn delivery_store(mut self, store: Arc<dyn DeliveryStore>) -> Self {
        self.deliveries = Some(store);
        self
    }

    pub fn event_store(mut self, store: Arc<dyn Store<Event>>) -> Self {
        self.events = Some(store);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn WebhookTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn timer(mut self, timer: Arc<dyn Timer>) -> Self {
        self.timer = Some(timer);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn retry_strategy(mut self, strategy: RetryStrategy) -> Self {
        self.retry_strategy = strategy;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    pub fn build(self) -> Result<WebhookManager, WebhookError> {
        let transport: Arc<dyn WebhookTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(
                WebhookHttpClient::build(self.request_timeout, self.user_agent)
                    .map_err(|e| WebhookError::Internal(e.to_string()))?,
            ),
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let timer = self.timer.unwrap_or_else(|| Arc::new(TokioTimer::new()));
        let events = self
            .events
            .unwrap_or_else(|| Arc::new(InMemoryStore::<Event>::new()));
        let deliveries = self
            .deliveries
            .unwrap_or_else(|| Arc::new(InMemoryStore::<Delivery>::new()));
        let subscriptions = self
            .subscriptions
            .unwrap_or_else(|| Arc::new(InMemoryStore::<Subscription>::new()));

        let registry = Arc::new(SubscriptionRegistry::new(subscriptions));
        let ledger = Arc::new(DeliveryLedger::new(deliveries, clock));
        let scheduler = Arc::new(RetryScheduler::new(timer));
        let service = Arc::new(
            DeliveryService::new(
                ledger.clone(),
                registry.clone(),
                events.clone(),
                transport,
                scheduler.clone(),
            )
            .with_retry_strategy(self.retry_strategy)
            .with_request_timeout(self.request_timeout)
            .with_concurrency_limit(self.concurrency_limit),
        );
        let dispatcher = EventDispatcher::new(registry.clone(), events, service.clone());

        Ok(WebhookManager {
            registry,
            ledger,
            scheduler,
            service,
            dispatcher,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> WebhookManager {
        WebhookManager::builder()
            .build()
            .expect("manager builds with defaults")
    }

    fn request(url: &str) -> NewSubscription {
        NewSubscription {
            owner_id: "org_1".to_string(),
            url: url.to_string(),
            event_types: vec!["compliance.requirement.updated".to_string()],
            secret: "whsec_test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_register_and_list() -> Result<(), WebhookError> {
        let manager = manager();

        let subscription = manager
            .register_subscription(request("https://example.com/hook"))
            .await?;

        assert!(subscription.id.starts_with("sub_"));
        assert!(subscription.active);
        assert_eq!(manager.list_subscriptions("org_1").await, vec![subscription]);
        assert!(manager.list_subscriptions("org_2").await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_register_rejects_bad_input() {
        let manager = manager();

        let result = manager.register_subscription(request("ftp://example.com")).await;
        assert!(matches!(result, Err(WebhookError::InvalidUrl(_))));

        let result = manager.register_subscription(request("not a url")).await;
        assert!(matches!(result, Err(WebhookError::InvalidUrl(_))));

        let mut blank_secret = request("https://example.com/hook");
        blank_secret.secret = "  ".to_string();
        let result = manager.register_subscription(blank_secret).await;
        assert!(matches!(result, Err(WebhookError::Validation(_))));

        let mut no_types = request("https://example.com/hook");
        no_types.event_types.clear();
        let result = manager.register_subscription(no_types).await;
        assert!(matches!(result, Err(WebhookError::Validation(_))));

        let mut bad_type = request("https://example.com/hook");
        bad_type.event_types = vec!["Not An Event".to_string()];
        let result = manager.register_subscription(bad_type).await;
        assert!(matches!(result, Err(WebhookError::Validation(_))));

        let mut no_owner = request("https://example.com/hook");
        no_owner.owner_id = String::new();
        let result = manager.register_subscription(no_owner).await;
        assert!(matches!(result, Err(WebhookError::Validation(_))));
    }

    #[tokio::test]
    async fn test_unknown_ids_are_not_found() {
        let manager = manager();

        assert!(matches!(
            manager.unregister_subscription("sub_missing").await,
            Err(WebhookError::SubscriptionNotFound(_))
        ));
        assert!(matches!(
            manager.set_subscription_active("sub_missing", false).await,
            Err(WebhookError::SubscriptionNotFound(_))
        ));
        assert!(matches!(
            manager.get_delivery_status("dlv_missing").await,
            Err(WebhookError::DeliveryNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_toggle_active() -> Result<(), WebhookError> {
        let manager = manager();
        let subscription = manager
            .register_subscription(request("https://example.com/hook"))
            .await?;

        let paused = manager
            .set_subscription_active(&subscription.id, false)
            .await?;
        assert!(!paused.active);
        assert!(!manager.get_subscription(&subscription.id).await?.active);
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_stats() -> Result<(), WebhookError> {
        let stats = manager().get_delivery_stats().await?;
        assert_eq!(stats, DeliveryStats::default());
        assert_eq!(stats.success_rate, 0.0);
        Ok(())
    }
}
