use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::events::Event;
use crate::domain::ports::{Store, StoreError};
use crate::outbound::webhook::delivery_ledger::{DeliveryLedger, LedgerError};
use crate::outbound::webhook::hmac_signer::{HmacSigner, SignerError, format_signature_header};
use crate::outbound::webhook::http_client::{
    DEFAULT_TIMEOUT, HttpClientError, WebhookRequest, WebhookTransport,
};
use crate::outbound::webhook::retry_scheduler::RetryScheduler;
use crate::outbound::webhook::retry_strategy::RetryStrategy;
use crate::outbound::webhook::schemas::{
    Delivery, DeliveryState, HEADER_DELIVERY_ID, HEADER_EVENT_ID, HEADER_EVENT_TYPE,
    HEADER_SIGNATURE, HEADER_TIMESTAMP,
};
use crate::outbound::webhook::subscription::{Subscription, SubscriptionRegistry};

/// Default number of webhook requests allowed in flight at once
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 64;

/// Result of one HTTP attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success { http_status: u16 },

    Failure {
        http_status: Option<u16>,
        error: String,
    },
}

/// Sends deliveries and reacts to their outcome.
///
/// One call to [`DeliveryService::attempt`] is one HTTP POST:
/// 1. Wait for a send permit, then check the subscription is still registered.
/// 2. Count the attempt in the ledger (refused for finished deliveries).
/// 3. Serialize and sign the event with the subscription secret.
/// 4. POST it through the [`WebhookTransport`] within the request timeout.
/// 5. Mark the delivery delivered, or hand it to the [`RetryScheduler`]
///    with the next backoff delay, or give up once the budget is spent.
///
/// A [`Semaphore`] bounds how many requests are in flight at once. Once every
/// delivery of an event is finished the stored event is dropped.
pub struct DeliveryService {
    ledger: Arc<DeliveryLedger>,

    registry: Arc<SubscriptionRegistry>,

    /// Events kept for as long as one of their deliveries may be retried
    events: Arc<dyn Store<Event>>,

    transport: Arc<dyn WebhookTransport>,

    scheduler: Arc<RetryScheduler>,

    retry_strategy: RetryStrategy,

    request_timeout: Duration,

    permits: Arc<Semaphore>,
}

impl DeliveryService {
    /// Create a `DeliveryService` with the default retry strategy, timeout
    /// and concurrency limit.
    pub fn new(
        ledger: Arc<DeliveryLedger>,
        registry: Arc<SubscriptionRegistry>,
        events: Arc<dyn Store<Event>>,
        transport: Arc<dyn WebhookTransport>,
        scheduler: Arc<RetryScheduler>,
    ) -> Self {
        Self {
            ledger,
            registry,
            events,
            transport,
            scheduler,
            retry_strategy: RetryStrategy::default(),
            request_timeout: DEFAULT_TIMEOUT,
            permits: Arc::new(Semaphore::new(DEFAULT_CONCURRENCY_LIMIT)),
        }
    }

    /// Override the retry strategy.
    pub fn with_retry_strategy(mut self, strategy: RetryStrategy) -> Self {
        self.retry_strategy = strategy;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.permits = Arc::new(Semaphore::new(limit.max(1)));
        self
    }

    pub fn retry_strategy(&self) -> &RetryStrategy {
        &self.retry_strategy
    }

    pub fn ledger(&self) -> &Arc<DeliveryLedger> {
        &self.ledger
    }

    pub fn scheduler(&self) -> &Arc<RetryScheduler> {
        &self.scheduler
    }

    /// Run one attempt in the background.
    pub fn spawn_attempt(self: &Arc<Self>, delivery_id: String, event: Event) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = service.attempt(&delivery_id, &event).await {
                debug!(delivery_id = %delivery_id, error = %e, "Delivery attempt skipped");
            }
        })
    }

    /// Make one delivery attempt and record its outcome.
    ///
    /// Returns an error without sending anything when the delivery is
    /// finished, its budget is spent, or its subscription is gone. The
    /// subscription is looked up after the permit is granted, so an
    /// unregister that lands while the attempt is queued still stops it.
    pub async fn attempt(
        self: &Arc<Self>,
        delivery_id: &str,
        event: &Event,
    ) -> Result<AttemptOutcome, DeliveryServiceError> {
        let current = self
            .ledger
            .get(delivery_id)
            .await?
            .ok_or_else(|| DeliveryServiceError::DeliveryNotFound(delivery_id.to_string()))?;
        if current.is_terminal() {
            return Err(DeliveryServiceError::AlreadyTerminal(current.id));
        }

        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| DeliveryServiceError::Shutdown)?;

        let Some(subscription) = self.registry.get(&current.subscription_id).await else {
            warn!(
                delivery_id = %delivery_id,
                subscription_id = %current.subscription_id,
                "Subscription not found - skipping delivery"
            );
            return Err(DeliveryServiceError::SubscriptionRemoved(
                current.subscription_id,
            ));
        };

        let delivery = self
            .ledger
            .begin_attempt(delivery_id, self.retry_strategy.max_attempts())
            .await?;

        debug!(
            delivery_id = %delivery.id,
            subscription_id = %delivery.subscription_id,
            event_id = %delivery.event_id,
            attempt = delivery.attempt_count,
            "Processing delivery"
        );

        let outcome = self.send(&delivery, &subscription, event).await;
        drop(permit);

        match &outcome {
            AttemptOutcome::Success { http_status } => {
                self.ledger.mark_delivered(&delivery.id, *http_status).await?;
                info!(
                    delivery_id = %delivery.id,
                    subscription_id = %delivery.subscription_id,
                    event_id = %delivery.event_id,
                    attempt = delivery.attempt_count,
                    http_status = *http_status,
                    "Webhook delivered successfully"
                );
                self.release_event(&delivery.event_id).await;
            }
            AttemptOutcome::Failure { http_status, error } => {
                self.handle_failure(&delivery, *http_status, error.clone())
                    .await?;
            }
        }

        Ok(outcome)
    }

    /// Resume a delivery found unfinished after a restart.
    ///
    /// Pending deliveries are attempted right away; retrying ones are armed
    /// for whatever remains of their backoff.
    pub async fn resume(self: &Arc<Self>, delivery: &Delivery) -> Result<(), DeliveryServiceError> {
        match delivery.status {
            DeliveryState::Pending => {
                let event = self.load_event(&delivery.event_id).await?;
                self.spawn_attempt(delivery.id.clone(), event);
            }
            DeliveryState::Retrying => {
                let delay = delivery
                    .next_retry_at
                    .map(|at| at - self.ledger.now())
                    .and_then(|remaining| Duration::try_from(remaining).ok())
                    .unwrap_or(Duration::ZERO);
                self.arm_retry(delivery, delay).await;
            }
            DeliveryState::Delivered | DeliveryState::PermanentFailure => {}
        }
        Ok(())
    }

    async fn handle_failure(
        self: &Arc<Self>,
        delivery: &Delivery,
        http_status: Option<u16>,
        error: String,
    ) -> Result<(), DeliveryServiceError> {
        if !self.retry_strategy.should_retry(delivery.attempt_count) {
            error!(
                delivery_id = %delivery.id,
                subscription_id = %delivery.subscription_id,
                event_id = %delivery.event_id,
                attempt = delivery.attempt_count,
                error = %error,
                "Webhook delivery permanently failed"
            );
            self.ledger
                .mark_permanent_failure(
                    &delivery.id,
                    http_status,
                    format!("Failed after {} attempt(s): {error}", delivery.attempt_count),
                    self.retry_strategy.max_attempts(),
                )
                .await?;
            self.release_event(&delivery.event_id).await;
            return Ok(());
        }

        // Unregistered while the request was in flight: record, don't re-arm
        if !self.registry.contains(&delivery.subscription_id).await {
            self.ledger
                .mark_retrying(&delivery.id, http_status, error, None)
                .await?;
            return Ok(());
        }

        let delay = self.retry_strategy.next_delay(delivery.attempt_count);
        let next_retry_at = self.ledger.now() + delay;

        warn!(
            delivery_id = %delivery.id,
            subscription_id = %delivery.subscription_id,
            event_id = %delivery.event_id,
            attempt = delivery.attempt_count,
            retry_in_ms = delay.as_millis() as u64,
            error = %error,
            "Webhook delivery failed, will retry"
        );

        let delivery = self
            .ledger
            .mark_retrying(&delivery.id, http_status, error, Some(next_retry_at))
            .await?;
        self.arm_retry(&delivery, delay).await;
        Ok(())
    }

    async fn arm_retry(self: &Arc<Self>, delivery: &Delivery, delay: Duration) {
        let task = Arc::clone(self).run_retry(delivery.id.clone(), delivery.event_id.clone());
        self.scheduler
            .arm(&delivery.id, &delivery.subscription_id, delay, task)
            .await;
    }

    fn run_retry(self: Arc<Self>, delivery_id: String, event_id: String) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let event = match self.load_event(&event_id).await {
                Ok(event) => event,
                Err(e) => {
                    error!(delivery_id = %delivery_id, error = %e, "Cannot retry delivery");
                    return;
                }
            };

            if let Err(e) = self.attempt(&delivery_id, &event).await {
                debug!(delivery_id = %delivery_id, error = %e, "Retry skipped");
            }
        })
    }

    /// Drop the stored event once none of its deliveries can be retried
    async fn release_event(&self, event_id: &str) {
        match self.ledger.outstanding_for_event(event_id).await {
            Ok(0) => match self.events.delete(event_id).await {
                Ok(_) => debug!(event_id = %event_id, "Event released"),
                Err(e) => warn!(event_id = %event_id, error = %e, "Failed to release event"),
            },
            Ok(_) => {}
            Err(e) => warn!(event_id = %event_id, error = %e, "Failed to count open deliveries"),
        }
    }

    async fn load_event(&self, event_id: &str) -> Result<Event, DeliveryServiceError> {
        self.events
            .get(event_id)
            .await?
            .ok_or_else(|| DeliveryServiceError::EventMissing(event_id.to_string()))
    }

    async fn send(
        &self,
        delivery: &Delivery,
        subscription: &Subscription,
        event: &Event,
    ) -> AttemptOutcome {
        let request = match build_request(delivery, subscription, event) {
            Ok(request) => request,
            Err(e) => {
                return AttemptOutcome::Failure {
                    http_status: None,
                    error: e.to_string(),
                };
            }
        };

        match tokio::time::timeout(self.request_timeout, self.transport.post(&request)).await {
            Ok(Ok(response)) if response.is_success() => AttemptOutcome::Success {
                http_status: response.status,
            },
            Ok(Ok(response)) => AttemptOutcome::Failure {
                http_status: Some(response.status),
                error: format!("Endpoint responded with HTTP {}", response.status),
            },
            Ok(Err(e)) => AttemptOutcome::Failure {
                http_status: None,
                error: e.to_string(),
            },
            Err(_) => AttemptOutcome::Failure {
                http_status: None,
                error: HttpClientError::Timeout(self.request_timeout).to_string(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
enum BuildRequestError {
    #[error("Signing failed: {0}")]
    Signing(#[from] SignerError),

    #[error("Event serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Event timestamp formatting failed: {0}")]
    Timestamp(#[from] time::error::Format),
}

/// Serialize and sign `event` for `subscription`; the signature covers the
/// exact body bytes.
fn build_request(
    delivery: &Delivery,
    subscription: &Subscription,
    event: &Event,
) -> Result<WebhookRequest, BuildRequestError> {
    let signer = HmacSigner::new(subscription.secret.as_str())?;
    let body = event.to_json_bytes()?;
    let signature = format_signature_header(&signer.sign(&body));

    Ok(WebhookRequest {
        url: subscription.url.clone(),
        headers: vec![
            (HEADER_EVENT_ID, event.id.clone()),
            (HEADER_EVENT_TYPE, event.event_type.to_string()),
            (HEADER_SIGNATURE, signature),
            (HEADER_TIMESTAMP, event.timestamp.format(&Rfc3339)?),
            (HEADER_DELIVERY_ID, delivery.id.clone()),
        ],
        body,
    })
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum DeliveryServiceError {
    #[error("Delivery not found: {0}")]
    DeliveryNotFound(String),

    #[error("Delivery {0} is already finished")]
    AlreadyTerminal(String),

    #[error("Subscription {0} is no longer registered")]
    SubscriptionRemoved(String),

    #[error("Event {0} is no longer available")]
    EventMissing(String),

    #[error("Delivery service is shutting down")]
    Shutdown,

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
