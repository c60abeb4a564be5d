use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::events::Event;
use crate::domain::ports::{Store, StoreError};
use crate::outbound::webhook::delivery_ledger::{DeliveryLedger, LedgerError};
use crate::outbound::webhook::delivery_service::DeliveryService;
use crate::outbound::webhook::schemas::Delivery;
use crate::outbound::webhook::subscription::SubscriptionRegistry;

/// Fans an event out to every matching subscription.
///
/// [`EventDispatcher::dispatch`] returns as soon as the delivery records
/// exist; the attempts themselves run in the background.
pub struct EventDispatcher {
    registry: Arc<SubscriptionRegistry>,

    ledger: Arc<DeliveryLedger>,

    events: Arc<dyn Store<Event>>,

    service: Arc<DeliveryService>,
}

impl EventDispatcher {
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        events: Arc<dyn Store<Event>>,
        service: Arc<DeliveryService>,
    ) -> Self {
        Self {
            registry,
            ledger: service.ledger().clone(),
            events,
            service,
        }
    }

    /// Create one pending delivery per matching subscription and start them.
    ///
    /// No match is not an error: the returned list is just empty. Queueing an
    /// event id again only creates deliveries for subscriptions it has not
    /// reached yet, and the first stored copy of the event is the one sent.
    ///
    /// If a delivery record cannot be written, the ones already written are
    /// still started before the error is returned.
    pub async fn dispatch(&self, event: Event) -> Result<Vec<Delivery>, DispatchError> {
        if event.id.trim().is_empty() {
            return Err(DispatchError::InvalidEvent("event id is empty".to_string()));
        }
        if event.owner_id.trim().is_empty() {
            return Err(DispatchError::InvalidEvent(
                "event owner is empty".to_string(),
            ));
        }

        let stored = self.events.get(&event.id).await?;
        let newly_stored = stored.is_none();
        let event = match stored {
            Some(stored) => {
                debug!(event_id = %stored.id, "Event already queued, keeping stored copy");
                stored
            }
            None => event,
        };

        let subscriptions = self
            .registry
            .matching(&event.owner_id, &event.event_type)
            .await;

        if subscriptions.is_empty() {
            debug!(
                event_id = %event.id,
                event_type = %event.event_type,
                owner_id = %event.owner_id,
                "No subscriptions match event"
            );
            return Ok(Vec::new());
        }

        // Retries reload the event from here
        if newly_stored {
            self.events.put(event.clone()).await?;
        }

        let mut deliveries = Vec::with_capacity(subscriptions.len());
        let mut failure = None;
        for subscription in &subscriptions {
            let delivery = match self.ledger.create(&event, subscription).await {
                Ok(delivery) => delivery,
                Err(LedgerError::AlreadyExists { id }) => {
                    debug!(
                        delivery_id = %id,
                        subscription_id = %subscription.id,
                        "Event already delivered to subscription"
                    );
                    continue;
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            };

            if let Err(e) = self
                .registry
                .touch(&subscription.id, delivery.created_at)
                .await
            {
                warn!(
                    subscription_id = %subscription.id,
                    error = %e,
                    "Failed to record last trigger time"
                );
            }
            deliveries.push(delivery);
        }

        for delivery in &deliveries {
            self.service
                .spawn_attempt(delivery.id.clone(), event.clone());
        }

        if deliveries.is_empty() && newly_stored {
            if let Err(e) = self.events.delete(&event.id).await {
                warn!(event_id = %event.id, error = %e, "Failed to drop unused event");
            }
        }

        if let Some(e) = failure {
            warn!(
                event_id = %event.id,
                started = deliveries.len(),
                error = %e,
                "Fan-out interrupted"
            );
            return Err(e.into());
        }

        info!(
            event_id = %event.id,
            event_type = %event.event_type,
            delivery_count = deliveries.len(),
            "Event queued for delivery"
        );

        Ok(deliveries)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
