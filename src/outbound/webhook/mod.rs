// Webhook delivery module
//
// Building blocks:
//   hmac_signer, http_client, retry_strategy, schemas, subscription
//
// Delivery pipeline:
//   dispatcher       – fans an event out into one delivery per subscription
//   delivery_service – signs and sends one attempt, hands failures to the scheduler
//   retry_scheduler  – armed backoff timers, cancelled on unregister
//   delivery_ledger  – owns delivery records and their state transitions
//   manager          – administrative facade over all of the above

pub mod delivery_ledger;
pub mod delivery_service;
pub mod dispatcher;
pub mod hmac_signer;
pub mod http_client;
pub mod manager;
pub mod retry_scheduler;
pub mod retry_strategy;
pub mod schemas;
pub mod subscription;

// Re-export commonly used types
pub use delivery_ledger::{DeliveryLedger, DeliveryStore, LedgerError};
pub use delivery_service::{AttemptOutcome, DeliveryService, DeliveryServiceError};
pub use dispatcher::{DispatchError, EventDispatcher};
pub use hmac_signer::{HmacSigner, SignerError, format_signature_header, parse_signature_header};
pub use http_client::{
    HttpClientError, WebhookHttpClient, WebhookRequest, WebhookResponse, WebhookTransport,
};
pub use manager::{NewSubscription, WebhookManager, WebhookManagerBuilder};
pub use retry_scheduler::RetryScheduler;
pub use retry_strategy::RetryStrategy;
pub use schemas::{Delivery, DeliveryState, DeliveryStats};
pub use subscription::{Subscription, SubscriptionRegistry};
