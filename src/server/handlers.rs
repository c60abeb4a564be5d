pub mod deliveries;
pub mod events;
pub mod health;
pub mod root;
pub mod subscriptions;
