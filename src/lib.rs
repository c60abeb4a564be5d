pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod outbound;
pub mod server;
pub mod telemetry;
