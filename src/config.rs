use std::collections::HashMap;
use std::time::Duration;

use config::{Config as ConfigLib, ConfigBuilder, ConfigError, Environment, builder::DefaultState};
use serde::{Deserialize, Serialize};

use crate::outbound::webhook::retry_strategy::RetryStrategy;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub webhook: WebhookConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Delivery tuning knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Attempts per delivery, the first one included
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ratio: f64,
    pub request_timeout_secs: u64,
    /// Outbound requests allowed in flight at once
    pub concurrency_limit: usize,
    pub user_agent: String,
}

impl WebhookConfig {
    pub fn retry_strategy(&self) -> RetryStrategy {
        RetryStrategy::new(
            self.max_retries,
            Duration::from_millis(self.initial_delay_ms),
        )
        .with_max_delay(Duration::from_millis(self.max_delay_ms))
        .with_jitter(self.jitter_ratio)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_sources(None)
    }

    fn load_with_sources(env_vars: Option<HashMap<String, String>>) -> Result<Self, ConfigError> {
        let mut builder = Self::set_defaults()?;
        // If env_vars is provided, we use it instead of system environment
        // This is to avoid systems variables pollution across tests
        if let Some(vars) = env_vars {
            for (key, value) in vars {
                builder = builder.set_override(&key, value)?;
            }
        } else {
            // Use system environment variables
            // Should be in the format APP_SERVER__PORT or APP_WEBHOOK__MAX_RETRIES
            builder = builder.add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );
        }

        builder.build()?.try_deserialize()
    }

    /// Set default values for the configuration.
    /// This is used when no environment variables or config file are provided
    fn set_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        ConfigLib::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3000)?
            .set_default("webhook.max_retries", 5)?
            .set_default("webhook.initial_delay_ms", 1000)?
            .set_default("webhook.max_delay_ms", 3_600_000)?
            .set_default("webhook.jitter_ratio", 0.1)?
            .set_default("webhook.request_timeout_secs", 30)?
            .set_default("webhook.concurrency_limit", 64)?
            .set_default(
                "webhook.user_agent",
                concat!("webhook-relay/", env!("CARGO_PKG_VERSION")),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::load_with_sources(Some(HashMap::new())).expect("Failed to load config");

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.webhook.max_retries, 5);
        assert_eq!(config.webhook.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.webhook.concurrency_limit, 64);
        assert!(config.webhook.user_agent.starts_with("webhook-relay/"));
    }

    #[test]
    fn test_env_config() {
        let mut env_vars = HashMap::new();
        env_vars.insert("server.host".to_string(), "0.0.0.0".to_string());
        env_vars.insert("server.port".to_string(), "443".to_string());
        env_vars.insert("webhook.max_retries".to_string(), "8".to_string());
        env_vars.insert("webhook.jitter_ratio".to_string(), "0".to_string());

        let config = Config::load_with_sources(Some(env_vars)).expect("Failed to load config");

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 443);
        assert_eq!(config.webhook.max_retries, 8);
        assert_eq!(config.webhook.jitter_ratio, 0.0);
    }

    #[test]
    fn test_partial_env_override() {
        let mut env_vars = HashMap::new();
        // We just override the host
        env_vars.insert("server.host".to_string(), "192.168.1.1".to_string());

        let config = Config::load_with_sources(Some(env_vars)).expect("Failed to load config");

        assert_eq!(config.server.host, "192.168.1.1");
        // The other values should use default
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.webhook.initial_delay_ms, 1000);
    }

    #[test]
    fn test_retry_strategy_from_config() {
        let config = Config::load_with_sources(Some(HashMap::new())).expect("Failed to load config");
        let strategy = config.webhook.retry_strategy();

        assert_eq!(strategy, RetryStrategy::default());
        assert_eq!(
            strategy.base_delays(),
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
            ]
        );
    }
}
