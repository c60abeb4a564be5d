use async_trait::async_trait;
use reqwest::Client;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// Default per-attempt timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Error type for HTTP client operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HttpClientError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Network error: {0}")]
    NetworkError(String),
}

impl HttpClientError {
    fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            HttpClientError::Timeout(timeout)
        } else if err.is_connect() {
            HttpClientError::NetworkError(err.to_string())
        } else if err.is_builder() {
            HttpClientError::InvalidUrl(err.to_string())
        } else {
            HttpClientError::RequestFailed(err.to_string())
        }
    }
}

/// A fully built, signed webhook POST
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookRequest {
    pub url: String,

    pub headers: Vec<(&'static str, String)>,

    pub body: Vec<u8>,
}

impl WebhookRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Whatever status the endpoint answered with, success or not
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WebhookResponse {
    pub status: u16,

    pub response_time_ms: u64,
}

impl WebhookResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Outbound HTTP capability used by the delivery service.
///
/// Implementations return `Ok` for every HTTP response, including non-2xx;
/// `Err` is reserved for requests that produced no response at all.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    async fn post(&self, request: &WebhookRequest) -> Result<WebhookResponse, HttpClientError>;
}

/// reqwest-backed [`WebhookTransport`]
#[derive(Debug, Clone)]
pub struct WebhookHttpClient {
    client: Client,
    timeout: Duration,
}

impl WebhookHttpClient {
    /// Create a new HTTP client with default timeout (30 seconds)
    pub fn new() -> Result<Self, HttpClientError> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    /// Create a new HTTP client with custom timeout
    pub fn with_timeout(timeout: Duration) -> Result<Self, HttpClientError> {
        Self::build(
            timeout,
            format!("webhook-relay/{}", env!("CARGO_PKG_VERSION")),
        )
    }

    pub fn build(timeout: Duration, user_agent: String) -> Result<Self, HttpClientError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| HttpClientError::RequestFailed(e.to_string()))?;

        Ok(Self { client, timeout })
    }

    /// Get configured timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl WebhookTransport for WebhookHttpClient {
    async fn post(&self, request: &WebhookRequest) -> Result<WebhookResponse, HttpClientError> {
        debug!(url = %request.url, "Sending webhook");

        let start = Instant::now();

        let mut builder = self
            .client
            .post(&request.url)
            .header("Content-Type", "application/json");
        for (name, value) in &request.headers {
            builder = builder.header(*name, value.as_str());
        }

        let response = builder
            .body(request.body.clone())
            .send()
            .await
            .map_err(|e| {
                warn!(url = %request.url, error = %e, "Webhook request failed");
                HttpClientError::from_reqwest(e, self.timeout)
            })?;

        let response_time_ms = start.elapsed().as_millis() as u64;
        let status = response.status().as_u16();

        debug!(
            url = %request.url,
            status = %status,
            response_time_ms = %response_time_ms,
            "Webhook response received"
        );

        Ok(WebhookResponse {
            status,
            response_time_ms,
        })
    }
}
