#![allow(dead_code)]

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use webhook_relay::domain::ports::{Timer, TimerHandle};
use webhook_relay::outbound::webhook::{
    HttpClientError, RetryStrategy, WebhookManager, WebhookManagerBuilder, WebhookRequest,
    WebhookResponse, WebhookTransport,
};
use webhook_relay::{config::Config, server::Server};

pub async fn spawn_server() -> String {
    spawn_server_with(Arc::new(manager_builder(ScriptedTransport::always(200)).build().unwrap()))
        .await
}

pub async fn spawn_server_with(manager: Arc<WebhookManager>) -> String {
    let config = {
        let mut config = Config::load().unwrap();
        config.server.host = "localhost".to_string();
        config.server.port = 0;
        config
    };

    let server = Server::with_manager(&config, manager).await.unwrap();

    let port = server.port();
    tokio::spawn(server.run());

    format!("http://{}:{}", config.server.host, port)
}

/// Builder wired to `transport` with jitter disabled
pub fn manager_builder(transport: Arc<ScriptedTransport>) -> WebhookManagerBuilder {
    WebhookManager::builder()
        .transport(transport)
        .retry_strategy(RetryStrategy::default().with_jitter(0.0))
}

/// Answers each POST with the next scripted status, then with `fallback`.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<u16>>,
    fallback: u16,
    latency: Duration,
    requests: Mutex<Vec<WebhookRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new(script: impl IntoIterator<Item = u16>, fallback: u16) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback,
            latency: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    pub fn always(status: u16) -> Arc<Self> {
        Self::new([], status)
    }

    pub fn slow(status: u16, latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback: status,
            latency,
            requests: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<WebhookRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WebhookTransport for ScriptedTransport {
    async fn post(&self, request: &WebhookRequest) -> Result<WebhookResponse, HttpClientError> {
        self.requests.lock().unwrap().push(request.clone());
        let status = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback);

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        Ok(WebhookResponse {
            status,
            response_time_ms: self.latency.as_millis() as u64,
        })
    }
}

/// Timer whose tasks never fire
pub struct FrozenTimer;

impl Timer for FrozenTimer {
    fn schedule(&self, _delay: Duration, _task: BoxFuture<'static, ()>) -> TimerHandle {
        TimerHandle::new(|| {})
    }
}

/// Poll `check` on tokio time until it holds or `timeout` elapses
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check().await
}
