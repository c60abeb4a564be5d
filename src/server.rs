mod handlers;
mod responses;

use std::sync::Arc;

use tokio::net::TcpListener;

use crate::config::Config;
use crate::outbound::webhook::manager::WebhookManager;
use crate::server::handlers::{
    deliveries::{get_delivery, get_delivery_stats},
    events::queue_event,
    health::health_check,
    root::home,
    subscriptions::{
        create_subscription, delete_subscription, get_subscription,
        list_subscription_deliveries, list_subscriptions, set_subscription_active,
    },
};
use axum::http::Method;
use axum::{
    Router,
    routing::{get, post, put},
};
use color_eyre::eyre::{Context, Result};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

#[derive(Clone)]
/// The global application state shared between all request handlers.
pub struct AppState {
    pub manager: Arc<WebhookManager>,
}

pub struct Server {
    router: Router,
    listener: TcpListener,
    port: u16,
    manager: Arc<WebhookManager>,
}

impl Server {
    /// Creates a new admin server with a manager built from `config`.
    pub async fn new(config: &Config) -> Result<Self> {
        let manager = WebhookManager::builder()
            .with_config(&config.webhook)
            .build()
            .wrap_err("Failed to build webhook manager")?;

        Self::with_manager(config, Arc::new(manager)).await
    }

    /// Creates a new admin server around an already wired manager.
    pub async fn with_manager(config: &Config, manager: Arc<WebhookManager>) -> Result<Self> {
        let trace_layer =
            TraceLayer::new_for_http().make_span_with(|request: &'_ axum::extract::Request<_>| {
                let uri = request.uri().to_string();
                tracing::info_span!("request", method = %request.method(), uri)
            });

        let cors_layer = CorsLayer::new()
            .allow_origin(Any)
            .allow_headers(Any)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ]);

        let state = AppState {
            manager: manager.clone(),
        };

        let router = Router::new()
            .route("/", get(home))
            .route("/health", get(health_check))
            .route(
                "/subscriptions",
                post(create_subscription).get(list_subscriptions),
            )
            .route(
                "/subscriptions/{id}",
                get(get_subscription).delete(delete_subscription),
            )
            .route("/subscriptions/{id}/active", put(set_subscription_active))
            .route(
                "/subscriptions/{id}/deliveries",
                get(list_subscription_deliveries),
            )
            .route("/events", post(queue_event))
            .route("/deliveries/stats", get(get_delivery_stats))
            .route("/deliveries/{id}", get(get_delivery))
            .layer(cors_layer)
            .layer(trace_layer)
            .with_state(state);

        let listener = TcpListener::bind(format!("{}:{}", config.server.host, config.server.port))
            .await
            .wrap_err_with(|| format!("Failed to bind to port {}", config.server.port))?;
        let port = listener
            .local_addr()
            .wrap_err("Failed to read bound address")?
            .port();

        Ok(Self {
            router,
            listener,
            port,
            manager,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn manager(&self) -> &Arc<WebhookManager> {
        &self.manager
    }

    /// Runs the admin server.
    pub async fn run(self) -> Result<()> {
        tracing::info!("Server listening on {}", self.listener.local_addr()?);
        axum::serve(self.listener, self.router).await?;
        Ok(())
    }
}
