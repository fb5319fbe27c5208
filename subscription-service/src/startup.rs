//! Application startup and lifecycle management.

use crate::config::{StoreBackend, SubscriptionConfig};
use crate::handlers;
use crate::services::{
    init_metrics, InMemoryStore, PgStore, PlanCatalog, SubscriptionEngine, SubscriptionStore,
};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::{request_id_middleware, REQUEST_ID_HEADER};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub engine: SubscriptionEngine,
}

impl AppState {
    pub fn new(store: Arc<dyn SubscriptionStore>, catalog: PlanCatalog) -> Self {
        Self {
            engine: SubscriptionEngine::new(store, catalog),
        }
    }
}

/// All routes with their middleware stack.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics))
        .route("/plans", get(handlers::plans::list_plans))
        .route(
            "/users/:user_id/subscription",
            post(handlers::subscriptions::ensure_subscription)
                .get(handlers::subscriptions::get_subscription),
        )
        .route(
            "/users/:user_id/subscription/history",
            get(handlers::subscriptions::get_history),
        )
        .route(
            "/users/:user_id/subscription/quote",
            post(handlers::subscriptions::quote),
        )
        .route(
            "/users/:user_id/subscription/confirm",
            post(handlers::subscriptions::confirm_payment),
        )
        .route(
            "/users/:user_id/subscription/cancel",
            post(handlers::subscriptions::cancel),
        )
        .route(
            "/users/:user_id/usage/:feature",
            post(handlers::usage::check_usage).get(handlers::usage::get_usage),
        )
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                )
            }),
        )
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: SubscriptionConfig) -> Result<Self, AppError> {
        init_metrics();

        let store: Arc<dyn SubscriptionStore> = match (config.store_backend, &config.database) {
            (StoreBackend::Memory, _) => {
                tracing::warn!("Using in-memory store; state is lost on restart");
                Arc::new(InMemoryStore::new())
            }
            (StoreBackend::Postgres, Some(database)) => {
                let store = PgStore::new(
                    database.url.expose_secret(),
                    database.max_connections,
                    database.min_connections,
                )
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, "Failed to connect to PostgreSQL");
                    e
                })?;
                if database.run_migrations {
                    store.run_migrations().await.map_err(|e| {
                        tracing::error!(error = %e, "Failed to run migrations");
                        e
                    })?;
                }
                Arc::new(store)
            }
            (StoreBackend::Postgres, None) => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "postgres store selected without database settings"
                )));
            }
        };

        let catalog = PlanCatalog::standard();
        tracing::info!(
            catalog_version = %catalog.version(),
            currency = %catalog.currency(),
            "Plan catalog loaded"
        );
        let router = build_router(AppState::new(store, catalog));

        let addr = config.common.socket_addr();
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        Ok(Self {
            port,
            listener,
            router,
        })
    }

    /// Port actually bound (useful when configured as 0).
    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        tracing::info!(
            service = "subscription-service",
            version = env!("CARGO_PKG_VERSION"),
            port = self.port,
            "Service ready to accept connections"
        );
        axum::serve(self.listener, self.router).await.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}
