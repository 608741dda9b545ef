//! HTTP API server with observability for the allocation service.
//!
//! Exposes the add-batch and allocate operations as REST endpoints, with
//! structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use store::UnitOfWorkFactory;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use routes::allocation::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<F: UnitOfWorkFactory + 'static>(
    state: Arc<AppState<F>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/add_batch", post(routes::allocation::add_batch::<F>))
        .route("/allocate", post(routes::allocation::allocate::<F>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state over a unit of work factory.
pub fn create_state<F: UnitOfWorkFactory>(uow_factory: F, config: &Config) -> Arc<AppState<F>> {
    Arc::new(AppState::new(uow_factory, config.max_retries))
}
