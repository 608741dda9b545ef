//! API server entry point.

use metrics_exporter_prometheus::PrometheusHandle;
use services::build_message_bus;
use store::{InMemoryStore, PostgresUnitOfWorkFactory, UnitOfWorkFactory};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use api::config::Config;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

async fn serve<F: UnitOfWorkFactory + 'static>(
    config: &Config,
    uow_factory: F,
    metrics_handle: PrometheusHandle,
) -> Result<(), BoxError> {
    let state = api::create_state(uow_factory, config);
    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server shut down gracefully");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let config = Config::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    // 3. Pick the storage backend and serve
    match config.postgres() {
        Some(postgres) => {
            let pool = postgres.connect().await?;
            let uow_factory = PostgresUnitOfWorkFactory::with_message_bus(pool, build_message_bus());
            uow_factory.run_migrations().await?;
            tracing::info!(max_connections = postgres.max_connections, "using PostgreSQL backend");
            serve(&config, uow_factory, metrics_handle).await
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory backend");
            serve(&config, InMemoryStore::with_message_bus(build_message_bus()), metrics_handle).await
        }
    }
}
