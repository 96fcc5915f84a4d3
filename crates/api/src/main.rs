//! API server entry point.

use std::sync::Arc;

use api::config::{Config, LogFormat};
use axum::Router;
use inventory::{EventPublisher, LoggingEventPublisher};
use stock_store::{InMemoryStockStore, PostgresStockStore, StockStore};
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
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

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Builds the router and starts the background tasks over one store.
fn start<S: StockStore + 'static>(
    store: S,
    config: &Config,
    metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
    shutdown: watch::Receiver<bool>,
) -> (Router, Vec<tokio::task::JoinHandle<()>>) {
    let publisher: Arc<dyn EventPublisher> = Arc::new(LoggingEventPublisher);
    let (state, receivers) = api::create_default_state(store, publisher, config);
    let tasks = api::spawn_background(&state, receivers, config, shutdown);
    (api::create_app(state, metrics_handle), tasks)
}

#[tokio::main]
async fn main() {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env();
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Pick the store and start the engine
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (app, tasks) = match &config.database_url {
        Some(url) => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(20)
                .connect(url)
                .await
                .expect("failed to connect to PostgreSQL");
            let store = PostgresStockStore::new(pool).with_lock_timeout(config.lock_timeout());
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            tracing::info!("using PostgreSQL stock store");
            start(store, &config, metrics_handle, shutdown_rx)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory stock store");
            let store = InMemoryStockStore::new().with_lock_timeout(config.lock_timeout());
            start(store, &config, metrics_handle, shutdown_rx)
        }
    };

    // 4. Start server
    let addr = config.addr();
    tracing::info!(%addr, partitions = config.consumer_partitions, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // 5. Stop the sweeper and consumers
    let _ = shutdown_tx.send(true);
    for task in tasks {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "background task failed");
        }
    }

    tracing::info!("server shut down gracefully");
}
