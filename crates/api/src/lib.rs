//! HTTP API server for the inventory reservation engine.
//!
//! Exposes the stock ledger, reservation lifecycle and event ingestion
//! over REST, with structured logging (tracing) and Prometheus metrics.
//! The expiry sweeper, the low-stock check and the event consumers run as
//! background tasks next to the server and stop on the same shutdown signal.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use inventory::{EventPublisher, ExpirySweeper, LowStockAlerts, ReservationEngine, StockLedger};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{
    DeadLetterQueue, EventBroker, EventProcessor, PartitionReceiver, SagaCoordinator,
    spawn_consumers,
};
use stock_store::StockStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use routes::metrics::MetricsState;

/// Capacity of each broker partition.
const PARTITION_CAPACITY: usize = 1024;

/// Shared application state accessible from all handlers.
pub struct AppState<S: StockStore> {
    pub ledger: Arc<StockLedger<S>>,
    pub engine: Arc<ReservationEngine<S>>,
    pub alerts: Arc<LowStockAlerts<S>>,
    pub broker: Arc<EventBroker>,
    pub processor: Arc<EventProcessor<S>>,
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: StockStore + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get::<S>))
        .with_state(MetricsState {
            handle: metrics_handle,
            app: state.clone(),
        });

    Router::new()
        .route("/health", get(routes::health::check))
        // Stock ledger
        .route("/inventory", post(routes::inventory::initialize::<S>))
        .route("/inventory/bulk", post(routes::inventory::bulk_get::<S>))
        .route(
            "/inventory/availability",
            post(routes::inventory::bulk_availability::<S>),
        )
        .route("/inventory/low-stock", get(routes::inventory::low_stock::<S>))
        .route(
            "/inventory/statistics",
            get(routes::inventory::statistics::<S>),
        )
        .route("/inventory/{product_id}", get(routes::inventory::get::<S>))
        .route(
            "/inventory/{product_id}/availability",
            get(routes::inventory::availability::<S>),
        )
        .route(
            "/inventory/{product_id}/adjust",
            post(routes::inventory::adjust::<S>),
        )
        .route(
            "/inventory/{product_id}/receive",
            post(routes::inventory::receive::<S>),
        )
        .route(
            "/inventory/{product_id}/thresholds",
            put(routes::inventory::thresholds::<S>),
        )
        .route(
            "/inventory/{product_id}/movements",
            get(routes::inventory::movements::<S>),
        )
        .route(
            "/inventory/{product_id}/reconcile",
            get(routes::inventory::reconcile::<S>),
        )
        // Reservations
        .route("/reservations", post(routes::reservations::create::<S>))
        .route(
            "/reservations/statistics",
            get(routes::reservations::statistics::<S>),
        )
        .route(
            "/reservations/active",
            get(routes::reservations::active::<S>),
        )
        .route("/reservations/{id}", get(routes::reservations::get::<S>))
        .route(
            "/reservations/{id}/extend",
            post(routes::reservations::extend::<S>),
        )
        .route(
            "/reservations/order/{order_id}",
            get(routes::reservations::for_order::<S>),
        )
        .route(
            "/reservations/order/{order_id}/commit",
            post(routes::reservations::commit::<S>),
        )
        .route(
            "/reservations/order/{order_id}/release",
            post(routes::reservations::release::<S>),
        )
        // Low-stock alerts
        .route("/alerts", get(routes::alerts::list::<S>))
        .route("/alerts/active", get(routes::alerts::active::<S>))
        .route("/alerts/statistics", get(routes::alerts::statistics::<S>))
        .route("/alerts/check-all", post(routes::alerts::check_all::<S>))
        .route(
            "/alerts/check/{product_id}",
            post(routes::alerts::check_product::<S>),
        )
        .route(
            "/alerts/product/{product_id}",
            get(routes::alerts::for_product::<S>),
        )
        .route(
            "/alerts/{id}/acknowledge",
            post(routes::alerts::acknowledge::<S>),
        )
        .route("/alerts/{id}/resolve", post(routes::alerts::resolve::<S>))
        // Events
        .route("/events", post(routes::events::ingest::<S>))
        .route("/dead-letters", get(routes::events::dead_letters::<S>))
        .route(
            "/dead-letters/{id}/replay",
            post(routes::events::replay::<S>),
        )
        .route(
            "/dead-letters/{id}/discard",
            post(routes::events::discard::<S>),
        )
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

/// Wires the ledger, engine, broker and event processor over one store.
///
/// Returns the partition receivers; hand them to [`spawn_background`].
pub fn create_default_state<S: StockStore + 'static>(
    store: S,
    publisher: Arc<dyn EventPublisher>,
    config: &Config,
) -> (Arc<AppState<S>>, Vec<PartitionReceiver>) {
    let store = Arc::new(store);
    let alerts = Arc::new(
        LowStockAlerts::new(store.clone(), publisher.clone()).with_config(config.alert_config()),
    );
    let ledger = Arc::new(
        StockLedger::new(store.clone(), publisher.clone()).with_alerts(alerts.clone()),
    );
    let engine = Arc::new(
        ReservationEngine::new(store, publisher)
            .with_policy(config.reservation_policy())
            .with_alerts(alerts.clone()),
    );

    let coordinator = Arc::new(SagaCoordinator::new(engine.clone(), ledger.clone()));
    let processor = Arc::new(EventProcessor::new(
        coordinator,
        config.retry_policy(),
        Arc::new(DeadLetterQueue::default()),
    ));
    let (broker, receivers) = EventBroker::new(config.consumer_partitions, PARTITION_CAPACITY);

    let state = Arc::new(AppState {
        ledger,
        engine,
        alerts,
        broker: Arc::new(broker),
        processor,
    });
    (state, receivers)
}

/// Starts the expiry sweeper, the low-stock check and one consumer per partition.
///
/// Every task stops once `shutdown` flips to true.
pub fn spawn_background<S: StockStore + 'static>(
    state: &AppState<S>,
    receivers: Vec<PartitionReceiver>,
    config: &Config,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let mut tasks = spawn_consumers(
        receivers,
        state.broker.clone(),
        state.processor.clone(),
        shutdown.clone(),
    );
    tasks.push(
        ExpirySweeper::new(state.engine.clone(), config.sweeper_config()).spawn(shutdown.clone()),
    );
    tasks.push(state.alerts.clone().spawn(shutdown));
    tasks
}
