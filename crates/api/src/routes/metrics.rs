//! Prometheus metrics endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use stock_store::StockStore;

use crate::AppState;

/// State of the metrics router: the recorder handle plus the sources of point-in-time gauges.
pub struct MetricsState<S: StockStore> {
    pub handle: PrometheusHandle,
    pub app: Arc<AppState<S>>,
}

impl<S: StockStore> Clone for MetricsState<S> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            app: self.app.clone(),
        }
    }
}

/// GET /metrics: Returns Prometheus-formatted metrics.
///
/// Gauges derived from current state are refreshed before rendering.
pub async fn get<S: StockStore + 'static>(
    State(state): State<MetricsState<S>>,
) -> impl IntoResponse {
    match state.app.engine.statistics().await {
        Ok(stats) => metrics::gauge!("reservations_active").set(stats.active as f64),
        Err(e) => tracing::warn!(error = %e, "Could not read reservation statistics"),
    }
    metrics::gauge!("broker_events_in_flight").set(state.app.broker.in_flight() as f64);

    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.handle.render(),
    )
}
