//! Low-stock alert endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use inventory::AlertCheckReport;
use serde::{Deserialize, Serialize};
use stock_store::{AlertStatistics, AlertStatus, LowStockAlert, ProductId, StockStore};
use uuid::Uuid;

use super::ApiResponse;
use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertParams {
    pub status: Option<String>,
    pub product_id: Option<i64>,
}

/// Result of an on-demand check of one product.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResponse {
    pub product_id: ProductId,
    pub raised: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert: Option<LowStockAlert>,
}

fn parse_alert_id(id: &str) -> Result<Uuid, ApiError> {
    id.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid alert id: {e}")))
}

/// GET /alerts?status=&productId=
#[tracing::instrument(skip(state))]
pub async fn list<S: StockStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Query(params): Query<AlertParams>,
) -> Result<Json<ApiResponse<Vec<LowStockAlert>>>, ApiError> {
    let status = params
        .status
        .as_deref()
        .map(str::parse::<AlertStatus>)
        .transpose()
        .map_err(ApiError::BadRequest)?;
    let alerts = state
        .alerts
        .list(status, params.product_id.map(ProductId::new))
        .await?;
    Ok(ApiResponse::ok(alerts))
}

/// GET /alerts/active: Alerts still waiting for acknowledgement.
#[tracing::instrument(skip(state))]
pub async fn active<S: StockStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<ApiResponse<Vec<LowStockAlert>>>, ApiError> {
    let alerts = state.alerts.list(Some(AlertStatus::Pending), None).await?;
    Ok(ApiResponse::ok(alerts))
}

/// GET /alerts/product/{product_id}
#[tracing::instrument(skip(state))]
pub async fn for_product<S: StockStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(product_id): Path<i64>,
) -> Result<Json<ApiResponse<Vec<LowStockAlert>>>, ApiError> {
    let alerts = state
        .alerts
        .list(None, Some(ProductId::new(product_id)))
        .await?;
    Ok(ApiResponse::ok(alerts))
}

/// GET /alerts/statistics
#[tracing::instrument(skip(state))]
pub async fn statistics<S: StockStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<ApiResponse<AlertStatistics>>, ApiError> {
    Ok(ApiResponse::ok(state.alerts.statistics().await?))
}

/// POST /alerts/{id}/acknowledge
#[tracing::instrument(skip(state))]
pub async fn acknowledge<S: StockStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<LowStockAlert>>, ApiError> {
    let alert = state.alerts.acknowledge(parse_alert_id(&id)?).await?;
    Ok(ApiResponse::with_message(alert, "Alert acknowledged"))
}

/// POST /alerts/{id}/resolve
#[tracing::instrument(skip(state))]
pub async fn resolve<S: StockStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<LowStockAlert>>, ApiError> {
    let alert = state.alerts.resolve(parse_alert_id(&id)?).await?;
    Ok(ApiResponse::with_message(alert, "Alert resolved"))
}

/// POST /alerts/check/{product_id}
#[tracing::instrument(skip(state))]
pub async fn check_product<S: StockStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(product_id): Path<i64>,
) -> Result<Json<ApiResponse<CheckResponse>>, ApiError> {
    let product_id = ProductId::new(product_id);
    let alert = state.alerts.check_product(product_id).await?;
    Ok(ApiResponse::ok(CheckResponse {
        product_id,
        raised: alert.is_some(),
        alert,
    }))
}

/// POST /alerts/check-all
#[tracing::instrument(skip(state))]
pub async fn check_all<S: StockStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<ApiResponse<AlertCheckReport>>, ApiError> {
    Ok(ApiResponse::ok(state.alerts.check_all().await?))
}
