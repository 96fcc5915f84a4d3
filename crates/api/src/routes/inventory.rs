//! Stock ledger endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use inventory::{
    Availability, AvailabilityRequest, InitializeStock, InventoryError, Reconciliation,
};
use serde::{Deserialize, Serialize};
use stock_store::{
    InventoryStatistics, MovementQuery, MovementRecord, MovementType, ProductId,
    StockLedgerEntry, StockStatus, StockStore,
};

use super::{ApiResponse, WithStatus};
use crate::AppState;
use crate::error::ApiError;

const DEFAULT_MOVEMENT_LIMIT: usize = 100;

// -- Request types --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkStockRequest {
    pub product_ids: Vec<ProductId>,
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityParams {
    pub quantity: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct BulkAvailabilityRequest {
    pub items: Vec<AvailabilityRequest>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustRequest {
    /// Signed change to the on-hand quantity.
    pub quantity: i64,
    pub reason: String,
    pub performed_by: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiveRequest {
    pub quantity: i64,
    pub reference: Option<String>,
    pub performed_by: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdsRequest {
    pub reorder_level: Option<i64>,
    pub max_stock_level: Option<i64>,
    pub performed_by: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MovementParams {
    #[serde(rename = "type")]
    pub movement_type: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

// -- Response types --

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StockResponse {
    pub product_id: ProductId,
    pub quantity: i64,
    pub reserved_quantity: i64,
    pub available_quantity: i64,
    pub reorder_level: i64,
    pub max_stock_level: i64,
    pub stock_status: StockStatus,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl From<StockLedgerEntry> for StockResponse {
    fn from(entry: StockLedgerEntry) -> Self {
        Self {
            product_id: entry.product_id,
            quantity: entry.quantity,
            reserved_quantity: entry.reserved_quantity,
            available_quantity: entry.available_quantity(),
            reorder_level: entry.reorder_level,
            max_stock_level: entry.max_stock_level,
            stock_status: entry.stock_status(),
            version: entry.version.as_i64(),
            updated_at: entry.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementResponse {
    pub id: uuid::Uuid,
    pub movement_type: MovementType,
    pub quantity_change: i64,
    pub reference_id: Option<String>,
    pub reference_type: Option<String>,
    pub reason: Option<String>,
    pub performed_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<MovementRecord> for MovementResponse {
    fn from(m: MovementRecord) -> Self {
        Self {
            id: m.id,
            movement_type: m.movement_type,
            quantity_change: m.quantity_change,
            reference_id: m.reference_id,
            reference_type: m.reference_type.map(|t| t.as_str().to_string()),
            reason: m.reason,
            performed_by: m.performed_by,
            created_at: m.created_at,
        }
    }
}

// -- Handlers --

/// GET /inventory/{product_id}
#[tracing::instrument(skip(state))]
pub async fn get<S: StockStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(product_id): Path<i64>,
) -> Result<Json<ApiResponse<StockResponse>>, ApiError> {
    let entry = state.ledger.get(ProductId::new(product_id)).await?;
    Ok(ApiResponse::ok(entry.into()))
}

/// POST /inventory/bulk: Entries for the tracked products among the given ids.
#[tracing::instrument(skip(state, req), fields(count = req.product_ids.len()))]
pub async fn bulk_get<S: StockStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<BulkStockRequest>,
) -> Result<Json<ApiResponse<Vec<StockResponse>>>, ApiError> {
    let entries = state.ledger.bulk_get(&req.product_ids).await?;
    Ok(ApiResponse::ok(
        entries.into_iter().map(StockResponse::from).collect(),
    ))
}

/// GET /inventory/{product_id}/availability?quantity=
#[tracing::instrument(skip(state))]
pub async fn availability<S: StockStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(product_id): Path<i64>,
    Query(params): Query<AvailabilityParams>,
) -> Result<Json<ApiResponse<Availability>>, ApiError> {
    let availability = state
        .ledger
        .check_availability(ProductId::new(product_id), params.quantity.unwrap_or(1))
        .await?;
    Ok(ApiResponse::ok(availability))
}

/// POST /inventory/availability
#[tracing::instrument(skip(state, req), fields(count = req.items.len()))]
pub async fn bulk_availability<S: StockStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<BulkAvailabilityRequest>,
) -> Result<Json<ApiResponse<Vec<Availability>>>, ApiError> {
    let results = state.ledger.bulk_check_availability(&req.items).await?;
    Ok(ApiResponse::ok(results))
}

/// POST /inventory: Creates the entry, or returns the existing one untouched.
#[tracing::instrument(skip(state))]
pub async fn initialize<S: StockStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<InitializeStock>,
) -> Result<WithStatus<StockResponse>, ApiError> {
    if req.initial_quantity < 0 {
        return Err(InventoryError::InvalidQuantity(req.initial_quantity).into());
    }
    let initialized = state.ledger.create_or_initialize(req).await?;
    let status = if initialized.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, ApiResponse::ok(initialized.entry.into())))
}

/// POST /inventory/{product_id}/adjust
#[tracing::instrument(skip(state, req))]
pub async fn adjust<S: StockStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(product_id): Path<i64>,
    Json(req): Json<AdjustRequest>,
) -> Result<Json<ApiResponse<StockResponse>>, ApiError> {
    if req.reason.trim().is_empty() {
        return Err(ApiError::BadRequest("reason is required".to_string()));
    }
    let entry = state
        .ledger
        .adjust_quantity(
            ProductId::new(product_id),
            req.quantity,
            &req.reason,
            req.performed_by.as_deref(),
        )
        .await?;
    Ok(ApiResponse::ok(entry.into()))
}

/// POST /inventory/{product_id}/receive
#[tracing::instrument(skip(state, req))]
pub async fn receive<S: StockStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(product_id): Path<i64>,
    Json(req): Json<ReceiveRequest>,
) -> Result<Json<ApiResponse<StockResponse>>, ApiError> {
    let entry = state
        .ledger
        .receive_stock(
            ProductId::new(product_id),
            req.quantity,
            req.reference.as_deref(),
            req.performed_by.as_deref(),
        )
        .await?;
    Ok(ApiResponse::ok(entry.into()))
}

/// PUT /inventory/{product_id}/thresholds
#[tracing::instrument(skip(state, req))]
pub async fn thresholds<S: StockStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(product_id): Path<i64>,
    Json(req): Json<ThresholdsRequest>,
) -> Result<Json<ApiResponse<StockResponse>>, ApiError> {
    let product_id = ProductId::new(product_id);
    let performed_by = req.performed_by.as_deref();

    let mut entry = None;
    if let Some(level) = req.reorder_level {
        entry = Some(
            state
                .ledger
                .set_reorder_level(product_id, level, performed_by)
                .await?,
        );
    }
    if let Some(level) = req.max_stock_level {
        entry = Some(
            state
                .ledger
                .set_max_stock_level(product_id, level, performed_by)
                .await?,
        );
    }

    let entry = entry.ok_or_else(|| {
        ApiError::BadRequest("reorderLevel or maxStockLevel is required".to_string())
    })?;
    Ok(ApiResponse::ok(entry.into()))
}

/// GET /inventory/low-stock
#[tracing::instrument(skip(state))]
pub async fn low_stock<S: StockStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<ApiResponse<Vec<StockResponse>>>, ApiError> {
    let entries = state.ledger.low_stock().await?;
    Ok(ApiResponse::ok(
        entries.into_iter().map(StockResponse::from).collect(),
    ))
}

/// GET /inventory/statistics
#[tracing::instrument(skip(state))]
pub async fn statistics<S: StockStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<ApiResponse<InventoryStatistics>>, ApiError> {
    Ok(ApiResponse::ok(state.ledger.statistics().await?))
}

/// GET /inventory/{product_id}/movements?type=&from=&to=&limit=&offset=
#[tracing::instrument(skip(state))]
pub async fn movements<S: StockStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(product_id): Path<i64>,
    Query(params): Query<MovementParams>,
) -> Result<Json<ApiResponse<Vec<MovementResponse>>>, ApiError> {
    let mut query = MovementQuery::for_product(ProductId::new(product_id))
        .limit(params.limit.unwrap_or(DEFAULT_MOVEMENT_LIMIT))
        .offset(params.offset.unwrap_or(0));
    if let Some(raw) = params.movement_type {
        let movement_type = raw
            .to_ascii_uppercase()
            .parse::<MovementType>()
            .map_err(ApiError::BadRequest)?;
        query = query.movement_type(movement_type);
    }
    if let Some(from) = params.from {
        query = query.from_timestamp(from);
    }
    if let Some(to) = params.to {
        query = query.to_timestamp(to);
    }

    let movements = state.ledger.movements(query).await?;
    Ok(ApiResponse::ok(
        movements.into_iter().map(MovementResponse::from).collect(),
    ))
}

/// GET /inventory/{product_id}/reconcile
#[tracing::instrument(skip(state))]
pub async fn reconcile<S: StockStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(product_id): Path<i64>,
) -> Result<Json<ApiResponse<Reconciliation>>, ApiError> {
    let report = state.ledger.reconcile(ProductId::new(product_id)).await?;
    if !report.consistent {
        tracing::warn!(
            ledger = report.ledger_quantity,
            movements = report.movement_total,
            "Ledger and movement log disagree"
        );
    }
    Ok(ApiResponse::ok(report))
}
