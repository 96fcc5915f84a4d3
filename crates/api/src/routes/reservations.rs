//! Reservation endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, Duration, Utc};
use inventory::{InventoryError, OrderLine, Resolution};
use serde::{Deserialize, Serialize};
use stock_store::{
    OrderId, ProductId, Reservation, ReservationId, ReservationOwner, ReservationStatistics,
    ReservationStatus, ReservationType, StockStore,
};

use super::{ApiResponse, WithStatus};
use crate::AppState;
use crate::error::ApiError;

const DEFAULT_RELEASE_REASON: &str = "released via api";

// -- Request types --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveRequest {
    pub order_id: String,
    pub items: Vec<ReserveItem>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub ttl_seconds: Option<i64>,
    pub reservation_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveItem {
    pub product_id: ProductId,
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseParams {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveParams {
    pub user_id: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendRequest {
    pub additional_seconds: i64,
}

// -- Response types --

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationResponse {
    pub reservation_id: ReservationId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub status: ReservationStatus,
    pub reservation_type: ReservationType,
    pub reserved_by: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl From<Reservation> for ReservationResponse {
    fn from(r: Reservation) -> Self {
        Self {
            reserved_by: r.reserved_by().map(str::to_string),
            reservation_id: r.id,
            order_id: r.order_id,
            product_id: r.product_id,
            quantity: r.quantity,
            status: r.status,
            reservation_type: r.reservation_type,
            expires_at: r.expires_at,
            created_at: r.created_at,
            resolved_at: r.resolved_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionResponse {
    pub order_id: OrderId,
    pub applied: bool,
    pub reservations: Vec<ReservationResponse>,
}

fn parse_order_id(raw: &str) -> Result<OrderId, ApiError> {
    raw.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid order id '{raw}': {e}")))
}

fn seconds(value: i64) -> Result<Duration, ApiError> {
    Duration::try_seconds(value)
        .ok_or_else(|| ApiError::BadRequest(format!("Duration of {value} seconds is out of range")))
}

fn resolved(
    order_id: OrderId,
    resolution: Resolution,
) -> Result<Json<ApiResponse<ResolutionResponse>>, ApiError> {
    let message = match &resolution {
        Resolution::NotFound => {
            return Err(InventoryError::ReservationNotFound(format!("order {order_id}")).into());
        }
        Resolution::AlreadyResolved => "already resolved",
        Resolution::Applied(_) => "applied",
    };
    let applied = resolution.is_applied();
    let reservations = match resolution {
        Resolution::Applied(reservations) => reservations
            .into_iter()
            .map(ReservationResponse::from)
            .collect(),
        _ => Vec::new(),
    };
    Ok(ApiResponse::with_message(
        ResolutionResponse {
            order_id,
            applied,
            reservations,
        },
        message,
    ))
}

// -- Handlers --

/// POST /reservations: Reserves every line of an order.
#[tracing::instrument(skip(state, req), fields(order_id = %req.order_id, lines = req.items.len()))]
pub async fn create<S: StockStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<ReserveRequest>,
) -> Result<WithStatus<Vec<ReservationResponse>>, ApiError> {
    let order_id = parse_order_id(&req.order_id)?;
    if req.items.is_empty() {
        return Err(ApiError::BadRequest("items must not be empty".to_string()));
    }

    let lines: Vec<OrderLine> = req
        .items
        .iter()
        .map(|item| OrderLine {
            product_id: item.product_id,
            quantity: item.quantity,
        })
        .collect();
    let owner = ReservationOwner {
        user_id: req.user_id,
        session_id: req.session_id,
    };
    let reservation_type = req
        .reservation_type
        .as_deref()
        .map(ReservationType::parse_or_default)
        .unwrap_or_default();

    let reservations = state
        .engine
        .reserve_order(
            order_id,
            &lines,
            owner,
            req.ttl_seconds.map(seconds).transpose()?,
            reservation_type,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        ApiResponse::ok(
            reservations
                .into_iter()
                .map(ReservationResponse::from)
                .collect(),
        ),
    ))
}

/// GET /reservations/{id}
#[tracing::instrument(skip(state))]
pub async fn get<S: StockStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<ReservationResponse>>, ApiError> {
    let id: ReservationId = id
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid reservation id: {e}")))?;
    let reservation = state.engine.reservation(id).await?;
    Ok(ApiResponse::ok(reservation.into()))
}

/// GET /reservations/order/{order_id}
#[tracing::instrument(skip(state))]
pub async fn for_order<S: StockStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(order_id): Path<String>,
) -> Result<Json<ApiResponse<Vec<ReservationResponse>>>, ApiError> {
    let order_id = parse_order_id(&order_id)?;
    let reservations = state.engine.reservations_for_order(order_id).await?;
    Ok(ApiResponse::ok(
        reservations
            .into_iter()
            .map(ReservationResponse::from)
            .collect(),
    ))
}

/// POST /reservations/order/{order_id}/commit
#[tracing::instrument(skip(state))]
pub async fn commit<S: StockStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(order_id): Path<String>,
) -> Result<Json<ApiResponse<ResolutionResponse>>, ApiError> {
    let order_id = parse_order_id(&order_id)?;
    let resolution = state.engine.commit(order_id).await?;
    resolved(order_id, resolution)
}

/// POST /reservations/order/{order_id}/release?reason=
#[tracing::instrument(skip(state))]
pub async fn release<S: StockStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(order_id): Path<String>,
    Query(params): Query<ReleaseParams>,
) -> Result<Json<ApiResponse<ResolutionResponse>>, ApiError> {
    let order_id = parse_order_id(&order_id)?;
    let reason = params
        .reason
        .unwrap_or_else(|| DEFAULT_RELEASE_REASON.to_string());
    let resolution = state.engine.release(order_id, &reason).await?;
    resolved(order_id, resolution)
}

/// POST /reservations/{id}/extend
#[tracing::instrument(skip(state, req))]
pub async fn extend<S: StockStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<ExtendRequest>,
) -> Result<Json<ApiResponse<ReservationResponse>>, ApiError> {
    let id: ReservationId = id
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid reservation id: {e}")))?;
    let reservation = state
        .engine
        .extend(id, seconds(req.additional_seconds)?)
        .await?;
    Ok(ApiResponse::ok(reservation.into()))
}

/// GET /reservations/active?userId=&sessionId=
#[tracing::instrument(skip(state))]
pub async fn active<S: StockStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Query(params): Query<ActiveParams>,
) -> Result<Json<ApiResponse<Vec<ReservationResponse>>>, ApiError> {
    if params.user_id.is_none() && params.session_id.is_none() {
        return Err(ApiError::BadRequest(
            "userId or sessionId is required".to_string(),
        ));
    }
    let reservations = state
        .engine
        .active_reservations(params.user_id.as_deref(), params.session_id.as_deref())
        .await?;
    Ok(ApiResponse::ok(
        reservations
            .into_iter()
            .map(ReservationResponse::from)
            .collect(),
    ))
}

/// GET /reservations/statistics
#[tracing::instrument(skip(state))]
pub async fn statistics<S: StockStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<ApiResponse<ReservationStatistics>>, ApiError> {
    Ok(ApiResponse::ok(state.engine.statistics().await?))
}
