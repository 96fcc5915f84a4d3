//! Lifecycle event ingestion and dead-letter administration.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use saga::{DeadLetter, DeadLetterStatus, InboundEvent};
use serde::{Deserialize, Serialize};
use stock_store::StockStore;
use uuid::Uuid;

use super::{ApiResponse, WithStatus};
use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Accepted {
    pub event_id: Uuid,
    pub partition: usize,
    pub offset: u64,
}

#[derive(Debug, Deserialize)]
pub struct DeadLetterParams {
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayResponse {
    pub id: Uuid,
    pub outcome: &'static str,
}

/// POST /events: Hands an inbound lifecycle event to the broker.
///
/// The event is processed asynchronously by the partition consumers.
#[tracing::instrument(skip(state, event), fields(event_type = %event.event_type))]
pub async fn ingest<S: StockStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(event): Json<InboundEvent>,
) -> Result<WithStatus<Accepted>, ApiError> {
    if event.event_type.trim().is_empty() {
        return Err(ApiError::BadRequest("eventType is required".to_string()));
    }
    let event_id = event.event_id;
    let (partition, offset) = state.broker.publish(event).await?;
    Ok((
        StatusCode::ACCEPTED,
        ApiResponse::ok(Accepted {
            event_id,
            partition,
            offset,
        }),
    ))
}

/// GET /dead-letters?status=
#[tracing::instrument(skip(state))]
pub async fn dead_letters<S: StockStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Query(params): Query<DeadLetterParams>,
) -> Result<Json<ApiResponse<Vec<DeadLetter>>>, ApiError> {
    let status = params
        .status
        .map(|s| s.parse::<DeadLetterStatus>())
        .transpose()
        .map_err(ApiError::BadRequest)?;
    Ok(ApiResponse::ok(
        state.processor.dead_letters().list(status),
    ))
}

/// POST /dead-letters/{id}/replay
#[tracing::instrument(skip(state))]
pub async fn replay<S: StockStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<ReplayResponse>>, ApiError> {
    let handled = state.processor.replay(id).await?;
    Ok(ApiResponse::ok(ReplayResponse {
        id,
        outcome: handled.as_str(),
    }))
}

/// POST /dead-letters/{id}/discard
#[tracing::instrument(skip(state))]
pub async fn discard<S: StockStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<DeadLetter>>, ApiError> {
    Ok(ApiResponse::ok(state.processor.discard(id)?))
}
