//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use inventory::InventoryError;
use saga::SagaError;
use serde_json::json;
use stock_store::StoreError;

use crate::routes::ApiResponse;

/// API-level error type that maps to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error(transparent)]
    Saga(SagaError),

    #[error("{0}")]
    Internal(String),
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        match err {
            SagaError::Inventory(inner) => ApiError::Inventory(inner),
            other => ApiError::Saga(other),
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Inventory(err) => inventory_status(err),
            ApiError::Saga(err) => match err {
                SagaError::Inventory(inner) => inventory_status(inner),
                SagaError::Decode(_) => StatusCode::BAD_REQUEST,
                SagaError::DeadLetterNotFound(_) => StatusCode::NOT_FOUND,
                SagaError::Publish(_) => StatusCode::SERVICE_UNAVAILABLE,
            },
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Inventory(err) => err.error_code(),
            ApiError::Saga(SagaError::Inventory(err)) => err.error_code(),
            ApiError::Saga(SagaError::Decode(_)) => "INVALID_EVENT",
            ApiError::Saga(SagaError::DeadLetterNotFound(_)) => "DEAD_LETTER_NOT_FOUND",
            ApiError::Saga(_) => "EVENT_BROKER_UNAVAILABLE",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Extra context for the client, when the error carries any.
    fn details(&self) -> Option<serde_json::Value> {
        match self {
            ApiError::Inventory(InventoryError::InsufficientStock {
                product_id,
                requested,
                available,
            }) => Some(json!({
                "productId": product_id,
                "requested": requested,
                "available": available,
            })),
            ApiError::Inventory(InventoryError::DuplicateReservation { existing }) => Some(json!({
                "reservationId": existing.id,
                "orderId": existing.order_id,
                "productId": existing.product_id,
                "status": existing.status,
            })),
            _ => None,
        }
    }
}

fn inventory_status(err: &InventoryError) -> StatusCode {
    match err {
        InventoryError::ProductNotFound(_)
        | InventoryError::ReservationNotFound(_)
        | InventoryError::AlertNotFound(_) => StatusCode::NOT_FOUND,
        InventoryError::InsufficientStock { .. }
        | InventoryError::DuplicateReservation { .. }
        | InventoryError::InvalidStateTransition { .. }
        | InventoryError::ExtensionNotAllowed { .. }
        | InventoryError::InvalidAlertTransition { .. }
        | InventoryError::Store(StoreError::DuplicateReservation { .. }) => StatusCode::CONFLICT,
        InventoryError::InvalidQuantity(_) => StatusCode::BAD_REQUEST,
        InventoryError::LockTimeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InventoryError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }

        let body = ApiResponse {
            success: false,
            data: self.details(),
            error_code: Some(self.error_code()),
            message: Some(self.to_string()),
        };
        (status, axum::Json(body)).into_response()
    }
}
