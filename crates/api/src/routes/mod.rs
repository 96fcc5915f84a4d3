//! HTTP route handlers and the shared response envelope.

pub mod alerts;
pub mod events;
pub mod health;
pub mod inventory;
pub mod metrics;
pub mod reservations;

use axum::Json;
use axum::http::StatusCode;
use serde::Serialize;

/// Body of every inventory, reservation and event endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error_code: None,
            message: None,
        })
    }

    pub fn with_message(data: T, message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error_code: None,
            message: Some(message.into()),
        })
    }
}

/// A success response with an explicit status code.
pub type WithStatus<T> = (StatusCode, Json<ApiResponse<T>>);
