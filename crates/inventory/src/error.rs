//! Inventory error types.

use stock_store::{
    AlertStatus, ProductId, Reservation, ReservationId, ReservationStatus, StoreError,
};
use thiserror::Error;

/// Errors returned by the stock ledger and the reservation engine.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// The requested quantity exceeds what is available.
    #[error(
        "Insufficient stock for product {product_id}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        product_id: ProductId,
        requested: i64,
        available: i64,
    },

    /// A reservation already exists for the order and product.
    #[error(
        "Reservation already exists for order {} and product {}",
        existing.order_id,
        existing.product_id
    )]
    DuplicateReservation { existing: Box<Reservation> },

    /// No reservation matches the order or id.
    #[error("Reservation not found: {0}")]
    ReservationNotFound(String),

    /// The reservation is already in a terminal state that forbids the change.
    #[error("Reservation {reservation_id} cannot move from {from} to {to}")]
    InvalidStateTransition {
        reservation_id: ReservationId,
        from: ReservationStatus,
        to: ReservationStatus,
    },

    /// The product lock was not granted in time.
    #[error("Timed out waiting for the stock lock on product {product_id}")]
    LockTimeout { product_id: ProductId },

    /// The product has no ledger entry.
    #[error("Product {0} is not tracked by inventory")]
    ProductNotFound(ProductId),

    /// A quantity or threshold was out of range.
    #[error("Invalid quantity {0}")]
    InvalidQuantity(i64),

    /// The hold on a reservation cannot be extended.
    #[error("Reservation {reservation_id} cannot be extended: {reason}")]
    ExtensionNotAllowed {
        reservation_id: ReservationId,
        reason: String,
    },

    #[error("Low-stock alert not found: {0}")]
    AlertNotFound(String),

    /// The alert's current status does not allow the requested change.
    #[error("Alert {alert_id} cannot move from {from} to {to}")]
    InvalidAlertTransition {
        alert_id: uuid::Uuid,
        from: AlertStatus,
        to: AlertStatus,
    },

    /// A store error occurred.
    #[error("Store error: {0}")]
    Store(StoreError),
}

impl InventoryError {
    /// Stable code reported to synchronous callers.
    pub fn error_code(&self) -> &'static str {
        match self {
            InventoryError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            InventoryError::DuplicateReservation { .. }
            | InventoryError::Store(StoreError::DuplicateReservation { .. }) => {
                "DUPLICATE_RESERVATION"
            }
            InventoryError::ReservationNotFound(_) => "RESERVATION_NOT_FOUND",
            InventoryError::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            InventoryError::LockTimeout { .. } => "LOCK_TIMEOUT",
            InventoryError::ProductNotFound(_) => "PRODUCT_NOT_FOUND",
            InventoryError::InvalidQuantity(_) => "INVALID_QUANTITY",
            InventoryError::ExtensionNotAllowed { .. } => "EXTENSION_NOT_ALLOWED",
            InventoryError::AlertNotFound(_) => "ALERT_NOT_FOUND",
            InventoryError::InvalidAlertTransition { .. } => "INVALID_ALERT_TRANSITION",
            InventoryError::Store(_) => "RESERVATION_ERROR",
        }
    }

    /// Returns true if retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            InventoryError::LockTimeout { .. }
                | InventoryError::Store(StoreError::Database(_))
        )
    }
}

impl From<StoreError> for InventoryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::LockTimeout { product_id } => InventoryError::LockTimeout { product_id },
            StoreError::EntryNotFound(product_id) => InventoryError::ProductNotFound(product_id),
            other => InventoryError::Store(other),
        }
    }
}

/// Result type for inventory operations.
pub type Result<T> = std::result::Result<T, InventoryError>;
