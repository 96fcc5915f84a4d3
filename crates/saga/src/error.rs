//! Saga error types.

use inventory::InventoryError;
use thiserror::Error;

/// Errors that can occur while consuming lifecycle events.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The reservation engine or stock ledger rejected the call.
    #[error("Inventory error: {0}")]
    Inventory(#[from] InventoryError),

    /// The event payload could not be decoded.
    #[error("Malformed event: {0}")]
    Decode(String),

    /// The broker did not accept the event.
    #[error("Publish error: {0}")]
    Publish(String),

    /// The dead letter does not exist or is no longer pending.
    #[error("Dead letter not found: {0}")]
    DeadLetterNotFound(String),
}

impl SagaError {
    /// Returns true if redelivering the same event may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SagaError::Inventory(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
