use thiserror::Error;

use crate::{OrderId, ProductId};

/// Errors that can occur when interacting with the stock store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The exclusive lock on a product's ledger row could not be acquired in time.
    #[error("Timed out waiting for the stock lock on product {product_id}")]
    LockTimeout { product_id: ProductId },

    /// No ledger entry exists for the product.
    #[error("No stock ledger entry for product {0}")]
    EntryNotFound(ProductId),

    /// A reservation for this order and product is already stored.
    #[error("Reservation already exists for order {order_id} and product {product_id}")]
    DuplicateReservation {
        order_id: OrderId,
        product_id: ProductId,
    },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored value could not be mapped back into the model.
    #[error("Invalid stored data: {0}")]
    InvalidData(String),
}

/// Result type for stock store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
