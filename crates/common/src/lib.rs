//! Shared identifier types used across the inventory crates.

pub mod types;

pub use types::{OrderId, ProductId, ReservationId};
