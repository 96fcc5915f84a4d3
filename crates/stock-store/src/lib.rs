pub mod alert;
pub mod error;
pub mod ledger;
pub mod memory;
pub mod movement;
pub mod postgres;
pub mod query;
pub mod reservation;
pub mod store;

pub use alert::{AlertSeverity, AlertStatistics, AlertStatus, LowStockAlert};
pub use common::{OrderId, ProductId, ReservationId};
pub use error::{Result, StoreError};
pub use ledger::{
    AdjustError, DEFAULT_MAX_STOCK_LEVEL, DEFAULT_REORDER_LEVEL, Shortfall, StockLedgerEntry,
    StockStatus, Version,
};
pub use memory::{InMemoryStockStore, InMemoryTransaction};
pub use movement::{MovementRecord, MovementType, ReferenceType};
pub use postgres::{PostgresStockStore, PostgresTransaction};
pub use query::MovementQuery;
pub use reservation::{
    InvalidTransition, Reservation, ReservationOwner, ReservationStatus, ReservationType,
};
pub use store::{
    InventoryStatistics, MovementStream, ReservationStatistics, StockStore, StockTransaction,
};
