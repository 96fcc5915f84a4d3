//! Inventory core: stock ledger operations, reservation engine, expiry
//! sweeper and low-stock alerting.
//!
//! All state lives behind a [`stock_store::StockStore`]. Mutations publish
//! [`InventoryEvent`]s through an [`EventPublisher`] after they commit.

pub mod alerts;
pub mod envelope;
pub mod error;
pub mod events;
pub mod ledger;
pub mod policy;
pub mod publisher;
pub mod reservation;
pub mod sweeper;

pub use alerts::{AlertCheckReport, AlertConfig, AlertSeverity, LowStockAlerts};
pub use envelope::{EVENT_SOURCE, OutboundEnvelope};
pub use error::{InventoryError, Result};
pub use events::{
    DomainEvent, INVENTORY_EVENTS_TOPIC, InventoryEvent, LOW_STOCK_ALERTS_TOPIC,
    RESERVATION_EVENTS_TOPIC,
};
pub use ledger::{
    Availability, AvailabilityRequest, AvailabilityStatus, InitializeStock, Initialized,
    Reconciliation, StockLedger,
};
pub use policy::ReservationPolicy;
pub use publisher::{
    EventPublisher, InMemoryEventPublisher, LoggingEventPublisher, PublishError,
    publish_best_effort,
};
pub use reservation::{OrderLine, ReservationEngine, ReserveRequest, Resolution, SYSTEM_ACTOR};
pub use sweeper::{ExpirySweeper, SweepReport, SweeperConfig};
