//! Outbound inventory events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use stock_store::{
    AlertSeverity, LowStockAlert, OrderId, ProductId, Reservation, ReservationId,
    StockLedgerEntry, StockStatus,
};
use uuid::Uuid;

/// Topic for stock level changes, keyed by product id.
pub const INVENTORY_EVENTS_TOPIC: &str = "inventory-events";

/// Topic for reservation lifecycle events, keyed by order id.
pub const RESERVATION_EVENTS_TOPIC: &str = "inventory-reservation-events";

/// Topic for low-stock alerts, keyed by product id.
pub const LOW_STOCK_ALERTS_TOPIC: &str = "inventory-low-stock-alerts";

/// Trait for events published by the inventory service.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Returns the wire event type, e.g. `stock.reserved`.
    fn event_type(&self) -> &'static str;

    /// Returns the topic the event is published to.
    fn topic(&self) -> &'static str;

    /// Returns the partition key.
    fn key(&self) -> String;
}

/// Events emitted after a ledger or reservation mutation commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum InventoryEvent {
    /// The owned quantity of a product changed.
    StockUpdated(StockUpdatedData),

    /// Stock was added to a product.
    StockAdded(StockChangeData),

    /// Stock was removed from a product.
    StockRemoved(StockChangeData),

    /// Units were reserved for an order.
    StockReserved(StockReservedData),

    /// A reservation was converted into a permanent deduction.
    ReservationCommitted(ReservationCommittedData),

    /// A reservation was released on request.
    ReservationReleased(ReservationReleasedData),

    /// A reservation was released by the expiry sweep.
    ReservationExpired(ReservationExpiredData),

    /// Available stock fell to or below the reorder level.
    LowStockAlert(LowStockAlertData),
}

impl DomainEvent for InventoryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InventoryEvent::StockUpdated(_) => "inventory.stock.updated",
            InventoryEvent::StockAdded(_) => "inventory.stock.added",
            InventoryEvent::StockRemoved(_) => "inventory.stock.removed",
            InventoryEvent::StockReserved(_) => "stock.reserved",
            InventoryEvent::ReservationCommitted(_) => "stock.reservation.committed",
            InventoryEvent::ReservationReleased(_) => "stock.reservation.released",
            InventoryEvent::ReservationExpired(_) => "stock.reservation.expired",
            InventoryEvent::LowStockAlert(_) => "inventory.stock.low",
        }
    }

    fn topic(&self) -> &'static str {
        match self {
            InventoryEvent::StockUpdated(_)
            | InventoryEvent::StockAdded(_)
            | InventoryEvent::StockRemoved(_) => INVENTORY_EVENTS_TOPIC,
            InventoryEvent::StockReserved(_)
            | InventoryEvent::ReservationCommitted(_)
            | InventoryEvent::ReservationReleased(_)
            | InventoryEvent::ReservationExpired(_) => RESERVATION_EVENTS_TOPIC,
            InventoryEvent::LowStockAlert(_) => LOW_STOCK_ALERTS_TOPIC,
        }
    }

    fn key(&self) -> String {
        match self {
            InventoryEvent::StockUpdated(d) => d.product_id.to_string(),
            InventoryEvent::StockAdded(d) | InventoryEvent::StockRemoved(d) => {
                d.product_id.to_string()
            }
            InventoryEvent::StockReserved(d) => d.order_id.to_string(),
            InventoryEvent::ReservationCommitted(d) => d.order_id.to_string(),
            InventoryEvent::ReservationReleased(d) => d.order_id.to_string(),
            InventoryEvent::ReservationExpired(d) => d.order_id.to_string(),
            InventoryEvent::LowStockAlert(d) => d.product_id.to_string(),
        }
    }
}

impl InventoryEvent {
    /// Returns the variant's data without the enum tag.
    pub fn payload(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            InventoryEvent::StockUpdated(d) => serde_json::to_value(d),
            InventoryEvent::StockAdded(d) | InventoryEvent::StockRemoved(d) => {
                serde_json::to_value(d)
            }
            InventoryEvent::StockReserved(d) => serde_json::to_value(d),
            InventoryEvent::ReservationCommitted(d) => serde_json::to_value(d),
            InventoryEvent::ReservationReleased(d) => serde_json::to_value(d),
            InventoryEvent::ReservationExpired(d) => serde_json::to_value(d),
            InventoryEvent::LowStockAlert(d) => serde_json::to_value(d),
        }
    }

    /// Builds the stock events for a quantity change: `StockUpdated` followed by
    /// `StockAdded` or `StockRemoved` depending on the sign.
    pub fn stock_changed(
        old_quantity: i64,
        entry: &StockLedgerEntry,
        reason: Option<&str>,
    ) -> Vec<Self> {
        let change = entry.quantity - old_quantity;
        let mut events = vec![InventoryEvent::StockUpdated(StockUpdatedData {
            product_id: entry.product_id,
            old_quantity,
            new_quantity: entry.quantity,
            quantity_change: change,
            available_quantity: entry.available_quantity(),
            stock_status: entry.stock_status(),
            reason: reason.map(str::to_string),
            updated_at: entry.updated_at,
        })];

        let data = StockChangeData {
            product_id: entry.product_id,
            quantity: change.abs(),
            new_quantity: entry.quantity,
            reason: reason.map(str::to_string),
        };
        if change > 0 {
            events.push(InventoryEvent::StockAdded(data));
        } else if change < 0 {
            events.push(InventoryEvent::StockRemoved(data));
        }
        events
    }

    pub fn reserved(reservation: &Reservation) -> Self {
        InventoryEvent::StockReserved(StockReservedData {
            reservation_id: reservation.id,
            product_id: reservation.product_id,
            order_id: reservation.order_id,
            quantity: reservation.quantity,
            expires_at: reservation.expires_at,
            reserved_by: reservation.reserved_by().map(str::to_string),
        })
    }

    pub fn committed(reservation: &Reservation) -> Self {
        InventoryEvent::ReservationCommitted(ReservationCommittedData {
            reservation_id: reservation.id,
            product_id: reservation.product_id,
            order_id: reservation.order_id,
            quantity: reservation.quantity,
            committed_at: reservation.resolved_at.unwrap_or(reservation.updated_at),
        })
    }

    pub fn released(reservation: &Reservation, reason: &str) -> Self {
        InventoryEvent::ReservationReleased(ReservationReleasedData {
            reservation_id: reservation.id,
            product_id: reservation.product_id,
            order_id: reservation.order_id,
            quantity: reservation.quantity,
            reason: reason.to_string(),
            released_at: reservation.resolved_at.unwrap_or(reservation.updated_at),
        })
    }

    pub fn expired(reservation: &Reservation) -> Self {
        InventoryEvent::ReservationExpired(ReservationExpiredData {
            reservation_id: reservation.id,
            product_id: reservation.product_id,
            order_id: reservation.order_id,
            quantity: reservation.quantity,
            expires_at: reservation.expires_at,
            expired_at: reservation.resolved_at.unwrap_or(reservation.updated_at),
        })
    }
}

/// Data for StockUpdated event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockUpdatedData {
    pub product_id: ProductId,
    pub old_quantity: i64,
    pub new_quantity: i64,
    pub quantity_change: i64,
    pub available_quantity: i64,
    pub stock_status: StockStatus,
    pub reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Data for StockAdded and StockRemoved events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockChangeData {
    pub product_id: ProductId,

    /// Units added or removed, always positive.
    pub quantity: i64,

    /// Owned quantity after the change.
    pub new_quantity: i64,

    pub reason: Option<String>,
}

/// Data for StockReserved event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockReservedData {
    pub reservation_id: ReservationId,
    pub product_id: ProductId,
    pub order_id: OrderId,
    pub quantity: i64,
    pub expires_at: DateTime<Utc>,
    pub reserved_by: Option<String>,
}

/// Data for ReservationCommitted event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationCommittedData {
    pub reservation_id: ReservationId,
    pub product_id: ProductId,
    pub order_id: OrderId,
    pub quantity: i64,
    pub committed_at: DateTime<Utc>,
}

/// Data for ReservationReleased event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationReleasedData {
    pub reservation_id: ReservationId,
    pub product_id: ProductId,
    pub order_id: OrderId,
    pub quantity: i64,
    pub reason: String,
    pub released_at: DateTime<Utc>,
}

/// Data for ReservationExpired event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationExpiredData {
    pub reservation_id: ReservationId,
    pub product_id: ProductId,
    pub order_id: OrderId,
    pub quantity: i64,
    pub expires_at: DateTime<Utc>,
    pub expired_at: DateTime<Utc>,
}

/// Data for LowStockAlert event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LowStockAlertData {
    pub alert_id: Uuid,
    pub product_id: ProductId,

    /// Available quantity when the alert fired.
    pub current_stock: i64,

    pub reorder_level: i64,
    pub severity: AlertSeverity,
    pub suggested_reorder_quantity: i64,
    pub message: String,
}

impl From<&LowStockAlert> for LowStockAlertData {
    fn from(alert: &LowStockAlert) -> Self {
        Self {
            alert_id: alert.id,
            product_id: alert.product_id,
            current_stock: alert.current_stock,
            reorder_level: alert.reorder_level,
            severity: alert.severity,
            suggested_reorder_quantity: alert.suggested_reorder_quantity,
            message: alert.message.clone(),
        }
    }
}
