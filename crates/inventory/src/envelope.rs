use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::{DomainEvent, InventoryEvent};

/// Value of the `source` field on every outbound envelope.
pub const EVENT_SOURCE: &str = "inventory-service";

/// An outbound event together with its routing metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundEnvelope {
    pub event_id: Uuid,

    /// Wire event type, e.g. `stock.reservation.committed`.
    pub event_type: String,

    pub topic: String,

    /// Partition key: the product id or the order id.
    pub key: String,

    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub source: String,
}

impl OutboundEnvelope {
    /// Wraps an inventory event with a fresh event id and the current time.
    pub fn from_event(event: &InventoryEvent) -> serde_json::Result<Self> {
        Ok(Self {
            event_id: Uuid::new_v4(),
            event_type: event.event_type().to_string(),
            topic: event.topic().to_string(),
            key: event.key(),
            data: event.payload()?,
            timestamp: Utc::now(),
            source: EVENT_SOURCE.to_string(),
        })
    }
}
