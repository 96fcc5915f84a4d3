//! Inbound lifecycle events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use stock_store::{OrderId, ProductId};
use uuid::Uuid;

use crate::error::{Result, SagaError};

pub const ORDER_EVENTS_TOPIC: &str = "order-events";
pub const CART_EVENTS_TOPIC: &str = "cart-events";
pub const PRODUCT_EVENTS_TOPIC: &str = "product-events";

/// The envelope every inbound event arrives in.
///
/// Producers put the payload under `data`, `orderData`, `cartData` or
/// `productData`. Ids such as `orderId` or `cartId` may sit in the payload
/// or at the top level of the envelope; both are read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundEvent {
    #[serde(default = "Uuid::new_v4")]
    pub event_id: Uuid,

    /// Event type, e.g. `order.payment.completed`.
    pub event_type: String,

    #[serde(default)]
    pub aggregate_id: Option<String>,

    #[serde(
        default,
        alias = "orderData",
        alias = "cartData",
        alias = "productData"
    )]
    pub data: Value,

    /// Unparseable timestamps are dropped rather than rejected.
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,

    /// Remaining top-level fields, e.g. `orderId`, `cartId`, `userId`, `source`.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn lenient_timestamp<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(Value::as_str).and_then(|s| {
        DateTime::parse_from_rfc3339(s)
            .map(|t| t.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                s.parse::<chrono::NaiveDateTime>()
                    .ok()
                    .map(|naive| naive.and_utc())
            })
    }))
}

impl InboundEvent {
    pub fn new(event_type: impl Into<String>, aggregate_id: Option<String>, data: Value) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            aggregate_id,
            data,
            timestamp: Some(Utc::now()),
            extra: Map::new(),
        }
    }

    /// An order event carrying the order id in its data.
    pub fn for_order(event_type: impl Into<String>, order_id: OrderId) -> Self {
        Self::new(
            event_type,
            Some(order_id.to_string()),
            serde_json::json!({ "orderId": order_id.to_string() }),
        )
    }

    /// The partition key: order id, then aggregate id, then session or product id.
    pub fn key(&self) -> String {
        ["orderId", "sessionId", "cartId"]
            .iter()
            .find_map(|field| self.str_field(field))
            .or_else(|| self.aggregate_id.clone())
            .or_else(|| self.str_field("productId"))
            .or_else(|| self.str_field("userId"))
            .unwrap_or_else(|| self.event_type.clone())
    }

    /// Reads a field from the payload, falling back to the envelope.
    fn str_field(&self, field: &str) -> Option<String> {
        let present = |value: &Value| match value {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        };
        self.data
            .get(field)
            .and_then(present)
            .or_else(|| self.extra.get(field).and_then(present))
    }

    fn order_id(&self) -> Result<OrderId> {
        let raw = self
            .str_field("orderId")
            .or_else(|| self.aggregate_id.clone())
            .ok_or_else(|| SagaError::Decode(format!("{} carries no order id", self.event_type)))?;
        raw.parse()
            .map_err(|e| SagaError::Decode(format!("invalid order id '{raw}': {e}")))
    }

    fn product_id(&self) -> Result<ProductId> {
        let raw = self
            .str_field("productId")
            .or_else(|| self.aggregate_id.clone())
            .ok_or_else(|| {
                SagaError::Decode(format!("{} carries no product id", self.event_type))
            })?;
        raw.parse::<i64>()
            .map(ProductId::new)
            .map_err(|e| SagaError::Decode(format!("invalid product id '{raw}': {e}")))
    }

    fn session_id(&self) -> Option<String> {
        self.str_field("sessionId")
            .or_else(|| self.str_field("cartId"))
            .or_else(|| self.aggregate_id.clone())
    }

    fn quantity(&self) -> Result<i64> {
        ["quantity", "newQuantity", "requestedQuantity"]
            .iter()
            .find_map(|field| {
                self.data
                    .get(*field)
                    .or_else(|| self.extra.get(*field))
                    .and_then(Value::as_i64)
            })
            .ok_or_else(|| SagaError::Decode(format!("{} carries no quantity", self.event_type)))
    }

    fn reason(&self) -> Option<String> {
        self.str_field("reason")
    }

    /// Decodes the envelope into a typed lifecycle event.
    ///
    /// Unknown event types decode to [`LifecycleEvent::Unknown`]; known types
    /// with missing or malformed fields fail with `Decode`.
    pub fn decode(&self) -> Result<LifecycleEvent> {
        let event = match self.event_type.as_str() {
            "order.created" => LifecycleEvent::OrderCreated {
                order_id: self.order_id()?,
            },
            "order.confirmed" => LifecycleEvent::OrderConfirmed {
                order_id: self.order_id()?,
            },
            "order.payment.completed" => LifecycleEvent::PaymentCompleted {
                order_id: self.order_id()?,
            },
            "order.payment.failed" => LifecycleEvent::PaymentFailed {
                order_id: self.order_id()?,
                reason: self.reason(),
            },
            "order.cancelled" => LifecycleEvent::OrderCancelled {
                order_id: self.order_id()?,
                reason: self.reason(),
            },
            "cart.abandoned" => LifecycleEvent::CartAbandoned {
                session_id: self.session_id().ok_or_else(|| {
                    SagaError::Decode("cart.abandoned carries no session id".to_string())
                })?,
            },
            "cart.item.added" | "cart.item.updated" => LifecycleEvent::CartItemChanged {
                session_id: self.session_id(),
                product_id: self.product_id()?,
                quantity: self.quantity()?,
            },
            "cart.converted.to.order" => LifecycleEvent::CartConverted {
                session_id: self.session_id(),
            },
            "product.created" => LifecycleEvent::ProductCreated {
                product_id: self.product_id()?,
            },
            "product.updated" | "product.deleted" | "product.activated"
            | "product.deactivated" => LifecycleEvent::ProductChanged {
                event_type: self.event_type.clone(),
                product_id: self.product_id().ok(),
            },
            other => LifecycleEvent::Unknown {
                event_type: other.to_string(),
            },
        };
        Ok(event)
    }
}

/// A decoded inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    OrderCreated {
        order_id: OrderId,
    },
    OrderConfirmed {
        order_id: OrderId,
    },
    PaymentCompleted {
        order_id: OrderId,
    },
    PaymentFailed {
        order_id: OrderId,
        reason: Option<String>,
    },
    OrderCancelled {
        order_id: OrderId,
        reason: Option<String>,
    },
    CartAbandoned {
        session_id: String,
    },
    CartItemChanged {
        session_id: Option<String>,
        product_id: ProductId,
        quantity: i64,
    },
    CartConverted {
        session_id: Option<String>,
    },
    ProductCreated {
        product_id: ProductId,
    },
    /// Product metadata changes; inventory only logs them.
    ProductChanged {
        event_type: String,
        product_id: Option<ProductId>,
    },
    Unknown {
        event_type: String,
    },
}

impl LifecycleEvent {
    /// Critical events change stock state and must not be acknowledged
    /// until they are applied or dead-lettered.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            LifecycleEvent::PaymentCompleted { .. }
                | LifecycleEvent::PaymentFailed { .. }
                | LifecycleEvent::OrderCancelled { .. }
                | LifecycleEvent::ProductCreated { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::OrderCreated { .. } => "order.created",
            LifecycleEvent::OrderConfirmed { .. } => "order.confirmed",
            LifecycleEvent::PaymentCompleted { .. } => "order.payment.completed",
            LifecycleEvent::PaymentFailed { .. } => "order.payment.failed",
            LifecycleEvent::OrderCancelled { .. } => "order.cancelled",
            LifecycleEvent::CartAbandoned { .. } => "cart.abandoned",
            LifecycleEvent::CartItemChanged { .. } => "cart.item.changed",
            LifecycleEvent::CartConverted { .. } => "cart.converted.to.order",
            LifecycleEvent::ProductCreated { .. } => "product.created",
            LifecycleEvent::ProductChanged { .. } => "product.changed",
            LifecycleEvent::Unknown { .. } => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn order_id_falls_back_to_aggregate_id() {
        let order_id = OrderId::new();
        let event = InboundEvent::new(
            "order.payment.completed",
            Some(order_id.to_string()),
            json!({}),
        );
        assert_eq!(
            event.decode().unwrap(),
            LifecycleEvent::PaymentCompleted { order_id }
        );
        assert_eq!(event.key(), order_id.to_string());
    }

    #[test]
    fn invalid_order_id_is_a_decode_error() {
        let event = InboundEvent::new(
            "order.cancelled",
            None,
            json!({ "orderId": "not-a-uuid" }),
        );
        assert!(matches!(event.decode(), Err(SagaError::Decode(_))));
    }

    #[test]
    fn product_id_accepts_numbers_and_strings() {
        let numeric = InboundEvent::new("product.created", None, json!({ "productId": 17 }));
        let text = InboundEvent::new("product.created", None, json!({ "productId": "17" }));
        for event in [numeric, text] {
            assert_eq!(
                event.decode().unwrap(),
                LifecycleEvent::ProductCreated {
                    product_id: ProductId::new(17)
                }
            );
        }
    }

    #[test]
    fn cart_item_reads_new_quantity() {
        let event = InboundEvent::new(
            "cart.item.updated",
            None,
            json!({ "cartId": "cart-1", "productId": 3, "newQuantity": 4 }),
        );
        assert_eq!(
            event.decode().unwrap(),
            LifecycleEvent::CartItemChanged {
                session_id: Some("cart-1".to_string()),
                product_id: ProductId::new(3),
                quantity: 4,
            }
        );
        assert_eq!(event.key(), "cart-1");
    }

    #[test]
    fn unknown_types_decode_as_unknown() {
        let event = InboundEvent::new("user.registered", None, Value::Null);
        let decoded = event.decode().unwrap();
        assert!(!decoded.is_critical());
        assert_eq!(decoded.name(), "unknown");
    }

    #[test]
    fn criticality() {
        let order_id = OrderId::new();
        assert!(LifecycleEvent::PaymentCompleted { order_id }.is_critical());
        assert!(LifecycleEvent::OrderCancelled {
            order_id,
            reason: None
        }
        .is_critical());
        assert!(!LifecycleEvent::OrderConfirmed { order_id }.is_critical());
        assert!(!LifecycleEvent::CartAbandoned {
            session_id: "s".to_string()
        }
        .is_critical());
    }

    #[test]
    fn envelope_deserializes_camel_case() {
        let event: InboundEvent = serde_json::from_value(json!({
            "eventType": "order.confirmed",
            "aggregateId": "abc",
            "data": { "orderId": "abc" }
        }))
        .unwrap();
        assert_eq!(event.event_type, "order.confirmed");
        assert_eq!(event.aggregate_id.as_deref(), Some("abc"));
        assert!(event.timestamp.is_none());
    }

    #[test]
    fn order_service_envelope_decodes() {
        let order_id = OrderId::new();
        let event: InboundEvent = serde_json::from_value(json!({
            "eventType": "order.payment.completed",
            "orderId": order_id.to_string(),
            "orderData": { "userId": "u-1", "totalAmount": "42.00", "status": "PAID" },
            "timestamp": "2025-03-01T10:15:30.123",
            "source": "ecom-order-service"
        }))
        .unwrap();

        assert_eq!(
            event.decode().unwrap(),
            LifecycleEvent::PaymentCompleted { order_id }
        );
        assert_eq!(event.key(), order_id.to_string());
        assert_eq!(event.data["status"], "PAID");
        assert!(event.timestamp.is_some());
    }

    #[test]
    fn cart_service_envelope_decodes() {
        let event: InboundEvent = serde_json::from_value(json!({
            "eventType": "cart.item.added",
            "cartId": "cart-9",
            "userId": "u-1",
            "cartData": { "productId": 5, "quantity": 2, "productName": "Mug" },
            "timestamp": [2025, 3, 1, 10, 15, 30],
            "source": "cart-service"
        }))
        .unwrap();

        assert_eq!(
            event.decode().unwrap(),
            LifecycleEvent::CartItemChanged {
                session_id: Some("cart-9".to_string()),
                product_id: ProductId::new(5),
                quantity: 2,
            }
        );
        assert_eq!(event.key(), "cart-9");
        assert!(event.timestamp.is_none());

        let abandoned: InboundEvent = serde_json::from_value(json!({
            "eventType": "cart.abandoned",
            "cartId": "cart-9",
            "cartData": {}
        }))
        .unwrap();
        assert_eq!(
            abandoned.decode().unwrap(),
            LifecycleEvent::CartAbandoned {
                session_id: "cart-9".to_string()
            }
        );
    }

    #[test]
    fn product_id_read_from_envelope() {
        let event: InboundEvent = serde_json::from_value(json!({
            "eventType": "product.created",
            "productId": 31,
            "productData": { "name": "Lamp" }
        }))
        .unwrap();
        assert_eq!(
            event.decode().unwrap(),
            LifecycleEvent::ProductCreated {
                product_id: ProductId::new(31)
            }
        );
    }
}
