//! Publisher seam for outbound events.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::envelope::OutboundEnvelope;
use crate::events::{DomainEvent, InventoryEvent};

/// Errors raised while publishing an outbound event.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The transport refused or lost the message.
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Sends outbound envelopes to a message transport.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, envelope: OutboundEnvelope) -> Result<(), PublishError>;
}

/// Publishes an event after the mutation that produced it has committed.
///
/// Failures are logged and counted; they never reach the caller.
pub async fn publish_best_effort(publisher: &dyn EventPublisher, event: &InventoryEvent) {
    let result = match OutboundEnvelope::from_event(event) {
        Ok(envelope) => publisher.publish(envelope).await,
        Err(e) => Err(PublishError::from(e)),
    };

    if let Err(e) = result {
        tracing::warn!(
            event_type = event.event_type(),
            key = %event.key(),
            error = %e,
            "Failed to publish inventory event"
        );
        metrics::counter!("event_publish_failures_total", "event_type" => event.event_type())
            .increment(1);
    }
}

/// Publisher that keeps every envelope in memory.
///
/// Used by tests and by the default wiring when no transport is configured.
#[derive(Debug, Default)]
pub struct InMemoryEventPublisher {
    published: RwLock<Vec<OutboundEnvelope>>,
    failing: AtomicBool,
}

impl InMemoryEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent publishes fail with a transport error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn published(&self) -> Vec<OutboundEnvelope> {
        self.published.read().await.clone()
    }

    /// Returns the published envelopes of one event type.
    pub async fn published_of(&self, event_type: &str) -> Vec<OutboundEnvelope> {
        self.published
            .read()
            .await
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    pub async fn clear(&self) {
        self.published.write().await.clear();
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventPublisher {
    async fn publish(&self, envelope: OutboundEnvelope) -> Result<(), PublishError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PublishError::Transport("publisher unavailable".to_string()));
        }
        self.published.write().await.push(envelope);
        Ok(())
    }
}

/// Publisher that writes every envelope to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingEventPublisher;

#[async_trait]
impl EventPublisher for LoggingEventPublisher {
    async fn publish(&self, envelope: OutboundEnvelope) -> Result<(), PublishError> {
        tracing::info!(
            topic = %envelope.topic,
            key = %envelope.key,
            event_type = %envelope.event_type,
            event_id = %envelope.event_id,
            "Published inventory event"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::StockChangeData;
    use chrono::Utc;
    use stock_store::{LowStockAlert, ProductId, StockLedgerEntry};

    fn event() -> InventoryEvent {
        InventoryEvent::StockRemoved(StockChangeData {
            product_id: ProductId::new(3),
            quantity: 2,
            new_quantity: 8,
            reason: None,
        })
    }

    #[tokio::test]
    async fn best_effort_publish_records_envelope() {
        let publisher = InMemoryEventPublisher::new();
        publish_best_effort(&publisher, &event()).await;

        let published = publisher.published_of("inventory.stock.removed").await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].key, "3");
    }

    #[tokio::test]
    async fn best_effort_publish_swallows_failures() {
        let publisher = InMemoryEventPublisher::new();
        publisher.set_failing(true);
        publish_best_effort(&publisher, &event()).await;
        assert!(publisher.published().await.is_empty());

        publisher.set_failing(false);
        let entry = StockLedgerEntry::new(ProductId::new(3), 0, 10, 100);
        let alert = LowStockAlert::evaluate(&entry, Utc::now()).unwrap();
        publish_best_effort(&publisher, &InventoryEvent::LowStockAlert((&alert).into())).await;
        assert_eq!(publisher.published().await.len(), 1);

        publisher.clear().await;
        assert!(publisher.published().await.is_empty());
    }

    #[tokio::test]
    async fn logging_publisher_accepts_everything() {
        let envelope = OutboundEnvelope::from_event(&event()).unwrap();
        assert!(LoggingEventPublisher.publish(envelope).await.is_ok());
    }
}
