//! In-process partitioned event broker.
//!
//! Events are routed by key to one of N partitions. Each partition is a
//! bounded channel read by exactly one consumer, so events with the same
//! key are handled one at a time and in publish order. A delivery counts
//! as acknowledged only once the consumer calls [`EventBroker::ack`].

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

use crate::error::{Result, SagaError};
use crate::events::InboundEvent;

/// One event handed to a partition consumer.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub partition: usize,
    pub offset: u64,
    pub event: InboundEvent,
}

/// The receiving end of one partition.
#[derive(Debug)]
pub struct PartitionReceiver {
    partition: usize,
    rx: mpsc::Receiver<Delivery>,
}

impl PartitionReceiver {
    pub fn partition(&self) -> usize {
        self.partition
    }

    pub async fn recv(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }

    /// Stops accepting new deliveries. Buffered ones can still be received.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

#[derive(Debug)]
struct Partition {
    tx: mpsc::Sender<Delivery>,
    next_offset: AtomicU64,
    acked: AtomicU64,
}

#[derive(Debug)]
pub struct EventBroker {
    partitions: Vec<Partition>,
}

impl EventBroker {
    /// Creates a broker with `partitions` partitions of `capacity` events each.
    pub fn new(partitions: usize, capacity: usize) -> (Self, Vec<PartitionReceiver>) {
        let (partitions, receivers): (Vec<_>, Vec<_>) = (0..partitions.max(1))
            .map(|partition| {
                let (tx, rx) = mpsc::channel(capacity.max(1));
                (
                    Partition {
                        tx,
                        next_offset: AtomicU64::new(0),
                        acked: AtomicU64::new(0),
                    },
                    PartitionReceiver { partition, rx },
                )
            })
            .unzip();
        (Self { partitions }, receivers)
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    pub fn partition_for(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.partitions.len() as u64) as usize
    }

    /// Routes the event by its key. Waits while the partition is full.
    pub async fn publish(&self, event: InboundEvent) -> Result<(usize, u64)> {
        let partition = self.partition_for(&event.key());
        let target = &self.partitions[partition];
        let permit = target
            .tx
            .reserve()
            .await
            .map_err(|_| SagaError::Publish(format!("partition {partition} is closed")))?;

        let offset = target.next_offset.fetch_add(1, Ordering::SeqCst);
        permit.send(Delivery {
            partition,
            offset,
            event,
        });

        tracing::debug!(partition, offset, "Event published to broker");
        Ok((partition, offset))
    }

    /// Marks a delivery as processed.
    pub fn ack(&self, delivery: &Delivery) {
        if let Some(partition) = self.partitions.get(delivery.partition) {
            partition.acked.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Deliveries acknowledged on one partition.
    pub fn acked(&self, partition: usize) -> u64 {
        self.partitions
            .get(partition)
            .map_or(0, |p| p.acked.load(Ordering::SeqCst))
    }

    pub fn acked_total(&self) -> u64 {
        (0..self.partitions.len()).map(|p| self.acked(p)).sum()
    }

    /// Deliveries published but not yet acknowledged, across partitions.
    pub fn in_flight(&self) -> u64 {
        self.partitions
            .iter()
            .map(|p| {
                let acked = p.acked.load(Ordering::SeqCst);
                p.next_offset.load(Ordering::SeqCst).saturating_sub(acked)
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stock_store::OrderId;

    #[tokio::test]
    async fn same_key_lands_on_same_partition_in_order() {
        let (broker, mut receivers) = EventBroker::new(4, 16);
        let order_id = OrderId::new();

        let (p1, o1) = broker
            .publish(InboundEvent::for_order("order.confirmed", order_id))
            .await
            .unwrap();
        let (p2, o2) = broker
            .publish(InboundEvent::for_order("order.payment.completed", order_id))
            .await
            .unwrap();
        assert_eq!(p1, p2);
        assert_eq!((o1, o2), (0, 1));

        let receiver = &mut receivers[p1];
        assert_eq!(receiver.partition(), p1);
        let first = receiver.recv().await.unwrap();
        let second = receiver.recv().await.unwrap();
        assert_eq!(first.event.event_type, "order.confirmed");
        assert_eq!(second.event.event_type, "order.payment.completed");
    }

    #[tokio::test]
    async fn ack_tracks_in_flight() {
        let (broker, mut receivers) = EventBroker::new(1, 4);
        broker
            .publish(InboundEvent::new("x", None, json!({})))
            .await
            .unwrap();
        assert_eq!(broker.in_flight(), 1);

        let delivery = receivers[0].recv().await.unwrap();
        broker.ack(&delivery);
        assert_eq!(broker.in_flight(), 0);
        assert_eq!(broker.acked_total(), 1);
    }

    #[tokio::test]
    async fn publish_fails_when_consumer_is_gone() {
        let (broker, receivers) = EventBroker::new(1, 4);
        drop(receivers);
        let result = broker.publish(InboundEvent::new("x", None, json!({}))).await;
        assert!(matches!(result, Err(SagaError::Publish(_))));
        assert_eq!(broker.in_flight(), 0);
    }

    #[tokio::test]
    async fn closed_receiver_still_yields_buffered_deliveries() {
        let (broker, mut receivers) = EventBroker::new(1, 4);
        broker
            .publish(InboundEvent::new("x", None, json!({})))
            .await
            .unwrap();

        receivers[0].close();
        assert!(broker.publish(InboundEvent::new("y", None, json!({}))).await.is_err());

        let delivery = receivers[0].recv().await.unwrap();
        assert_eq!(delivery.event.event_type, "x");
        broker.ack(&delivery);
        assert!(receivers[0].recv().await.is_none());
        assert_eq!(broker.in_flight(), 0);
    }

    #[test]
    fn zero_partitions_becomes_one() {
        let (broker, receivers) = EventBroker::new(0, 1);
        assert_eq!(broker.partition_count(), 1);
        assert_eq!(receivers.len(), 1);
    }
}
