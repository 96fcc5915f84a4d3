//! Event processing with manual acknowledgement.

use std::sync::Arc;
use std::time::Instant;

use stock_store::StockStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::broker::{Delivery, EventBroker, PartitionReceiver};
use crate::coordinator::{Handled, SagaCoordinator};
use crate::dead_letter::{DeadLetter, DeadLetterQueue, DeadLetterStatus};
use crate::error::{Result, SagaError};
use crate::events::{InboundEvent, LifecycleEvent};
use crate::retry::{RetryPolicy, retry_with_predicate};

/// What happened to one delivered event. Either way it is acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Handled(Handled),
    DeadLettered(Uuid),
}

impl ProcessOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            ProcessOutcome::Handled(h) => h.as_str(),
            ProcessOutcome::DeadLettered(_) => "dead_lettered",
        }
    }
}

/// Decodes, dispatches and retries inbound events.
///
/// Critical events are retried with backoff and dead-lettered once the
/// policy gives up or the error is not retryable. Non-critical failures
/// are logged. Malformed events go straight to the dead-letter queue.
pub struct EventProcessor<S: StockStore> {
    coordinator: Arc<SagaCoordinator<S>>,
    retry: RetryPolicy,
    dead_letters: Arc<DeadLetterQueue>,
}

impl<S: StockStore> EventProcessor<S> {
    pub fn new(
        coordinator: Arc<SagaCoordinator<S>>,
        retry: RetryPolicy,
        dead_letters: Arc<DeadLetterQueue>,
    ) -> Self {
        Self {
            coordinator,
            retry,
            dead_letters,
        }
    }

    pub fn dead_letters(&self) -> &Arc<DeadLetterQueue> {
        &self.dead_letters
    }

    #[tracing::instrument(
        skip(self, event),
        fields(event_type = %event.event_type, event_id = %event.event_id)
    )]
    pub async fn process(&self, event: InboundEvent) -> ProcessOutcome {
        let started = Instant::now();

        let outcome = match event.decode() {
            Ok(decoded) => self.dispatch(&event, &decoded).await,
            Err(e) => {
                tracing::warn!(error = %e, "Malformed event");
                let id = self.dead_letters.push(event.clone(), e.to_string(), 1);
                ProcessOutcome::DeadLettered(id)
            }
        };

        metrics::histogram!("saga_event_duration_seconds").record(started.elapsed().as_secs_f64());
        metrics::counter!(
            "saga_events_processed_total",
            "event_type" => event.event_type.clone(),
            "outcome" => outcome.as_str()
        )
        .increment(1);
        outcome
    }

    async fn dispatch(&self, event: &InboundEvent, decoded: &LifecycleEvent) -> ProcessOutcome {
        if !decoded.is_critical() {
            return match self.coordinator.handle(decoded).await {
                Ok(handled) => ProcessOutcome::Handled(handled),
                Err(e) => {
                    tracing::warn!(error = %e, "Non-critical event failed, acknowledging");
                    ProcessOutcome::Handled(Handled::NoOp)
                }
            };
        }

        match retry_with_predicate(
            &self.retry,
            || self.coordinator.handle(decoded),
            SagaError::is_retryable,
        )
        .await
        {
            Ok((handled, _)) => ProcessOutcome::Handled(handled),
            Err(exhausted) => ProcessOutcome::DeadLettered(self.dead_letters.push(
                event.clone(),
                exhausted.error.to_string(),
                exhausted.attempts,
            )),
        }
    }

    /// Runs a pending dead letter through its handler again.
    ///
    /// Success marks it RESOLVED; failure records the attempt and leaves it PENDING.
    #[tracing::instrument(skip(self))]
    pub async fn replay(&self, id: Uuid) -> Result<Handled> {
        let entry = self
            .dead_letters
            .get(id)
            .filter(|e| e.status == DeadLetterStatus::Pending)
            .ok_or_else(|| SagaError::DeadLetterNotFound(id.to_string()))?;

        let decoded = match entry.event.decode() {
            Ok(decoded) => decoded,
            Err(e) => {
                self.dead_letters.record_failure(id, e.to_string(), 1);
                return Err(e);
            }
        };

        match retry_with_predicate(
            &self.retry,
            || self.coordinator.handle(&decoded),
            SagaError::is_retryable,
        )
        .await
        {
            Ok((handled, _)) => {
                self.dead_letters.resolve(id, DeadLetterStatus::Resolved);
                tracing::info!(dead_letter_id = %id, "Dead letter replayed");
                Ok(handled)
            }
            Err(exhausted) => {
                self.dead_letters
                    .record_failure(id, exhausted.error.to_string(), exhausted.attempts);
                Err(exhausted.error)
            }
        }
    }

    pub fn discard(&self, id: Uuid) -> Result<DeadLetter> {
        let entry = self
            .dead_letters
            .resolve(id, DeadLetterStatus::Discarded)
            .ok_or_else(|| SagaError::DeadLetterNotFound(id.to_string()))?;
        tracing::info!(dead_letter_id = %id, "Dead letter discarded");
        Ok(entry)
    }
}

async fn consume<S: StockStore>(
    delivery: Delivery,
    broker: &EventBroker,
    processor: &EventProcessor<S>,
) {
    let outcome = processor.process(delivery.event.clone()).await;
    broker.ack(&delivery);
    tracing::debug!(
        partition = delivery.partition,
        offset = delivery.offset,
        outcome = outcome.as_str(),
        "Delivery acknowledged"
    );
}

/// Consumes one partition until shutdown or until the broker is dropped.
///
/// Each delivery is acknowledged after processing returns. On shutdown the
/// partition is closed to new events and everything already buffered is
/// processed before the consumer exits.
pub async fn run_partition<S: StockStore>(
    mut receiver: PartitionReceiver,
    broker: Arc<EventBroker>,
    processor: Arc<EventProcessor<S>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let partition = receiver.partition();
    tracing::info!(partition, "Partition consumer started");

    let mut stopping = *shutdown.borrow();
    while !stopping {
        tokio::select! {
            biased;
            delivery = receiver.recv() => match delivery {
                Some(delivery) => consume(delivery, &broker, &processor).await,
                None => break,
            },
            changed = shutdown.changed() => {
                stopping = changed.is_err() || *shutdown.borrow();
            }
        }
    }

    if stopping {
        receiver.close();
        let mut drained = 0u64;
        while let Some(delivery) = receiver.recv().await {
            consume(delivery, &broker, &processor).await;
            drained += 1;
        }
        tracing::info!(partition, drained, "Partition drained");
    }

    tracing::info!(partition, "Partition consumer stopped");
}

/// Spawns one consumer task per partition.
pub fn spawn_consumers<S: StockStore + 'static>(
    receivers: Vec<PartitionReceiver>,
    broker: Arc<EventBroker>,
    processor: Arc<EventProcessor<S>>,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    receivers
        .into_iter()
        .map(|receiver| {
            tokio::spawn(run_partition(
                receiver,
                broker.clone(),
                processor.clone(),
                shutdown.clone(),
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use inventory::{
        InMemoryEventPublisher, InitializeStock, ReservationEngine, ReserveRequest, StockLedger,
    };
    use serde_json::json;
    use std::time::Duration;
    use stock_store::{InMemoryStockStore, OrderId, ProductId};

    async fn processor(
        store: InMemoryStockStore,
    ) -> (
        EventProcessor<InMemoryStockStore>,
        Arc<ReservationEngine<InMemoryStockStore>>,
    ) {
        let store = Arc::new(store);
        let publisher = Arc::new(InMemoryEventPublisher::new());
        let engine = Arc::new(ReservationEngine::new(store.clone(), publisher.clone()));
        let ledger = Arc::new(StockLedger::new(store, publisher));
        ledger
            .create_or_initialize(InitializeStock {
                initial_quantity: 5,
                ..InitializeStock::empty(ProductId::new(1))
            })
            .await
            .unwrap();
        let coordinator = Arc::new(SagaCoordinator::new(engine.clone(), ledger));
        let retry = RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(2));
        (
            EventProcessor::new(coordinator, retry, Arc::new(DeadLetterQueue::default())),
            engine,
        )
    }

    #[tokio::test]
    async fn malformed_event_is_dead_lettered() {
        let (processor, _) = processor(InMemoryStockStore::new()).await;
        let outcome = processor
            .process(InboundEvent::new(
                "order.payment.completed",
                None,
                json!({ "orderId": 12 }),
            ))
            .await;
        assert!(matches!(outcome, ProcessOutcome::DeadLettered(_)));
        assert_eq!(processor.dead_letters().pending_count(), 1);
    }

    #[tokio::test]
    async fn non_retryable_failure_is_dead_lettered_after_one_attempt() {
        let (processor, engine) = processor(InMemoryStockStore::new()).await;
        let order_id = OrderId::new();
        engine
            .reserve(ReserveRequest::new(order_id, ProductId::new(1), 1))
            .await
            .unwrap();
        processor
            .process(InboundEvent::for_order("order.payment.completed", order_id))
            .await;

        let outcome = processor
            .process(InboundEvent::for_order("order.cancelled", order_id))
            .await;
        let ProcessOutcome::DeadLettered(id) = outcome else {
            panic!("expected dead letter, got {outcome:?}");
        };
        let entry = processor.dead_letters().get(id).unwrap();
        assert_eq!(entry.attempts, 1);
        assert!(entry.error_message.contains("cannot move from COMMITTED"));
    }

    #[tokio::test]
    async fn lock_timeouts_are_retried_then_dead_lettered() {
        let store = InMemoryStockStore::new().with_lock_timeout(Duration::from_millis(20));
        let (processor, engine) = processor(store).await;
        let order_id = OrderId::new();
        engine
            .reserve(ReserveRequest::new(order_id, ProductId::new(1), 1))
            .await
            .unwrap();

        let _held = engine.store().begin(ProductId::new(1)).await.unwrap();
        let outcome = processor
            .process(InboundEvent::for_order("order.payment.completed", order_id))
            .await;
        let ProcessOutcome::DeadLettered(id) = outcome else {
            panic!("expected dead letter, got {outcome:?}");
        };
        assert_eq!(processor.dead_letters().get(id).unwrap().attempts, 3);
    }

    #[tokio::test]
    async fn replay_resolves_after_the_cause_is_gone() {
        let store = InMemoryStockStore::new().with_lock_timeout(Duration::from_millis(20));
        let (processor, engine) = processor(store).await;
        let order_id = OrderId::new();
        engine
            .reserve(ReserveRequest::new(order_id, ProductId::new(1), 2))
            .await
            .unwrap();

        let held = engine.store().begin(ProductId::new(1)).await.unwrap();
        let ProcessOutcome::DeadLettered(id) = processor
            .process(InboundEvent::for_order("order.payment.completed", order_id))
            .await
        else {
            panic!("expected dead letter");
        };
        drop(held);

        assert_eq!(processor.replay(id).await.unwrap(), Handled::Applied);
        let entry = processor.dead_letters().get(id).unwrap();
        assert_eq!(entry.status, DeadLetterStatus::Resolved);
        assert!(matches!(
            processor.replay(id).await,
            Err(SagaError::DeadLetterNotFound(_))
        ));
    }

    #[tokio::test]
    async fn discard_marks_entry() {
        let (processor, _) = processor(InMemoryStockStore::new()).await;
        let ProcessOutcome::DeadLettered(id) = processor
            .process(InboundEvent::new("order.cancelled", None, json!({})))
            .await
        else {
            panic!("expected dead letter");
        };
        let entry = processor.discard(id).unwrap();
        assert_eq!(entry.status, DeadLetterStatus::Discarded);
        assert!(processor.discard(id).is_err());
    }

    #[tokio::test]
    async fn shutdown_drains_buffered_deliveries() {
        let (processor, engine) = processor(InMemoryStockStore::new()).await;
        let ledger = StockLedger::new(
            engine.store().clone(),
            Arc::new(InMemoryEventPublisher::new()),
        );
        let product_id = ProductId::new(2);
        ledger
            .create_or_initialize(InitializeStock {
                initial_quantity: 100,
                ..InitializeStock::empty(product_id)
            })
            .await
            .unwrap();

        let (broker, mut receivers) = EventBroker::new(1, 64);
        let broker = Arc::new(broker);
        for _ in 0..50 {
            let order_id = OrderId::new();
            engine
                .reserve(ReserveRequest::new(order_id, product_id, 1))
                .await
                .unwrap();
            broker
                .publish(InboundEvent::for_order("order.payment.completed", order_id))
                .await
                .unwrap();
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        shutdown_tx.send(true).unwrap();
        run_partition(
            receivers.remove(0),
            broker.clone(),
            Arc::new(processor),
            shutdown_rx,
        )
        .await;

        assert_eq!(broker.in_flight(), 0);
        assert_eq!(broker.acked_total(), 50);
        let entry = ledger.get(product_id).await.unwrap();
        assert_eq!(entry.reserved_quantity, 0);
        assert_eq!(entry.quantity, 50);
    }

    #[tokio::test]
    async fn unknown_events_are_acknowledged() {
        let (processor, _) = processor(InMemoryStockStore::new()).await;
        let outcome = processor
            .process(InboundEvent::new("user.registered", None, json!({})))
            .await;
        assert_eq!(outcome, ProcessOutcome::Handled(Handled::Logged));
        assert!(processor.dead_letters().is_empty());
    }
}
