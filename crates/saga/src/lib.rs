//! Event-driven consistency between order lifecycles and stock.
//!
//! Inbound order, cart and product events are routed through a partitioned
//! in-process broker, decoded, and applied to the reservation engine and
//! stock ledger. Critical events are retried with backoff and parked in a
//! dead-letter queue when they keep failing.

pub mod broker;
pub mod consumer;
pub mod coordinator;
pub mod dead_letter;
pub mod error;
pub mod events;
pub mod retry;

pub use broker::{Delivery, EventBroker, PartitionReceiver};
pub use consumer::{EventProcessor, ProcessOutcome, run_partition, spawn_consumers};
pub use coordinator::{Handled, SagaCoordinator};
pub use dead_letter::{DeadLetter, DeadLetterQueue, DeadLetterStatus};
pub use error::{Result, SagaError};
pub use events::{
    CART_EVENTS_TOPIC, InboundEvent, LifecycleEvent, ORDER_EVENTS_TOPIC, PRODUCT_EVENTS_TOPIC,
};
pub use retry::{Exhausted, RetryPolicy, retry_with_predicate};
