//! Dispatch of lifecycle events to the reservation engine and stock ledger.

use std::sync::Arc;

use inventory::{InitializeStock, ReservationEngine, Resolution, StockLedger};
use stock_store::StockStore;

use crate::error::Result;
use crate::events::LifecycleEvent;

/// What handling an event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    /// Stock or reservation state changed.
    Applied,
    /// The event was already applied or had nothing to act on.
    NoOp,
    /// The event was only logged.
    Logged,
}

impl Handled {
    pub fn as_str(&self) -> &'static str {
        match self {
            Handled::Applied => "applied",
            Handled::NoOp => "noop",
            Handled::Logged => "logged",
        }
    }
}

fn resolution(outcome: Resolution) -> Handled {
    match outcome {
        Resolution::Applied(_) => Handled::Applied,
        Resolution::AlreadyResolved | Resolution::NotFound => Handled::NoOp,
    }
}

/// Keeps stock consistent with order, cart and product lifecycles.
///
/// | Event | Action |
/// |---|---|
/// | `order.payment.completed` | commit the order's reservations |
/// | `order.payment.failed` | release them |
/// | `order.cancelled` | release them |
/// | `cart.abandoned` | best-effort release of the session's reservations |
/// | `cart.item.added/updated` | availability check, warn on shortage |
/// | `product.created` | initialize the ledger entry |
///
/// Everything else is logged. Every handler is idempotent per order id.
pub struct SagaCoordinator<S: StockStore> {
    engine: Arc<ReservationEngine<S>>,
    ledger: Arc<StockLedger<S>>,
}

impl<S: StockStore> SagaCoordinator<S> {
    pub fn new(engine: Arc<ReservationEngine<S>>, ledger: Arc<StockLedger<S>>) -> Self {
        Self { engine, ledger }
    }

    #[tracing::instrument(skip(self), fields(event = event.name()))]
    pub async fn handle(&self, event: &LifecycleEvent) -> Result<Handled> {
        match event {
            LifecycleEvent::PaymentCompleted { order_id } => {
                let outcome = self.engine.commit(*order_id).await?;
                if outcome == Resolution::NotFound {
                    tracing::info!(order_id = %order_id, "Payment completed for order without reservations");
                }
                Ok(resolution(outcome))
            }
            LifecycleEvent::PaymentFailed { order_id, reason } => {
                let reason = reason.as_deref().unwrap_or("payment failed");
                Ok(resolution(self.engine.release(*order_id, reason).await?))
            }
            LifecycleEvent::OrderCancelled { order_id, reason } => {
                let reason = reason.as_deref().unwrap_or("order cancelled");
                Ok(resolution(self.engine.release(*order_id, reason).await?))
            }
            LifecycleEvent::CartAbandoned { session_id } => {
                match self
                    .engine
                    .release_for_session(session_id, "cart abandoned")
                    .await
                {
                    Ok(released) if !released.is_empty() => Ok(Handled::Applied),
                    Ok(_) => Ok(Handled::NoOp),
                    Err(e) => {
                        tracing::warn!(session_id = %session_id, error = %e, "Failed to release abandoned cart");
                        Ok(Handled::NoOp)
                    }
                }
            }
            LifecycleEvent::CartItemChanged {
                session_id,
                product_id,
                quantity,
            } => {
                match self.ledger.check_availability(*product_id, *quantity).await {
                    Ok(availability) if !availability.available => {
                        tracing::warn!(
                            session_id = session_id.as_deref().unwrap_or_default(),
                            product_id = %product_id,
                            requested = quantity,
                            available = availability.available_quantity,
                            status = ?availability.stock_status,
                            "Cart requests more than is available"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(product_id = %product_id, error = %e, "Availability check failed");
                    }
                }
                Ok(Handled::Logged)
            }
            LifecycleEvent::ProductCreated { product_id } => {
                let initialized = self
                    .ledger
                    .create_or_initialize(InitializeStock::empty(*product_id))
                    .await?;
                Ok(if initialized.created {
                    Handled::Applied
                } else {
                    Handled::NoOp
                })
            }
            LifecycleEvent::OrderCreated { order_id }
            | LifecycleEvent::OrderConfirmed { order_id } => {
                tracing::info!(order_id = %order_id, "Order lifecycle event");
                Ok(Handled::Logged)
            }
            LifecycleEvent::CartConverted { session_id } => {
                tracing::info!(session_id = session_id.as_deref().unwrap_or_default(), "Cart converted to order");
                Ok(Handled::Logged)
            }
            LifecycleEvent::ProductChanged {
                event_type,
                product_id,
            } => {
                tracing::info!(event_type = %event_type, product_id = ?product_id, "Product event");
                Ok(Handled::Logged)
            }
            LifecycleEvent::Unknown { event_type } => {
                tracing::info!(event_type = %event_type, "Ignoring unknown event type");
                Ok(Handled::Logged)
            }
        }
    }
}
