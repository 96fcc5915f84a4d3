//! Reservation engine.
//!
//! Every mutating operation takes the product's exclusive lock through
//! [`StockStore::begin`], re-reads the reservation under that lock and
//! commits the ledger change, the reservation state and the movement as
//! one unit. Events and low-stock alerts are published after the commit.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use stock_store::{
    MovementRecord, MovementType, OrderId, ProductId, ReferenceType, Reservation, ReservationId,
    ReservationOwner, ReservationStatistics, ReservationStatus, ReservationType,
    StockLedgerEntry, StockStore, StockTransaction,
};

use crate::alerts::LowStockAlerts;
use crate::error::{InventoryError, Result};
use crate::events::InventoryEvent;
use crate::policy::ReservationPolicy;
use crate::publisher::{EventPublisher, publish_best_effort};

/// Actor recorded on movements written by background tasks.
pub const SYSTEM_ACTOR: &str = "SYSTEM";

/// Parameters for [`ReservationEngine::reserve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReserveRequest {
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub owner: ReservationOwner,

    /// Requested hold time; the policy default applies when absent.
    pub ttl: Option<Duration>,

    pub reservation_type: ReservationType,
}

impl ReserveRequest {
    /// A checkout reservation with the default hold time.
    pub fn new(order_id: OrderId, product_id: ProductId, quantity: i64) -> Self {
        Self {
            order_id,
            product_id,
            quantity,
            owner: ReservationOwner::default(),
            ttl: None,
            reservation_type: ReservationType::Checkout,
        }
    }

    pub fn owner(mut self, owner: ReservationOwner) -> Self {
        self.owner = owner;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn reservation_type(mut self, reservation_type: ReservationType) -> Self {
        self.reservation_type = reservation_type;
        self
    }
}

/// One product line of a multi-line order reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    pub product_id: ProductId,
    pub quantity: i64,
}

/// Outcome of committing or releasing an order's reservations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// These reservations changed state.
    Applied(Vec<Reservation>),

    /// Every reservation of the order was already in the requested state.
    AlreadyResolved,

    /// The order has no reservations.
    NotFound,
}

impl Resolution {
    pub fn reservations(&self) -> &[Reservation] {
        match self {
            Resolution::Applied(reservations) => reservations,
            _ => &[],
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Resolution::Applied(_))
    }
}

enum PoolReturn {
    Returned {
        reservation: Reservation,
        entry: StockLedgerEntry,
    },
    Skipped(ReservationStatus),
}

fn invalid_transition(
    reservation_id: ReservationId,
    from: ReservationStatus,
    to: ReservationStatus,
) -> InventoryError {
    InventoryError::InvalidStateTransition {
        reservation_id,
        from,
        to,
    }
}

fn record_rejection(reason: &'static str) {
    metrics::counter!("reservation_rejections_total", "reason" => reason).increment(1);
}

/// Reserves, commits, releases, expires and extends stock reservations.
pub struct ReservationEngine<S: StockStore> {
    store: Arc<S>,
    publisher: Arc<dyn EventPublisher>,
    alerts: Arc<LowStockAlerts<S>>,
    policy: ReservationPolicy,
}

impl<S: StockStore> ReservationEngine<S> {
    pub fn new(store: Arc<S>, publisher: Arc<dyn EventPublisher>) -> Self {
        let alerts = Arc::new(LowStockAlerts::new(store.clone(), publisher.clone()));
        Self {
            store,
            publisher,
            alerts,
            policy: ReservationPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ReservationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_alerts(mut self, alerts: Arc<LowStockAlerts<S>>) -> Self {
        self.alerts = alerts;
        self
    }

    pub fn policy(&self) -> &ReservationPolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Holds `quantity` units of a product for an order.
    ///
    /// Fails with `DuplicateReservation` (carrying the existing reservation)
    /// when the order already holds this product, and with
    /// `InsufficientStock` when not enough units are available.
    #[tracing::instrument(
        skip(self, request),
        fields(
            order_id = %request.order_id,
            product_id = %request.product_id,
            quantity = request.quantity
        )
    )]
    pub async fn reserve(&self, request: ReserveRequest) -> Result<Reservation> {
        if request.quantity <= 0 {
            record_rejection("invalid_quantity");
            return Err(InventoryError::InvalidQuantity(request.quantity));
        }

        let expires_at = self.policy.expiry_for(request.ttl, Utc::now());
        let mut tx = self.store.begin(request.product_id).await?;

        if let Some(existing) = tx.reservation_for_order(request.order_id).await? {
            record_rejection("duplicate");
            return Err(InventoryError::DuplicateReservation {
                existing: Box::new(existing),
            });
        }

        let mut entry = tx.entry().clone();
        if let Err(shortfall) = entry.reserve(request.quantity) {
            record_rejection("insufficient_stock");
            tracing::info!(
                requested = shortfall.requested,
                available = shortfall.available,
                "Insufficient stock for reservation"
            );
            return Err(InventoryError::InsufficientStock {
                product_id: request.product_id,
                requested: shortfall.requested,
                available: shortfall.available,
            });
        }

        let reservation = Reservation::new(
            request.order_id,
            request.product_id,
            request.quantity,
            request.owner,
            request.reservation_type,
            expires_at,
        );
        let mut movement =
            MovementRecord::new(request.product_id, MovementType::Reserved, -request.quantity)
                .reference(ReferenceType::Order, request.order_id.to_string())
                .reason("reserved for order");
        if let Some(who) = reservation.reserved_by() {
            movement = movement.performed_by(who);
        }

        tx.update_entry(entry).await?;
        tx.insert_reservation(&reservation).await?;
        tx.append_movement(&movement).await?;
        let entry = tx.commit().await?;

        metrics::counter!("reservations_created_total").increment(1);
        tracing::info!(
            reservation_id = %reservation.id,
            available = entry.available_quantity(),
            expires_at = %reservation.expires_at,
            "Stock reserved"
        );

        publish_best_effort(self.publisher.as_ref(), &InventoryEvent::reserved(&reservation))
            .await;
        self.alerts.check(&entry).await;

        Ok(reservation)
    }

    /// Reserves every line of an order independently.
    ///
    /// Lines the order already holds count as reserved. The call fails with
    /// the first error only when no line could be reserved.
    #[tracing::instrument(skip(self, lines, owner), fields(lines = lines.len()))]
    pub async fn reserve_order(
        &self,
        order_id: OrderId,
        lines: &[OrderLine],
        owner: ReservationOwner,
        ttl: Option<Duration>,
        reservation_type: ReservationType,
    ) -> Result<Vec<Reservation>> {
        let mut reserved = Vec::with_capacity(lines.len());
        let mut first_error = None;

        for line in lines {
            let request = ReserveRequest {
                order_id,
                product_id: line.product_id,
                quantity: line.quantity,
                owner: owner.clone(),
                ttl,
                reservation_type,
            };
            match self.reserve(request).await {
                Ok(reservation) => reserved.push(reservation),
                Err(InventoryError::DuplicateReservation { existing }) => reserved.push(*existing),
                Err(e) => {
                    tracing::warn!(product_id = %line.product_id, error = %e, "Order line not reserved");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) if reserved.is_empty() => Err(e),
            _ => Ok(reserved),
        }
    }

    /// Converts an order's active reservations into permanent deductions.
    ///
    /// Committing an order with released or expired reservations fails with
    /// `InvalidStateTransition` before anything is changed.
    #[tracing::instrument(skip(self))]
    pub async fn commit(&self, order_id: OrderId) -> Result<Resolution> {
        let reservations = self.store.reservations_for_order(order_id).await?;
        if reservations.is_empty() {
            tracing::debug!("No reservations to commit");
            return Ok(Resolution::NotFound);
        }

        if let Some(r) = reservations.iter().find(|r| {
            matches!(
                r.status,
                ReservationStatus::Released | ReservationStatus::Expired
            )
        }) {
            return Err(invalid_transition(
                r.id,
                r.status,
                ReservationStatus::Committed,
            ));
        }

        let mut applied = Vec::new();
        for reservation in reservations.iter().filter(|r| r.is_active()) {
            if let Some(committed) = self.commit_one(reservation).await? {
                applied.push(committed);
            }
        }

        if applied.is_empty() {
            Ok(Resolution::AlreadyResolved)
        } else {
            Ok(Resolution::Applied(applied))
        }
    }

    async fn commit_one(&self, reservation: &Reservation) -> Result<Option<Reservation>> {
        let mut tx = self.store.begin(reservation.product_id).await?;
        let mut current = tx
            .reservation(reservation.id)
            .await?
            .ok_or_else(|| InventoryError::ReservationNotFound(reservation.id.to_string()))?;

        if current.status == ReservationStatus::Committed {
            return Ok(None);
        }
        current
            .transition(ReservationStatus::Committed, Utc::now())
            .map_err(|t| invalid_transition(reservation.id, t.from, t.to))?;

        let mut entry = tx.entry().clone();
        let old_quantity = entry.quantity;
        entry.commit_reserved(current.quantity);

        let movement =
            MovementRecord::new(current.product_id, MovementType::Outbound, -current.quantity)
                .reference(ReferenceType::Order, current.order_id.to_string())
                .reason("reservation committed");

        tx.update_entry(entry).await?;
        tx.update_reservation(&current).await?;
        tx.append_movement(&movement).await?;
        let entry = tx.commit().await?;

        metrics::counter!("reservations_committed_total").increment(1);
        tracing::info!(
            reservation_id = %current.id,
            product_id = %current.product_id,
            quantity = current.quantity,
            "Reservation committed"
        );

        publish_best_effort(self.publisher.as_ref(), &InventoryEvent::committed(&current)).await;
        for event in InventoryEvent::stock_changed(old_quantity, &entry, Some("order committed")) {
            publish_best_effort(self.publisher.as_ref(), &event).await;
        }

        Ok(Some(current))
    }

    /// Returns an order's active reservations to the available pool.
    ///
    /// Released and expired reservations are skipped. A committed
    /// reservation cannot be released.
    #[tracing::instrument(skip(self))]
    pub async fn release(&self, order_id: OrderId, reason: &str) -> Result<Resolution> {
        let reservations = self.store.reservations_for_order(order_id).await?;
        if reservations.is_empty() {
            tracing::debug!("No reservations to release");
            return Ok(Resolution::NotFound);
        }

        if let Some(r) = reservations
            .iter()
            .find(|r| r.status == ReservationStatus::Committed)
        {
            return Err(invalid_transition(
                r.id,
                r.status,
                ReservationStatus::Released,
            ));
        }

        let now = Utc::now();
        let mut applied = Vec::new();
        for reservation in reservations.iter().filter(|r| r.is_active()) {
            match self
                .return_to_pool(reservation, ReservationStatus::Released, reason, None, now)
                .await?
            {
                PoolReturn::Returned { reservation, entry } => {
                    self.after_release(&reservation, &entry, reason).await;
                    applied.push(reservation);
                }
                PoolReturn::Skipped(ReservationStatus::Committed) => {
                    return Err(invalid_transition(
                        reservation.id,
                        ReservationStatus::Committed,
                        ReservationStatus::Released,
                    ));
                }
                PoolReturn::Skipped(_) => {}
            }
        }

        if applied.is_empty() {
            Ok(Resolution::AlreadyResolved)
        } else {
            Ok(Resolution::Applied(applied))
        }
    }

    /// Releases every active reservation held by a cart session.
    ///
    /// Best effort: a reservation that fails to release is logged and skipped.
    #[tracing::instrument(skip(self))]
    pub async fn release_for_session(
        &self,
        session_id: &str,
        reason: &str,
    ) -> Result<Vec<Reservation>> {
        let reservations = self.store.active_reservations_for_session(session_id).await?;
        let now = Utc::now();
        let mut released = Vec::new();

        for reservation in &reservations {
            match self
                .return_to_pool(reservation, ReservationStatus::Released, reason, None, now)
                .await
            {
                Ok(PoolReturn::Returned { reservation, entry }) => {
                    self.after_release(&reservation, &entry, reason).await;
                    released.push(reservation);
                }
                Ok(PoolReturn::Skipped(_)) => {}
                Err(e) => {
                    tracing::warn!(
                        reservation_id = %reservation.id,
                        error = %e,
                        "Failed to release session reservation"
                    );
                }
            }
        }

        Ok(released)
    }

    /// Expires one reservation if it is still active and past its expiry time.
    ///
    /// Returns false when another path resolved or extended it first.
    #[tracing::instrument(skip(self))]
    pub async fn expire(&self, reservation_id: ReservationId, now: DateTime<Utc>) -> Result<bool> {
        let Some(reservation) = self.store.get_reservation(reservation_id).await? else {
            return Ok(false);
        };
        if !reservation.is_active() {
            return Ok(false);
        }

        match self
            .return_to_pool(
                &reservation,
                ReservationStatus::Expired,
                "reservation expired",
                Some(SYSTEM_ACTOR),
                now,
            )
            .await?
        {
            PoolReturn::Returned { reservation, entry } => {
                metrics::counter!("reservations_expired_total").increment(1);
                tracing::info!(
                    product_id = %reservation.product_id,
                    order_id = %reservation.order_id,
                    quantity = reservation.quantity,
                    "Reservation expired"
                );
                publish_best_effort(
                    self.publisher.as_ref(),
                    &InventoryEvent::expired(&reservation),
                )
                .await;
                self.alerts.check(&entry).await;
                Ok(true)
            }
            PoolReturn::Skipped(status) => {
                tracing::debug!(status = %status, "Reservation no longer expirable");
                Ok(false)
            }
        }
    }

    async fn return_to_pool(
        &self,
        reservation: &Reservation,
        target: ReservationStatus,
        reason: &str,
        performed_by: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<PoolReturn> {
        let mut tx = self.store.begin(reservation.product_id).await?;
        let mut current = tx
            .reservation(reservation.id)
            .await?
            .ok_or_else(|| InventoryError::ReservationNotFound(reservation.id.to_string()))?;

        if !current.is_active() {
            return Ok(PoolReturn::Skipped(current.status));
        }
        if target == ReservationStatus::Expired && !current.is_past_expiry(now) {
            return Ok(PoolReturn::Skipped(current.status));
        }
        current
            .transition(target, now)
            .map_err(|t| invalid_transition(reservation.id, t.from, t.to))?;

        let mut entry = tx.entry().clone();
        entry.release_reserved(current.quantity);

        let mut movement = MovementRecord::new(
            current.product_id,
            MovementType::ReservationReleased,
            current.quantity,
        )
        .reference(ReferenceType::Order, current.order_id.to_string())
        .reason(reason);
        if let Some(who) = performed_by {
            movement = movement.performed_by(who);
        }

        tx.update_entry(entry).await?;
        tx.update_reservation(&current).await?;
        tx.append_movement(&movement).await?;
        let entry = tx.commit().await?;

        Ok(PoolReturn::Returned {
            reservation: current,
            entry,
        })
    }

    async fn after_release(
        &self,
        reservation: &Reservation,
        entry: &StockLedgerEntry,
        reason: &str,
    ) {
        metrics::counter!("reservations_released_total").increment(1);
        tracing::info!(
            reservation_id = %reservation.id,
            product_id = %reservation.product_id,
            quantity = reservation.quantity,
            reason,
            "Reservation released"
        );
        publish_best_effort(
            self.publisher.as_ref(),
            &InventoryEvent::released(reservation, reason),
        )
        .await;
        self.alerts.check(entry).await;
    }

    /// Pushes out the expiry of an active reservation.
    ///
    /// Only allowed while the remaining hold time is below the policy's
    /// extension window; never past the maximum hold time.
    #[tracing::instrument(skip(self))]
    pub async fn extend(
        &self,
        reservation_id: ReservationId,
        additional: Duration,
    ) -> Result<Reservation> {
        let reservation = self.reservation(reservation_id).await?;

        let mut tx = self.store.begin(reservation.product_id).await?;
        let mut current = tx
            .reservation(reservation_id)
            .await?
            .ok_or_else(|| InventoryError::ReservationNotFound(reservation_id.to_string()))?;

        let now = Utc::now();
        let expires_at = self
            .policy
            .extended_expiry(&current, additional, now)
            .map_err(|reason| InventoryError::ExtensionNotAllowed {
                reservation_id,
                reason,
            })?;

        current.expires_at = expires_at;
        current.updated_at = now;
        tx.update_reservation(&current).await?;
        tx.commit().await?;

        tracing::info!(expires_at = %expires_at, "Reservation extended");
        Ok(current)
    }

    pub async fn reservation(&self, reservation_id: ReservationId) -> Result<Reservation> {
        self.store
            .get_reservation(reservation_id)
            .await?
            .ok_or_else(|| InventoryError::ReservationNotFound(reservation_id.to_string()))
    }

    pub async fn reservations_for_order(&self, order_id: OrderId) -> Result<Vec<Reservation>> {
        Ok(self.store.reservations_for_order(order_id).await?)
    }

    pub async fn statistics(&self) -> Result<ReservationStatistics> {
        Ok(self.store.reservation_statistics().await?)
    }

    /// Active reservations held by a user, a session, or either.
    ///
    /// A reservation owned by both is returned once. Newest first.
    pub async fn active_reservations(
        &self,
        user_id: Option<&str>,
        session_id: Option<&str>,
    ) -> Result<Vec<Reservation>> {
        let mut reservations = match user_id {
            Some(user_id) => self.store.active_reservations_for_user(user_id).await?,
            None => Vec::new(),
        };
        if let Some(session_id) = session_id {
            for reservation in self.store.active_reservations_for_session(session_id).await? {
                if !reservations.iter().any(|r| r.id == reservation.id) {
                    reservations.push(reservation);
                }
            }
        }
        reservations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(reservations)
    }

    /// Active reservations past their expiry time, oldest first.
    pub async fn expired_reservations(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reservation>> {
        Ok(self.store.expired_reservations(now, limit).await?)
    }
}
