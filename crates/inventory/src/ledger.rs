//! Stock ledger operations.

use std::sync::Arc;

use futures_util::TryStreamExt;
use serde::{Deserialize, Serialize};
use stock_store::{
    AdjustError, DEFAULT_MAX_STOCK_LEVEL, DEFAULT_REORDER_LEVEL, InventoryStatistics,
    MovementQuery, MovementRecord, MovementType, ProductId, ReferenceType, StockLedgerEntry,
    StockStatus, StockStore, StockTransaction, StoreError,
};

use crate::alerts::LowStockAlerts;
use crate::error::{InventoryError, Result};
use crate::events::InventoryEvent;
use crate::publisher::{EventPublisher, publish_best_effort};

/// Stock status as reported by availability checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AvailabilityStatus {
    InStock,
    LowStock,
    OutOfStock,
    /// The product has no ledger entry.
    NotTracked,
}

impl From<StockStatus> for AvailabilityStatus {
    fn from(status: StockStatus) -> Self {
        match status {
            StockStatus::InStock => AvailabilityStatus::InStock,
            StockStatus::LowStock => AvailabilityStatus::LowStock,
            StockStatus::OutOfStock => AvailabilityStatus::OutOfStock,
        }
    }
}

/// Answer to "can this many units be sold right now?".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Availability {
    pub product_id: ProductId,
    pub requested_quantity: i64,
    pub available: bool,
    pub available_quantity: i64,
    pub total_quantity: i64,
    pub reserved_quantity: i64,
    pub stock_status: AvailabilityStatus,

    /// What could be sold instead when the request cannot be met.
    pub suggested_quantity: Option<i64>,
}

impl Availability {
    fn for_entry(entry: &StockLedgerEntry, requested: i64) -> Self {
        let available_quantity = entry.available_quantity();
        let available = available_quantity >= requested;
        Self {
            product_id: entry.product_id,
            requested_quantity: requested,
            available,
            available_quantity,
            total_quantity: entry.quantity,
            reserved_quantity: entry.reserved_quantity,
            stock_status: entry.stock_status().into(),
            suggested_quantity: (!available).then_some(available_quantity),
        }
    }

    fn not_tracked(product_id: ProductId, requested: i64) -> Self {
        Self {
            product_id,
            requested_quantity: requested,
            available: false,
            available_quantity: 0,
            total_quantity: 0,
            reserved_quantity: 0,
            stock_status: AvailabilityStatus::NotTracked,
            suggested_quantity: None,
        }
    }
}

/// One line of a bulk availability check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityRequest {
    pub product_id: ProductId,
    pub quantity: i64,
}

/// Parameters for [`StockLedger::create_or_initialize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeStock {
    pub product_id: ProductId,
    #[serde(default)]
    pub initial_quantity: i64,
    pub reorder_level: Option<i64>,
    pub max_stock_level: Option<i64>,
}

impl InitializeStock {
    /// Zero stock with the default thresholds.
    pub fn empty(product_id: ProductId) -> Self {
        Self {
            product_id,
            initial_quantity: 0,
            reorder_level: None,
            max_stock_level: None,
        }
    }
}

/// Result of [`StockLedger::create_or_initialize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Initialized {
    pub entry: StockLedgerEntry,

    /// False when the entry already existed and was left untouched.
    pub created: bool,
}

/// Comparison of the ledger quantity with the movement log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reconciliation {
    pub product_id: ProductId,
    pub ledger_quantity: i64,
    pub movement_total: i64,
    pub movement_count: u64,
    pub consistent: bool,
}

/// Reads and administrative mutations of the stock ledger.
///
/// Every mutation runs inside a [`StockTransaction`], so it holds the
/// product's exclusive lock and writes its movement in the same unit.
pub struct StockLedger<S: StockStore> {
    store: Arc<S>,
    publisher: Arc<dyn EventPublisher>,
    alerts: Arc<LowStockAlerts<S>>,
}

impl<S: StockStore> StockLedger<S> {
    pub fn new(store: Arc<S>, publisher: Arc<dyn EventPublisher>) -> Self {
        let alerts = Arc::new(LowStockAlerts::new(store.clone(), publisher.clone()));
        Self {
            store,
            publisher,
            alerts,
        }
    }

    /// Shares one alerting instance (and its configuration) with other components.
    pub fn with_alerts(mut self, alerts: Arc<LowStockAlerts<S>>) -> Self {
        self.alerts = alerts;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn alerts(&self) -> &Arc<LowStockAlerts<S>> {
        &self.alerts
    }

    #[tracing::instrument(skip(self))]
    pub async fn get(&self, product_id: ProductId) -> Result<StockLedgerEntry> {
        self.store
            .get_entry(product_id)
            .await?
            .ok_or(InventoryError::ProductNotFound(product_id))
    }

    /// Returns the entries that exist; unknown products are left out.
    pub async fn bulk_get(&self, product_ids: &[ProductId]) -> Result<Vec<StockLedgerEntry>> {
        Ok(self.store.get_entries(product_ids).await?)
    }

    /// Creates the entry for a product unless it already exists.
    ///
    /// A positive initial quantity is recorded as an INBOUND movement.
    #[tracing::instrument(skip(self))]
    pub async fn create_or_initialize(&self, params: InitializeStock) -> Result<Initialized> {
        if params.initial_quantity < 0 {
            return Err(InventoryError::InvalidQuantity(params.initial_quantity));
        }
        let reorder_level = params.reorder_level.unwrap_or(DEFAULT_REORDER_LEVEL);
        let max_stock_level = params.max_stock_level.unwrap_or(DEFAULT_MAX_STOCK_LEVEL);
        for level in [reorder_level, max_stock_level] {
            if level < 0 {
                return Err(InventoryError::InvalidQuantity(level));
            }
        }

        let entry = StockLedgerEntry::new(
            params.product_id,
            params.initial_quantity,
            reorder_level,
            max_stock_level,
        );
        let movement = (params.initial_quantity > 0).then(|| {
            MovementRecord::new(
                params.product_id,
                MovementType::Inbound,
                params.initial_quantity,
            )
            .reference(ReferenceType::System, params.product_id.to_string())
            .reason("initial stock")
        });

        let created = self.store.create_entry(entry, movement).await?;
        let entry = self.get(params.product_id).await?;

        if created {
            tracing::info!(
                product_id = %params.product_id,
                quantity = entry.quantity,
                "Initialized stock ledger entry"
            );
            if entry.quantity > 0 {
                self.publish_all(InventoryEvent::stock_changed(0, &entry, Some("initial stock")))
                    .await;
            }
        } else {
            tracing::debug!(product_id = %params.product_id, "Stock ledger entry already exists");
        }

        Ok(Initialized { entry, created })
    }

    /// Applies a signed correction to the owned quantity.
    ///
    /// Fails with `InsufficientStock` when the result would drop below the
    /// reserved quantity.
    #[tracing::instrument(skip(self))]
    pub async fn adjust_quantity(
        &self,
        product_id: ProductId,
        delta: i64,
        reason: &str,
        performed_by: Option<&str>,
    ) -> Result<StockLedgerEntry> {
        if delta == 0 {
            return Err(InventoryError::InvalidQuantity(delta));
        }

        let mut movement = MovementRecord::new(product_id, MovementType::Adjustment, delta)
            .reference(ReferenceType::Admin, product_id.to_string())
            .reason(reason);
        if let Some(who) = performed_by {
            movement = movement.performed_by(who);
        }

        self.change_quantity(product_id, delta, movement, "adjustment")
            .await
    }

    /// Adds received units and records an INBOUND movement.
    #[tracing::instrument(skip(self))]
    pub async fn receive_stock(
        &self,
        product_id: ProductId,
        quantity: i64,
        reference: Option<&str>,
        performed_by: Option<&str>,
    ) -> Result<StockLedgerEntry> {
        if quantity <= 0 {
            return Err(InventoryError::InvalidQuantity(quantity));
        }

        let mut movement = MovementRecord::new(product_id, MovementType::Inbound, quantity)
            .reason("stock received");
        if let Some(reference) = reference {
            movement = movement.reference(ReferenceType::Admin, reference);
        }
        if let Some(who) = performed_by {
            movement = movement.performed_by(who);
        }

        self.change_quantity(product_id, quantity, movement, "inbound")
            .await
    }

    async fn change_quantity(
        &self,
        product_id: ProductId,
        delta: i64,
        movement: MovementRecord,
        kind: &'static str,
    ) -> Result<StockLedgerEntry> {
        let mut tx = self.store.begin(product_id).await?;
        let mut entry = tx.entry().clone();
        let old_quantity = entry.quantity;

        entry.adjust(delta).map_err(|e| match e {
            AdjustError::Shortfall(shortfall) => InventoryError::InsufficientStock {
                product_id,
                requested: shortfall.requested,
                available: shortfall.available,
            },
            AdjustError::OutOfRange => InventoryError::InvalidQuantity(delta),
        })?;

        tx.update_entry(entry).await?;
        tx.append_movement(&movement).await?;
        let entry = tx.commit().await?;

        metrics::counter!("stock_adjustments_total", "type" => kind).increment(1);
        tracing::info!(
            product_id = %product_id,
            old_quantity,
            new_quantity = entry.quantity,
            "Stock quantity changed"
        );

        self.publish_all(InventoryEvent::stock_changed(
            old_quantity,
            &entry,
            movement.reason.as_deref(),
        ))
        .await;
        self.alerts.check(&entry).await;

        Ok(entry)
    }

    /// Changes the reorder level; quantities are untouched.
    #[tracing::instrument(skip(self))]
    pub async fn set_reorder_level(
        &self,
        product_id: ProductId,
        reorder_level: i64,
        performed_by: Option<&str>,
    ) -> Result<StockLedgerEntry> {
        if reorder_level < 0 {
            return Err(InventoryError::InvalidQuantity(reorder_level));
        }
        self.change_threshold(product_id, performed_by, |entry| {
            let reason = format!(
                "reorder level changed from {} to {}",
                entry.reorder_level, reorder_level
            );
            entry.reorder_level = reorder_level;
            reason
        })
        .await
    }

    /// Changes the maximum stock level; quantities are untouched.
    #[tracing::instrument(skip(self))]
    pub async fn set_max_stock_level(
        &self,
        product_id: ProductId,
        max_stock_level: i64,
        performed_by: Option<&str>,
    ) -> Result<StockLedgerEntry> {
        if max_stock_level < 0 {
            return Err(InventoryError::InvalidQuantity(max_stock_level));
        }
        self.change_threshold(product_id, performed_by, |entry| {
            let reason = format!(
                "max stock level changed from {} to {}",
                entry.max_stock_level, max_stock_level
            );
            entry.max_stock_level = max_stock_level;
            reason
        })
        .await
    }

    async fn change_threshold<F>(
        &self,
        product_id: ProductId,
        performed_by: Option<&str>,
        apply: F,
    ) -> Result<StockLedgerEntry>
    where
        F: FnOnce(&mut StockLedgerEntry) -> String + Send,
    {
        let mut tx = self.store.begin(product_id).await?;
        let mut entry = tx.entry().clone();
        let reason = apply(&mut entry);

        let mut movement = MovementRecord::new(product_id, MovementType::Adjustment, 0)
            .reference(ReferenceType::Admin, product_id.to_string())
            .reason(reason);
        if let Some(who) = performed_by {
            movement = movement.performed_by(who);
        }

        tx.update_entry(entry).await?;
        tx.append_movement(&movement).await?;
        let entry = tx.commit().await?;

        tracing::info!(
            product_id = %product_id,
            reorder_level = entry.reorder_level,
            max_stock_level = entry.max_stock_level,
            "Stock thresholds changed"
        );
        Ok(entry)
    }

    /// Checks whether `quantity` units can be sold.
    ///
    /// An untracked product is answered with `NOT_TRACKED` rather than an error.
    #[tracing::instrument(skip(self))]
    pub async fn check_availability(
        &self,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<Availability> {
        if quantity <= 0 {
            return Err(InventoryError::InvalidQuantity(quantity));
        }
        Ok(match self.store.get_entry(product_id).await? {
            Some(entry) => Availability::for_entry(&entry, quantity),
            None => Availability::not_tracked(product_id, quantity),
        })
    }

    pub async fn bulk_check_availability(
        &self,
        items: &[AvailabilityRequest],
    ) -> Result<Vec<Availability>> {
        if let Some(bad) = items.iter().find(|i| i.quantity <= 0) {
            return Err(InventoryError::InvalidQuantity(bad.quantity));
        }

        let ids: Vec<ProductId> = items.iter().map(|i| i.product_id).collect();
        let entries = self.store.get_entries(&ids).await?;

        Ok(items
            .iter()
            .map(|item| {
                entries
                    .iter()
                    .find(|e| e.product_id == item.product_id)
                    .map(|e| Availability::for_entry(e, item.quantity))
                    .unwrap_or_else(|| Availability::not_tracked(item.product_id, item.quantity))
            })
            .collect())
    }

    /// Entries at or below their reorder level, lowest available first.
    pub async fn low_stock(&self) -> Result<Vec<StockLedgerEntry>> {
        Ok(self.store.low_stock_entries().await?)
    }

    /// Product counts by stock status and quantity totals across the ledger.
    pub async fn statistics(&self) -> Result<InventoryStatistics> {
        Ok(self.store.inventory_statistics().await?)
    }

    pub async fn movements(&self, query: MovementQuery) -> Result<Vec<MovementRecord>> {
        Ok(self.store.query_movements(query).await?)
    }

    /// Sums every quantity-affecting movement and compares it with the ledger.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile(&self, product_id: ProductId) -> Result<Reconciliation> {
        let entry = self.get(product_id).await?;

        let (movement_total, movement_count) = self
            .store
            .stream_movements(product_id)
            .await?
            .try_fold((0i64, 0u64), |(total, count), movement| async move {
                Ok::<_, StoreError>((total + movement.quantity_effect(), count + 1))
            })
            .await?;

        let consistent = movement_total == entry.quantity;
        if !consistent {
            tracing::warn!(
                product_id = %product_id,
                ledger_quantity = entry.quantity,
                movement_total,
                "Ledger quantity does not match the movement log"
            );
        }

        Ok(Reconciliation {
            product_id,
            ledger_quantity: entry.quantity,
            movement_total,
            movement_count,
            consistent,
        })
    }

    async fn publish_all(&self, events: Vec<InventoryEvent>) {
        for event in &events {
            publish_best_effort(self.publisher.as_ref(), event).await;
        }
    }
}
