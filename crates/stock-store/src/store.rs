use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    AlertStatistics, AlertStatus, LowStockAlert, MovementQuery, MovementRecord, OrderId,
    ProductId, Reservation, ReservationId, ReservationStatus, Result, StockLedgerEntry,
    StockStatus,
};

/// A stream of movement records.
pub type MovementStream = Pin<Box<dyn Stream<Item = Result<MovementRecord>> + Send>>;

/// Reservation counts grouped by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationStatistics {
    pub total: u64,
    pub active: u64,
    pub committed: u64,
    pub released: u64,
    pub expired: u64,
}

impl ReservationStatistics {
    /// Counts one reservation in the given state.
    pub fn record(&mut self, status: ReservationStatus, count: u64) {
        self.total += count;
        match status {
            ReservationStatus::Active => self.active += count,
            ReservationStatus::Committed => self.committed += count,
            ReservationStatus::Released => self.released += count,
            ReservationStatus::Expired => self.expired += count,
        }
    }
}

/// Stock totals across every tracked product.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryStatistics {
    pub total_products: u64,
    pub in_stock_products: u64,
    pub low_stock_products: u64,
    pub out_of_stock_products: u64,
    pub total_quantity: i64,
    pub total_reserved_quantity: i64,
    pub total_available_quantity: i64,
}

impl InventoryStatistics {
    pub fn record(&mut self, entry: &StockLedgerEntry) {
        self.total_products += 1;
        match entry.stock_status() {
            StockStatus::InStock => self.in_stock_products += 1,
            StockStatus::LowStock => self.low_stock_products += 1,
            StockStatus::OutOfStock => self.out_of_stock_products += 1,
        }
        self.total_quantity = self.total_quantity.saturating_add(entry.quantity);
        self.total_reserved_quantity = self
            .total_reserved_quantity
            .saturating_add(entry.reserved_quantity);
        self.total_available_quantity = self
            .total_available_quantity
            .saturating_add(entry.available_quantity());
    }
}

/// Durable storage for the stock ledger, reservations, the movement log
/// and low-stock alerts.
///
/// Reads never lock. Every mutation of a ledger entry goes through
/// [`StockStore::begin`], which hands out an exclusive per-product
/// [`StockTransaction`]. All implementations must be thread-safe.
#[async_trait]
pub trait StockStore: Send + Sync {
    type Transaction: StockTransaction;

    /// Acquires the exclusive lock on a product's ledger row.
    ///
    /// The lock is held until the returned transaction is committed or
    /// dropped. Dropping without committing discards every staged write.
    /// Fails with `LockTimeout` when the lock is not granted in time and
    /// with `EntryNotFound` when the product is not tracked.
    async fn begin(&self, product_id: ProductId) -> Result<Self::Transaction>;

    /// Inserts a ledger entry unless one already exists for the product.
    ///
    /// The optional movement is written atomically with the entry.
    /// Returns true if the entry was created.
    async fn create_entry(
        &self,
        entry: StockLedgerEntry,
        initial_movement: Option<MovementRecord>,
    ) -> Result<bool>;

    async fn get_entry(&self, product_id: ProductId) -> Result<Option<StockLedgerEntry>>;

    /// Returns the entries that exist among the given products, ordered by product id.
    async fn get_entries(&self, product_ids: &[ProductId]) -> Result<Vec<StockLedgerEntry>>;

    /// Returns entries whose available quantity is at or below their reorder level.
    async fn low_stock_entries(&self) -> Result<Vec<StockLedgerEntry>>;

    async fn inventory_statistics(&self) -> Result<InventoryStatistics>;

    async fn get_reservation(&self, id: ReservationId) -> Result<Option<Reservation>>;

    /// Returns every reservation of an order, in creation order.
    async fn reservations_for_order(&self, order_id: OrderId) -> Result<Vec<Reservation>>;

    /// Returns active reservations held by a cart session.
    async fn active_reservations_for_session(&self, session_id: &str)
    -> Result<Vec<Reservation>>;

    /// Returns active reservations held by a signed-in user.
    async fn active_reservations_for_user(&self, user_id: &str) -> Result<Vec<Reservation>>;

    /// Returns active reservations whose expiry time is at or before `now`,
    /// oldest expiry first.
    async fn expired_reservations(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reservation>>;

    async fn reservation_statistics(&self) -> Result<ReservationStatistics>;

    /// Retrieves movements matching a query, oldest first.
    async fn query_movements(&self, query: MovementQuery) -> Result<Vec<MovementRecord>>;

    /// Streams every movement of a product, oldest first.
    async fn stream_movements(&self, product_id: ProductId) -> Result<MovementStream>;

    /// Stores an alert unless the product already has a PENDING alert
    /// created at or after `suppress_since`.
    ///
    /// The check and the insert are atomic per product. Returns true if stored.
    async fn record_alert(
        &self,
        alert: &LowStockAlert,
        suppress_since: DateTime<Utc>,
    ) -> Result<bool>;

    async fn get_alert(&self, id: Uuid) -> Result<Option<LowStockAlert>>;

    /// Lists alerts newest first, optionally filtered by status and product.
    async fn list_alerts(
        &self,
        status: Option<AlertStatus>,
        product_id: Option<ProductId>,
    ) -> Result<Vec<LowStockAlert>>;

    /// Replaces a stored alert if its status is still `expected`.
    ///
    /// Returns false when the alert is missing or was changed concurrently.
    async fn update_alert(&self, alert: &LowStockAlert, expected: AlertStatus) -> Result<bool>;

    async fn alert_statistics(&self) -> Result<AlertStatistics>;
}

/// An exclusive unit of work on one product's ledger row.
///
/// Reservations and movements written here belong to the locked product.
/// Nothing becomes visible to other readers before [`StockTransaction::commit`].
#[async_trait]
pub trait StockTransaction: Send + Sized {
    /// The locked entry, including updates staged in this transaction.
    fn entry(&self) -> &StockLedgerEntry;

    /// Finds this product's reservation for an order.
    async fn reservation_for_order(&mut self, order_id: OrderId) -> Result<Option<Reservation>>;

    /// Finds a reservation of this product by id.
    async fn reservation(&mut self, id: ReservationId) -> Result<Option<Reservation>>;

    /// Replaces the ledger entry. The version is bumped by the store.
    async fn update_entry(&mut self, entry: StockLedgerEntry) -> Result<()>;

    async fn insert_reservation(&mut self, reservation: &Reservation) -> Result<()>;

    async fn update_reservation(&mut self, reservation: &Reservation) -> Result<()>;

    async fn append_movement(&mut self, movement: &MovementRecord) -> Result<()>;

    /// Makes every write durable and releases the lock.
    async fn commit(self) -> Result<StockLedgerEntry>;
}
