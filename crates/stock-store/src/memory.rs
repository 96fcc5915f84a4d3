use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use crate::{
    AlertStatistics, AlertStatus, InventoryStatistics, LowStockAlert, MovementQuery,
    MovementRecord, OrderId, ProductId, Reservation, ReservationId, ReservationStatistics,
    Result, StockLedgerEntry, StoreError, Version,
    store::{MovementStream, StockStore, StockTransaction},
};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct MemoryState {
    ledger: HashMap<ProductId, StockLedgerEntry>,
    reservations: HashMap<ReservationId, Reservation>,
    movements: Vec<MovementRecord>,
    alerts: Vec<LowStockAlert>,
}

impl MemoryState {
    fn has_reservation(&self, order_id: OrderId, product_id: ProductId) -> bool {
        self.reservations
            .values()
            .any(|r| r.order_id == order_id && r.product_id == product_id)
    }
}

/// In-memory stock store for tests and single-process deployments.
///
/// Each product has its own async mutex standing in for the database row
/// lock, so operations on different products never contend.
#[derive(Clone)]
pub struct InMemoryStockStore {
    state: Arc<RwLock<MemoryState>>,
    locks: Arc<Mutex<HashMap<ProductId, Arc<Mutex<()>>>>>,
    lock_timeout: Duration,
}

impl Default for InMemoryStockStore {
    fn default() -> Self {
        Self {
            state: Arc::default(),
            locks: Arc::default(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

impl InMemoryStockStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how long `begin` waits for a product lock before giving up.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Returns the total number of movements recorded.
    pub async fn movement_count(&self) -> usize {
        self.state.read().await.movements.len()
    }

    /// Clears all entries, reservations, movements and alerts.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.ledger.clear();
        state.reservations.clear();
        state.movements.clear();
        state.alerts.clear();
    }

    async fn product_lock(&self, product_id: ProductId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(product_id).or_default().clone()
    }
}

#[async_trait]
impl StockStore for InMemoryStockStore {
    type Transaction = InMemoryTransaction;

    async fn begin(&self, product_id: ProductId) -> Result<InMemoryTransaction> {
        let lock = self.product_lock(product_id).await;
        let started = Instant::now();
        let permit = tokio::time::timeout(self.lock_timeout, lock.lock_owned())
            .await
            .map_err(|_| StoreError::LockTimeout { product_id })?;
        metrics::histogram!("stock_lock_wait_seconds").record(started.elapsed().as_secs_f64());

        let entry = self
            .state
            .read()
            .await
            .ledger
            .get(&product_id)
            .cloned()
            .ok_or(StoreError::EntryNotFound(product_id))?;

        Ok(InMemoryTransaction {
            state: self.state.clone(),
            base_version: entry.version,
            entry,
            entry_changed: false,
            inserted: Vec::new(),
            updated: HashMap::new(),
            movements: Vec::new(),
            _permit: permit,
        })
    }

    async fn create_entry(
        &self,
        entry: StockLedgerEntry,
        initial_movement: Option<MovementRecord>,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        if state.ledger.contains_key(&entry.product_id) {
            return Ok(false);
        }
        state.ledger.insert(entry.product_id, entry);
        state.movements.extend(initial_movement);
        Ok(true)
    }

    async fn get_entry(&self, product_id: ProductId) -> Result<Option<StockLedgerEntry>> {
        Ok(self.state.read().await.ledger.get(&product_id).cloned())
    }

    async fn get_entries(&self, product_ids: &[ProductId]) -> Result<Vec<StockLedgerEntry>> {
        let state = self.state.read().await;
        let mut entries: Vec<_> = product_ids
            .iter()
            .filter_map(|id| state.ledger.get(id).cloned())
            .collect();
        entries.sort_by_key(|e| e.product_id);
        entries.dedup_by_key(|e| e.product_id);
        Ok(entries)
    }

    async fn low_stock_entries(&self) -> Result<Vec<StockLedgerEntry>> {
        let state = self.state.read().await;
        let mut entries: Vec<_> = state
            .ledger
            .values()
            .filter(|e| e.is_low_stock())
            .cloned()
            .collect();
        entries.sort_by_key(|e| (e.available_quantity(), e.product_id));
        Ok(entries)
    }

    async fn inventory_statistics(&self) -> Result<InventoryStatistics> {
        let state = self.state.read().await;
        let mut stats = InventoryStatistics::default();
        for entry in state.ledger.values() {
            stats.record(entry);
        }
        Ok(stats)
    }

    async fn get_reservation(&self, id: ReservationId) -> Result<Option<Reservation>> {
        Ok(self.state.read().await.reservations.get(&id).cloned())
    }

    async fn reservations_for_order(&self, order_id: OrderId) -> Result<Vec<Reservation>> {
        let state = self.state.read().await;
        let mut reservations: Vec<_> = state
            .reservations
            .values()
            .filter(|r| r.order_id == order_id)
            .cloned()
            .collect();
        reservations.sort_by_key(|r| (r.created_at, r.product_id));
        Ok(reservations)
    }

    async fn active_reservations_for_session(
        &self,
        session_id: &str,
    ) -> Result<Vec<Reservation>> {
        let state = self.state.read().await;
        let mut reservations: Vec<_> = state
            .reservations
            .values()
            .filter(|r| r.is_active() && r.session_id.as_deref() == Some(session_id))
            .cloned()
            .collect();
        reservations.sort_by_key(|r| r.created_at);
        Ok(reservations)
    }

    async fn active_reservations_for_user(&self, user_id: &str) -> Result<Vec<Reservation>> {
        let state = self.state.read().await;
        let mut reservations: Vec<_> = state
            .reservations
            .values()
            .filter(|r| r.is_active() && r.user_id.as_deref() == Some(user_id))
            .cloned()
            .collect();
        reservations.sort_by_key(|r| r.created_at);
        Ok(reservations)
    }

    async fn expired_reservations(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reservation>> {
        let state = self.state.read().await;
        let mut reservations: Vec<_> = state
            .reservations
            .values()
            .filter(|r| r.is_active() && !r.is_expired && r.is_past_expiry(now))
            .cloned()
            .collect();
        reservations.sort_by_key(|r| r.expires_at);
        reservations.truncate(limit);
        Ok(reservations)
    }

    async fn reservation_statistics(&self) -> Result<ReservationStatistics> {
        let state = self.state.read().await;
        let mut stats = ReservationStatistics::default();
        for reservation in state.reservations.values() {
            stats.record(reservation.status, 1);
        }
        Ok(stats)
    }

    async fn query_movements(&self, query: MovementQuery) -> Result<Vec<MovementRecord>> {
        let state = self.state.read().await;
        let movements = state
            .movements
            .iter()
            .filter(|m| query.matches(m))
            .skip(query.offset.unwrap_or(0))
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(movements)
    }

    async fn stream_movements(&self, product_id: ProductId) -> Result<MovementStream> {
        use futures_util::stream;

        let state = self.state.read().await;
        let movements: Vec<_> = state
            .movements
            .iter()
            .filter(|m| m.product_id == product_id)
            .cloned()
            .collect();

        Ok(Box::pin(stream::iter(movements.into_iter().map(Ok))))
    }

    async fn record_alert(
        &self,
        alert: &LowStockAlert,
        suppress_since: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let suppressed = state.alerts.iter().any(|a| {
            a.product_id == alert.product_id
                && a.status == AlertStatus::Pending
                && a.created_at >= suppress_since
        });
        if suppressed {
            return Ok(false);
        }
        state.alerts.push(alert.clone());
        Ok(true)
    }

    async fn get_alert(&self, id: Uuid) -> Result<Option<LowStockAlert>> {
        let state = self.state.read().await;
        Ok(state.alerts.iter().find(|a| a.id == id).cloned())
    }

    async fn list_alerts(
        &self,
        status: Option<AlertStatus>,
        product_id: Option<ProductId>,
    ) -> Result<Vec<LowStockAlert>> {
        let state = self.state.read().await;
        let mut alerts: Vec<_> = state
            .alerts
            .iter()
            .filter(|a| status.is_none_or(|s| a.status == s))
            .filter(|a| product_id.is_none_or(|p| a.product_id == p))
            .cloned()
            .collect();
        alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(alerts)
    }

    async fn update_alert(&self, alert: &LowStockAlert, expected: AlertStatus) -> Result<bool> {
        let mut state = self.state.write().await;
        match state
            .alerts
            .iter_mut()
            .find(|a| a.id == alert.id && a.status == expected)
        {
            Some(stored) => {
                *stored = alert.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn alert_statistics(&self) -> Result<AlertStatistics> {
        let state = self.state.read().await;
        let mut stats = AlertStatistics::default();
        for alert in &state.alerts {
            stats.record(alert.status, 1);
        }
        Ok(stats)
    }
}

/// Exclusive transaction on one product of an [`InMemoryStockStore`].
///
/// Writes are staged locally and applied under a single write lock on commit.
pub struct InMemoryTransaction {
    state: Arc<RwLock<MemoryState>>,
    base_version: Version,
    entry: StockLedgerEntry,
    entry_changed: bool,
    inserted: Vec<Reservation>,
    updated: HashMap<ReservationId, Reservation>,
    movements: Vec<MovementRecord>,
    _permit: OwnedMutexGuard<()>,
}

impl InMemoryTransaction {
    fn product_id(&self) -> ProductId {
        self.entry.product_id
    }

    fn staged(&self, id: ReservationId) -> Option<&Reservation> {
        self.inserted
            .iter()
            .find(|r| r.id == id)
            .or_else(|| self.updated.get(&id))
    }
}

#[async_trait]
impl StockTransaction for InMemoryTransaction {
    fn entry(&self) -> &StockLedgerEntry {
        &self.entry
    }

    async fn reservation_for_order(&mut self, order_id: OrderId) -> Result<Option<Reservation>> {
        let product_id = self.product_id();
        if let Some(r) = self.inserted.iter().find(|r| r.order_id == order_id) {
            return Ok(Some(r.clone()));
        }

        let state = self.state.read().await;
        let stored = state
            .reservations
            .values()
            .find(|r| r.order_id == order_id && r.product_id == product_id);

        Ok(stored.map(|r| self.staged(r.id).unwrap_or(r).clone()))
    }

    async fn reservation(&mut self, id: ReservationId) -> Result<Option<Reservation>> {
        if let Some(r) = self.staged(id) {
            return Ok(Some(r.clone()));
        }

        let product_id = self.product_id();
        let state = self.state.read().await;
        Ok(state
            .reservations
            .get(&id)
            .filter(|r| r.product_id == product_id)
            .cloned())
    }

    async fn update_entry(&mut self, mut entry: StockLedgerEntry) -> Result<()> {
        entry.version = self.base_version.next();
        entry.updated_at = Utc::now();
        self.entry = entry;
        self.entry_changed = true;
        Ok(())
    }

    async fn insert_reservation(&mut self, reservation: &Reservation) -> Result<()> {
        let duplicate = self
            .inserted
            .iter()
            .any(|r| r.order_id == reservation.order_id)
            || self
                .state
                .read()
                .await
                .has_reservation(reservation.order_id, reservation.product_id);

        if duplicate {
            return Err(StoreError::DuplicateReservation {
                order_id: reservation.order_id,
                product_id: reservation.product_id,
            });
        }

        self.inserted.push(reservation.clone());
        Ok(())
    }

    async fn update_reservation(&mut self, reservation: &Reservation) -> Result<()> {
        if let Some(staged) = self.inserted.iter_mut().find(|r| r.id == reservation.id) {
            *staged = reservation.clone();
        } else {
            self.updated.insert(reservation.id, reservation.clone());
        }
        Ok(())
    }

    async fn append_movement(&mut self, movement: &MovementRecord) -> Result<()> {
        self.movements.push(movement.clone());
        Ok(())
    }

    async fn commit(self) -> Result<StockLedgerEntry> {
        let mut state = self.state.write().await;

        for reservation in &self.inserted {
            if state.has_reservation(reservation.order_id, reservation.product_id) {
                return Err(StoreError::DuplicateReservation {
                    order_id: reservation.order_id,
                    product_id: reservation.product_id,
                });
            }
        }

        if self.entry_changed {
            state.ledger.insert(self.entry.product_id, self.entry.clone());
        }
        for reservation in self.inserted {
            state.reservations.insert(reservation.id, reservation);
        }
        for (id, reservation) in self.updated {
            state.reservations.insert(id, reservation);
        }
        state.movements.extend(self.movements);

        Ok(self.entry)
    }
}
