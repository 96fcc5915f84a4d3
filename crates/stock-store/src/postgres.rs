use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    AlertStatistics, AlertStatus, InventoryStatistics, LowStockAlert, MovementQuery,
    MovementRecord, OrderId, ProductId, Reservation, ReservationId, ReservationStatistics,
    ReservationStatus, ReservationType, Result, StockLedgerEntry, StoreError, Version,
    store::{MovementStream, StockStore, StockTransaction},
};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);
const STREAM_PAGE_SIZE: i64 = 500;
const LOCK_NOT_AVAILABLE: &str = "55P03";

const LEDGER_COLUMNS: &str = "product_id, quantity, reserved_quantity, reorder_level, max_stock_level, version, created_at, updated_at";
const RESERVATION_COLUMNS: &str = "id, product_id, order_id, user_id, session_id, quantity, reservation_type, status, expires_at, is_expired, created_at, updated_at, resolved_at";
const MOVEMENT_COLUMNS: &str = "id, product_id, quantity_change, movement_type, reference_id, reference_type, reason, notes, performed_by, created_at";
const ALERT_COLUMNS: &str = "id, product_id, current_stock, reorder_level, severity, suggested_reorder_quantity, message, status, created_at, acknowledged_at, resolved_at";

/// PostgreSQL-backed stock store.
///
/// Exclusive access to a product is a `SELECT ... FOR UPDATE` row lock held
/// by an open transaction, bounded by `SET LOCAL lock_timeout`.
#[derive(Clone)]
pub struct PostgresStockStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PostgresStockStore {
    /// Creates a new PostgreSQL stock store.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Sets how long `begin` waits for a row lock before giving up.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_entry(row: PgRow) -> Result<StockLedgerEntry> {
        Ok(StockLedgerEntry {
            product_id: ProductId::new(row.try_get("product_id")?),
            quantity: row.try_get("quantity")?,
            reserved_quantity: row.try_get("reserved_quantity")?,
            reorder_level: row.try_get("reorder_level")?,
            max_stock_level: row.try_get("max_stock_level")?,
            version: Version::new(row.try_get("version")?),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_reservation(row: PgRow) -> Result<Reservation> {
        let reservation_type: String = row.try_get("reservation_type")?;
        let status: String = row.try_get("status")?;

        Ok(Reservation {
            id: ReservationId::from_uuid(row.try_get::<Uuid, _>("id")?),
            product_id: ProductId::new(row.try_get("product_id")?),
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            user_id: row.try_get("user_id")?,
            session_id: row.try_get("session_id")?,
            quantity: row.try_get("quantity")?,
            reservation_type: ReservationType::parse_or_default(&reservation_type),
            status: status.parse().map_err(StoreError::InvalidData)?,
            expires_at: row.try_get("expires_at")?,
            is_expired: row.try_get("is_expired")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            resolved_at: row.try_get("resolved_at")?,
        })
    }

    fn row_to_movement(row: PgRow) -> Result<MovementRecord> {
        let movement_type: String = row.try_get("movement_type")?;
        let reference_type: Option<String> = row.try_get("reference_type")?;

        Ok(MovementRecord {
            id: row.try_get("id")?,
            product_id: ProductId::new(row.try_get("product_id")?),
            quantity_change: row.try_get("quantity_change")?,
            movement_type: movement_type.parse().map_err(StoreError::InvalidData)?,
            reference_id: row.try_get("reference_id")?,
            reference_type: reference_type
                .map(|t| t.parse().map_err(StoreError::InvalidData))
                .transpose()?,
            reason: row.try_get("reason")?,
            notes: row.try_get("notes")?,
            performed_by: row.try_get("performed_by")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_alert(row: PgRow) -> Result<LowStockAlert> {
        let severity: String = row.try_get("severity")?;
        let status: String = row.try_get("status")?;

        Ok(LowStockAlert {
            id: row.try_get("id")?,
            product_id: ProductId::new(row.try_get("product_id")?),
            current_stock: row.try_get("current_stock")?,
            reorder_level: row.try_get("reorder_level")?,
            severity: severity.parse().map_err(StoreError::InvalidData)?,
            suggested_reorder_quantity: row.try_get("suggested_reorder_quantity")?,
            message: row.try_get("message")?,
            status: status.parse().map_err(StoreError::InvalidData)?,
            created_at: row.try_get("created_at")?,
            acknowledged_at: row.try_get("acknowledged_at")?,
            resolved_at: row.try_get("resolved_at")?,
        })
    }
}

async fn insert_movement(
    executor: &mut sqlx::PgConnection,
    movement: &MovementRecord,
) -> Result<()> {
    sqlx::query(&format!(
        "INSERT INTO stock_movements ({MOVEMENT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
    ))
    .bind(movement.id)
    .bind(movement.product_id.as_i64())
    .bind(movement.quantity_change)
    .bind(movement.movement_type.as_str())
    .bind(&movement.reference_id)
    .bind(movement.reference_type.map(|t| t.as_str()))
    .bind(&movement.reason)
    .bind(&movement.notes)
    .bind(&movement.performed_by)
    .bind(movement.created_at)
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl StockStore for PostgresStockStore {
    type Transaction = PostgresTransaction;

    async fn begin(&self, product_id: ProductId) -> Result<PostgresTransaction> {
        let mut tx = self.pool.begin().await?;
        let started = Instant::now();

        // SET does not take bind parameters.
        sqlx::query(&format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.lock_timeout.as_millis()
        ))
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query(&format!(
            "SELECT {LEDGER_COLUMNS} FROM stock_ledger WHERE product_id = $1 FOR UPDATE"
        ))
        .bind(product_id.as_i64())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.code().as_deref() == Some(LOCK_NOT_AVAILABLE)
            {
                return StoreError::LockTimeout { product_id };
            }
            StoreError::Database(e)
        })?;
        metrics::histogram!("stock_lock_wait_seconds").record(started.elapsed().as_secs_f64());

        let entry = match row {
            Some(row) => Self::row_to_entry(row)?,
            None => return Err(StoreError::EntryNotFound(product_id)),
        };

        Ok(PostgresTransaction {
            tx,
            base_version: entry.version,
            entry,
        })
    }

    async fn create_entry(
        &self,
        entry: StockLedgerEntry,
        initial_movement: Option<MovementRecord>,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(&format!(
            "INSERT INTO stock_ledger ({LEDGER_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) ON CONFLICT (product_id) DO NOTHING"
        ))
        .bind(entry.product_id.as_i64())
        .bind(entry.quantity)
        .bind(entry.reserved_quantity)
        .bind(entry.reorder_level)
        .bind(entry.max_stock_level)
        .bind(entry.version.as_i64())
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        if inserted && let Some(movement) = initial_movement {
            insert_movement(&mut tx, &movement).await?;
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn get_entry(&self, product_id: ProductId) -> Result<Option<StockLedgerEntry>> {
        let row = sqlx::query(&format!(
            "SELECT {LEDGER_COLUMNS} FROM stock_ledger WHERE product_id = $1"
        ))
        .bind(product_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_entry).transpose()
    }

    async fn get_entries(&self, product_ids: &[ProductId]) -> Result<Vec<StockLedgerEntry>> {
        let ids: Vec<i64> = product_ids.iter().map(ProductId::as_i64).collect();
        let rows = sqlx::query(&format!(
            "SELECT {LEDGER_COLUMNS} FROM stock_ledger WHERE product_id = ANY($1) ORDER BY product_id"
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_entry).collect()
    }

    async fn low_stock_entries(&self) -> Result<Vec<StockLedgerEntry>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {LEDGER_COLUMNS} FROM stock_ledger
            WHERE quantity - reserved_quantity <= reorder_level
            ORDER BY quantity - reserved_quantity ASC, product_id ASC
            "#
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_entry).collect()
    }

    async fn inventory_statistics(&self) -> Result<InventoryStatistics> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total_products,
                COUNT(*) FILTER (WHERE quantity - reserved_quantity > reorder_level
                                   AND quantity - reserved_quantity > 0) AS in_stock,
                COUNT(*) FILTER (WHERE quantity - reserved_quantity > 0
                                   AND quantity - reserved_quantity <= reorder_level) AS low_stock,
                COUNT(*) FILTER (WHERE quantity - reserved_quantity <= 0) AS out_of_stock,
                COALESCE(SUM(quantity), 0)::BIGINT AS total_quantity,
                COALESCE(SUM(reserved_quantity), 0)::BIGINT AS total_reserved,
                COALESCE(SUM(quantity - reserved_quantity), 0)::BIGINT AS total_available
            FROM stock_ledger
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let count = |column: &str| -> Result<u64> {
            Ok(row.try_get::<i64, _>(column)?.max(0) as u64)
        };
        Ok(InventoryStatistics {
            total_products: count("total_products")?,
            in_stock_products: count("in_stock")?,
            low_stock_products: count("low_stock")?,
            out_of_stock_products: count("out_of_stock")?,
            total_quantity: row.try_get("total_quantity")?,
            total_reserved_quantity: row.try_get("total_reserved")?,
            total_available_quantity: row.try_get("total_available")?,
        })
    }

    async fn get_reservation(&self, id: ReservationId) -> Result<Option<Reservation>> {
        let row = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_reservation).transpose()
    }

    async fn reservations_for_order(&self, order_id: OrderId) -> Result<Vec<Reservation>> {
        let rows = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE order_id = $1 ORDER BY created_at ASC, product_id ASC"
        ))
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_reservation).collect()
    }

    async fn active_reservations_for_session(
        &self,
        session_id: &str,
    ) -> Result<Vec<Reservation>> {
        let rows = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE session_id = $1 AND status = 'ACTIVE' ORDER BY created_at ASC"
        ))
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_reservation).collect()
    }

    async fn active_reservations_for_user(&self, user_id: &str) -> Result<Vec<Reservation>> {
        let rows = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE user_id = $1 AND status = 'ACTIVE' ORDER BY created_at ASC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_reservation).collect()
    }

    async fn expired_reservations(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reservation>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {RESERVATION_COLUMNS} FROM reservations
            WHERE status = 'ACTIVE' AND is_expired = FALSE AND expires_at <= $1
            ORDER BY expires_at ASC
            LIMIT $2
            "#
        ))
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_reservation).collect()
    }

    async fn reservation_statistics(&self) -> Result<ReservationStatistics> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM reservations GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut stats = ReservationStatistics::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let count: i64 = row.try_get("count")?;
            let status: ReservationStatus = status.parse().map_err(StoreError::InvalidData)?;
            stats.record(status, count.max(0) as u64);
        }
        Ok(stats)
    }

    async fn query_movements(&self, query: MovementQuery) -> Result<Vec<MovementRecord>> {
        let mut sql = format!("SELECT {MOVEMENT_COLUMNS} FROM stock_movements WHERE 1=1");
        let mut param_count = 0;

        // Build dynamic query
        if query.product_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND product_id = ${param_count}"));
        }
        if query.movement_types.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND movement_type = ANY(${param_count})"));
        }
        if query.reference_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND reference_id = ${param_count}"));
        }
        if query.from_timestamp.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND created_at >= ${param_count}"));
        }
        if query.to_timestamp.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND created_at <= ${param_count}"));
        }

        sql.push_str(" ORDER BY created_at ASC, id ASC");

        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }
        if query.offset.is_some() {
            param_count += 1;
            sql.push_str(&format!(" OFFSET ${param_count}"));
        }

        let mut sqlx_query = sqlx::query(&sql);

        if let Some(id) = query.product_id {
            sqlx_query = sqlx_query.bind(id.as_i64());
        }
        if let Some(types) = query.movement_types {
            let types: Vec<String> = types.iter().map(|t| t.as_str().to_string()).collect();
            sqlx_query = sqlx_query.bind(types);
        }
        if let Some(reference_id) = query.reference_id {
            sqlx_query = sqlx_query.bind(reference_id);
        }
        if let Some(from) = query.from_timestamp {
            sqlx_query = sqlx_query.bind(from);
        }
        if let Some(to) = query.to_timestamp {
            sqlx_query = sqlx_query.bind(to);
        }
        if let Some(limit) = query.limit {
            sqlx_query = sqlx_query.bind(limit as i64);
        }
        if let Some(offset) = query.offset {
            sqlx_query = sqlx_query.bind(offset as i64);
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_movement).collect()
    }

    async fn stream_movements(&self, product_id: ProductId) -> Result<MovementStream> {
        use futures_util::{TryStreamExt, stream};

        let sql = format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements WHERE product_id = $1 ORDER BY created_at ASC, id ASC LIMIT $2 OFFSET $3"
        );
        let pool = self.pool.clone();

        // Paged so the stream owns its connection handle instead of borrowing the store.
        let pages = stream::try_unfold(Some(0i64), move |offset| {
            let pool = pool.clone();
            let sql = sql.clone();
            async move {
                let Some(offset) = offset else {
                    return Ok::<_, StoreError>(None);
                };
                let rows = sqlx::query(&sql)
                    .bind(product_id.as_i64())
                    .bind(STREAM_PAGE_SIZE)
                    .bind(offset)
                    .fetch_all(&pool)
                    .await?;
                let fetched = rows.len() as i64;
                let page = rows
                    .into_iter()
                    .map(Self::row_to_movement)
                    .collect::<Result<Vec<_>>>()?;
                let next = (fetched == STREAM_PAGE_SIZE).then_some(offset + fetched);
                Ok(Some((page, next)))
            }
        });

        let movements = pages
            .map_ok(|page| stream::iter(page.into_iter().map(Ok::<_, StoreError>)))
            .try_flatten();

        Ok(Box::pin(movements))
    }

    async fn record_alert(
        &self,
        alert: &LowStockAlert,
        suppress_since: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        // Serializes the suppression check per product without touching the ledger row lock.
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(alert.product_id.as_i64())
            .execute(&mut *tx)
            .await?;

        let inserted = sqlx::query(&format!(
            r#"
            INSERT INTO low_stock_alerts ({ALERT_COLUMNS})
            SELECT $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11
            WHERE NOT EXISTS (
                SELECT 1 FROM low_stock_alerts
                WHERE product_id = $2 AND status = 'PENDING' AND created_at >= $12
            )
            "#
        ))
        .bind(alert.id)
        .bind(alert.product_id.as_i64())
        .bind(alert.current_stock)
        .bind(alert.reorder_level)
        .bind(alert.severity.as_str())
        .bind(alert.suggested_reorder_quantity)
        .bind(&alert.message)
        .bind(alert.status.as_str())
        .bind(alert.created_at)
        .bind(alert.acknowledged_at)
        .bind(alert.resolved_at)
        .bind(suppress_since)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        tx.commit().await?;
        Ok(inserted)
    }

    async fn get_alert(&self, id: Uuid) -> Result<Option<LowStockAlert>> {
        let row = sqlx::query(&format!(
            "SELECT {ALERT_COLUMNS} FROM low_stock_alerts WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_alert).transpose()
    }

    async fn list_alerts(
        &self,
        status: Option<AlertStatus>,
        product_id: Option<ProductId>,
    ) -> Result<Vec<LowStockAlert>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {ALERT_COLUMNS} FROM low_stock_alerts
            WHERE ($1::TEXT IS NULL OR status = $1)
              AND ($2::BIGINT IS NULL OR product_id = $2)
            ORDER BY created_at DESC, id ASC
            "#
        ))
        .bind(status.map(|s| s.as_str()))
        .bind(product_id.map(|p| p.as_i64()))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_alert).collect()
    }

    async fn update_alert(&self, alert: &LowStockAlert, expected: AlertStatus) -> Result<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE low_stock_alerts
            SET status = $2, acknowledged_at = $3, resolved_at = $4
            WHERE id = $1 AND status = $5
            "#,
        )
        .bind(alert.id)
        .bind(alert.status.as_str())
        .bind(alert.acknowledged_at)
        .bind(alert.resolved_at)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(updated == 1)
    }

    async fn alert_statistics(&self) -> Result<AlertStatistics> {
        let rows =
            sqlx::query("SELECT status, COUNT(*) AS count FROM low_stock_alerts GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut stats = AlertStatistics::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let count: i64 = row.try_get("count")?;
            let status: AlertStatus = status.parse().map_err(StoreError::InvalidData)?;
            stats.record(status, count.max(0) as u64);
        }
        Ok(stats)
    }
}

/// Exclusive transaction on one product row of a [`PostgresStockStore`].
///
/// Writes go straight into the open database transaction; dropping it
/// without calling `commit` rolls everything back.
pub struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
    base_version: Version,
    entry: StockLedgerEntry,
}

#[async_trait]
impl StockTransaction for PostgresTransaction {
    fn entry(&self) -> &StockLedgerEntry {
        &self.entry
    }

    async fn reservation_for_order(&mut self, order_id: OrderId) -> Result<Option<Reservation>> {
        let row = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE order_id = $1 AND product_id = $2"
        ))
        .bind(order_id.as_uuid())
        .bind(self.entry.product_id.as_i64())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(PostgresStockStore::row_to_reservation).transpose()
    }

    async fn reservation(&mut self, id: ReservationId) -> Result<Option<Reservation>> {
        let row = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1 AND product_id = $2"
        ))
        .bind(id.as_uuid())
        .bind(self.entry.product_id.as_i64())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(PostgresStockStore::row_to_reservation).transpose()
    }

    async fn update_entry(&mut self, entry: StockLedgerEntry) -> Result<()> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE stock_ledger
            SET quantity = $2, reserved_quantity = $3, reorder_level = $4,
                max_stock_level = $5, version = $6, updated_at = NOW()
            WHERE product_id = $1
            RETURNING {LEDGER_COLUMNS}
            "#
        ))
        .bind(entry.product_id.as_i64())
        .bind(entry.quantity)
        .bind(entry.reserved_quantity)
        .bind(entry.reorder_level)
        .bind(entry.max_stock_level)
        .bind(self.base_version.next().as_i64())
        .fetch_one(&mut *self.tx)
        .await?;

        self.entry = PostgresStockStore::row_to_entry(row)?;
        Ok(())
    }

    async fn insert_reservation(&mut self, reservation: &Reservation) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO reservations ({RESERVATION_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
        ))
        .bind(reservation.id.as_uuid())
        .bind(reservation.product_id.as_i64())
        .bind(reservation.order_id.as_uuid())
        .bind(&reservation.user_id)
        .bind(&reservation.session_id)
        .bind(reservation.quantity)
        .bind(reservation.reservation_type.as_str())
        .bind(reservation.status.as_str())
        .bind(reservation.expires_at)
        .bind(reservation.is_expired)
        .bind(reservation.created_at)
        .bind(reservation.updated_at)
        .bind(reservation.resolved_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("unique_order_product")
            {
                return StoreError::DuplicateReservation {
                    order_id: reservation.order_id,
                    product_id: reservation.product_id,
                };
            }
            StoreError::Database(e)
        })?;
        Ok(())
    }

    async fn update_reservation(&mut self, reservation: &Reservation) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE reservations
            SET status = $2, expires_at = $3, is_expired = $4, updated_at = $5, resolved_at = $6
            WHERE id = $1
            "#,
        )
        .bind(reservation.id.as_uuid())
        .bind(reservation.status.as_str())
        .bind(reservation.expires_at)
        .bind(reservation.is_expired)
        .bind(reservation.updated_at)
        .bind(reservation.resolved_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn append_movement(&mut self, movement: &MovementRecord) -> Result<()> {
        insert_movement(&mut self.tx, movement).await
    }

    async fn commit(self) -> Result<StockLedgerEntry> {
        self.tx.commit().await?;
        Ok(self.entry)
    }
}
