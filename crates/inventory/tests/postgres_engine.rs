//! Reservation engine, sweeper and alerts running on PostgreSQL.
//!
//! Uses a shared PostgreSQL container. Run with:
//!
//! ```bash
//! cargo test -p inventory --test postgres_engine
//! ```

use std::sync::Arc;

use chrono::{Duration, Utc};
use inventory::{
    ExpirySweeper, InMemoryEventPublisher, InitializeStock, InventoryError, LowStockAlerts,
    ReservationEngine, ReserveRequest, StockLedger, SweeperConfig,
};
use serial_test::serial;
use sqlx::PgPool;
use stock_store::{
    AlertStatus, MovementQuery, MovementType, OrderId, PostgresStockStore, ProductId,
    StockStore,
};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            for migration in [
                include_str!("../../../migrations/001_create_inventory_tables.sql"),
                include_str!("../../../migrations/002_create_low_stock_alerts.sql"),
            ] {
                sqlx::raw_sql(migration).execute(&temp_pool).await.unwrap();
            }
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

struct Harness {
    ledger: StockLedger<PostgresStockStore>,
    engine: Arc<ReservationEngine<PostgresStockStore>>,
    alerts: Arc<LowStockAlerts<PostgresStockStore>>,
}

impl Harness {
    async fn new() -> Self {
        let info = get_container_info().await;
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(&info.connection_string)
            .await
            .unwrap();

        sqlx::query("TRUNCATE TABLE low_stock_alerts, stock_movements, reservations, stock_ledger")
            .execute(&pool)
            .await
            .unwrap();

        let store = Arc::new(PostgresStockStore::new(pool));
        let publisher = Arc::new(InMemoryEventPublisher::new());
        let alerts = Arc::new(LowStockAlerts::new(store.clone(), publisher.clone()));
        Self {
            ledger: StockLedger::new(store.clone(), publisher.clone()).with_alerts(alerts.clone()),
            engine: Arc::new(ReservationEngine::new(store, publisher).with_alerts(alerts.clone())),
            alerts,
        }
    }

    async fn product(&self, id: i64, quantity: i64) -> ProductId {
        let product_id = ProductId::new(id);
        self.ledger
            .create_or_initialize(InitializeStock {
                initial_quantity: quantity,
                reorder_level: Some(0),
                ..InitializeStock::empty(product_id)
            })
            .await
            .unwrap();
        product_id
    }

    async fn counts(&self, product_id: ProductId) -> (i64, i64, i64) {
        let e = self.ledger.get(product_id).await.unwrap();
        (e.quantity, e.reserved_quantity, e.available_quantity())
    }
}

#[tokio::test]
#[serial]
async fn concurrent_reserves_never_oversell() {
    let h = Harness::new().await;
    let p = h.product(1, 10).await;

    let mut handles = Vec::new();
    for _ in 0..40 {
        let engine = h.engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .reserve(ReserveRequest::new(OrderId::new(), p, 1))
                .await
        }));
    }

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(InventoryError::InsufficientStock { available, .. }) => assert_eq!(available, 0),
            Err(other) => panic!("unexpected error {other:?}"),
        }
    }

    assert_eq!(succeeded, 10);
    assert_eq!(h.counts(p).await, (10, 10, 0));
    assert_eq!(h.engine.statistics().await.unwrap().active, 10);

    let reserved = h
        .ledger
        .movements(MovementQuery::for_product(p).movement_type(MovementType::Reserved))
        .await
        .unwrap();
    assert_eq!(reserved.len(), 10);
    assert!(h.ledger.reconcile(p).await.unwrap().consistent);
}

#[tokio::test]
#[serial]
async fn mixed_quantities_fill_stock_exactly() {
    let h = Harness::new().await;
    let p = h.product(2, 12).await;

    let mut handles = Vec::new();
    for quantity in [5, 5, 5, 3, 3, 2, 2, 1] {
        let engine = h.engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .reserve(ReserveRequest::new(OrderId::new(), p, quantity))
                .await
                .map(|r| r.quantity)
        }));
    }

    let mut reserved = 0;
    for handle in handles {
        if let Ok(quantity) = handle.await.unwrap() {
            reserved += quantity;
        }
    }

    let (quantity, held, available) = h.counts(p).await;
    assert_eq!(quantity, 12);
    assert_eq!(held, reserved);
    assert!(held <= 12);
    assert_eq!(available, 12 - reserved);
}

#[tokio::test]
#[serial]
async fn sweeper_and_release_race_resolves_once() {
    let h = Harness::new().await;
    let sweeper = ExpirySweeper::new(h.engine.clone(), SweeperConfig::default());

    for id in 0..10 {
        let p = h.product(100 + id, 10).await;
        let order_id = OrderId::new();
        h.engine
            .reserve(ReserveRequest::new(order_id, p, 3))
            .await
            .unwrap();
        let later = Utc::now() + Duration::hours(1);

        let (swept, released) = tokio::join!(
            sweeper.sweep_at(later),
            h.engine.release(order_id, "payment failed")
        );
        let expired = swept.unwrap().expired;
        let released = released.unwrap().reservations().len();
        assert_eq!(expired + released, 1);

        assert_eq!(h.counts(p).await, (10, 0, 10));
        let returned = h
            .ledger
            .movements(
                MovementQuery::for_product(p).movement_type(MovementType::ReservationReleased),
            )
            .await
            .unwrap();
        assert_eq!(returned.len(), 1);
    }
}

#[tokio::test]
#[serial]
async fn concurrent_alert_checks_raise_one_alert() {
    let h = Harness::new().await;
    let p = h.product(3, 0).await;
    let entry = h.ledger.get(p).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let alerts = h.alerts.clone();
        let entry = entry.clone();
        handles.push(tokio::spawn(async move { alerts.check(&entry).await }));
    }
    let mut raised = 0;
    for handle in handles {
        if handle.await.unwrap().is_some() {
            raised += 1;
        }
    }
    assert_eq!(raised, 1);

    let pending = h.alerts.list(Some(AlertStatus::Pending), Some(p)).await.unwrap();
    assert_eq!(pending.len(), 1);

    h.alerts.acknowledge(pending[0].id).await.unwrap();
    assert!(h.alerts.check(&entry).await.is_some());

    let stats = h.alerts.statistics().await.unwrap();
    assert_eq!((stats.total, stats.pending, stats.acknowledged), (2, 1, 1));
}

#[tokio::test]
#[serial]
async fn statistics_and_user_reservations() {
    let h = Harness::new().await;
    let p = h.product(4, 20).await;
    h.product(5, 0).await;

    let mine = h
        .engine
        .reserve(
            ReserveRequest::new(OrderId::new(), p, 4)
                .owner(stock_store::ReservationOwner::user("user-9")),
        )
        .await
        .unwrap();
    let released = OrderId::new();
    h.engine
        .reserve(
            ReserveRequest::new(released, p, 1)
                .owner(stock_store::ReservationOwner::user("user-9")),
        )
        .await
        .unwrap();
    h.engine.release(released, "cancelled").await.unwrap();

    let active = h.engine.active_reservations(Some("user-9"), None).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, mine.id);

    let stats = h.engine.store().inventory_statistics().await.unwrap();
    assert_eq!(stats.total_products, 2);
    assert_eq!(stats.out_of_stock_products, 1);
    assert_eq!(stats.total_reserved_quantity, 4);
    assert_eq!(stats.total_available_quantity, 16);
}
