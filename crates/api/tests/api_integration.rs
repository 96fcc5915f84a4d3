//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use api::AppState;
use api::config::Config;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use inventory::{EventPublisher, InMemoryEventPublisher};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{Value, json};
use stock_store::{InMemoryStockStore, OrderId};
use tokio::sync::watch;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

struct TestApp {
    router: axum::Router,
    state: Arc<AppState<InMemoryStockStore>>,
    publisher: Arc<InMemoryEventPublisher>,
    _shutdown: watch::Sender<bool>,
}

fn setup() -> TestApp {
    let config = Config {
        consumer_partitions: 2,
        consumer_retry_initial_ms: 1,
        consumer_retry_max_ms: 5,
        ..Config::default()
    };
    let publisher = Arc::new(InMemoryEventPublisher::new());
    let (state, receivers) = api::create_default_state(
        InMemoryStockStore::new(),
        publisher.clone() as Arc<dyn EventPublisher>,
        &config,
    );
    let (shutdown, shutdown_rx) = watch::channel(false);
    api::spawn_background(&state, receivers, &config, shutdown_rx);

    TestApp {
        router: api::create_app(state.clone(), get_metrics_handle()),
        state,
        publisher,
        _shutdown: shutdown,
    }
}

impl TestApp {
    async fn send(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_string(&body).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    async fn stock(&self, product_id: i64, quantity: i64) {
        let (status, _) = self
            .send(
                "POST",
                "/inventory",
                Some(json!({ "productId": product_id, "initialQuantity": quantity })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    async fn reserve(
        &self,
        order_id: OrderId,
        product_id: i64,
        quantity: i64,
    ) -> (StatusCode, Value) {
        self.send(
            "POST",
            "/reservations",
            Some(json!({
                "orderId": order_id.to_string(),
                "sessionId": "sess-api",
                "items": [{ "productId": product_id, "quantity": quantity }]
            })),
        )
        .await
    }

    async fn available(&self, product_id: i64) -> i64 {
        let (_, json) = self
            .send("GET", &format!("/inventory/{product_id}"), None)
            .await;
        json["data"]["availableQuantity"].as_i64().unwrap()
    }
}

#[tokio::test]
async fn test_health_check() {
    let app = setup();
    let (status, json) = app.send("GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_initialize_is_idempotent() {
    let app = setup();
    app.stock(1, 10).await;

    let (status, json) = app
        .send(
            "POST",
            "/inventory",
            Some(json!({ "productId": 1, "initialQuantity": 99 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["quantity"], 10);
    assert_eq!(json["data"]["stockStatus"], "IN_STOCK");
}

#[tokio::test]
async fn test_unknown_product_is_not_found() {
    let app = setup();
    let (status, json) = app.send("GET", "/inventory/404", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["success"], false);
    assert_eq!(json["errorCode"], "PRODUCT_NOT_FOUND");
}

#[tokio::test]
async fn test_reservation_lifecycle_scenario() {
    let app = setup();
    app.stock(1, 10).await;
    let (a, b, c) = (OrderId::new(), OrderId::new(), OrderId::new());

    let (status, json) = app.reserve(a, 1, 6).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["data"][0]["status"], "ACTIVE");
    assert_eq!(json["data"][0]["reservedBy"], "sess-api");
    assert_eq!(app.available(1).await, 4);

    let (status, json) = app.reserve(b, 1, 5).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["errorCode"], "INSUFFICIENT_STOCK");
    assert_eq!(json["data"]["requested"], 5);
    assert_eq!(json["data"]["available"], 4);

    let (status, _) = app.reserve(c, 1, 4).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(app.available(1).await, 0);

    let (status, json) = app
        .send("POST", &format!("/reservations/order/{a}/commit"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["applied"], true);

    let (status, _) = app
        .send(
            "POST",
            &format!("/reservations/order/{c}/release?reason=customer"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, json) = app.send("GET", "/inventory/1", None).await;
    assert_eq!(json["data"]["quantity"], 4);
    assert_eq!(json["data"]["reservedQuantity"], 0);
    assert_eq!(json["data"]["availableQuantity"], 4);

    let (_, json) = app.send("GET", "/inventory/1/reconcile", None).await;
    assert_eq!(json["data"]["consistent"], true);

    let (_, json) = app.send("GET", "/reservations/statistics", None).await;
    assert_eq!(json["data"]["committed"], 1);
    assert_eq!(json["data"]["released"], 1);
}

#[tokio::test]
async fn test_commit_twice_reports_already_resolved() {
    let app = setup();
    app.stock(1, 10).await;
    let order_id = OrderId::new();
    app.reserve(order_id, 1, 2).await;

    let uri = format!("/reservations/order/{order_id}/commit");
    app.send("POST", &uri, None).await;
    let (status, json) = app.send("POST", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["applied"], false);
    assert_eq!(json["message"], "already resolved");

    let (status, json) = app
        .send("POST", &format!("/reservations/order/{order_id}/release"), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["errorCode"], "INVALID_STATE_TRANSITION");
}

#[tokio::test]
async fn test_commit_unknown_order_is_not_found() {
    let app = setup();
    let (status, json) = app
        .send(
            "POST",
            &format!("/reservations/order/{}/commit", OrderId::new()),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["errorCode"], "RESERVATION_NOT_FOUND");
}

#[tokio::test]
async fn test_invalid_order_id_is_bad_request() {
    let app = setup();
    let (status, json) = app
        .send("GET", "/reservations/order/not-a-uuid", None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["errorCode"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_adjust_receive_and_movements() {
    let app = setup();
    app.stock(1, 10).await;

    let (status, json) = app
        .send(
            "POST",
            "/inventory/1/adjust",
            Some(json!({ "quantity": -3, "reason": "damaged", "performedBy": "ops" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["quantity"], 7);

    let (status, _) = app
        .send(
            "POST",
            "/inventory/1/adjust",
            Some(json!({ "quantity": -50, "reason": "lost" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, json) = app
        .send(
            "POST",
            "/inventory/1/receive",
            Some(json!({ "quantity": 5, "reference": "PO-1" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["quantity"], 12);

    let (_, json) = app.send("GET", "/inventory/1/movements", None).await;
    let movements = json["data"].as_array().unwrap();
    assert_eq!(movements.len(), 3);
    assert_eq!(movements[1]["movementType"], "ADJUSTMENT");
    assert_eq!(movements[1]["performedBy"], "ops");

    let (_, json) = app
        .send("GET", "/inventory/1/movements?type=inbound", None)
        .await;
    assert_eq!(json["data"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_thresholds_and_low_stock() {
    let app = setup();
    app.stock(1, 4).await;
    app.stock(2, 50).await;

    let (status, json) = app
        .send(
            "PUT",
            "/inventory/1/thresholds",
            Some(json!({ "reorderLevel": 5, "maxStockLevel": 40 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["reorderLevel"], 5);
    assert_eq!(json["data"]["maxStockLevel"], 40);

    let (status, _) = app
        .send("PUT", "/inventory/1/thresholds", Some(json!({})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, json) = app.send("GET", "/inventory/low-stock", None).await;
    let low = json["data"].as_array().unwrap();
    assert_eq!(low.len(), 1);
    assert_eq!(low[0]["productId"], 1);
}

#[tokio::test]
async fn test_availability_endpoints() {
    let app = setup();
    app.stock(1, 3).await;

    let (_, json) = app
        .send("GET", "/inventory/1/availability?quantity=5", None)
        .await;
    assert_eq!(json["data"]["available"], false);
    assert_eq!(json["data"]["suggestedQuantity"], 3);

    let (status, json) = app
        .send(
            "POST",
            "/inventory/availability",
            Some(json!({ "items": [
                { "productId": 1, "quantity": 2 },
                { "productId": 9, "quantity": 1 }
            ] })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"][0]["available"], true);
    assert_eq!(json["data"][1]["stockStatus"], "NOT_TRACKED");

    let (_, json) = app
        .send("POST", "/inventory/bulk", Some(json!({ "productIds": [1, 9] })))
        .await;
    assert_eq!(json["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_extend_outside_window_is_conflict() {
    let app = setup();
    app.stock(1, 10).await;
    let (_, json) = app.reserve(OrderId::new(), 1, 1).await;
    let id = json["data"][0]["reservationId"].as_str().unwrap().to_string();

    let (status, json) = app
        .send(
            "POST",
            &format!("/reservations/{id}/extend"),
            Some(json!({ "additionalSeconds": -5 })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["errorCode"], "EXTENSION_NOT_ALLOWED");

    let (status, json) = app.send("GET", &format!("/reservations/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["quantity"], 1);
}

#[tokio::test]
async fn test_out_of_range_amounts_are_rejected() {
    let app = setup();
    app.stock(1, 5).await;
    let (_, json) = app.reserve(OrderId::new(), 1, 1).await;
    let id = json["data"][0]["reservationId"].as_str().unwrap().to_string();

    let (status, json) = app
        .send(
            "POST",
            &format!("/reservations/{id}/extend"),
            Some(json!({ "additionalSeconds": i64::MAX })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);

    let (status, json) = app
        .send(
            "POST",
            "/inventory/1/receive",
            Some(json!({ "quantity": i64::MAX })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["errorCode"], "INVALID_QUANTITY");

    let (status, json) = app
        .send(
            "POST",
            "/inventory/1/adjust",
            Some(json!({ "quantity": i64::MIN, "reason": "write-off" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["errorCode"], "INSUFFICIENT_STOCK");

    assert_eq!(app.available(1).await, 4);
}

#[tokio::test]
async fn test_low_stock_alert_lifecycle() {
    let app = setup();
    app.stock(1, 30).await;

    app.send(
        "POST",
        "/inventory/1/adjust",
        Some(json!({ "quantity": -25, "reason": "damaged" })),
    )
    .await;
    app.send(
        "POST",
        "/inventory/1/adjust",
        Some(json!({ "quantity": -1, "reason": "damaged" })),
    )
    .await;

    let (status, json) = app.send("GET", "/alerts/active", None).await;
    assert_eq!(status, StatusCode::OK);
    let active = json["data"].as_array().unwrap();
    assert_eq!(active.len(), 1, "repeat alert is suppressed");
    assert_eq!(active[0]["productId"], 1);
    assert_eq!(active[0]["severity"], "WARNING");
    assert_eq!(active[0]["status"], "PENDING");
    let id = active[0]["id"].as_str().unwrap().to_string();
    assert_eq!(app.publisher.published_of("inventory.stock.low").await.len(), 1);

    let (status, json) = app
        .send("POST", &format!("/alerts/{id}/acknowledge"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["status"], "ACKNOWLEDGED");

    let (status, json) = app
        .send("POST", &format!("/alerts/{id}/acknowledge"), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["errorCode"], "INVALID_ALERT_TRANSITION");

    let (status, json) = app.send("POST", "/alerts/check/1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["raised"], true);

    let (_, json) = app.send("POST", "/alerts/check-all", None).await;
    assert_eq!(json["data"]["checked"], 1);
    assert_eq!(json["data"]["suppressed"], 1);

    let (status, _) = app
        .send("POST", &format!("/alerts/{id}/resolve"), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, json) = app.send("GET", "/alerts/statistics", None).await;
    assert_eq!(json["data"]["total"], 2);
    assert_eq!(json["data"]["pending"], 1);
    assert_eq!(json["data"]["resolved"], 1);

    let (_, json) = app.send("GET", "/alerts?status=resolved", None).await;
    assert_eq!(json["data"].as_array().unwrap().len(), 1);
    let (_, json) = app.send("GET", "/alerts/product/1", None).await;
    assert_eq!(json["data"].as_array().unwrap().len(), 2);
    let (_, json) = app.send("GET", "/alerts?productId=2", None).await;
    assert!(json["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_alert_requests_are_validated() {
    let app = setup();

    let (status, _) = app.send("GET", "/alerts?status=LOST", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .send("POST", "/alerts/not-a-uuid/resolve", None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, json) = app
        .send("POST", &format!("/alerts/{}/resolve", uuid::Uuid::new_v4()), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["errorCode"], "ALERT_NOT_FOUND");

    let (status, _) = app.send("POST", "/alerts/check/42", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_inventory_statistics_and_active_reservations() {
    let app = setup();
    app.stock(1, 20).await;
    app.stock(2, 0).await;

    let (status, _) = app
        .send(
            "POST",
            "/reservations",
            Some(json!({
                "orderId": OrderId::new().to_string(),
                "userId": "user-7",
                "items": [{ "productId": 1, "quantity": 4 }]
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    app.reserve(OrderId::new(), 1, 2).await;

    let (status, json) = app.send("GET", "/inventory/statistics", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["totalProducts"], 2);
    assert_eq!(json["data"]["outOfStockProducts"], 1);
    assert_eq!(json["data"]["totalReservedQuantity"], 6);
    assert_eq!(json["data"]["totalAvailableQuantity"], 14);

    let (_, json) = app
        .send("GET", "/reservations/active?userId=user-7", None)
        .await;
    let reservations = json["data"].as_array().unwrap();
    assert_eq!(reservations.len(), 1);
    assert_eq!(reservations[0]["quantity"], 4);

    let (_, json) = app
        .send(
            "GET",
            "/reservations/active?userId=user-7&sessionId=sess-api",
            None,
        )
        .await;
    assert_eq!(json["data"].as_array().unwrap().len(), 2);

    let (status, _) = app.send("GET", "/reservations/active", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_ingested_payment_event_commits() {
    let app = setup();
    app.stock(1, 10).await;
    let order_id = OrderId::new();
    app.reserve(order_id, 1, 3).await;

    let (status, json) = app
        .send(
            "POST",
            "/events",
            Some(json!({
                "eventType": "order.payment.completed",
                "data": { "orderId": order_id.to_string() }
            })),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(json["data"]["eventId"].as_str().is_some());

    for _ in 0..200 {
        if app.state.broker.in_flight() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let (_, json) = app.send("GET", "/inventory/1", None).await;
    assert_eq!(json["data"]["quantity"], 7);
    assert_eq!(
        app.publisher
            .published_of("stock.reservation.committed")
            .await
            .len(),
        1
    );
}

#[tokio::test]
async fn test_dead_letter_discard() {
    let app = setup();
    app.send(
        "POST",
        "/events",
        Some(json!({ "eventType": "order.cancelled", "data": {} })),
    )
    .await;

    let mut dead = Value::Null;
    for _ in 0..200 {
        let (_, json) = app.send("GET", "/dead-letters?status=pending", None).await;
        if json["data"].as_array().is_some_and(|d| !d.is_empty()) {
            dead = json["data"][0].clone();
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let id = dead["id"].as_str().expect("event was not dead-lettered");
    assert_eq!(dead["event"]["eventType"], "order.cancelled");

    let (status, json) = app
        .send("POST", &format!("/dead-letters/{id}/discard"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["status"], "DISCARDED");

    let (status, json) = app
        .send("POST", &format!("/dead-letters/{id}/replay"), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["errorCode"], "DEAD_LETTER_NOT_FOUND");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = setup();
    app.stock(1, 10).await;
    app.reserve(OrderId::new(), 1, 1).await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("reservations_created_total"));
    assert!(text.contains("reservations_active"));
}
