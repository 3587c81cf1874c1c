mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::Duration;
use common::*;
use reservation_service::api::{create_router, AppState};
use serde_json::{json, Value};
use shared::*;
use tower::ServiceExt;
use uuid::Uuid;

fn app(h: &Harness) -> Router {
    create_router(AppState::new(h.engine.clone()))
}

async fn send(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, value)
}

#[tokio::test]
async fn health() {
    let h = harness();
    let (status, body) = send(app(&h), "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("OK"));
}

#[tokio::test]
async fn reserve_then_release_over_http() {
    let h = harness();
    let product_id = Uuid::new_v4();
    h.store.set_available(StockTarget::Product(product_id), 5).await;

    let (status, body) = send(
        app(&h),
        "POST",
        "/reservations",
        Some(json!({ "product_id": product_id, "quantity": 2, "session_id": "cart-42" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["reservation_id"].as_str().unwrap().to_string();

    let (status, body) = send(
        app(&h),
        "GET",
        &format!("/stock/available?product_id={}", product_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["available"], 3);

    let (status, body) = send(app(&h), "POST", &format!("/reservations/{}/release", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (status, body) = send(app(&h), "GET", &format!("/reservations/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "released");
    assert_eq!(body["release_reason"], DEFAULT_RELEASE_REASON);
    assert_eq!(body["session_id"], "cart-42");

    let (status, body) = send(app(&h), "POST", &format!("/reservations/{}/release", id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "invalid_state_transition");
}

#[tokio::test]
async fn xor_violations_are_bad_requests() {
    let h = harness();
    let both = json!({
        "product_id": Uuid::new_v4(),
        "variant_id": Uuid::new_v4(),
        "quantity": 1,
        "user_id": Uuid::new_v4(),
    });
    let no_holder = json!({ "product_id": Uuid::new_v4(), "quantity": 1 });
    let two_holders = json!({
        "variant_id": Uuid::new_v4(),
        "quantity": 1,
        "user_id": Uuid::new_v4(),
        "session_id": "cart-1",
    });

    for body in [both, no_holder, two_holders] {
        let (status, body) = send(app(&h), "POST", "/reservations", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "invalid_argument");
    }

    let (status, _) = send(app(&h), "GET", "/stock/available", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(h.engine.get_all_active_reservations().await.unwrap().is_empty());
}

#[tokio::test]
async fn insufficient_stock_is_a_conflict() {
    let h = harness();
    let variant_id = Uuid::new_v4();
    h.store.set_available(StockTarget::Variant(variant_id), 1).await;

    let (status, body) = send(
        app(&h),
        "POST",
        "/reservations",
        Some(json!({ "variant_id": variant_id, "quantity": 3, "user_id": Uuid::new_v4() })),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "insufficient_stock");
    assert_eq!(body["error"], "Not enough stock: only 1 available");
}

#[tokio::test]
async fn batch_check_over_http() {
    let h = harness();
    let (p1, p2) = (Uuid::new_v4(), Uuid::new_v4());
    h.store.set_available(StockTarget::Product(p1), 10).await;
    h.store.set_available(StockTarget::Product(p2), 2).await;

    let (status, body) = send(
        app(&h),
        "POST",
        "/stock/check",
        Some(json!({ "items": [
            { "product_id": p1, "quantity": 5 },
            { "product_id": p2, "quantity": 5 },
        ]})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["available"], false);
    assert_eq!(
        body["unavailable_items"],
        json!([{ "product_id": p2, "variant_id": null, "requested": 5, "available": 2 }])
    );
}

#[tokio::test]
async fn cart_checkout_via_webhook() {
    let h = harness();
    let (p1, v1) = (Uuid::new_v4(), Uuid::new_v4());
    let user_id = Uuid::new_v4();
    let order_id = Uuid::new_v4();
    h.store.set_available(StockTarget::Product(p1), 3).await;
    h.store.set_available(StockTarget::Variant(v1), 3).await;

    let (status, body) = send(
        app(&h),
        "POST",
        "/carts/reserve",
        Some(json!({
            "user_id": user_id,
            "items": [
                { "product_id": p1, "quantity": 1 },
                { "variant_id": v1, "quantity": 2 },
            ],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let ids = body["reservation_ids"].clone();
    assert_eq!(ids.as_array().unwrap().len(), 2);

    let (status, body) = send(
        app(&h),
        "POST",
        "/webhooks/payment",
        Some(json!({ "event": "payment_succeeded", "order_id": order_id, "reservation_ids": ids })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "completed");
    assert_eq!(body["completed"], 2);

    let (status, body) = send(app(&h), "GET", &format!("/reservations?user_id={}", user_id), None).await;
    assert_eq!(status, StatusCode::OK);
    let reservations = body.as_array().unwrap();
    assert_eq!(reservations.len(), 2);
    assert!(reservations.iter().all(|r| r["status"] == "completed" && r["order_id"] == json!(order_id)));
}

#[tokio::test]
async fn cart_failure_over_http_leaves_nothing_held() {
    let h = harness();
    let (p1, p2) = (Uuid::new_v4(), Uuid::new_v4());
    h.store.set_available(StockTarget::Product(p1), 3).await;

    let (status, body) = send(
        app(&h),
        "POST",
        "/carts/reserve",
        Some(json!({
            "session_id": "guest-7",
            "items": [
                { "product_id": p1, "quantity": 1 },
                { "product_id": p2, "quantity": 1 },
            ],
        })),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "insufficient_stock");
    let (_, active) = send(app(&h), "GET", "/reservations/active", None).await;
    assert_eq!(active, json!([]));
}

#[tokio::test]
async fn maintenance_expire_reclaims_due_holds() {
    let h = harness();
    let target = StockTarget::Product(Uuid::new_v4());
    h.store.set_available(target, 2).await;
    h.engine.reserve_stock(target, 2, session(), None).await.unwrap();
    h.clock.advance(Duration::minutes(15) + Duration::seconds(1));

    let (status, body) = send(app(&h), "POST", "/maintenance/expire", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["expired"], 1);

    let (_, body) = send(app(&h), "POST", "/maintenance/expire", None).await;
    assert_eq!(body["expired"], 0);
}

#[tokio::test]
async fn unknown_reservation_is_404() {
    let h = harness();
    let (status, body) = send(
        app(&h),
        "POST",
        &format!("/reservations/{}/complete", Uuid::new_v4()),
        Some(json!({ "order_id": Uuid::new_v4() })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");
}
