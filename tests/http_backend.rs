use std::time::Duration;

use axum::extract::Path;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use order_tracker::backend::{HttpBackend, TrackingBackend};
use order_tracker::error::AppError;
use order_tracker::models::chat::{MessageType, SendMessageRequest};
use order_tracker::models::order::OrderStatus;
use order_tracker::models::tracking::OrderType;
use serde_json::{json, Value};
use tokio::net::TcpListener;

const TOKEN: &str = "test-token";

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value == format!("Bearer {TOKEN}"))
}

async fn list_orders(headers: HeaderMap) -> impl IntoResponse {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "detail": "no token" })));
    }
    (
        StatusCode::OK,
        Json(json!({
            "count": 2,
            "results": [
                {
                    "id": 11,
                    "order_number": "ORD-11",
                    "status": "out_for_delivery",
                    "total_amount": "1450.00",
                    "created_at": "2025-06-01T09:00:00Z",
                    "chef": { "id": 3, "name": "Amma's Kitchen" }
                },
                {
                    "id": 12,
                    "status": "awaiting_payment",
                    "created_at": "2025-06-01T10:00:00Z",
                    "cook_id": "4"
                }
            ]
        })),
    )
}

async fn tracking(Path(id): Path<u64>) -> impl IntoResponse {
    match id {
        11 => (
            StatusCode::OK,
            Json(json!({
                "order_id": 11,
                "status": "out_for_delivery",
                "timeline": { "confirmed": "2025-06-01T09:05:00Z", "pending": "2025-06-01T09:00:00Z" },
                "chef_location": { "latitude": "6.9000", "longitude": "79.8500" },
                "delivery_location": { "latitude": 6.93, "longitude": 79.86, "address": "Galle Road" },
                "agent_location": { "latitude": null, "longitude": null },
                "estimated_time_remaining_minutes": 12,
                "can_cancel": false,
                "cancellation_time_remaining_seconds": 0,
                "items": [{ "food_name": "Lamprais", "quantity": 2, "price": "600.00" }],
                "total_amount": "1200.00",
                "order_type": "delivery"
            })),
        ),
        12 => (
            StatusCode::OK,
            Json(json!({ "order_id": 12, "status": "pending" })),
        ),
        _ => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "maintenance" })),
        ),
    }
}

async fn cancel(Path(id): Path<u64>, Json(body): Json<Value>) -> impl IntoResponse {
    assert!(body["reason"].as_str().is_some_and(|reason| !reason.is_empty()));
    if id == 11 {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Cancellation window has expired" })),
        );
    }
    (
        StatusCode::OK,
        Json(json!({ "success": true, "message": "Order cancelled", "refund_amount": "1200.00" })),
    )
}

async fn messages() -> Json<Value> {
    Json(json!({
        "messages": [{
            "message_id": "6f1d2a34-0f5e-4c8a-9d7b-1a2b3c4d5e6f",
            "message": "On my way",
            "is_own_message": false,
            "is_read": true,
            "created_at": "2025-06-01T09:30:00Z",
            "message_type": "text"
        }]
    }))
}

async fn send(Json(body): Json<Value>) -> Json<Value> {
    Json(json!({
        "data": {
            "message_id": "0a0b0c0d-0000-4000-8000-000000000001",
            "message": body["message"],
            "is_own_message": true,
            "created_at": "2025-06-01T09:31:00Z",
            "message_type": body["message_type"]
        }
    }))
}

async fn quick() -> Json<Value> {
    Json(json!(["I'm outside", { "id": 7, "template": "Call me" }, "  "]))
}

async fn spawn_backend() -> HttpBackend {
    let app = Router::new()
        .route("/api/orders/", get(list_orders))
        .route("/api/orders/:id/tracking/", get(tracking))
        .route("/api/orders/:id/cancel/", post(cancel))
        .route("/api/orders/:id/chat/messages/", get(messages).post(send))
        .route("/api/orders/:id/chat/quick-messages/", get(quick));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    HttpBackend::new(
        &format!("http://{addr}/api/"),
        Some(TOKEN),
        Duration::from_secs(5),
    )
    .unwrap()
}

#[tokio::test]
async fn lists_paginated_orders_and_resolves_cooks() {
    let backend = spawn_backend().await;
    let orders = backend.list_orders().await.unwrap();

    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0].status, OrderStatus::OutForDelivery);
    assert_eq!(orders[0].total_amount, 1450.0);
    assert_eq!(orders[0].cook.as_ref().unwrap().name.as_deref(), Some("Amma's Kitchen"));
    assert_eq!(orders[1].status, OrderStatus::Unknown);
    assert_eq!(orders[1].order_number, "#12");
    assert_eq!(orders[1].cook.as_ref().unwrap().id, 4);
}

#[tokio::test]
async fn missing_token_is_reported_as_unavailable() {
    let backend = spawn_backend().await;
    let anonymous = HttpBackend::new(&backend.url(""), None, Duration::from_secs(5)).unwrap();

    assert!(matches!(
        anonymous.list_orders().await,
        Err(AppError::Unavailable(_))
    ));
}

#[tokio::test]
async fn decodes_tracking_snapshot() {
    let backend = spawn_backend().await;
    let snapshot = backend.fetch_tracking(11).await.unwrap();

    assert_eq!(snapshot.status, OrderStatus::OutForDelivery);
    assert_eq!(snapshot.order_type, OrderType::Delivery);
    assert_eq!(snapshot.chef_location.as_ref().unwrap().latitude, 6.9);
    assert!(snapshot.agent_location.is_none());
    assert_eq!(snapshot.total_items, 2);
    assert_eq!(snapshot.total_amount, 1200.0);
    assert_eq!(snapshot.status_display, OrderStatus::OutForDelivery.display_name());
    let stages: Vec<_> = snapshot.timeline.iter().map(|entry| entry.status).collect();
    assert_eq!(stages, vec![OrderStatus::Pending, OrderStatus::Confirmed]);
}

#[tokio::test]
async fn incomplete_snapshot_is_a_data_shape_error() {
    let backend = spawn_backend().await;
    assert!(matches!(
        backend.fetch_tracking(12).await,
        Err(AppError::DataShape(_))
    ));
}

#[tokio::test]
async fn server_errors_are_transient() {
    let backend = spawn_backend().await;
    let err = backend.fetch_tracking(99).await.unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn cancel_rejection_carries_server_message() {
    let backend = spawn_backend().await;

    match backend.cancel_order(11, "too slow").await {
        Err(AppError::Rejected(message)) => assert_eq!(message, "Cancellation window has expired"),
        other => panic!("unexpected {other:?}"),
    }

    let outcome = backend.cancel_order(12, "changed my mind").await.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.refund_amount, Some(1200.0));
}

#[tokio::test]
async fn chat_endpoints_round_trip() {
    let backend = spawn_backend().await;

    let messages = backend.list_messages(11).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].order_id, 11);
    assert!(!messages[0].pending);

    let sent = backend
        .send_message(
            11,
            &SendMessageRequest {
                message: "Gate code 1234".to_string(),
                message_type: MessageType::Text,
            },
        )
        .await
        .unwrap();
    assert_eq!(sent.message, "Gate code 1234");
    assert_eq!(sent.order_id, 11);
    assert!(!sent.is_read);

    let quick = backend.quick_messages(11).await.unwrap();
    let texts: Vec<_> = quick.iter().map(|reply| reply.text.as_str()).collect();
    assert_eq!(texts, vec!["I'm outside", "Call me"]);
    assert_eq!(quick[1].id, 7);
}
