mod common;

use axum::http::{Method, StatusCode};
use common::{dec_of, TestApp, WEBHOOK_SECRET};
use rust_decimal_macros::dec;
use serde_json::json;
use varanda_api::payments::sign_payload;

fn cart_body(product_id: uuid::Uuid, quantity: i32) -> serde_json::Value {
    json!({
        "items": [{ "product_id": product_id, "quantity": quantity }],
        "shipping_address": {
            "street": "Av. Boa Viagem 1000",
            "city": "Recife",
            "state": "PE",
            "postal_code": "51011-000"
        },
        "payment_method": "card"
    })
}

fn session_completed_event(order_id: &str, session_id: &str) -> Vec<u8> {
    json!({
        "id": "evt_test",
        "type": "checkout.session.completed",
        "data": { "object": {
            "id": session_id,
            "payment_status": "paid",
            "metadata": { "orderId": order_id },
            "customer_details": { "email": "joana@varanda.test" }
        }}
    })
    .to_string()
    .into_bytes()
}

fn signature_for(payload: &[u8]) -> String {
    let timestamp = chrono::Utc::now().timestamp().to_string();
    let signature = sign_payload(WEBHOOK_SECRET, &timestamp, payload);
    format!("t={timestamp},v1={signature}")
}

async fn create_order(app: &TestApp) -> String {
    let product = app.seed_product("Pastel de Carne", dec!(25.00), 10).await;
    let response = app
        .request(
            Method::POST,
            "/api/orders",
            Some(cart_body(product.id, 2)),
            Some(&app.user_token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    TestApp::body_json(response).await["data"]["id"]
        .as_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn missing_or_invalid_signature_is_rejected_before_any_lookup() {
    let app = TestApp::new().await;
    let order_id = create_order(&app).await;
    let payload = session_completed_event(&order_id, "cs_live_1");

    // No signature header at all
    let response = app
        .raw_request(Method::POST, "/api/orders/webhook", payload.clone(), &[])
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Garbage signature
    let response = app
        .raw_request(
            Method::POST,
            "/api/orders/webhook",
            payload.clone(),
            &[("stripe-signature", "t=123,v1=deadbeef")],
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Valid signature over a different body
    let forged = signature_for(b"something else entirely");
    let response = app
        .raw_request(
            Method::POST,
            "/api/orders/webhook",
            payload,
            &[("stripe-signature", forged.as_str())],
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // The order was never touched
    let order = app
        .request(
            Method::GET,
            &format!("/api/orders/{order_id}"),
            None,
            Some(&app.admin_token),
        )
        .await;
    let body = TestApp::body_json(order).await;
    assert_eq!(body["data"]["is_paid"], false);
    assert!(body["data"]["payment_result"].is_null());
}

#[tokio::test]
async fn completed_session_marks_the_order_paid() {
    let app = TestApp::new().await;
    let order_id = create_order(&app).await;
    let payload = session_completed_event(&order_id, "cs_live_42");
    let signature = signature_for(&payload);

    let response = app
        .raw_request(
            Method::POST,
            "/api/orders/webhook",
            payload,
            &[("stripe-signature", signature.as_str())],
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = TestApp::body_json(response).await;
    assert_eq!(body["received"], true);

    let order = app
        .request(
            Method::GET,
            &format!("/api/orders/{order_id}"),
            None,
            Some(&app.admin_token),
        )
        .await;
    let body = TestApp::body_json(order).await;
    assert_eq!(body["data"]["is_paid"], true);
    assert_eq!(body["data"]["status"], "processing");
    assert_eq!(body["data"]["payment_result"]["id"], "cs_live_42");
    assert_eq!(body["data"]["payment_result"]["status"], "paid");
    assert_eq!(
        body["data"]["payment_result"]["email"],
        "joana@varanda.test"
    );
    assert!(body["data"]["paid_at"].is_string());
}

#[tokio::test]
async fn redelivered_events_are_idempotent() {
    let app = TestApp::new().await;
    let order_id = create_order(&app).await;
    let payload = session_completed_event(&order_id, "cs_live_7");

    for _ in 0..2 {
        let signature = signature_for(&payload);
        let response = app
            .raw_request(
                Method::POST,
                "/api/orders/webhook",
                payload.clone(),
                &[("stripe-signature", signature.as_str())],
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let order = app
        .request(
            Method::GET,
            &format!("/api/orders/{order_id}"),
            None,
            Some(&app.admin_token),
        )
        .await;
    let body = TestApp::body_json(order).await;
    assert_eq!(body["data"]["is_paid"], true);
    assert_eq!(body["data"]["payment_result"]["id"], "cs_live_7");

    // Redelivery did not double-send the status email
    assert_eq!(app.mailer.count_with_subject("Atualizacao").await, 1);
}

#[tokio::test]
async fn sessions_without_an_order_are_acknowledged_as_noops() {
    let app = TestApp::new().await;

    // Unknown order id
    let payload = session_completed_event(&uuid::Uuid::new_v4().to_string(), "cs_live_9");
    let signature = signature_for(&payload);
    let response = app
        .raw_request(
            Method::POST,
            "/api/orders/webhook",
            payload,
            &[("stripe-signature", signature.as_str())],
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    // No metadata at all
    let payload = json!({
        "id": "evt_no_meta",
        "type": "checkout.session.completed",
        "data": { "object": { "id": "cs_live_10", "payment_status": "paid" } }
    })
    .to_string()
    .into_bytes();
    let signature = signature_for(&payload);
    let response = app
        .raw_request(
            Method::POST,
            "/api/orders/webhook",
            payload,
            &[("stripe-signature", signature.as_str())],
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    // Unhandled event kind
    let payload = json!({
        "id": "evt_other",
        "type": "invoice.finalized",
        "data": { "object": {} }
    })
    .to_string()
    .into_bytes();
    let signature = signature_for(&payload);
    let response = app
        .raw_request(
            Method::POST,
            "/api/orders/webhook",
            payload,
            &[("stripe-signature", signature.as_str())],
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = TestApp::body_json(response).await;
    assert_eq!(body["received"], true);
}

#[tokio::test]
async fn checkout_session_uses_live_catalog_prices() {
    let app = TestApp::new().await;
    let product = app.seed_product("Torta de Limao", dec!(40.00), 10).await;
    let order_id = {
        let response = app
            .request(
                Method::POST,
                "/api/orders",
                Some(cart_body(product.id, 1)),
                Some(&app.user_token),
            )
            .await;
        TestApp::body_json(response).await["data"]["id"]
            .as_str()
            .unwrap()
            .to_string()
    };

    // Catalog price moves after the order snapshot
    app.set_product_price(product.id, dec!(45.00)).await;

    let response = app
        .request(
            Method::POST,
            "/api/orders/create-checkout-session",
            Some(json!({
                "order_items": [{ "product": product.id, "quantity": 1 }],
                "order_id": order_id
            })),
            Some(&app.user_token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = TestApp::body_json(response).await;
    assert_eq!(body["data"]["url"], "https://checkout.test/pay");

    let requests = app.gateway.requests().await;
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    // Hosted session prices from the catalog as it is now, not the snapshot
    assert_eq!(request.line_items[0].unit_amount_minor, 4500);
    assert_eq!(request.currency, "brl");
    assert_eq!(request.order_id.as_deref(), Some(order_id.as_str()));
    assert_eq!(request.customer_email, "joana@varanda.test");
    assert!(request
        .success_url
        .contains("session_id={CHECKOUT_SESSION_ID}"));
    assert_eq!(request.cancel_url, "https://shop.test/cart");
}

#[tokio::test]
async fn checkout_session_rejects_unknown_products() {
    let app = TestApp::new().await;
    let response = app
        .request(
            Method::POST,
            "/api/orders/create-checkout-session",
            Some(json!({
                "order_items": [{ "product": uuid::Uuid::new_v4(), "quantity": 1 }]
            })),
            Some(&app.user_token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(app.gateway.requests().await.is_empty());
}

#[tokio::test]
async fn webhook_decimal_amounts_survive_reconciliation() {
    let app = TestApp::new().await;
    let order_id = create_order(&app).await;

    let payload = session_completed_event(&order_id, "cs_live_total");
    let signature = signature_for(&payload);
    app.raw_request(
        Method::POST,
        "/api/orders/webhook",
        payload,
        &[("stripe-signature", signature.as_str())],
    )
    .await;

    let order = app
        .request(
            Method::GET,
            &format!("/api/orders/{order_id}"),
            None,
            Some(&app.admin_token),
        )
        .await;
    let body = TestApp::body_json(order).await;
    // 2 x 25.00 + 15% tax + flat shipping
    assert_eq!(dec_of(&body["data"]["total_price"]), dec!(67.50));
}
