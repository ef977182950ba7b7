mod common;

use axum::http::{Method, StatusCode};
use common::{dec_of, TestApp};
use rust_decimal_macros::dec;
use serde_json::json;

fn cart_body(items: &[(uuid::Uuid, i32)]) -> serde_json::Value {
    json!({
        "items": items
            .iter()
            .map(|(id, qty)| json!({ "product_id": id, "quantity": qty }))
            .collect::<Vec<_>>(),
        "shipping_address": {
            "street": "Rua das Flores 12",
            "city": "Recife",
            "state": "PE",
            "postal_code": "50000-000"
        },
        "payment_method": "card"
    })
}

#[tokio::test]
async fn create_order_prices_cart_and_decrements_stock() {
    let app = TestApp::new().await;
    let product = app.seed_product("Pastel de Queijo", dec!(50.00), 5).await;

    let response = app
        .request(
            Method::POST,
            "/api/orders",
            Some(cart_body(&[(product.id, 2)])),
            Some(&app.user_token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = TestApp::body_json(response).await;
    let data = &body["data"];
    assert_eq!(dec_of(&data["items_price"]), dec!(100.00));
    assert_eq!(dec_of(&data["tax_price"]), dec!(15.00));
    // The flat fee still applies at exactly 100
    assert_eq!(dec_of(&data["shipping_price"]), dec!(10));
    assert_eq!(dec_of(&data["total_price"]), dec!(125.00));
    assert_eq!(data["status"], "pending");
    assert_eq!(data["is_paid"], false);
    assert_eq!(data["items"][0]["product_name"], "Pastel de Queijo");
    assert_eq!(dec_of(&data["items"][0]["unit_price"]), dec!(50.00));

    assert_eq!(app.product_stock(product.id).await, 3);

    // Confirmation email went out to the buyer
    assert_eq!(app.mailer.count_with_subject("Confirmacao").await, 1);
}

#[tokio::test]
async fn shipping_is_waived_above_the_threshold() {
    let app = TestApp::new().await;
    let product = app.seed_product("Feijoada Completa", dec!(75.50), 10).await;

    let response = app
        .request(
            Method::POST,
            "/api/orders",
            Some(cart_body(&[(product.id, 2)])),
            Some(&app.user_token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = TestApp::body_json(response).await;
    assert_eq!(dec_of(&body["data"]["items_price"]), dec!(151.00));
    assert_eq!(dec_of(&body["data"]["shipping_price"]), dec!(0));
    assert_eq!(dec_of(&body["data"]["total_price"]), dec!(173.65));
}

#[tokio::test]
async fn insufficient_stock_aborts_the_whole_cart() {
    let app = TestApp::new().await;
    let plenty = app.seed_product("Suco de Caju", dec!(8.00), 5).await;
    let scarce = app.seed_product("Bolo de Rolo", dec!(30.00), 2).await;

    let response = app
        .request(
            Method::POST,
            "/api/orders",
            Some(cart_body(&[(plenty.id, 1), (scarce.id, 10)])),
            Some(&app.user_token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = TestApp::body_json(response).await;
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("Bolo de Rolo"));

    // Nothing moved, not even for the valid line
    assert_eq!(app.product_stock(plenty.id).await, 5);
    assert_eq!(app.product_stock(scarce.id).await, 2);

    // And no order was persisted
    let list = app
        .request(
            Method::GET,
            "/api/orders/myorders",
            None,
            Some(&app.user_token),
        )
        .await;
    let body = TestApp::body_json(list).await;
    assert_eq!(body["data"]["total"], 0);
}

#[tokio::test]
async fn unknown_product_and_empty_cart_are_rejected() {
    let app = TestApp::new().await;

    let missing = uuid::Uuid::new_v4();
    let response = app
        .request(
            Method::POST,
            "/api/orders",
            Some(cart_body(&[(missing, 1)])),
            Some(&app.user_token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = TestApp::body_json(response).await;
    assert!(body["message"].as_str().unwrap().contains(&missing.to_string()));

    let response = app
        .request(
            Method::POST,
            "/api/orders",
            Some(cart_body(&[])),
            Some(&app.user_token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn order_snapshot_survives_catalog_price_changes() {
    let app = TestApp::new().await;
    let product = app.seed_product("Tapioca", dec!(20.00), 10).await;

    let response = app
        .request(
            Method::POST,
            "/api/orders",
            Some(cart_body(&[(product.id, 1)])),
            Some(&app.user_token),
        )
        .await;
    let order_id = TestApp::body_json(response).await["data"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    app.set_product_price(product.id, dec!(99.00)).await;

    let response = app
        .request(
            Method::GET,
            &format!("/api/orders/{order_id}"),
            None,
            Some(&app.user_token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = TestApp::body_json(response).await;
    assert_eq!(dec_of(&body["data"]["items"][0]["unit_price"]), dec!(20.00));
    assert_eq!(dec_of(&body["data"]["items_price"]), dec!(20.00));
}

#[tokio::test]
async fn deleting_an_order_restores_stock() {
    let app = TestApp::new().await;
    let product = app.seed_product("Caldinho", dec!(12.00), 5).await;

    let response = app
        .request(
            Method::POST,
            "/api/orders",
            Some(cart_body(&[(product.id, 2)])),
            Some(&app.user_token),
        )
        .await;
    let order_id = TestApp::body_json(response).await["data"]["id"]
        .as_str()
        .unwrap()
        .to_string();
    assert_eq!(app.product_stock(product.id).await, 3);

    let response = app
        .request(
            Method::DELETE,
            &format!("/api/orders/{order_id}"),
            None,
            Some(&app.admin_token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // Round trip: the decrement is fully compensated
    assert_eq!(app.product_stock(product.id).await, 5);

    let response = app
        .request(
            Method::GET,
            &format!("/api/orders/{order_id}"),
            None,
            Some(&app.admin_token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn only_the_owner_or_an_admin_can_read_an_order() {
    let app = TestApp::new().await;
    let product = app.seed_product("Cuscuz", dec!(10.00), 5).await;

    let response = app
        .request(
            Method::POST,
            "/api/orders",
            Some(cart_body(&[(product.id, 1)])),
            Some(&app.user_token),
        )
        .await;
    let order_id = TestApp::body_json(response).await["data"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    // Another account cannot read it
    let (_stranger, stranger_token) = {
        let register = app
            .request(
                Method::POST,
                "/api/users/register",
                Some(json!({
                    "name": "Curioso",
                    "email": "curioso@varanda.test",
                    "password": "password123"
                })),
                None,
            )
            .await;
        assert_eq!(register.status(), StatusCode::CREATED);
        let body = TestApp::body_json(register).await;
        (
            body["data"]["user"]["id"].as_str().unwrap().to_string(),
            body["data"]["tokens"]["access_token"]
                .as_str()
                .unwrap()
                .to_string(),
        )
    };

    let response = app
        .request(
            Method::GET,
            &format!("/api/orders/{order_id}"),
            None,
            Some(&stranger_token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // The admin can
    let response = app
        .request(
            Method::GET,
            &format!("/api/orders/{order_id}"),
            None,
            Some(&app.admin_token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    // And anonymous callers are rejected outright
    let response = app
        .request(Method::GET, &format!("/api/orders/{order_id}"), None, None)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_actions_are_denied_to_regular_users() {
    let app = TestApp::new().await;
    let product = app.seed_product("Queijo Coalho", dec!(15.00), 5).await;

    let response = app
        .request(
            Method::POST,
            "/api/orders",
            Some(cart_body(&[(product.id, 1)])),
            Some(&app.user_token),
        )
        .await;
    let order_id = TestApp::body_json(response).await["data"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    let response = app
        .request(
            Method::PUT,
            &format!("/api/orders/{order_id}/deliver"),
            None,
            Some(&app.user_token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .request(Method::GET, "/api/orders", None, Some(&app.user_token))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn mark_paid_is_idempotent_and_advances_status() {
    let app = TestApp::new().await;
    let product = app.seed_product("Arroz Doce", dec!(18.00), 5).await;

    let response = app
        .request(
            Method::POST,
            "/api/orders",
            Some(cart_body(&[(product.id, 1)])),
            Some(&app.user_token),
        )
        .await;
    let order_id = TestApp::body_json(response).await["data"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    let payload = json!({
        "id": "pi_test_1",
        "status": "succeeded",
        "update_time": "2025-11-02T12:00:00Z",
        "payer": { "email_address": "joana@varanda.test" }
    });

    let response = app
        .request(
            Method::PUT,
            &format!("/api/orders/{order_id}/pay"),
            Some(payload.clone()),
            Some(&app.admin_token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = TestApp::body_json(response).await;
    assert_eq!(body["data"]["is_paid"], true);
    assert_eq!(body["data"]["status"], "processing");
    assert_eq!(body["data"]["payment_result"]["id"], "pi_test_1");
    let first_paid_at = body["data"]["paid_at"].as_str().unwrap().to_string();

    // Replay of the same confirmation changes nothing
    let response = app
        .request(
            Method::PUT,
            &format!("/api/orders/{order_id}/pay"),
            Some(payload),
            Some(&app.admin_token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = TestApp::body_json(response).await;
    assert_eq!(body["data"]["paid_at"].as_str().unwrap(), first_paid_at);

    // One status email, not two
    assert_eq!(app.mailer.count_with_subject("Atualizacao").await, 1);
}

#[tokio::test]
async fn deliver_completes_the_order() {
    let app = TestApp::new().await;
    let product = app.seed_product("Mungunza", dec!(9.00), 3).await;

    let response = app
        .request(
            Method::POST,
            "/api/orders",
            Some(cart_body(&[(product.id, 1)])),
            Some(&app.user_token),
        )
        .await;
    let order_id = TestApp::body_json(response).await["data"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    let response = app
        .request(
            Method::PUT,
            &format!("/api/orders/{order_id}/deliver"),
            None,
            Some(&app.admin_token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = TestApp::body_json(response).await;
    assert_eq!(body["data"]["is_delivered"], true);
    assert_eq!(body["data"]["status"], "completed");
    assert!(body["data"]["delivered_at"].is_string());
}

#[tokio::test]
async fn admin_listing_filters_and_aggregates() {
    let app = TestApp::new().await;
    let product = app.seed_product("Pao de Queijo", dec!(50.00), 20).await;

    for _ in 0..2 {
        let response = app
            .request(
                Method::POST,
                "/api/orders",
                Some(cart_body(&[(product.id, 2)])),
                Some(&app.user_token),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let response = app
        .request(
            Method::GET,
            "/api/orders?is_paid=false&page=1&limit=10",
            None,
            Some(&app.admin_token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = TestApp::body_json(response).await;
    assert_eq!(body["data"]["total"], 2);
    assert_eq!(body["data"]["stats"]["total_orders"], 2);
    assert_eq!(dec_of(&body["data"]["stats"]["total_sales"]), dec!(250.00));
    assert_eq!(
        dec_of(&body["data"]["stats"]["avg_order_value"]),
        dec!(125.00)
    );

    // A filter that matches nothing returns empty data, zero stats
    let response = app
        .request(
            Method::GET,
            "/api/orders?is_delivered=true",
            None,
            Some(&app.admin_token),
        )
        .await;
    let body = TestApp::body_json(response).await;
    assert_eq!(body["data"]["total"], 0);
    assert_eq!(body["data"]["stats"]["total_orders"], 0);
}

#[tokio::test]
async fn my_orders_paginates_newest_first() {
    let app = TestApp::new().await;
    let product = app.seed_product("Broa", dec!(5.00), 50).await;

    for _ in 0..3 {
        app.request(
            Method::POST,
            "/api/orders",
            Some(cart_body(&[(product.id, 1)])),
            Some(&app.user_token),
        )
        .await;
    }

    let response = app
        .request(
            Method::GET,
            "/api/orders/myorders?page=1&limit=2",
            None,
            Some(&app.user_token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = TestApp::body_json(response).await;
    assert_eq!(body["data"]["total"], 3);
    assert_eq!(body["data"]["items"].as_array().unwrap().len(), 2);
    assert_eq!(body["data"]["total_pages"], 2);
}
