mod common;

use axum::http::{Method, StatusCode};
use common::{dec_of, TestApp};
use rust_decimal_macros::dec;
use serde_json::json;

#[tokio::test]
async fn register_rejects_duplicate_emails() {
    let app = TestApp::new().await;

    let body = json!({
        "name": "Carlos Souza",
        "email": "carlos@varanda.test",
        "password": "password123"
    });

    let response = app
        .request(Method::POST, "/api/users/register", Some(body.clone()), None)
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let payload = TestApp::body_json(response).await;
    assert_eq!(payload["data"]["user"]["role"], "user");
    assert!(payload["data"]["tokens"]["access_token"].is_string());

    let response = app
        .request(Method::POST, "/api/users/register", Some(body), None)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn login_verifies_credentials() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::POST,
            "/api/users/login",
            Some(json!({ "email": "joana@varanda.test", "password": "password123" })),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .request(
            Method::POST,
            "/api/users/login",
            Some(json!({ "email": "joana@varanda.test", "password": "wrong-password" })),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn profile_reports_order_stats() {
    let app = TestApp::new().await;
    let product = app.seed_product("Cocada", dec!(50.00), 10).await;

    let response = app
        .request(
            Method::POST,
            "/api/orders",
            Some(json!({
                "items": [{ "product_id": product.id, "quantity": 2 }],
                "shipping_address": {
                    "street": "Rua A 1", "city": "Olinda",
                    "state": "PE", "postal_code": "53000-000"
                },
                "payment_method": "pix"
            })),
            Some(&app.user_token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .request(Method::GET, "/api/users/profile", None, Some(&app.user_token))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = TestApp::body_json(response).await;
    assert_eq!(body["data"]["user"]["email"], "joana@varanda.test");
    assert_eq!(body["data"]["stats"]["total_orders"], 1);
    assert_eq!(dec_of(&body["data"]["stats"]["total_spent"]), dec!(125.00));
}

#[tokio::test]
async fn password_reset_flow_issues_a_single_use_token() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::POST,
            "/api/users/forgotpassword",
            Some(json!({ "email": "joana@varanda.test" })),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    // The raw token only exists inside the reset email
    let sent = app.mailer.sent().await;
    let reset_mail = sent
        .iter()
        .find(|mail| mail.text.contains("/reset-password/"))
        .expect("reset email sent");
    let token = reset_mail
        .text
        .split("/reset-password/")
        .nth(1)
        .unwrap()
        .split_whitespace()
        .next()
        .unwrap()
        .trim_end_matches('.');

    let response = app
        .request(
            Method::PUT,
            &format!("/api/users/resetpassword/{token}"),
            Some(json!({ "password": "new-password-456" })),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    // Old password is gone, new one works
    let response = app
        .request(
            Method::POST,
            "/api/users/login",
            Some(json!({ "email": "joana@varanda.test", "password": "password123" })),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .request(
            Method::POST,
            "/api/users/login",
            Some(json!({ "email": "joana@varanda.test", "password": "new-password-456" })),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    // The token cannot be replayed
    let response = app
        .request(
            Method::PUT,
            &format!("/api/users/resetpassword/{token}"),
            Some(json!({ "password": "another-one-789" })),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn reviews_roll_up_into_product_rating() {
    let app = TestApp::new().await;
    let product = app.seed_product("Brigadeiro", dec!(4.00), 100).await;

    let response = app
        .request(
            Method::POST,
            &format!("/api/products/{}/reviews", product.id),
            Some(json!({ "rating": 5, "comment": "Perfeito!" })),
            Some(&app.user_token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    // One review per user per product
    let response = app
        .request(
            Method::POST,
            &format!("/api/products/{}/reviews", product.id),
            Some(json!({ "rating": 1, "comment": "Mudei de ideia" })),
            Some(&app.user_token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .request(
            Method::GET,
            &format!("/api/products/{}", product.id),
            None,
            None,
        )
        .await;
    let body = TestApp::body_json(response).await;
    assert_eq!(dec_of(&body["data"]["rating"]), dec!(5));
    assert_eq!(body["data"]["num_reviews"], 1);
}
