//! Varanda storefront API
//!
//! Catalog, accounts, checkout, payment reconciliation, and reviews for the
//! Varanda food-delivery shop.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod mailer;
pub mod middleware;
pub mod migrator;
pub mod notifications;
pub mod openapi;
pub mod payments;
pub mod services;
pub mod storage;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
    Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::auth::AuthRouterExt;

// App state shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub services: handlers::AppServices,
    pub redis: Arc<redis::Client>,
}

// Common query parameters for list endpoints
#[derive(Debug, Deserialize, ToSchema)]
pub struct ListQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
}

pub fn default_page() -> u64 {
    1
}
pub fn default_limit() -> u64 {
    10
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: middleware::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            meta: Some(ResponseMeta::capture()),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

impl<T> PaginatedResponse<T> {
    pub fn new(items: Vec<T>, total: u64, page: u64, limit: u64) -> Self {
        let limit = limit.max(1);
        Self {
            items,
            total,
            page,
            limit,
            total_pages: total.div_ceil(limit),
        }
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<axum::Json<ApiResponse<T>>, errors::ServiceError>;

/// The `/api` surface: accounts, catalog, reviews, orders, checkout, webhook.
pub fn api_routes() -> Router<AppState> {
    // Accounts: public endpoints
    let users_public = Router::new()
        .route("/users/register", post(handlers::users::register))
        .route("/users/login", post(handlers::users::login))
        .route("/users/refresh-token", post(handlers::users::refresh_token))
        .route(
            "/users/forgotpassword",
            post(handlers::users::forgot_password),
        )
        .route(
            "/users/resetpassword/:token",
            put(handlers::users::reset_password),
        )
        .route("/users/verify/:token", get(handlers::users::verify_email));

    // Accounts: authenticated user endpoints
    let users_private = Router::new()
        .route("/users/logout", post(handlers::users::logout))
        .route(
            "/users/profile",
            get(handlers::users::get_profile).put(handlers::users::update_profile),
        )
        .with_auth();

    // Accounts: administration
    let users_admin = Router::new()
        .route("/users", get(handlers::users::list_users))
        .route(
            "/users/:id",
            get(handlers::users::get_user)
                .put(handlers::users::update_user)
                .delete(handlers::users::delete_user),
        )
        .with_admin();

    // Catalog: public reads
    let products_public = Router::new()
        .route("/products", get(handlers::products::list_products))
        .route("/products/search", get(handlers::products::search_products))
        .route("/products/top", get(handlers::products::top_products))
        .route("/products/:id", get(handlers::products::get_product))
        .route(
            "/products/:id/related",
            get(handlers::products::related_products),
        )
        .route(
            "/products/category/:category",
            get(handlers::products::products_by_category),
        )
        .route(
            "/products/:id/reviews",
            get(handlers::reviews::product_reviews),
        );

    // Catalog: administration
    let products_admin = Router::new()
        .route("/products", post(handlers::products::create_product))
        .route(
            "/products/:id",
            put(handlers::products::update_product).delete(handlers::products::delete_product),
        )
        .route(
            "/products/:id/images",
            post(handlers::products::upload_product_images)
                .layer(DefaultBodyLimit::max(12 * 1024 * 1024)),
        )
        .with_admin();

    // Reviews
    let reviews_user = Router::new()
        .route(
            "/products/:id/reviews",
            post(handlers::reviews::create_review),
        )
        .route("/reviews/:id", delete(handlers::reviews::delete_review))
        .with_auth();

    // Orders: storefront
    let orders_user = Router::new()
        .route("/orders", post(handlers::orders::create_order))
        .route("/orders/myorders", get(handlers::orders::my_orders))
        .route("/orders/:id", get(handlers::orders::get_order))
        .route(
            "/orders/create-checkout-session",
            post(handlers::orders::create_checkout_session),
        )
        .with_auth();

    // Orders: administration
    let orders_admin = Router::new()
        .route("/orders", get(handlers::orders::list_orders))
        .route("/orders/:id/pay", put(handlers::orders::pay_order))
        .route("/orders/:id/deliver", put(handlers::orders::deliver_order))
        .route("/orders/:id", delete(handlers::orders::delete_order))
        .with_admin();

    // Gateway webhook: no bearer auth, signature-verified instead
    let payment_webhook = Router::new().route(
        "/orders/webhook",
        post(handlers::payment_webhooks::payment_webhook),
    );

    Router::new()
        .route("/status", get(handlers::health::api_status))
        .merge(users_public)
        .merge(users_private)
        .merge(users_admin)
        .merge(products_public)
        .merge(products_admin)
        .merge(reviews_user)
        .merge(orders_user)
        .merge(orders_admin)
        .merge(payment_webhook)
}

#[cfg(test)]
mod response_tests {
    use super::*;
    use chrono::DateTime;

    #[tokio::test]
    async fn success_response_includes_request_metadata() {
        let response = middleware::scope_request_id(middleware::RequestId::new("meta-123"), async {
            ApiResponse::success("ok")
        })
        .await;

        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-123"));
        DateTime::parse_from_rfc3339(&meta.timestamp).expect("timestamp should parse");
    }

    #[test]
    fn pagination_rounds_total_pages_up() {
        let page = PaginatedResponse::new(vec![1, 2, 3], 31, 1, 10);
        assert_eq!(page.total_pages, 4);

        let exact = PaginatedResponse::new(vec![1], 30, 1, 10);
        assert_eq!(exact.total_pages, 3);

        let empty = PaginatedResponse::<i32>::new(vec![], 0, 1, 10);
        assert_eq!(empty.total_pages, 0);
    }
}
