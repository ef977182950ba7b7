use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::auth::AuthUser;
use crate::entities::order::{self, OrderStatus, PaymentMethod};
use crate::entities::order_item;
use crate::errors::ServiceError;
use crate::payments::CheckoutSession;
use crate::services::checkout::CheckoutItem;
use crate::services::orders::{
    CartItem, CreateOrderInput, OrderFilter, OrderStats, OrderWithItems, PaymentConfirmation,
    ShippingAddress,
};
use crate::{ApiResponse, AppState, ListQuery, PaginatedResponse};

// Order DTOs

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CreateOrderRequest {
    #[validate(length(min = 1, message = "the cart is empty"))]
    pub items: Vec<CreateOrderItem>,
    #[validate]
    pub shipping_address: Address,
    pub payment_method: PaymentMethod,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CreateOrderItem {
    pub product_id: Uuid,
    #[validate(range(min = 1))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct Address {
    #[validate(length(min = 1, message = "street is required"))]
    pub street: String,
    #[validate(length(min = 1, message = "city is required"))]
    pub city: String,
    #[validate(length(min = 1, message = "state is required"))]
    pub state: String,
    #[validate(length(min = 1, message = "postal code is required"))]
    pub postal_code: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderItemResponse {
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentResultResponse {
    pub id: String,
    pub status: String,
    pub update_time: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub items: Vec<OrderItemResponse>,
    pub items_price: Decimal,
    pub tax_price: Decimal,
    pub shipping_price: Decimal,
    pub total_price: Decimal,
    pub is_paid: bool,
    pub paid_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_result: Option<PaymentResultResponse>,
    pub is_delivered: bool,
    pub delivered_at: Option<DateTime<Utc>>,
    pub shipping_address: Address,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// List rows omit the line items; fetch the order by id for the full detail.
#[derive(Debug, Serialize, ToSchema)]
pub struct OrderSummary {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: OrderStatus,
    pub total_price: Decimal,
    pub is_paid: bool,
    pub is_delivered: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AdminOrdersResponse {
    #[serde(flatten)]
    pub page: PaginatedResponse<OrderSummary>,
    pub stats: OrderStats,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AdminOrdersQuery {
    #[serde(default = "crate::default_page")]
    pub page: u64,
    #[serde(default = "crate::default_limit")]
    pub limit: u64,
    pub status: Option<OrderStatus>,
    pub is_paid: Option<bool>,
    pub is_delivered: Option<bool>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

/// Gateway-shaped payload accepted by the explicit mark-paid action.
#[derive(Debug, Deserialize, ToSchema)]
pub struct PaymentPayload {
    pub id: String,
    pub status: String,
    pub update_time: Option<String>,
    pub payer: Option<Payer>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct Payer {
    pub email_address: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CreateCheckoutSessionRequest {
    #[validate(length(min = 1, message = "checkout requires at least one item"))]
    pub order_items: Vec<CheckoutSessionItem>,
    pub order_id: Option<Uuid>,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct CheckoutSessionItem {
    pub product: Uuid,
    #[validate(range(min = 1))]
    pub quantity: i64,
}

fn map_order(order: order::Model, items: Vec<order_item::Model>) -> OrderResponse {
    let payment_result = order.payment_id.clone().map(|id| PaymentResultResponse {
        id,
        status: order.payment_status.clone().unwrap_or_default(),
        update_time: order.payment_update_time.clone(),
        email: order.payment_email.clone(),
    });

    OrderResponse {
        id: order.id,
        user_id: order.user_id,
        status: order.status,
        payment_method: order.payment_method,
        items: items
            .into_iter()
            .map(|item| OrderItemResponse {
                product_id: item.product_id,
                product_name: item.product_name,
                quantity: item.quantity,
                line_total: item.unit_price * Decimal::from(item.quantity),
                unit_price: item.unit_price,
            })
            .collect(),
        items_price: order.items_price,
        tax_price: order.tax_price,
        shipping_price: order.shipping_price,
        total_price: order.total_price,
        is_paid: order.is_paid,
        paid_at: order.paid_at,
        payment_result,
        is_delivered: order.is_delivered,
        delivered_at: order.delivered_at,
        shipping_address: Address {
            street: order.shipping_street,
            city: order.shipping_city,
            state: order.shipping_state,
            postal_code: order.shipping_postal_code,
        },
        notes: order.notes,
        created_at: order.created_at,
        updated_at: order.updated_at,
    }
}

fn map_summary(order: order::Model) -> OrderSummary {
    OrderSummary {
        id: order.id,
        user_id: order.user_id,
        status: order.status,
        total_price: order.total_price,
        is_paid: order.is_paid,
        is_delivered: order.is_delivered,
        created_at: order.created_at,
    }
}

fn map_order_with_items(order: OrderWithItems) -> OrderResponse {
    map_order(order.order, order.items)
}

/// Create a new order from the cart
#[utoipa::path(
    post,
    path = "/api/orders",
    summary = "Create order",
    description = "Price the cart, reserve stock, and persist a pending order",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = ApiResponse<OrderResponse>),
        (status = 400, description = "Empty cart or insufficient stock", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown product in cart", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn create_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OrderResponse>>), ServiceError> {
    request.validate()?;

    let user = state.services.accounts.get_user(auth_user.user_id).await?;
    let input = CreateOrderInput {
        items: request
            .items
            .into_iter()
            .map(|item| CartItem {
                product_id: item.product_id,
                quantity: item.quantity,
            })
            .collect(),
        shipping_address: ShippingAddress {
            street: request.shipping_address.street,
            city: request.shipping_address.city,
            state: request.shipping_address.state,
            postal_code: request.shipping_address.postal_code,
        },
        payment_method: request.payment_method,
        notes: request.notes,
    };

    let created = state.services.orders.create_order(&user, input).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(map_order_with_items(created))),
    ))
}

/// Orders of the authenticated user, newest first
#[utoipa::path(
    get,
    path = "/api/orders/myorders",
    summary = "My orders",
    params(
        ("page" = Option<u64>, Query, description = "Page number (default 1)"),
        ("limit" = Option<u64>, Query, description = "Items per page (default 10)"),
    ),
    responses(
        (status = 200, description = "Orders retrieved", body = ApiResponse<PaginatedResponse<OrderSummary>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn my_orders(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<PaginatedResponse<OrderSummary>>>, ServiceError> {
    let page = state
        .services
        .orders
        .list_my_orders(auth_user.user_id, query.page, query.limit)
        .await?;

    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        page.orders.into_iter().map(map_summary).collect(),
        page.total,
        query.page,
        query.limit,
    ))))
}

/// Get order by ID (owner or admin)
#[utoipa::path(
    get,
    path = "/api/orders/{id}",
    summary = "Get order",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order retrieved", body = ApiResponse<OrderResponse>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Not the owner", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state
        .services
        .orders
        .get_order(id, auth_user.user_id, auth_user.is_admin())
        .await?;
    Ok(Json(ApiResponse::success(map_order_with_items(order))))
}

/// Admin listing with filters and aggregate stats
#[utoipa::path(
    get,
    path = "/api/orders",
    summary = "List orders",
    params(
        ("page" = Option<u64>, Query, description = "Page number"),
        ("limit" = Option<u64>, Query, description = "Items per page"),
        ("status" = Option<String>, Query, description = "Filter by lifecycle status"),
        ("is_paid" = Option<bool>, Query, description = "Filter by payment state"),
        ("is_delivered" = Option<bool>, Query, description = "Filter by fulfillment state"),
        ("start_date" = Option<String>, Query, description = "Created-at lower bound (RFC 3339)"),
        ("end_date" = Option<String>, Query, description = "Created-at upper bound (RFC 3339)"),
    ),
    responses(
        (status = 200, description = "Orders retrieved", body = ApiResponse<AdminOrdersResponse>),
        (status = 403, description = "Admin only", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<AdminOrdersQuery>,
) -> Result<Json<ApiResponse<AdminOrdersResponse>>, ServiceError> {
    let filter = OrderFilter {
        status: query.status,
        is_paid: query.is_paid,
        is_delivered: query.is_delivered,
        start_date: query.start_date,
        end_date: query.end_date,
    };

    let page = state
        .services
        .orders
        .list_orders(&filter, query.page, query.limit)
        .await?;
    let stats = state.services.orders.order_stats(&filter).await?;

    Ok(Json(ApiResponse::success(AdminOrdersResponse {
        page: PaginatedResponse::new(
            page.orders.into_iter().map(map_summary).collect(),
            page.total,
            query.page,
            query.limit,
        ),
        stats,
    })))
}

/// Mark an order paid from a gateway-shaped payload
#[utoipa::path(
    put,
    path = "/api/orders/{id}/pay",
    summary = "Mark order paid",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = PaymentPayload,
    responses(
        (status = 200, description = "Order updated", body = ApiResponse<OrderResponse>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn pay_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<PaymentPayload>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let confirmation = PaymentConfirmation {
        id: payload.id,
        status: payload.status,
        update_time: payload
            .update_time
            .unwrap_or_else(|| Utc::now().to_rfc3339()),
        email: payload
            .payer
            .and_then(|payer| payer.email_address)
            .unwrap_or_default(),
    };

    let order = state.services.orders.mark_paid(id, confirmation).await?;
    let items = state.services.orders.order_items(order.id).await?;
    Ok(Json(ApiResponse::success(map_order(order, items))))
}

/// Mark an order delivered
#[utoipa::path(
    put,
    path = "/api/orders/{id}/deliver",
    summary = "Mark order delivered",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order updated", body = ApiResponse<OrderResponse>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn deliver_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state.services.orders.mark_delivered(id).await?;
    let items = state.services.orders.order_items(order.id).await?;
    Ok(Json(ApiResponse::success(map_order(order, items))))
}

/// Delete an order, restoring its stock
#[utoipa::path(
    delete,
    path = "/api/orders/{id}",
    summary = "Delete order",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 204, description = "Order deleted"),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn delete_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    state.services.orders.delete_order(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Open a hosted payment session for the cart
#[utoipa::path(
    post,
    path = "/api/orders/create-checkout-session",
    summary = "Create checkout session",
    request_body = CreateCheckoutSessionRequest,
    responses(
        (status = 200, description = "Session created", body = ApiResponse<CheckoutSession>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown product", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway failure", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn create_checkout_session(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<CreateCheckoutSessionRequest>,
) -> Result<Json<ApiResponse<CheckoutSession>>, ServiceError> {
    request.validate()?;

    let email = auth_user.email.clone().ok_or_else(|| {
        ServiceError::Unauthorized("token does not carry an email address".to_string())
    })?;

    let items = request
        .order_items
        .into_iter()
        .map(|item| CheckoutItem {
            product_id: item.product,
            quantity: item.quantity,
        })
        .collect();

    let session = state
        .services
        .checkout
        .create_session(auth_user.user_id, &email, items, request.order_id)
        .await?;

    Ok(Json(ApiResponse::success(session)))
}
