//! OpenAPI document and Swagger UI mount.

use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Varanda API",
        description = "Storefront backend: catalog, accounts, checkout, payment reconciliation, reviews",
        license(name = "MIT")
    ),
    paths(
        crate::handlers::orders::create_order,
        crate::handlers::orders::my_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::pay_order,
        crate::handlers::orders::deliver_order,
        crate::handlers::orders::delete_order,
        crate::handlers::orders::create_checkout_session,
        crate::handlers::payment_webhooks::payment_webhook,
        crate::handlers::products::create_product,
        crate::handlers::users::register,
        crate::handlers::users::login,
    ),
    components(schemas(
        crate::errors::ErrorResponse,
        crate::handlers::orders::CreateOrderRequest,
        crate::handlers::orders::CreateOrderItem,
        crate::handlers::orders::Address,
        crate::handlers::orders::OrderResponse,
        crate::handlers::orders::OrderItemResponse,
        crate::handlers::orders::OrderSummary,
        crate::handlers::orders::PaymentPayload,
        crate::handlers::orders::CreateCheckoutSessionRequest,
        crate::handlers::products::CreateProductRequest,
        crate::handlers::products::ProductResponse,
        crate::handlers::users::RegisterRequest,
        crate::handlers::users::LoginRequest,
        crate::handlers::users::UserResponse,
        crate::entities::order::OrderStatus,
        crate::entities::order::PaymentMethod,
        crate::payments::CheckoutSession,
    )),
    tags(
        (name = "Orders", description = "Order creation, payment, fulfillment"),
        (name = "Products", description = "Catalog"),
        (name = "Users", description = "Accounts and sessions")
    )
)]
pub struct ApiDoc;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi())
}
