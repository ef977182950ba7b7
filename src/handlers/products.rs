use axum::{
    extract::{Multipart, Path, Query, State},
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

use crate::entities::product;
use crate::errors::ServiceError;
use crate::services::products::{CreateProductInput, ProductFilter, UpdateProductInput};
use crate::{ApiResponse, AppState, PaginatedResponse};

#[derive(Debug, Serialize, ToSchema)]
pub struct ProductResponse {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub price: Decimal,
    pub category: String,
    pub images: Vec<String>,
    pub stock: i32,
    pub is_available: bool,
    pub rating: Decimal,
    pub num_reviews: i32,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

fn map_product(model: product::Model) -> ProductResponse {
    let images = model.image_urls();
    let tags = serde_json::from_value(model.tags.clone()).unwrap_or_default();
    ProductResponse {
        id: model.id,
        name: model.name,
        description: model.description,
        price: model.price,
        category: model.category,
        images,
        stock: model.stock,
        is_available: model.is_available,
        rating: model.rating,
        num_reviews: model.num_reviews,
        tags,
        created_at: model.created_at,
        updated_at: model.updated_at,
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ProductListQuery {
    #[serde(default = "crate::default_page")]
    pub page: u64,
    #[serde(default = "crate::default_limit")]
    pub limit: u64,
    pub category: Option<String>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub is_available: Option<bool>,
    pub search: Option<String>,
    pub sort_by: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SearchQuery {
    pub q: String,
    #[serde(default = "crate::default_page")]
    pub page: u64,
    #[serde(default = "crate::default_limit")]
    pub limit: u64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TopQuery {
    #[serde(default = "default_top_limit")]
    pub limit: u64,
}

fn default_top_limit() -> u64 {
    5
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CreateProductRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(length(min = 1, max = 1000))]
    pub description: String,
    pub price: Decimal,
    pub category: String,
    #[validate(range(min = 0))]
    pub stock: i32,
    #[serde(default = "default_true")]
    pub is_available: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct UpdateProductRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 1000))]
    pub description: Option<String>,
    pub price: Option<Decimal>,
    pub category: Option<String>,
    pub stock: Option<i32>,
    pub is_available: Option<bool>,
    pub tags: Option<Vec<String>>,
}

/// Public catalog listing with filters, search, and sorting
pub async fn list_products(
    State(state): State<AppState>,
    Query(query): Query<ProductListQuery>,
) -> Result<Json<ApiResponse<PaginatedResponse<ProductResponse>>>, ServiceError> {
    let filter = ProductFilter {
        category: query.category,
        min_price: query.min_price,
        max_price: query.max_price,
        is_available: query.is_available,
        search: query.search,
        sort_by: query.sort_by,
    };

    let page = state
        .services
        .products
        .list_products(&filter, query.page, query.limit)
        .await?;

    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        page.products.into_iter().map(map_product).collect(),
        page.total,
        query.page,
        query.limit,
    ))))
}

pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<ProductResponse>>, ServiceError> {
    let product = state.services.products.get_product(id).await?;
    Ok(Json(ApiResponse::success(map_product(product))))
}

/// Free-text search over name, description
pub async fn search_products(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<ApiResponse<PaginatedResponse<ProductResponse>>>, ServiceError> {
    let filter = ProductFilter {
        search: Some(query.q),
        ..Default::default()
    };
    let page = state
        .services
        .products
        .list_products(&filter, query.page, query.limit)
        .await?;

    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        page.products.into_iter().map(map_product).collect(),
        page.total,
        query.page,
        query.limit,
    ))))
}

pub async fn top_products(
    State(state): State<AppState>,
    Query(query): Query<TopQuery>,
) -> Result<Json<ApiResponse<Vec<ProductResponse>>>, ServiceError> {
    let products = state.services.products.top_rated(query.limit).await?;
    Ok(Json(ApiResponse::success(
        products.into_iter().map(map_product).collect(),
    )))
}

pub async fn related_products(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<ProductResponse>>>, ServiceError> {
    let products = state.services.products.related(id, 4).await?;
    Ok(Json(ApiResponse::success(
        products.into_iter().map(map_product).collect(),
    )))
}

pub async fn products_by_category(
    State(state): State<AppState>,
    Path(category): Path<String>,
    Query(query): Query<ProductListQuery>,
) -> Result<Json<ApiResponse<PaginatedResponse<ProductResponse>>>, ServiceError> {
    let filter = ProductFilter {
        category: Some(category),
        ..Default::default()
    };
    let page = state
        .services
        .products
        .list_products(&filter, query.page, query.limit)
        .await?;

    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        page.products.into_iter().map(map_product).collect(),
        page.total,
        query.page,
        query.limit,
    ))))
}

/// Create a product (admin)
#[utoipa::path(
    post,
    path = "/api/products",
    summary = "Create product",
    request_body = CreateProductRequest,
    responses(
        (status = 201, description = "Product created", body = ApiResponse<ProductResponse>),
        (status = 400, description = "Validation failure", body = crate::errors::ErrorResponse),
        (status = 403, description = "Admin only", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn create_product(
    State(state): State<AppState>,
    Json(request): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ProductResponse>>), ServiceError> {
    request.validate()?;

    let product = state
        .services
        .products
        .create_product(CreateProductInput {
            name: request.name,
            description: request.description,
            price: request.price,
            category: request.category,
            stock: request.stock,
            is_available: request.is_available,
            tags: request.tags,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(map_product(product))),
    ))
}

/// Update a product (admin)
pub async fn update_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateProductRequest>,
) -> Result<Json<ApiResponse<ProductResponse>>, ServiceError> {
    request.validate()?;

    let product = state
        .services
        .products
        .update_product(
            id,
            UpdateProductInput {
                name: request.name,
                description: request.description,
                price: request.price,
                category: request.category,
                stock: request.stock,
                is_available: request.is_available,
                tags: request.tags,
            },
        )
        .await?;

    Ok(Json(ApiResponse::success(map_product(product))))
}

/// Delete a product and its stored images (admin)
pub async fn delete_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    state.services.products.delete_product(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Attach uploaded images to a product (admin, multipart)
pub async fn upload_product_images(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<Json<ApiResponse<ProductResponse>>, ServiceError> {
    let mut updated = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServiceError::InvalidInput(format!("invalid multipart body: {e}")))?
    {
        let content_type = field
            .content_type()
            .map(str::to_owned)
            .ok_or_else(|| ServiceError::InvalidInput("file part needs a content type".into()))?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ServiceError::InvalidInput(format!("failed to read upload: {e}")))?;

        updated = Some(
            state
                .services
                .products
                .add_product_image(id, &content_type, bytes.to_vec())
                .await?,
        );
    }

    let product = match updated {
        Some(product) => product,
        None => {
            return Err(ServiceError::InvalidInput(
                "no image parts in the upload".to_string(),
            ))
        }
    };

    Ok(Json(ApiResponse::success(map_product(product))))
}
