use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::auth::AuthUser;
use crate::entities::review;
use crate::errors::ServiceError;
use crate::{ApiResponse, AppState, ListQuery, PaginatedResponse};

#[derive(Debug, Serialize, ToSchema)]
pub struct ReviewResponse {
    pub id: Uuid,
    pub product_id: Uuid,
    pub user_id: Uuid,
    pub rating: i32,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

fn map_review(model: review::Model) -> ReviewResponse {
    ReviewResponse {
        id: model.id,
        product_id: model.product_id,
        user_id: model.user_id,
        rating: model.rating,
        comment: model.comment,
        created_at: model.created_at,
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CreateReviewRequest {
    #[validate(range(min = 1, max = 5))]
    pub rating: i32,
    #[validate(length(min = 1, max = 1000))]
    pub comment: String,
}

/// Review a product (one review per user per product)
pub async fn create_review(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
    auth_user: AuthUser,
    Json(request): Json<CreateReviewRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ReviewResponse>>), ServiceError> {
    request.validate()?;

    let review = state
        .services
        .reviews
        .create_review(product_id, auth_user.user_id, request.rating, request.comment)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(map_review(review))),
    ))
}

/// Reviews of one product, newest first
pub async fn product_reviews(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<PaginatedResponse<ReviewResponse>>>, ServiceError> {
    let page = state
        .services
        .reviews
        .list_for_product(product_id, query.page, query.limit)
        .await?;

    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        page.reviews.into_iter().map(map_review).collect(),
        page.total,
        query.page,
        query.limit,
    ))))
}

/// Delete a review (owner or admin)
pub async fn delete_review(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth_user: AuthUser,
) -> Result<impl IntoResponse, ServiceError> {
    state
        .services
        .reviews
        .delete_review(id, auth_user.user_id, auth_user.is_admin())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
