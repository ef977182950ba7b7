use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::auth::{AuthUser, TokenPair};
use crate::entities::user::{self, UserRole};
use crate::errors::ServiceError;
use crate::services::users::UpdateProfileInput;
use crate::{ApiResponse, AppState, ListQuery, PaginatedResponse};

#[derive(Debug, Serialize, ToSchema)]
pub struct UserResponse {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: UserRole,
    pub avatar: Option<String>,
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub phone_number: Option<String>,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
}

fn map_user(model: user::Model) -> UserResponse {
    UserResponse {
        id: model.id,
        name: model.name,
        email: model.email,
        role: model.role,
        avatar: model.avatar,
        street: model.street,
        city: model.city,
        state: model.state,
        postal_code: model.postal_code,
        phone_number: model.phone_number,
        email_verified: model.email_verified,
        created_at: model.created_at,
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthResponse {
    pub user: UserResponse,
    pub tokens: TokenPair,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 50))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 6, message = "password must have at least 6 characters"))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct ForgotPasswordRequest {
    #[validate(email)]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct ResetPasswordRequest {
    #[validate(length(min = 6))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct UpdateProfileRequest {
    #[validate(length(min = 1, max = 50))]
    pub name: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(min = 6))]
    pub password: Option<String>,
    pub avatar: Option<String>,
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub phone_number: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProfileResponse {
    pub user: UserResponse,
    pub stats: ProfileStats,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProfileStats {
    pub total_orders: u64,
    pub total_spent: Decimal,
}

/// Register a new account
#[utoipa::path(
    post,
    path = "/api/users/register",
    summary = "Register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = ApiResponse<AuthResponse>),
        (status = 400, description = "Duplicate email or invalid data", body = crate::errors::ErrorResponse),
    )
)]
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<ApiResponse<AuthResponse>>), ServiceError> {
    request.validate()?;

    let (user, tokens) = state
        .services
        .accounts
        .register(request.name, request.email, request.password)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(AuthResponse {
            user: map_user(user),
            tokens,
        })),
    ))
}

/// Log in with email and password
#[utoipa::path(
    post,
    path = "/api/users/login",
    summary = "Login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Authenticated", body = ApiResponse<AuthResponse>),
        (status = 401, description = "Invalid credentials", body = crate::errors::ErrorResponse),
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<ApiResponse<AuthResponse>>, ServiceError> {
    request.validate()?;

    let (user, tokens) = state
        .services
        .accounts
        .login(request.email, request.password)
        .await?;

    Ok(Json(ApiResponse::success(AuthResponse {
        user: map_user(user),
        tokens,
    })))
}

/// Revoke the presented access token
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<serde_json::Value>>, ServiceError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .ok_or_else(|| ServiceError::Unauthorized("missing bearer token".to_string()))?;

    state.services.accounts.logout(token).await?;
    Ok(Json(ApiResponse::success(
        serde_json::json!({ "message": "logged out" }),
    )))
}

/// Exchange a refresh token for a new pair
pub async fn refresh_token(
    State(state): State<AppState>,
    Json(request): Json<RefreshTokenRequest>,
) -> Result<Json<ApiResponse<TokenPair>>, ServiceError> {
    let tokens = state
        .services
        .accounts
        .refresh(&request.refresh_token)
        .await?;
    Ok(Json(ApiResponse::success(tokens)))
}

/// Profile of the authenticated user, with order stats
pub async fn get_profile(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<ProfileResponse>>, ServiceError> {
    let user = state.services.accounts.get_user(auth_user.user_id).await?;
    let (total_orders, total_spent) = state
        .services
        .orders
        .user_order_stats(auth_user.user_id)
        .await?;

    Ok(Json(ApiResponse::success(ProfileResponse {
        user: map_user(user),
        stats: ProfileStats {
            total_orders,
            total_spent,
        },
    })))
}

/// Update the authenticated user's profile
pub async fn update_profile(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<UpdateProfileRequest>,
) -> Result<Json<ApiResponse<UserResponse>>, ServiceError> {
    request.validate()?;

    let user = state
        .services
        .accounts
        .update_profile(auth_user.user_id, profile_input(request))
        .await?;
    Ok(Json(ApiResponse::success(map_user(user))))
}

fn profile_input(request: UpdateProfileRequest) -> UpdateProfileInput {
    UpdateProfileInput {
        name: request.name,
        email: request.email,
        password: request.password,
        avatar: request.avatar,
        street: request.street,
        city: request.city,
        state: request.state,
        postal_code: request.postal_code,
        phone_number: request.phone_number,
    }
}

/// List accounts (admin)
pub async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<PaginatedResponse<UserResponse>>>, ServiceError> {
    let page = state
        .services
        .accounts
        .list_users(query.page, query.limit)
        .await?;

    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        page.users.into_iter().map(map_user).collect(),
        page.total,
        query.page,
        query.limit,
    ))))
}

/// Fetch one account (admin)
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<UserResponse>>, ServiceError> {
    let user = state.services.accounts.get_user(id).await?;
    Ok(Json(ApiResponse::success(map_user(user))))
}

/// Update any account (admin)
pub async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateProfileRequest>,
) -> Result<Json<ApiResponse<UserResponse>>, ServiceError> {
    request.validate()?;
    let user = state
        .services
        .accounts
        .update_profile(id, profile_input(request))
        .await?;
    Ok(Json(ApiResponse::success(map_user(user))))
}

/// Delete an account (admin)
pub async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    state.services.accounts.delete_user(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Email a password-reset link
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(request): Json<ForgotPasswordRequest>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ServiceError> {
    request.validate()?;
    state.services.accounts.forgot_password(request.email).await?;
    Ok(Json(ApiResponse::success(
        serde_json::json!({ "message": "reset token sent by email" }),
    )))
}

/// Consume a reset token and set a new password
pub async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(request): Json<ResetPasswordRequest>,
) -> Result<Json<ApiResponse<AuthResponse>>, ServiceError> {
    request.validate()?;

    let (user, tokens) = state
        .services
        .accounts
        .reset_password(&token, request.password)
        .await?;

    Ok(Json(ApiResponse::success(AuthResponse {
        user: map_user(user),
        tokens,
    })))
}

/// Consume an email verification token
pub async fn verify_email(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ServiceError> {
    state.services.accounts.verify_email(&token).await?;
    Ok(Json(ApiResponse::success(
        serde_json::json!({ "message": "email verified" }),
    )))
}
