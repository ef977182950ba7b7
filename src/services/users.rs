use chrono::{Duration as ChronoDuration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::auth::{
    generate_one_time_token, hash_one_time_token, hash_password, verify_password, AuthService,
    TokenPair,
};
use crate::entities::user::{self, Entity as UserEntity, UserRole};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::mailer::{self, Mailer};

/// One-time password-reset tokens stay valid for ten minutes.
const RESET_TOKEN_TTL_MINUTES: i64 = 10;
/// Email verification links stay valid for a day.
const VERIFY_TOKEN_TTL_HOURS: i64 = 24;

#[derive(Debug, Default, Clone)]
pub struct UpdateProfileInput {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub avatar: Option<String>,
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub phone_number: Option<String>,
}

#[derive(Debug)]
pub struct UserPage {
    pub users: Vec<user::Model>,
    pub total: u64,
}

/// Accounts: registration, login, profile management, and the hashed
/// one-time token flows for password reset and email verification.
#[derive(Clone)]
pub struct AccountService {
    db: Arc<DatabaseConnection>,
    auth: Arc<AuthService>,
    mailer: Arc<dyn Mailer>,
    event_sender: Option<Arc<EventSender>>,
    frontend_url: String,
}

impl AccountService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        auth: Arc<AuthService>,
        mailer: Arc<dyn Mailer>,
        event_sender: Option<Arc<EventSender>>,
        frontend_url: String,
    ) -> Self {
        Self {
            db,
            auth,
            mailer,
            event_sender,
            frontend_url,
        }
    }

    #[instrument(skip(self, password), fields(email = %email))]
    pub async fn register(
        &self,
        name: String,
        email: String,
        password: String,
    ) -> Result<(user::Model, TokenPair), ServiceError> {
        let normalized = email.trim().to_lowercase();

        let existing = UserEntity::find()
            .filter(user::Column::Email.eq(normalized.clone()))
            .one(&*self.db)
            .await?;
        if existing.is_some() {
            return Err(ServiceError::InvalidInput("user already exists".to_string()));
        }

        let (verify_raw, verify_hash) = generate_one_time_token();
        let model = user::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name),
            email: Set(normalized),
            password_hash: Set(hash_password(&password)?),
            role: Set(UserRole::User),
            avatar: Set(Some("default-avatar.png".to_string())),
            email_verified: Set(false),
            email_verification_token_hash: Set(Some(verify_hash)),
            email_verification_expires: Set(Some(
                Utc::now() + ChronoDuration::hours(VERIFY_TOKEN_TTL_HOURS),
            )),
            ..Default::default()
        }
        .insert(&*self.db)
        .await?;

        info!(user_id = %model.id, "user registered");
        self.emit(Event::UserRegistered(model.id)).await;

        let mut welcome = mailer::welcome(&model, &self.frontend_url);
        welcome.text.push_str(&format!(
            "\nConfirme seu email em {}/verify/{}\n",
            self.frontend_url, verify_raw
        ));
        if let Err(e) = self.mailer.send(welcome).await {
            warn!(user_id = %model.id, error = %e, "welcome email failed");
        }

        let tokens = self.auth.generate_token_pair(&model)?;
        Ok((model, tokens))
    }

    #[instrument(skip(self, password), fields(email = %email))]
    pub async fn login(
        &self,
        email: String,
        password: String,
    ) -> Result<(user::Model, TokenPair), ServiceError> {
        let normalized = email.trim().to_lowercase();
        let user = UserEntity::find()
            .filter(user::Column::Email.eq(normalized))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::Unauthorized("invalid email or password".to_string()))?;

        if !verify_password(&password, &user.password_hash)? {
            return Err(ServiceError::Unauthorized(
                "invalid email or password".to_string(),
            ));
        }

        let mut active: user::ActiveModel = user.clone().into();
        active.last_login = Set(Some(Utc::now()));
        let user = active.update(&*self.db).await?;

        let tokens = self.auth.generate_token_pair(&user)?;
        info!(user_id = %user.id, "user logged in");
        Ok((user, tokens))
    }

    /// Exchange a refresh token for a fresh pair.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, ServiceError> {
        let user_id = self
            .auth
            .validate_refresh_token(refresh_token)
            .await
            .map_err(|_| ServiceError::Unauthorized("invalid refresh token".to_string()))?;

        let user = self.get_user(user_id).await?;
        self.auth
            .generate_token_pair(&user)
            .map_err(|e| ServiceError::InternalError(e.to_string()))
    }

    /// Revokes the presented access token.
    pub async fn logout(&self, access_token: &str) -> Result<(), ServiceError> {
        self.auth
            .revoke_token(access_token)
            .await
            .map_err(|_| ServiceError::Unauthorized("invalid token".to_string()))
    }

    pub async fn get_user(&self, user_id: Uuid) -> Result<user::Model, ServiceError> {
        UserEntity::find_by_id(user_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("User not found: {user_id}")))
    }

    #[instrument(skip(self, input))]
    pub async fn update_profile(
        &self,
        user_id: Uuid,
        input: UpdateProfileInput,
    ) -> Result<user::Model, ServiceError> {
        let user = self.get_user(user_id).await?;
        let mut active: user::ActiveModel = user.into();

        if let Some(name) = input.name {
            active.name = Set(name);
        }
        if let Some(email) = input.email {
            active.email = Set(email.trim().to_lowercase());
        }
        if let Some(password) = input.password {
            active.password_hash = Set(hash_password(&password)?);
        }
        if let Some(avatar) = input.avatar {
            active.avatar = Set(Some(avatar));
        }
        if let Some(street) = input.street {
            active.street = Set(Some(street));
        }
        if let Some(city) = input.city {
            active.city = Set(Some(city));
        }
        if let Some(state) = input.state {
            active.state = Set(Some(state));
        }
        if let Some(postal_code) = input.postal_code {
            active.postal_code = Set(Some(postal_code));
        }
        if let Some(phone) = input.phone_number {
            active.phone_number = Set(Some(phone));
        }
        active.updated_at = Set(Some(Utc::now()));

        Ok(active.update(&*self.db).await?)
    }

    #[instrument(skip(self))]
    pub async fn list_users(&self, page: u64, limit: u64) -> Result<UserPage, ServiceError> {
        let paginator = UserEntity::find()
            .order_by_desc(user::Column::CreatedAt)
            .paginate(&*self.db, limit.max(1));
        let total = paginator.num_items().await?;
        let users = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok(UserPage { users, total })
    }

    #[instrument(skip(self))]
    pub async fn delete_user(&self, user_id: Uuid) -> Result<(), ServiceError> {
        // Ensure the user exists so deletion of a stranger id reports 404.
        self.get_user(user_id).await?;
        UserEntity::delete_by_id(user_id).exec(&*self.db).await?;
        info!(%user_id, "user deleted");
        Ok(())
    }

    /// Stores a hashed reset token and mails the raw one. If the email
    /// cannot be sent the token is cleared again so a dead link never
    /// lingers.
    #[instrument(skip(self), fields(email = %email))]
    pub async fn forgot_password(&self, email: String) -> Result<(), ServiceError> {
        let normalized = email.trim().to_lowercase();
        let user = UserEntity::find()
            .filter(user::Column::Email.eq(normalized))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("no user with that email".to_string()))?;

        let (raw, hash) = generate_one_time_token();
        let mut active: user::ActiveModel = user.clone().into();
        active.password_reset_token_hash = Set(Some(hash));
        active.password_reset_expires = Set(Some(
            Utc::now() + ChronoDuration::minutes(RESET_TOKEN_TTL_MINUTES),
        ));
        let user = active.update(&*self.db).await?;

        let reset_url = format!("{}/reset-password/{}", self.frontend_url, raw);
        if let Err(e) = self.mailer.send(mailer::password_reset(&user, &reset_url)).await {
            let mut rollback: user::ActiveModel = user.into();
            rollback.password_reset_token_hash = Set(None);
            rollback.password_reset_expires = Set(None);
            rollback.update(&*self.db).await?;
            return Err(e);
        }

        Ok(())
    }

    /// Consumes a reset token and sets the new password.
    #[instrument(skip(self, raw_token, new_password))]
    pub async fn reset_password(
        &self,
        raw_token: &str,
        new_password: String,
    ) -> Result<(user::Model, TokenPair), ServiceError> {
        let hash = hash_one_time_token(raw_token);
        let user = UserEntity::find()
            .filter(user::Column::PasswordResetTokenHash.eq(hash))
            .filter(user::Column::PasswordResetExpires.gt(Utc::now()))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::InvalidInput("invalid or expired reset token".to_string())
            })?;

        let mut active: user::ActiveModel = user.into();
        active.password_hash = Set(hash_password(&new_password)?);
        active.password_reset_token_hash = Set(None);
        active.password_reset_expires = Set(None);
        active.updated_at = Set(Some(Utc::now()));
        let user = active.update(&*self.db).await?;

        info!(user_id = %user.id, "password reset");
        let tokens = self.auth.generate_token_pair(&user)?;
        Ok((user, tokens))
    }

    /// Consumes an email verification token.
    #[instrument(skip(self, raw_token))]
    pub async fn verify_email(&self, raw_token: &str) -> Result<user::Model, ServiceError> {
        let hash = hash_one_time_token(raw_token);
        let user = UserEntity::find()
            .filter(user::Column::EmailVerificationTokenHash.eq(hash))
            .filter(user::Column::EmailVerificationExpires.gt(Utc::now()))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::InvalidInput("invalid or expired verification token".to_string())
            })?;

        let mut active: user::ActiveModel = user.into();
        active.email_verified = Set(true);
        active.email_verification_token_hash = Set(None);
        active.email_verification_expires = Set(None);
        let user = active.update(&*self.db).await?;

        info!(user_id = %user.id, "email verified");
        Ok(user)
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            if let Err(e) = sender.send(event).await {
                warn!(error = %e, "failed to emit event");
            }
        }
    }
}
