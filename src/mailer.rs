//! Transactional email. Delivery goes through an HTTP email API behind the
//! `Mailer` trait; when no API is configured the no-op implementation logs
//! and drops the message, which keeps order flows alive in development.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

use crate::entities::{order, user};
use crate::errors::ServiceError;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub to_name: String,
    pub subject: String,
    pub text: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: EmailMessage) -> Result<(), ServiceError>;
}

/// HTTP transactional-mail client.
pub struct HttpMailer {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    from: String,
}

impl HttpMailer {
    pub fn new(
        api_url: String,
        api_key: String,
        from: String,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("mail client: {e}")))?;
        Ok(Self {
            client,
            api_url,
            api_key,
            from,
        })
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, message: EmailMessage) -> Result<(), ServiceError> {
        let body = serde_json::json!({
            "from": self.from,
            "to": [{ "email": message.to, "name": message.to_name }],
            "subject": message.subject,
            "text": message.text,
        });

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::EmailError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(ServiceError::EmailError(format!(
                "mail API returned {status}: {detail}"
            )));
        }

        info!(to = %message.to, subject = %message.subject, "email sent");
        Ok(())
    }
}

/// Used when no email API is configured.
#[derive(Default)]
pub struct NoopMailer;

#[async_trait]
impl Mailer for NoopMailer {
    async fn send(&self, message: EmailMessage) -> Result<(), ServiceError> {
        warn!(to = %message.to, subject = %message.subject, "email delivery disabled, dropping message");
        Ok(())
    }
}

fn first_name(name: &str) -> &str {
    name.split_whitespace().next().unwrap_or(name)
}

/// Welcome mail sent on registration.
pub fn welcome(user: &user::Model, frontend_url: &str) -> EmailMessage {
    EmailMessage {
        to: user.email.clone(),
        to_name: user.name.clone(),
        subject: "Bem-vindo a Varanda da Conveniencia!".to_string(),
        text: format!(
            "Ola {},\n\nSua conta foi criada. Visite {} para comecar a pedir.\n",
            first_name(&user.name),
            frontend_url
        ),
    }
}

/// Order confirmation sent right after checkout.
pub fn order_confirmation(
    user: &user::Model,
    order: &order::Model,
    frontend_url: &str,
) -> EmailMessage {
    EmailMessage {
        to: user.email.clone(),
        to_name: user.name.clone(),
        subject: format!("Confirmacao do seu pedido #{}", order.id),
        text: format!(
            "Ola {},\n\nRecebemos seu pedido no valor de {}. Acompanhe em {}/order/{}.\n",
            first_name(&user.name),
            order.total_price,
            frontend_url,
            order.id
        ),
    }
}

/// Status update sent when an order is paid or delivered.
pub fn order_status_update(
    user: &user::Model,
    order: &order::Model,
    frontend_url: &str,
) -> EmailMessage {
    EmailMessage {
        to: user.email.clone(),
        to_name: user.name.clone(),
        subject: format!("Atualizacao do seu pedido #{}", order.id),
        text: format!(
            "Ola {},\n\nSeu pedido agora esta: {}. Detalhes em {}/order/{}.\n",
            first_name(&user.name),
            order.status.as_str(),
            frontend_url,
            order.id
        ),
    }
}

/// Password reset mail carrying the raw one-time token link.
pub fn password_reset(user: &user::Model, reset_url: &str) -> EmailMessage {
    EmailMessage {
        to: user.email.clone(),
        to_name: user.name.clone(),
        subject: "Seu token de redefinicao de senha (valido por 10 minutos)".to_string(),
        text: format!(
            "Ola {},\n\nRedefina sua senha em {}. Se nao foi voce, ignore este email.\n",
            first_name(&user.name),
            reset_url
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::user::UserRole;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn sample_user() -> user::Model {
        user::Model {
            id: Uuid::new_v4(),
            name: "Joana Prado Lima".to_string(),
            email: "joana@example.com".to_string(),
            password_hash: String::new(),
            role: UserRole::User,
            avatar: None,
            street: None,
            city: None,
            state: None,
            postal_code: None,
            phone_number: None,
            email_verified: true,
            last_login: None,
            password_reset_token_hash: None,
            password_reset_expires: None,
            email_verification_token_hash: None,
            email_verification_expires: None,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    fn sample_order(user_id: Uuid) -> order::Model {
        order::Model {
            id: Uuid::new_v4(),
            user_id,
            status: order::OrderStatus::Processing,
            payment_method: order::PaymentMethod::Card,
            items_price: dec!(100.00),
            tax_price: dec!(15.00),
            shipping_price: dec!(10.00),
            total_price: dec!(125.00),
            is_paid: true,
            paid_at: Some(Utc::now()),
            payment_id: Some("cs_test".to_string()),
            payment_status: Some("paid".to_string()),
            payment_update_time: None,
            payment_email: None,
            is_delivered: false,
            delivered_at: None,
            shipping_street: "Rua A 1".to_string(),
            shipping_city: "Recife".to_string(),
            shipping_state: "PE".to_string(),
            shipping_postal_code: "50000-000".to_string(),
            notes: None,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    #[test]
    fn status_update_uses_first_name_and_order_link() {
        let user = sample_user();
        let order = sample_order(user.id);
        let mail = order_status_update(&user, &order, "https://shop.example");

        assert_eq!(mail.to, "joana@example.com");
        assert!(mail.text.starts_with("Ola Joana,"));
        assert!(mail.text.contains(&format!("/order/{}", order.id)));
        assert!(mail.text.contains("processing"));
    }

    #[test]
    fn password_reset_embeds_the_url() {
        let user = sample_user();
        let mail = password_reset(&user, "https://shop.example/reset-password/tok123");
        assert!(mail.text.contains("reset-password/tok123"));
        assert!(mail.subject.contains("10 minutos"));
    }
}
