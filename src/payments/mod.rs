//! Payment gateway integration: hosted checkout sessions over the gateway's
//! HTTP API, and verification/decoding of the signed webhook events it pushes
//! back.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

use crate::errors::ServiceError;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// One priced line of a checkout session, in the currency's minor unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutLineItem {
    pub name: String,
    pub image_url: Option<String>,
    pub unit_amount_minor: i64,
    pub quantity: i64,
}

/// Request to open a hosted payment session.
#[derive(Debug, Clone)]
pub struct CheckoutSessionRequest {
    pub line_items: Vec<CheckoutLineItem>,
    pub currency: String,
    pub success_url: String,
    pub cancel_url: String,
    pub customer_email: String,
    pub client_reference_id: String,
    pub order_id: Option<String>,
}

/// Hosted session descriptor returned to the storefront for redirection.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
    pub status: Option<String>,
    pub payment_status: Option<String>,
}

/// Hosted-session side of the payment gateway.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<CheckoutSession, ServiceError>;
}

/// Stripe client speaking the form-encoded `/v1` API.
pub struct StripeGateway {
    secret_key: String,
    client: reqwest::Client,
    base_url: String,
}

impl StripeGateway {
    pub fn new(secret_key: String, timeout: Duration) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("gateway client: {e}")))?;
        Ok(Self {
            secret_key,
            client,
            base_url: "https://api.stripe.com".to_string(),
        })
    }

    fn session_form(request: &CheckoutSessionRequest) -> Vec<(String, String)> {
        let mut params: Vec<(String, String)> = vec![
            ("mode".into(), "payment".into()),
            ("payment_method_types[0]".into(), "card".into()),
            ("success_url".into(), request.success_url.clone()),
            ("cancel_url".into(), request.cancel_url.clone()),
            ("customer_email".into(), request.customer_email.clone()),
            (
                "client_reference_id".into(),
                request.client_reference_id.clone(),
            ),
        ];

        for (i, item) in request.line_items.iter().enumerate() {
            params.push((
                format!("line_items[{i}][price_data][currency]"),
                request.currency.clone(),
            ));
            params.push((
                format!("line_items[{i}][price_data][product_data][name]"),
                item.name.clone(),
            ));
            if let Some(image) = &item.image_url {
                params.push((
                    format!("line_items[{i}][price_data][product_data][images][0]"),
                    image.clone(),
                ));
            }
            params.push((
                format!("line_items[{i}][price_data][unit_amount]"),
                item.unit_amount_minor.to_string(),
            ));
            params.push((format!("line_items[{i}][quantity]"), item.quantity.to_string()));
        }

        if let Some(order_id) = &request.order_id {
            params.push(("metadata[orderId]".into(), order_id.clone()));
        }

        params
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<CheckoutSession, ServiceError> {
        let params = Self::session_form(&request);

        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.base_url))
            .basic_auth(&self.secret_key, Some(""))
            .form(&params)
            .send()
            .await
            .map_err(|e| ServiceError::gateway("create checkout session", e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            warn!(%status, "checkout session rejected by gateway");
            return Err(ServiceError::gateway(
                "create checkout session",
                format!("{status}: {detail}"),
            ));
        }

        let session: CheckoutSession = response
            .json()
            .await
            .map_err(|e| ServiceError::gateway("create checkout session", e.to_string()))?;

        info!(session_id = %session.id, "checkout session created");
        Ok(session)
    }
}

/// Convert a catalog price to the currency's minor unit (cents).
pub fn to_minor_units(price: Decimal) -> Result<i64, ServiceError> {
    (price * Decimal::from(100))
        .round()
        .to_i64()
        .ok_or_else(|| ServiceError::InvalidInput(format!("price out of range: {price}")))
}

/// Verify a `t=...,v1=...` signature header over the raw payload.
pub fn verify_webhook_signature(
    signature_header: &str,
    payload: &[u8],
    secret: &str,
    tolerance_secs: u64,
) -> Result<(), ServiceError> {
    verify_webhook_signature_at(
        signature_header,
        payload,
        secret,
        tolerance_secs,
        chrono::Utc::now().timestamp(),
    )
}

fn verify_webhook_signature_at(
    signature_header: &str,
    payload: &[u8],
    secret: &str,
    tolerance_secs: u64,
    now_ts: i64,
) -> Result<(), ServiceError> {
    let mut timestamp = "";
    let mut signature = "";
    for part in signature_header.split(',') {
        let mut it = part.trim().splitn(2, '=');
        match (it.next(), it.next()) {
            (Some("t"), Some(value)) => timestamp = value,
            (Some("v1"), Some(value)) => signature = value,
            _ => {}
        }
    }

    if timestamp.is_empty() || signature.is_empty() {
        return Err(ServiceError::InvalidSignature);
    }

    let ts: i64 = timestamp
        .parse()
        .map_err(|_| ServiceError::InvalidSignature)?;
    if (now_ts - ts).unsigned_abs() > tolerance_secs {
        return Err(ServiceError::InvalidSignature);
    }

    let expected = sign_payload(secret, timestamp, payload);
    if !constant_time_eq(&expected, signature) {
        return Err(ServiceError::InvalidSignature);
    }
    Ok(())
}

/// Hex HMAC-SHA256 over `"{timestamp}.{payload}"`; also used by tests to
/// forge valid deliveries.
pub fn sign_payload(secret: &str, timestamp: &str, payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

/// Payload of a completed checkout session event.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSessionObject {
    pub id: String,
    pub payment_status: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub customer_details: Option<CustomerDetails>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CustomerDetails {
    pub email: Option<String>,
}

impl CheckoutSessionObject {
    pub fn order_id(&self) -> Option<&str> {
        self.metadata.get("orderId").map(String::as_str)
    }

    pub fn payer_email(&self) -> String {
        self.customer_details
            .as_ref()
            .and_then(|details| details.email.clone())
            .unwrap_or_default()
    }
}

/// The gateway delivers a tagged union of event kinds. Only the session
/// completion is acted on today; everything else falls into `Unhandled`,
/// which the handler acknowledges without touching any order.
#[derive(Debug)]
pub enum WebhookEvent {
    CheckoutSessionCompleted(CheckoutSessionObject),
    Unhandled { event_type: String },
}

#[derive(Deserialize)]
struct WebhookEnvelope {
    #[serde(rename = "type")]
    event_type: String,
    data: WebhookData,
}

#[derive(Deserialize)]
struct WebhookData {
    object: serde_json::Value,
}

impl WebhookEvent {
    pub fn parse(payload: &[u8]) -> Result<Self, ServiceError> {
        let envelope: WebhookEnvelope = serde_json::from_slice(payload)
            .map_err(|e| ServiceError::InvalidInput(format!("invalid webhook payload: {e}")))?;

        match envelope.event_type.as_str() {
            "checkout.session.completed" => {
                let session: CheckoutSessionObject =
                    serde_json::from_value(envelope.data.object).map_err(|e| {
                        ServiceError::InvalidInput(format!("invalid session object: {e}"))
                    })?;
                Ok(WebhookEvent::CheckoutSessionCompleted(session))
            }
            other => Ok(WebhookEvent::Unhandled {
                event_type: other.to_string(),
            }),
        }
    }
}
