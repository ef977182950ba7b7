use sea_orm::{DatabaseConnection, EntityTrait};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::entities::product::Entity as ProductEntity;
use crate::errors::ServiceError;
use crate::payments::{
    to_minor_units, CheckoutLineItem, CheckoutSession, CheckoutSessionRequest, PaymentGateway,
};

#[derive(Debug, Clone)]
pub struct CheckoutItem {
    pub product_id: Uuid,
    pub quantity: i64,
}

/// Builds hosted-payment sessions. Line items are priced from the live
/// catalog at session time, not from the order's frozen snapshot; the order
/// id only rides along as correlation metadata for the webhook.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    frontend_url: String,
    currency: String,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        frontend_url: String,
        currency: String,
    ) -> Self {
        Self {
            db,
            gateway,
            frontend_url,
            currency,
        }
    }

    #[instrument(skip(self, items), fields(user_id = %user_id, items = items.len(), order_id = ?order_id))]
    pub async fn create_session(
        &self,
        user_id: Uuid,
        user_email: &str,
        items: Vec<CheckoutItem>,
        order_id: Option<Uuid>,
    ) -> Result<CheckoutSession, ServiceError> {
        if items.is_empty() {
            return Err(ServiceError::InvalidInput(
                "checkout requires at least one item".to_string(),
            ));
        }

        let mut line_items = Vec::with_capacity(items.len());
        for item in &items {
            if item.quantity < 1 {
                return Err(ServiceError::InvalidInput(format!(
                    "quantity for product {} must be at least 1",
                    item.product_id
                )));
            }
            let product = ProductEntity::find_by_id(item.product_id)
                .one(&*self.db)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Product not found: {}", item.product_id))
                })?;

            line_items.push(CheckoutLineItem {
                name: product.name.clone(),
                image_url: product.image_urls().into_iter().next(),
                unit_amount_minor: to_minor_units(product.price)?,
                quantity: item.quantity,
            });
        }

        let request = CheckoutSessionRequest {
            line_items,
            currency: self.currency.clone(),
            success_url: format!(
                "{}/success?session_id={{CHECKOUT_SESSION_ID}}",
                self.frontend_url
            ),
            cancel_url: format!("{}/cart", self.frontend_url),
            customer_email: user_email.to_string(),
            client_reference_id: user_id.to_string(),
            order_id: order_id.map(|id| id.to_string()),
        };

        let session = self.gateway.create_checkout_session(request).await?;
        info!(session_id = %session.id, "hosted checkout session opened");
        Ok(session)
    }
}
