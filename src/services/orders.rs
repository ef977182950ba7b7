use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, DatabaseTransaction,
    EntityTrait, FromQueryResult, ModelTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::entities::order::{
    self, ActiveModel as OrderActiveModel, Entity as OrderEntity, OrderStatus, PaymentMethod,
};
use crate::entities::order_item::{self, Entity as OrderItemEntity};
use crate::entities::product::{self, Entity as ProductEntity};
use crate::entities::user::{self, Entity as UserEntity};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::mailer::{self, Mailer};
use crate::payments::CheckoutSessionObject;

/// Flat tax rate applied to every order.
const TAX_RATE: Decimal = dec!(0.15);
/// Flat shipping fee, waived above the free-shipping threshold.
const SHIPPING_FEE: Decimal = dec!(10);
/// Orders strictly above this items total ship for free.
const FREE_SHIPPING_THRESHOLD: Decimal = dec!(100);

/// Derived order totals, computed once at creation and stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderTotals {
    pub items_price: Decimal,
    pub tax_price: Decimal,
    pub shipping_price: Decimal,
    pub total_price: Decimal,
}

impl OrderTotals {
    /// `total == items + tax + shipping` holds by construction.
    pub fn compute(items_price: Decimal) -> Self {
        let tax_price = (items_price * TAX_RATE).round_dp(2);
        let shipping_price = if items_price > FREE_SHIPPING_THRESHOLD {
            Decimal::ZERO
        } else {
            SHIPPING_FEE
        };
        Self {
            items_price,
            tax_price,
            shipping_price,
            total_price: items_price + tax_price + shipping_price,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CartItem {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShippingAddress {
    pub street: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
}

#[derive(Debug)]
pub struct CreateOrderInput {
    pub items: Vec<CartItem>,
    pub shipping_address: ShippingAddress,
    pub payment_method: PaymentMethod,
    pub notes: Option<String>,
}

/// Gateway-shaped payment confirmation applied to an order.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfirmation {
    pub id: String,
    pub status: String,
    pub update_time: String,
    pub email: String,
}

#[derive(Debug)]
pub struct OrderWithItems {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}

/// Admin list filters, all optional.
#[derive(Debug, Default, Clone)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub is_paid: Option<bool>,
    pub is_delivered: Option<bool>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

/// Aggregate figures over the filtered order set.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct OrderStats {
    pub total_orders: u64,
    pub total_sales: Decimal,
    pub avg_order_value: Decimal,
}

#[derive(Debug)]
pub struct OrderPage {
    pub orders: Vec<order::Model>,
    pub total: u64,
}

#[derive(FromQueryResult)]
struct SalesSumRow {
    total_sales: Option<Decimal>,
}

/// Orders: creation with stock reservation, payment/fulfillment transitions,
/// and the queries behind the storefront and the admin dashboard.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Option<Arc<EventSender>>,
    mailer: Arc<dyn Mailer>,
    frontend_url: String,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Option<Arc<EventSender>>,
        mailer: Arc<dyn Mailer>,
        frontend_url: String,
    ) -> Self {
        Self {
            db,
            event_sender,
            mailer,
            frontend_url,
        }
    }

    /// Creates an order from a cart. The order insert and every stock
    /// decrement run in one transaction; any missing product or short stock
    /// aborts the whole operation with nothing applied. The conditional
    /// decrement (`stock >= quantity` in the update filter) is what closes
    /// the concurrent-oversell window.
    #[instrument(skip(self, user, input), fields(user_id = %user.id, items = input.items.len()))]
    pub async fn create_order(
        &self,
        user: &user::Model,
        input: CreateOrderInput,
    ) -> Result<OrderWithItems, ServiceError> {
        if input.items.is_empty() {
            return Err(ServiceError::InvalidInput("the cart is empty".to_string()));
        }
        for item in &input.items {
            if item.quantity < 1 {
                return Err(ServiceError::InvalidInput(format!(
                    "quantity for product {} must be at least 1",
                    item.product_id
                )));
            }
        }

        let txn = self.db.begin().await?;

        let mut items_price = Decimal::ZERO;
        let mut snapshots: Vec<(Uuid, String, i32, Decimal)> = Vec::with_capacity(input.items.len());

        for item in &input.items {
            let product = ProductEntity::find_by_id(item.product_id)
                .one(&txn)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Product not found: {}", item.product_id))
                })?;

            // Conditional decrement: applies only while enough stock remains.
            let updated = ProductEntity::update_many()
                .col_expr(
                    product::Column::Stock,
                    Expr::col(product::Column::Stock).sub(item.quantity),
                )
                .filter(product::Column::Id.eq(item.product_id))
                .filter(product::Column::Stock.gte(item.quantity))
                .exec(&txn)
                .await?;
            if updated.rows_affected == 0 {
                return Err(ServiceError::InsufficientStock(product.name));
            }

            items_price += product.price * Decimal::from(item.quantity);
            snapshots.push((product.id, product.name, item.quantity, product.price));
        }

        let totals = OrderTotals::compute(items_price);
        let order_id = Uuid::new_v4();
        let now = Utc::now();

        let order_model = OrderActiveModel {
            id: Set(order_id),
            user_id: Set(user.id),
            status: Set(OrderStatus::Pending),
            payment_method: Set(input.payment_method),
            items_price: Set(totals.items_price),
            tax_price: Set(totals.tax_price),
            shipping_price: Set(totals.shipping_price),
            total_price: Set(totals.total_price),
            is_paid: Set(false),
            paid_at: Set(None),
            payment_id: Set(None),
            payment_status: Set(None),
            payment_update_time: Set(None),
            payment_email: Set(None),
            is_delivered: Set(false),
            delivered_at: Set(None),
            shipping_street: Set(input.shipping_address.street),
            shipping_city: Set(input.shipping_address.city),
            shipping_state: Set(input.shipping_address.state),
            shipping_postal_code: Set(input.shipping_address.postal_code),
            notes: Set(input.notes),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        }
        .insert(&txn)
        .await?;

        let mut items = Vec::with_capacity(snapshots.len());
        for (product_id, product_name, quantity, unit_price) in snapshots {
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(product_id),
                product_name: Set(product_name),
                quantity: Set(quantity),
                unit_price: Set(unit_price),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;
            items.push(item);
        }

        txn.commit().await?;
        info!(order_id = %order_id, total = %totals.total_price, "order created");

        self.emit(Event::OrderCreated(order_id)).await;
        let mail = mailer::order_confirmation(user, &order_model, &self.frontend_url);
        if let Err(e) = self.mailer.send(mail).await {
            warn!(order_id = %order_id, error = %e, "order confirmation email failed");
        }

        Ok(OrderWithItems {
            order: order_model,
            items,
        })
    }

    /// Fetch an order with its items, enforcing that only the owner or an
    /// admin may read it.
    #[instrument(skip(self))]
    pub async fn get_order(
        &self,
        order_id: Uuid,
        requester_id: Uuid,
        requester_is_admin: bool,
    ) -> Result<OrderWithItems, ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order with ID {order_id} not found")))?;

        if order.user_id != requester_id && !requester_is_admin {
            return Err(ServiceError::Forbidden(
                "you do not have access to this order".to_string(),
            ));
        }

        let items = order.find_related(OrderItemEntity).all(&*self.db).await?;
        Ok(OrderWithItems { order, items })
    }

    /// Line items of an order, oldest first.
    pub async fn order_items(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<order_item::Model>, ServiceError> {
        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(items)
    }

    /// Orders of one user, newest first.
    #[instrument(skip(self))]
    pub async fn list_my_orders(
        &self,
        user_id: Uuid,
        page: u64,
        limit: u64,
    ) -> Result<OrderPage, ServiceError> {
        let paginator = OrderEntity::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, limit.max(1));

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok(OrderPage { orders, total })
    }

    fn filter_condition(filter: &OrderFilter) -> Condition {
        let mut cond = Condition::all();
        if let Some(status) = filter.status {
            cond = cond.add(order::Column::Status.eq(status));
        }
        if let Some(is_paid) = filter.is_paid {
            cond = cond.add(order::Column::IsPaid.eq(is_paid));
        }
        if let Some(is_delivered) = filter.is_delivered {
            cond = cond.add(order::Column::IsDelivered.eq(is_delivered));
        }
        if let Some(start) = filter.start_date {
            cond = cond.add(order::Column::CreatedAt.gte(start));
        }
        if let Some(end) = filter.end_date {
            cond = cond.add(order::Column::CreatedAt.lte(end));
        }
        cond
    }

    /// Admin listing with filters and pagination.
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        filter: &OrderFilter,
        page: u64,
        limit: u64,
    ) -> Result<OrderPage, ServiceError> {
        let paginator = OrderEntity::find()
            .filter(Self::filter_condition(filter))
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, limit.max(1));

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok(OrderPage { orders, total })
    }

    /// Aggregate figures over everything the filter matches, not just the
    /// current page.
    #[instrument(skip(self))]
    pub async fn order_stats(&self, filter: &OrderFilter) -> Result<OrderStats, ServiceError> {
        let cond = Self::filter_condition(filter);

        let total_orders = OrderEntity::find()
            .filter(cond.clone())
            .count(&*self.db)
            .await?;

        let sum_row = OrderEntity::find()
            .filter(cond)
            .select_only()
            .column_as(order::Column::TotalPrice.sum(), "total_sales")
            .into_model::<SalesSumRow>()
            .one(&*self.db)
            .await?;

        let total_sales = sum_row
            .and_then(|row| row.total_sales)
            .unwrap_or(Decimal::ZERO);
        let avg_order_value = if total_orders == 0 {
            Decimal::ZERO
        } else {
            (total_sales / Decimal::from(total_orders)).round_dp(2)
        };

        Ok(OrderStats {
            total_orders,
            total_sales,
            avg_order_value,
        })
    }

    /// Lifetime order count and spend for one user (profile view).
    pub async fn user_order_stats(&self, user_id: Uuid) -> Result<(u64, Decimal), ServiceError> {
        let total_orders = OrderEntity::find()
            .filter(order::Column::UserId.eq(user_id))
            .count(&*self.db)
            .await?;
        let sum_row = OrderEntity::find()
            .filter(order::Column::UserId.eq(user_id))
            .select_only()
            .column_as(order::Column::TotalPrice.sum(), "total_sales")
            .into_model::<SalesSumRow>()
            .one(&*self.db)
            .await?;
        let total_spent = sum_row
            .and_then(|row| row.total_sales)
            .unwrap_or(Decimal::ZERO);
        Ok((total_orders, total_spent))
    }

    /// Applies a payment confirmation. Idempotent: re-applying the same
    /// gateway transaction is a no-op, and an existing payment result is
    /// never overwritten by a different one.
    #[instrument(skip(self, confirmation), fields(order_id = %order_id, payment_id = %confirmation.id))]
    pub async fn mark_paid(
        &self,
        order_id: Uuid,
        confirmation: PaymentConfirmation,
    ) -> Result<order::Model, ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order with ID {order_id} not found")))?;

        let (updated, newly_paid) = self.apply_payment(order, confirmation).await?;
        if newly_paid {
            self.notify_status_change(&updated, Event::OrderPaid(updated.id))
                .await;
        }
        Ok(updated)
    }

    /// Webhook-side reconciliation. Unknown or unrelated sessions resolve to
    /// `None` so the gateway gets an acknowledgement either way.
    #[instrument(skip(self, session), fields(session_id = %session.id))]
    pub async fn confirm_payment_from_session(
        &self,
        session: &CheckoutSessionObject,
    ) -> Result<Option<order::Model>, ServiceError> {
        let Some(order_id) = session.order_id().and_then(|raw| Uuid::parse_str(raw).ok()) else {
            info!("session carries no order correlation, acknowledging");
            return Ok(None);
        };

        let Some(order) = OrderEntity::find_by_id(order_id).one(&*self.db).await? else {
            info!(%order_id, "order not found for webhook, acknowledging");
            return Ok(None);
        };

        let confirmation = PaymentConfirmation {
            id: session.id.clone(),
            status: session.payment_status.clone().unwrap_or_default(),
            update_time: Utc::now().to_rfc3339(),
            email: session.payer_email(),
        };

        let (updated, newly_paid) = self.apply_payment(order, confirmation).await?;
        if newly_paid {
            self.notify_status_change(&updated, Event::OrderPaid(updated.id))
                .await;
        }
        Ok(Some(updated))
    }

    async fn apply_payment(
        &self,
        order: order::Model,
        confirmation: PaymentConfirmation,
    ) -> Result<(order::Model, bool), ServiceError> {
        if order.is_paid {
            if order.payment_id.as_deref() == Some(confirmation.id.as_str()) {
                info!(order_id = %order.id, "payment already recorded, no-op");
            } else {
                // Payment fields are append-only once set.
                warn!(
                    order_id = %order.id,
                    existing = ?order.payment_id,
                    incoming = %confirmation.id,
                    "ignoring conflicting payment confirmation for a paid order"
                );
            }
            return Ok((order, false));
        }

        let new_status = order.status.after_payment();
        let mut active: OrderActiveModel = order.into();
        active.is_paid = Set(true);
        active.paid_at = Set(Some(Utc::now()));
        active.payment_id = Set(Some(confirmation.id));
        active.payment_status = Set(Some(confirmation.status));
        active.payment_update_time = Set(Some(confirmation.update_time));
        active.payment_email = Set(Some(confirmation.email));
        active.status = Set(new_status);
        active.updated_at = Set(Some(Utc::now()));

        let updated = active.update(&*self.db).await?;
        info!(order_id = %updated.id, "order marked paid");
        Ok((updated, true))
    }

    /// Fulfillment: flips the delivered pair and completes the lifecycle.
    #[instrument(skip(self))]
    pub async fn mark_delivered(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order with ID {order_id} not found")))?;

        let new_status = order.status.after_delivery();
        let mut active: OrderActiveModel = order.into();
        active.is_delivered = Set(true);
        active.delivered_at = Set(Some(Utc::now()));
        active.status = Set(new_status);
        active.updated_at = Set(Some(Utc::now()));
        let updated = active.update(&*self.db).await?;

        info!(order_id = %updated.id, "order delivered");
        self.notify_status_change(&updated, Event::OrderDelivered(updated.id))
            .await;
        Ok(updated)
    }

    /// Deletes an order, restoring each line item's stock in the same
    /// transaction. Paid card orders are deleted without a compensating
    /// refund.
    #[instrument(skip(self))]
    pub async fn delete_order(&self, order_id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;

        let order = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order with ID {order_id} not found")))?;

        let items = order.find_related(OrderItemEntity).all(&txn).await?;
        for item in &items {
            self.restore_stock(&txn, item.product_id, item.quantity)
                .await?;
        }

        OrderItemEntity::delete_many()
            .filter(order_item::Column::OrderId.eq(order_id))
            .exec(&txn)
            .await?;
        OrderEntity::delete_by_id(order_id).exec(&txn).await?;

        txn.commit().await?;
        info!(%order_id, "order deleted, stock restored");

        self.emit(Event::OrderDeleted(order_id)).await;
        Ok(())
    }

    async fn restore_stock(
        &self,
        txn: &DatabaseTransaction,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        // The product may have been removed from the catalog since; a zero
        // row count is fine here.
        let result = ProductEntity::update_many()
            .col_expr(
                product::Column::Stock,
                Expr::col(product::Column::Stock).add(quantity),
            )
            .filter(product::Column::Id.eq(product_id))
            .exec(txn)
            .await?;
        if result.rows_affected == 0 {
            warn!(%product_id, "stock restore skipped, product no longer exists");
        }
        Ok(())
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            if let Err(e) = sender.send(event).await {
                warn!(error = %e, "failed to emit event");
            }
        }
    }

    /// Realtime event plus a status email to the owner. Both are
    /// best-effort: a notification failure never fails the state change.
    async fn notify_status_change(&self, order: &order::Model, event: Event) {
        self.emit(event).await;

        match UserEntity::find_by_id(order.user_id).one(&*self.db).await {
            Ok(Some(user)) => {
                let mail = mailer::order_status_update(&user, order, &self.frontend_url);
                if let Err(e) = self.mailer.send(mail).await {
                    warn!(order_id = %order.id, error = %e, "status email failed");
                }
            }
            Ok(None) => warn!(order_id = %order.id, "order owner no longer exists, skipping email"),
            Err(e) => warn!(order_id = %order.id, error = %e, "failed to load order owner"),
        }
    }
}
