use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::entities::product::{self, Entity as ProductEntity};
use crate::entities::review::{self, Entity as ReviewEntity};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};

#[derive(Debug)]
pub struct ReviewPage {
    pub reviews: Vec<review::Model>,
    pub total: u64,
}

/// Product reviews. Each write recomputes the product's rating rollup so the
/// catalog never serves a stale average.
#[derive(Clone)]
pub struct ReviewService {
    db: Arc<DatabaseConnection>,
    event_sender: Option<Arc<EventSender>>,
}

impl ReviewService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self { db, event_sender }
    }

    #[instrument(skip(self, comment), fields(product_id = %product_id, user_id = %user_id))]
    pub async fn create_review(
        &self,
        product_id: Uuid,
        user_id: Uuid,
        rating: i32,
        comment: String,
    ) -> Result<review::Model, ServiceError> {
        if !(1..=5).contains(&rating) {
            return Err(ServiceError::ValidationError(
                "rating must be between 1 and 5".to_string(),
            ));
        }

        let txn = self.db.begin().await?;

        ProductEntity::find_by_id(product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product not found: {product_id}")))?;

        let already = ReviewEntity::find()
            .filter(review::Column::ProductId.eq(product_id))
            .filter(review::Column::UserId.eq(user_id))
            .one(&txn)
            .await?;
        if already.is_some() {
            return Err(ServiceError::Conflict(
                "you have already reviewed this product".to_string(),
            ));
        }

        let model = review::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(product_id),
            user_id: Set(user_id),
            rating: Set(rating),
            comment: Set(comment),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        Self::recompute_product_rating(&txn, product_id).await?;
        txn.commit().await?;

        info!(review_id = %model.id, "review created");
        self.emit(Event::ReviewCreated {
            product_id,
            review_id: model.id,
        })
        .await;
        Ok(model)
    }

    #[instrument(skip(self))]
    pub async fn list_for_product(
        &self,
        product_id: Uuid,
        page: u64,
        limit: u64,
    ) -> Result<ReviewPage, ServiceError> {
        let paginator = ReviewEntity::find()
            .filter(review::Column::ProductId.eq(product_id))
            .order_by_desc(review::Column::CreatedAt)
            .paginate(&*self.db, limit.max(1));
        let total = paginator.num_items().await?;
        let reviews = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok(ReviewPage { reviews, total })
    }

    /// Owners may delete their own review; admins may delete any.
    #[instrument(skip(self))]
    pub async fn delete_review(
        &self,
        review_id: Uuid,
        requester_id: Uuid,
        requester_is_admin: bool,
    ) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;

        let review = ReviewEntity::find_by_id(review_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Review not found: {review_id}")))?;

        if review.user_id != requester_id && !requester_is_admin {
            return Err(ServiceError::Forbidden(
                "you can only delete your own reviews".to_string(),
            ));
        }

        let product_id = review.product_id;
        ReviewEntity::delete_by_id(review_id).exec(&txn).await?;
        Self::recompute_product_rating(&txn, product_id).await?;
        txn.commit().await?;

        info!(%review_id, "review deleted");
        Ok(())
    }

    async fn recompute_product_rating<C: sea_orm::ConnectionTrait>(
        conn: &C,
        product_id: Uuid,
    ) -> Result<(), ServiceError> {
        let ratings: Vec<i32> = ReviewEntity::find()
            .filter(review::Column::ProductId.eq(product_id))
            .select_only()
            .column(review::Column::Rating)
            .into_tuple()
            .all(conn)
            .await?;

        let num_reviews = ratings.len() as i32;
        let rating = if ratings.is_empty() {
            Decimal::ZERO
        } else {
            (Decimal::from(ratings.iter().map(|r| i64::from(*r)).sum::<i64>())
                / Decimal::from(num_reviews))
            .round_dp(2)
        };

        let Some(product) = ProductEntity::find_by_id(product_id).one(conn).await? else {
            return Ok(());
        };
        let mut active: product::ActiveModel = product.into();
        active.rating = Set(rating);
        active.num_reviews = Set(num_reviews);
        active.update(conn).await?;
        Ok(())
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            if let Err(e) = sender.send(event).await {
                warn!(error = %e, "failed to emit event");
            }
        }
    }
}
