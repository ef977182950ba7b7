use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, Order as SortOrder,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::entities::product::{self, Entity as ProductEntity};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::storage::ObjectStorage;

#[derive(Debug, Clone)]
pub struct CreateProductInput {
    pub name: String,
    pub description: String,
    pub price: Decimal,
    pub category: String,
    pub stock: i32,
    pub is_available: bool,
    pub tags: Vec<String>,
}

#[derive(Debug, Default, Clone)]
pub struct UpdateProductInput {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Decimal>,
    pub category: Option<String>,
    pub stock: Option<i32>,
    pub is_available: Option<bool>,
    pub tags: Option<Vec<String>>,
}

/// Catalog listing filters.
#[derive(Debug, Default, Clone)]
pub struct ProductFilter {
    pub category: Option<String>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub is_available: Option<bool>,
    pub search: Option<String>,
    pub sort_by: Option<String>,
}

#[derive(Debug)]
pub struct ProductPage {
    pub products: Vec<product::Model>,
    pub total: u64,
}

/// Catalog CRUD and queries. Stock only ever moves through the order flows,
/// never through a plain update here (create/admin edits excepted).
#[derive(Clone)]
pub struct ProductCatalogService {
    db: Arc<DatabaseConnection>,
    event_sender: Option<Arc<EventSender>>,
    storage: Arc<dyn ObjectStorage>,
}

impl ProductCatalogService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Option<Arc<EventSender>>,
        storage: Arc<dyn ObjectStorage>,
    ) -> Self {
        Self {
            db,
            event_sender,
            storage,
        }
    }

    fn filter_condition(filter: &ProductFilter) -> Condition {
        let mut cond = Condition::all();
        if let Some(category) = &filter.category {
            cond = cond.add(product::Column::Category.eq(category.clone()));
        }
        if let Some(min) = filter.min_price {
            cond = cond.add(product::Column::Price.gte(min));
        }
        if let Some(max) = filter.max_price {
            cond = cond.add(product::Column::Price.lte(max));
        }
        if let Some(available) = filter.is_available {
            cond = cond.add(product::Column::IsAvailable.eq(available));
        }
        if let Some(term) = &filter.search {
            let pattern = format!("%{}%", term);
            cond = cond.add(
                Condition::any()
                    .add(product::Column::Name.like(pattern.clone()))
                    .add(product::Column::Description.like(pattern)),
            );
        }
        cond
    }

    /// `field:direction` sort specifier; unknown fields fall back to newest
    /// first.
    fn sort(sort_by: Option<&str>) -> (product::Column, SortOrder) {
        let Some(raw) = sort_by else {
            return (product::Column::CreatedAt, SortOrder::Desc);
        };
        let mut parts = raw.splitn(2, ':');
        let field = parts.next().unwrap_or_default();
        let direction = match parts.next() {
            Some("desc") => SortOrder::Desc,
            _ => SortOrder::Asc,
        };
        let column = match field {
            "price" => product::Column::Price,
            "name" => product::Column::Name,
            "rating" => product::Column::Rating,
            "created_at" => product::Column::CreatedAt,
            _ => return (product::Column::CreatedAt, SortOrder::Desc),
        };
        (column, direction)
    }

    #[instrument(skip(self, filter))]
    pub async fn list_products(
        &self,
        filter: &ProductFilter,
        page: u64,
        limit: u64,
    ) -> Result<ProductPage, ServiceError> {
        let (column, direction) = Self::sort(filter.sort_by.as_deref());
        let paginator = ProductEntity::find()
            .filter(Self::filter_condition(filter))
            .order_by(column, direction)
            .paginate(&*self.db, limit.max(1));

        let total = paginator.num_items().await?;
        let products = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok(ProductPage { products, total })
    }

    #[instrument(skip(self))]
    pub async fn get_product(&self, product_id: Uuid) -> Result<product::Model, ServiceError> {
        ProductEntity::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product not found: {product_id}")))
    }

    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_product(
        &self,
        input: CreateProductInput,
    ) -> Result<product::Model, ServiceError> {
        if !product::is_valid_category(&input.category) {
            return Err(ServiceError::ValidationError(format!(
                "unknown category: {}",
                input.category
            )));
        }
        if input.price < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "price cannot be negative".to_string(),
            ));
        }
        if input.stock < 0 {
            return Err(ServiceError::ValidationError(
                "stock cannot be negative".to_string(),
            ));
        }

        let model = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(input.name),
            description: Set(input.description),
            price: Set(input.price.round_dp(2)),
            category: Set(input.category),
            images: Set(json!([])),
            stock: Set(input.stock),
            is_available: Set(input.is_available),
            rating: Set(Decimal::ZERO),
            num_reviews: Set(0),
            tags: Set(json!(input.tags)),
            ..Default::default()
        }
        .insert(&*self.db)
        .await?;

        info!(product_id = %model.id, "product created");
        self.emit(Event::ProductCreated(model.id)).await;
        Ok(model)
    }

    #[instrument(skip(self, input))]
    pub async fn update_product(
        &self,
        product_id: Uuid,
        input: UpdateProductInput,
    ) -> Result<product::Model, ServiceError> {
        let existing = self.get_product(product_id).await?;
        let mut active: product::ActiveModel = existing.into();

        if let Some(name) = input.name {
            active.name = Set(name);
        }
        if let Some(description) = input.description {
            active.description = Set(description);
        }
        if let Some(price) = input.price {
            if price < Decimal::ZERO {
                return Err(ServiceError::ValidationError(
                    "price cannot be negative".to_string(),
                ));
            }
            active.price = Set(price.round_dp(2));
        }
        if let Some(category) = input.category {
            if !product::is_valid_category(&category) {
                return Err(ServiceError::ValidationError(format!(
                    "unknown category: {category}"
                )));
            }
            active.category = Set(category);
        }
        if let Some(stock) = input.stock {
            if stock < 0 {
                return Err(ServiceError::ValidationError(
                    "stock cannot be negative".to_string(),
                ));
            }
            active.stock = Set(stock);
        }
        if let Some(available) = input.is_available {
            active.is_available = Set(available);
        }
        if let Some(tags) = input.tags {
            active.tags = Set(json!(tags));
        }
        active.updated_at = Set(Some(chrono::Utc::now()));

        let updated = active.update(&*self.db).await?;
        self.emit(Event::ProductUpdated(updated.id)).await;
        Ok(updated)
    }

    /// Deletes a product and its stored images. Image removal is
    /// best-effort: an unreachable store never blocks the catalog change.
    #[instrument(skip(self))]
    pub async fn delete_product(&self, product_id: Uuid) -> Result<(), ServiceError> {
        let product = self.get_product(product_id).await?;

        for url in product.image_urls() {
            if let Err(e) = self.storage.remove(&url).await {
                warn!(%product_id, %url, error = %e, "image removal failed");
            }
        }

        ProductEntity::delete_by_id(product_id).exec(&*self.db).await?;
        info!(%product_id, "product deleted");
        self.emit(Event::ProductDeleted(product_id)).await;
        Ok(())
    }

    /// Stores an uploaded image and appends its URL to the product.
    #[instrument(skip(self, bytes), fields(bytes = bytes.len()))]
    pub async fn add_product_image(
        &self,
        product_id: Uuid,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<product::Model, ServiceError> {
        let product = self.get_product(product_id).await?;

        let url = self
            .storage
            .store(&format!("product-{product_id}"), content_type, bytes)
            .await?;

        let mut images = product.image_urls();
        images.push(url);

        let mut active: product::ActiveModel = product.into();
        active.images = Set(json!(images));
        active.updated_at = Set(Some(chrono::Utc::now()));
        let updated = active.update(&*self.db).await?;

        self.emit(Event::ProductUpdated(updated.id)).await;
        Ok(updated)
    }

    /// Highest-rated products, ties broken by review count.
    #[instrument(skip(self))]
    pub async fn top_rated(&self, limit: u64) -> Result<Vec<product::Model>, ServiceError> {
        let products = ProductEntity::find()
            .filter(product::Column::Rating.gte(Decimal::from(4)))
            .order_by_desc(product::Column::Rating)
            .order_by_desc(product::Column::NumReviews)
            .limit(limit)
            .all(&*self.db)
            .await?;
        Ok(products)
    }

    /// Other products in the same category.
    #[instrument(skip(self))]
    pub async fn related(
        &self,
        product_id: Uuid,
        limit: u64,
    ) -> Result<Vec<product::Model>, ServiceError> {
        let product = self.get_product(product_id).await?;
        let related = ProductEntity::find()
            .filter(product::Column::Category.eq(product.category))
            .filter(product::Column::Id.ne(product_id))
            .limit(limit)
            .all(&*self.db)
            .await?;
        Ok(related)
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            if let Err(e) = sender.send(event).await {
                warn!(error = %e, "failed to emit event");
            }
        }
    }
}
