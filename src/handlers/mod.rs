pub mod health;
pub mod orders;
pub mod payment_webhooks;
pub mod products;
pub mod reviews;
pub mod users;

use std::sync::Arc;

use crate::auth::AuthService;
use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::mailer::Mailer;
use crate::payments::PaymentGateway;
use crate::storage::ObjectStorage;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer backing the HTTP handlers. External collaborators (mailer,
/// payment gateway, object storage) come in as trait objects so tests can
/// swap fakes without global state.
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<crate::services::orders::OrderService>,
    pub checkout: Arc<crate::services::checkout::CheckoutService>,
    pub products: Arc<crate::services::products::ProductCatalogService>,
    pub accounts: Arc<crate::services::users::AccountService>,
    pub reviews: Arc<crate::services::reviews::ReviewService>,
}

impl AppServices {
    pub fn new(
        db: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        auth_service: Arc<AuthService>,
        mailer: Arc<dyn Mailer>,
        gateway: Arc<dyn PaymentGateway>,
        storage: Arc<dyn ObjectStorage>,
        cfg: &AppConfig,
    ) -> Self {
        let orders = Arc::new(crate::services::orders::OrderService::new(
            db.clone(),
            Some(event_sender.clone()),
            mailer.clone(),
            cfg.frontend_url.clone(),
        ));
        let checkout = Arc::new(crate::services::checkout::CheckoutService::new(
            db.clone(),
            gateway,
            cfg.frontend_url.clone(),
            cfg.currency.clone(),
        ));
        let products = Arc::new(crate::services::products::ProductCatalogService::new(
            db.clone(),
            Some(event_sender.clone()),
            storage,
        ));
        let accounts = Arc::new(crate::services::users::AccountService::new(
            db.clone(),
            auth_service,
            mailer,
            Some(event_sender.clone()),
            cfg.frontend_url.clone(),
        ));
        let reviews = Arc::new(crate::services::reviews::ReviewService::new(
            db,
            Some(event_sender),
        ));

        Self {
            orders,
            checkout,
            products,
            accounts,
            reviews,
        }
    }
}
