#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    middleware,
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tower::ServiceExt;
use uuid::Uuid;

use varanda_api::{
    auth::{hash_password, AuthConfig, AuthService},
    config::AppConfig,
    db,
    entities::{product, user},
    errors::ServiceError,
    events::{self, EventSender},
    handlers::AppServices,
    mailer::{EmailMessage, Mailer},
    notifications::{InMemoryNotifier, RealtimeNotifier},
    payments::{CheckoutSession, CheckoutSessionRequest, PaymentGateway},
    storage::LocalDiskStorage,
    AppState,
};

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

/// Mailer that records every message instead of delivering it.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<EmailMessage>>,
}

impl RecordingMailer {
    pub async fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().await.clone()
    }

    pub async fn count_with_subject(&self, needle: &str) -> usize {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|mail| mail.subject.contains(needle))
            .count()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: EmailMessage) -> Result<(), ServiceError> {
        self.sent.lock().await.push(message);
        Ok(())
    }
}

/// Gateway fake that records session requests and returns a canned session.
#[derive(Default)]
pub struct FakeGateway {
    requests: Mutex<Vec<CheckoutSessionRequest>>,
}

impl FakeGateway {
    pub async fn requests(&self) -> Vec<CheckoutSessionRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<CheckoutSession, ServiceError> {
        let mut requests = self.requests.lock().await;
        let id = format!("cs_test_{}", requests.len() + 1);
        requests.push(request);
        Ok(CheckoutSession {
            id,
            url: Some("https://checkout.test/pay".to_string()),
            status: Some("open".to_string()),
            payment_status: Some("unpaid".to_string()),
        })
    }
}

/// Application harness backed by a single-connection in-memory SQLite
/// database, with fakes for every external collaborator.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub admin_token: String,
    pub user_token: String,
    pub admin_id: Uuid,
    pub user_id: Uuid,
    pub mailer: Arc<RecordingMailer>,
    pub gateway: Arc<FakeGateway>,
    pub notifier: Arc<InMemoryNotifier>,
    _event_task: tokio::task::JoinHandle<()>,
    _upload_dir: tempfile::TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "redis://127.0.0.1:6379".to_string(),
            "test_secret_key_for_testing_purposes_only_and_long_enough_64chars!!".to_string(),
            3600,
            86_400,
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.stripe_webhook_secret = Some(WEBHOOK_SECRET.to_string());
        cfg.frontend_url = "https://shop.test".to_string();

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db_arc = Arc::new(pool);

        let notifier = Arc::new(InMemoryNotifier::default());
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(
            event_rx,
            Some(notifier.clone() as Arc<dyn RealtimeNotifier>),
        ));

        let auth_service = Arc::new(AuthService::new(AuthConfig::new(
            cfg.jwt_secret.clone(),
            "varanda-auth".to_string(),
            "varanda-api".to_string(),
            Duration::from_secs(cfg.jwt_expiration as u64),
            Duration::from_secs(cfg.refresh_token_expiration as u64),
        )));

        let mailer = Arc::new(RecordingMailer::default());
        let gateway = Arc::new(FakeGateway::default());
        let upload_dir = tempfile::tempdir().expect("upload dir");
        let storage = Arc::new(LocalDiskStorage::new(upload_dir.path(), "/img"));

        let services = AppServices::new(
            db_arc.clone(),
            Arc::new(event_sender.clone()),
            auth_service.clone(),
            mailer.clone(),
            gateway.clone(),
            storage,
            &cfg,
        );

        let redis_client = Arc::new(
            redis::Client::open(cfg.redis_url.clone()).expect("invalid redis url for tests"),
        );

        let state = AppState {
            db: db_arc.clone(),
            config: cfg.clone(),
            event_sender,
            services,
            redis: redis_client,
        };

        let admin =
            Self::insert_user(&db_arc, "Dona Admin", "admin@varanda.test", user::UserRole::Admin)
                .await;
        let buyer =
            Self::insert_user(&db_arc, "Joana Prado", "joana@varanda.test", user::UserRole::User)
                .await;

        let admin_token = auth_service
            .generate_token_pair(&admin)
            .expect("admin token")
            .access_token;
        let user_token = auth_service
            .generate_token_pair(&buyer)
            .expect("user token")
            .access_token;

        let router = Router::new()
            .nest("/api", varanda_api::api_routes())
            .layer(middleware::from_fn_with_state(
                auth_service.clone(),
                |axum::extract::State(auth): axum::extract::State<Arc<AuthService>>,
                 mut req: Request<Body>,
                 next: axum::middleware::Next| async move {
                    req.extensions_mut().insert(auth);
                    next.run(req).await
                },
            ))
            .with_state(state.clone());

        Self {
            router,
            state,
            admin_token,
            user_token,
            admin_id: admin.id,
            user_id: buyer.id,
            mailer,
            gateway,
            notifier,
            _event_task: event_task,
            _upload_dir: upload_dir,
        }
    }

    async fn insert_user(
        db: &sea_orm::DatabaseConnection,
        name: &str,
        email: &str,
        role: user::UserRole,
    ) -> user::Model {
        user::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            email: Set(email.to_string()),
            password_hash: Set(hash_password("password123").expect("hash")),
            role: Set(role),
            email_verified: Set(true),
            ..Default::default()
        }
        .insert(db)
        .await
        .expect("insert test user")
    }

    /// Insert a catalog product directly.
    pub async fn seed_product(&self, name: &str, price: Decimal, stock: i32) -> product::Model {
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            description: Set(format!("{name} for tests")),
            price: Set(price),
            category: Set("Comidas".to_string()),
            images: Set(serde_json::json!(["https://cdn.test/product.jpg"])),
            stock: Set(stock),
            is_available: Set(true),
            rating: Set(Decimal::ZERO),
            num_reviews: Set(0),
            tags: Set(serde_json::json!([])),
            ..Default::default()
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product")
    }

    pub async fn product_stock(&self, product_id: Uuid) -> i32 {
        product::Entity::find_by_id(product_id)
            .one(&*self.state.db)
            .await
            .expect("load product")
            .expect("product exists")
            .stock
    }

    pub async fn set_product_price(&self, product_id: Uuid, price: Decimal) {
        let model = product::Entity::find_by_id(product_id)
            .one(&*self.state.db)
            .await
            .expect("load product")
            .expect("product exists");
        let mut active: product::ActiveModel = model.into();
        active.price = Set(price);
        active.updated_at = Set(Some(Utc::now()));
        active.update(&*self.state.db).await.expect("update price");
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {tok}"));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("serialize request body"))
        } else {
            Body::empty()
        };

        self.router
            .clone()
            .oneshot(builder.body(body).expect("build request"))
            .await
            .expect("router error during test request")
    }

    /// Raw-body request used by the webhook tests.
    pub async fn raw_request(
        &self,
        method: Method,
        uri: &str,
        body: Vec<u8>,
        headers: &[(&str, &str)],
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.router
            .clone()
            .oneshot(builder.body(Body::from(body)).expect("build request"))
            .await
            .expect("router error during test request")
    }

    pub async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        serde_json::from_slice(&bytes).expect("body is json")
    }
}

/// Decimal out of a JSON payload, whether serialized as string or number.
pub fn dec_of(value: &Value) -> Decimal {
    match value {
        Value::String(s) => s.parse().expect("decimal string"),
        Value::Number(n) => n.to_string().parse().expect("decimal number"),
        other => panic!("expected decimal, got {other:?}"),
    }
}

#[allow(dead_code)]
pub fn assert_status(response: &axum::response::Response, expected: StatusCode) {
    assert_eq!(response.status(), expected);
}
