use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{routing::get, Router};
use http::HeaderValue;
use tokio::{signal, sync::mpsc};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    services::ServeDir,
};
use tracing::{error, info};

use varanda_api as api;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = api::config::load_config()?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);
    api::errors::set_expose_error_details(!cfg.is_production());

    // Database
    let db_pool = api::db::establish_connection_from_app_config(&cfg).await?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("failed running migrations: {}", e);
            e
        })?;
    }
    let db_arc = Arc::new(db_pool);

    // Realtime channel client (construction only; connectivity checked in health)
    let redis_client = Arc::new(redis::Client::open(cfg.redis_url.clone())?);
    let notifier: Arc<dyn api::notifications::RealtimeNotifier> = Arc::new(
        api::notifications::RedisNotifier::new(redis_client.clone(), Duration::from_secs(5)),
    );

    // Event pipeline
    let (event_tx, event_rx) = mpsc::channel(1024);
    let event_sender = api::events::EventSender::new(event_tx);
    tokio::spawn(api::events::process_events(event_rx, Some(notifier)));

    // Auth
    let auth_service = Arc::new(api::auth::AuthService::new(api::auth::AuthConfig::new(
        cfg.jwt_secret.clone(),
        "varanda-auth".to_string(),
        "varanda-api".to_string(),
        Duration::from_secs(cfg.jwt_expiration as u64),
        Duration::from_secs(cfg.refresh_token_expiration as u64),
    )));

    // External collaborators
    let mailer: Arc<dyn api::mailer::Mailer> =
        match (cfg.email_api_url.clone(), cfg.email_api_key.clone()) {
            (Some(url), Some(key)) => Arc::new(api::mailer::HttpMailer::new(
                url,
                key,
                cfg.email_from.clone(),
                Duration::from_secs(cfg.email_timeout_secs),
            )?),
            _ => {
                info!("email API not configured; transactional mail disabled");
                Arc::new(api::mailer::NoopMailer)
            }
        };

    let gateway: Arc<dyn api::payments::PaymentGateway> = {
        let secret = cfg.stripe_secret_key.clone().unwrap_or_default();
        if secret.is_empty() {
            info!("payment gateway key not configured; checkout sessions will fail");
        }
        Arc::new(api::payments::StripeGateway::new(
            secret,
            Duration::from_secs(cfg.gateway_timeout_secs),
        )?)
    };

    let storage: Arc<dyn api::storage::ObjectStorage> = Arc::new(
        api::storage::LocalDiskStorage::new(cfg.upload_dir.clone(), cfg.upload_base_url.clone()),
    );

    let services = api::handlers::AppServices::new(
        db_arc.clone(),
        Arc::new(event_sender.clone()),
        auth_service.clone(),
        mailer,
        gateway,
        storage,
        &cfg,
    );

    let app_state = api::AppState {
        db: db_arc,
        config: cfg.clone(),
        event_sender,
        services,
        redis: redis_client,
    };

    // CORS from config
    let configured_origins: Option<Vec<HeaderValue>> = cfg
        .cors_allowed_origins
        .as_ref()
        .map(|raw| {
            raw.split(',')
                .filter_map(|origin| {
                    let trimmed = origin.trim();
                    if trimmed.is_empty() {
                        None
                    } else {
                        HeaderValue::from_str(trimmed).ok()
                    }
                })
                .collect::<Vec<_>>()
        })
        .filter(|origins| !origins.is_empty());

    let cors_layer = if let Some(origins) = configured_origins {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    } else if cfg.should_allow_permissive_cors() {
        CorsLayer::permissive()
    } else {
        error!("missing CORS configuration; set APP__CORS_ALLOWED_ORIGINS or APP__CORS_ALLOW_ANY_ORIGIN=true");
        return Err(
            "missing CORS configuration: set APP__CORS_ALLOWED_ORIGINS or APP__CORS_ALLOW_ANY_ORIGIN=true"
                .into(),
        );
    };

    let app = Router::<api::AppState>::new()
        .route("/", get(|| async { "varanda-api up" }))
        .route("/health", get(api::handlers::health::health_check))
        .nest("/api", api::api_routes())
        .nest_service(
            cfg.upload_base_url.as_str(),
            ServeDir::new(cfg.upload_dir.clone()),
        )
        .merge(api::openapi::swagger_ui())
        .layer(CompressionLayer::new())
        .layer(cors_layer)
        // Inject AuthService into request extensions for the auth middleware
        .layer(axum::middleware::from_fn_with_state(
            auth_service.clone(),
            |axum::extract::State(auth): axum::extract::State<Arc<api::auth::AuthService>>,
             mut req: axum::http::Request<axum::body::Body>,
             next: axum::middleware::Next| async move {
                req.extensions_mut().insert(auth);
                next.run(req).await
            },
        ))
        .layer(axum::middleware::from_fn(
            api::middleware::request_logging_middleware,
        ))
        .layer(axum::middleware::from_fn(
            api::middleware::request_id_middleware,
        ))
        .with_state(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    info!("varanda-api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
