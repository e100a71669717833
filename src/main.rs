use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{routing::get, Router};
use http::HeaderValue;
use tokio::signal;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};

use storefront_api as api;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = api::config::load_config()?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);
    cfg.report_missing_integrations();

    // Init DB
    let db_pool = api::db::establish_connection_from_app_config(&cfg).await?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db_arc = Arc::new(db_pool);

    // Build services
    let coupon_cache = api::cache::InMemoryCache::new(
        cfg.coupon_cache_capacity,
        Some(Duration::from_secs(cfg.coupon_cache_ttl_secs)),
    );
    let discount_service =
        api::services::discounts::DiscountService::new(db_arc.clone(), coupon_cache);
    let order_service =
        api::services::orders::OrderService::new(db_arc.clone(), discount_service.clone());
    let product_service = api::services::products::ProductService::new(db_arc.clone());

    let gateway: Arc<dyn api::services::mercadopago::PaymentGateway> =
        Arc::new(api::services::mercadopago::MercadoPagoClient::new(
            cfg.mercadopago_base_url.clone(),
            cfg.mercadopago_access_token.clone(),
        ));

    let email: Arc<dyn api::notifications::EmailSender> = match cfg.email_api_key.clone() {
        Some(key) => Arc::new(api::notifications::HttpEmailSender::new(
            cfg.email_api_base_url.clone(),
            key,
            cfg.email_from.clone(),
        )),
        None => Arc::new(api::notifications::NoopEmailSender),
    };

    let reconciliation_service = api::services::reconciliation::ReconciliationService::new(
        db_arc.clone(),
        gateway,
        email,
        cfg.order_notification_email.clone(),
    );

    let app_state = api::AppState {
        db: db_arc.clone(),
        config: cfg.clone(),
        discount_service,
        order_service,
        product_service,
        reconciliation_service,
    };

    // Build CORS layer from config
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

    let cors_layer = match configured_origins {
        Some(origins) => CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any),
        None => {
            info!("No CORS origins configured; using permissive CORS");
            CorsLayer::permissive()
        }
    };

    let app = Router::<api::AppState>::new()
        .route("/", get(|| async { "storefront-api up" }))
        .nest("/api/v1", api::api_v1_routes())
        .merge(api::openapi::swagger_ui())
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors_layer)
        .with_state(app_state);

    // Bind and serve
    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port).parse()?;
    info!("storefront-api listening on http://{}", addr);
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
