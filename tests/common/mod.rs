use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request, Response},
    Router,
};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ActiveValue::Set};
use serde_json::{json, Value};
use sha2::Sha256;
use storefront_api::{
    cache::InMemoryCache,
    config::AppConfig,
    db::{self, DbConfig},
    entities::{coupon, order, order_item, product},
    errors::ServiceError,
    notifications::{EmailError, EmailMessage, EmailSender},
    services::{
        discounts::DiscountService,
        mercadopago::{PaymentDetails, PaymentGateway},
        orders::OrderService,
        products::ProductService,
        reconciliation::ReconciliationService,
    },
    AppState,
};
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_WEBHOOK_SECRET: &str = "test_webhook_secret_for_integration";

/// Gateway stub returning canned payment details keyed by payment id.
#[derive(Default)]
pub struct StubGateway {
    payments: Mutex<HashMap<String, PaymentDetails>>,
}

impl StubGateway {
    pub fn insert(&self, payment: PaymentDetails) {
        self.payments
            .lock()
            .unwrap()
            .insert(payment.id.clone(), payment);
    }
}

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn get_payment(&self, payment_id: &str) -> Result<PaymentDetails, ServiceError> {
        self.payments
            .lock()
            .unwrap()
            .get(payment_id)
            .cloned()
            .ok_or_else(|| {
                ServiceError::ExternalApiError(format!("unknown payment {}", payment_id))
            })
    }
}

/// Email sender that records every message instead of delivering it.
#[derive(Default)]
pub struct RecordingEmailSender {
    pub sent: Mutex<Vec<EmailMessage>>,
}

impl RecordingEmailSender {
    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl EmailSender for RecordingEmailSender {
    async fn send(&self, message: EmailMessage) -> Result<(), EmailError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

/// Harness backed by an in-memory SQLite database (single connection so the
/// whole test shares one schema).
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<StubGateway>,
    pub email: Arc<RecordingEmailSender>,
}

impl TestApp {
    pub async fn new() -> Self {
        let cfg = test_config();

        let db_cfg = DbConfig {
            url: cfg.database_url.clone(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        };
        let pool = db::establish_connection_with_config(&db_cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db_arc = Arc::new(pool);

        let cache = InMemoryCache::new(100, Some(Duration::from_secs(60)));
        let discount_service = DiscountService::new(db_arc.clone(), cache);
        let order_service = OrderService::new(db_arc.clone(), discount_service.clone());
        let product_service = ProductService::new(db_arc.clone());

        let gateway = Arc::new(StubGateway::default());
        let email = Arc::new(RecordingEmailSender::default());
        let reconciliation_service = ReconciliationService::new(
            db_arc.clone(),
            gateway.clone(),
            email.clone(),
            None,
        );

        let state = AppState {
            db: db_arc,
            config: cfg,
            discount_service,
            order_service,
            product_service,
            reconciliation_service,
        };

        let router = Router::new()
            .nest("/api/v1", storefront_api::api_v1_routes())
            .with_state(state.clone());

        Self {
            router,
            state,
            gateway,
            email,
        }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> Response<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let request = builder.body(body).expect("build request");
        self.router.clone().oneshot(request).await.expect("route request")
    }

    /// Sends a webhook delivery signed with the test secret.
    pub async fn signed_webhook(&self, payment_id: &str, event_type: &str) -> Response<Body> {
        let ts = "1730000000";
        let request_id = "req-test-1";
        let v1 = sign_manifest(payment_id, request_id, ts, TEST_WEBHOOK_SECRET);

        let body = json!({
            "type": event_type,
            "action": "payment.updated",
            "data": { "id": payment_id }
        });

        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/mercadopago/webhook")
            .header("content-type", "application/json")
            .header("x-signature", format!("ts={},v1={}", ts, v1))
            .header("x-request-id", request_id)
            .body(Body::from(body.to_string()))
            .expect("build webhook request");

        self.router.clone().oneshot(request).await.expect("route webhook")
    }

    pub async fn seed_product(&self, sku: &str, price: Decimal, stock: i32) -> product::Model {
        let model = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            sku: Set(sku.to_string()),
            name: Set(format!("Product {}", sku)),
            price: Set(price),
            currency: Set("CLP".to_string()),
            stock: Set(stock),
            is_active: Set(true),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        };
        model
            .insert(&*self.state.db)
            .await
            .expect("seed product")
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn seed_coupon(
        &self,
        code: &str,
        discount_type: coupon::DiscountType,
        value: Decimal,
        product_ids: Vec<Uuid>,
        valid_from: DateTime<Utc>,
        valid_until: DateTime<Utc>,
        active: bool,
    ) -> coupon::Model {
        let model = coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.to_string()),
            discount_type: Set(discount_type),
            discount_value: Set(value),
            applicable_product_ids: Set(json!(product_ids
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>())),
            valid_from: Set(valid_from),
            valid_until: Set(valid_until),
            active: Set(active),
            created_at: Set(Utc::now()),
            updated_at: Set(Utc::now()),
        };
        model.insert(&*self.state.db).await.expect("seed coupon")
    }

    /// Places an order through the service and returns it with its items.
    pub async fn seed_order(
        &self,
        customer_email: &str,
        items: Vec<(Uuid, i32)>,
    ) -> (order::Model, Vec<order_item::Model>) {
        self.state
            .order_service
            .create_order(storefront_api::services::orders::CreateOrderRequest {
                customer_email: customer_email.to_string(),
                items: items
                    .into_iter()
                    .map(|(product_id, quantity)| {
                        storefront_api::services::orders::CreateOrderItem {
                            product_id,
                            quantity,
                        }
                    })
                    .collect(),
                coupon_code: None,
            })
            .await
            .expect("seed order")
    }

    pub fn stub_payment(&self, payment_id: &str, status: &str, external_reference: Option<&str>) {
        self.gateway.insert(PaymentDetails {
            id: payment_id.to_string(),
            status: status.to_string(),
            status_detail: Some("accredited".to_string()),
            external_reference: external_reference.map(|r| r.to_string()),
            transaction_amount: Some(Decimal::from(10000)),
            payment_method_id: Some("visa".to_string()),
            payment_type_id: Some("credit_card".to_string()),
            date_approved: Some(Utc::now()),
            date_created: Some(Utc::now()),
        });
    }
}

fn test_config() -> AppConfig {
    AppConfig {
        database_url: "sqlite::memory:".to_string(),
        host: "127.0.0.1".to_string(),
        port: 18080,
        environment: "test".to_string(),
        log_level: "info".to_string(),
        log_json: false,
        auto_migrate: true,
        cors_allowed_origins: None,
        db_max_connections: 1,
        db_min_connections: 1,
        mercadopago_webhook_secret: Some(TEST_WEBHOOK_SECRET.to_string()),
        mercadopago_access_token: None,
        mercadopago_base_url: "https://api.mercadopago.invalid".to_string(),
        email_api_key: None,
        email_api_base_url: "https://api.resend.invalid".to_string(),
        email_from: "test@storefront.cl".to_string(),
        order_notification_email: None,
        coupon_cache_ttl_secs: 60,
        coupon_cache_capacity: 100,
    }
}

pub fn sign_manifest(payment_id: &str, request_id: &str, ts: &str, secret: &str) -> String {
    let manifest = format!("id:{};request-id:{};ts:{};", payment_id, request_id, ts);
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(manifest.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

pub async fn response_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&bytes).expect("parse response body")
}
