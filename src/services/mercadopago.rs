//! MercadoPago integration: payment detail lookups and webhook signature
//! verification.

use async_trait::async_trait;
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use tracing::{instrument, warn};

use crate::errors::ServiceError;

type HmacSha256 = Hmac<Sha256>;

/// Payment snapshot fetched from the gateway. The webhook payload itself is
/// never trusted for financial data; this is the result of a second lookup.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaymentDetails {
    pub id: String,
    pub status: String,
    pub status_detail: Option<String>,
    pub external_reference: Option<String>,
    pub transaction_amount: Option<Decimal>,
    pub payment_method_id: Option<String>,
    pub payment_type_id: Option<String>,
    pub date_approved: Option<DateTime<Utc>>,
    pub date_created: Option<DateTime<Utc>>,
}

/// Seam for the payment gateway so reconciliation can be tested against a
/// mock without network access.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn get_payment(&self, payment_id: &str) -> Result<PaymentDetails, ServiceError>;
}

/// HTTP client for the MercadoPago payments API.
pub struct MercadoPagoClient {
    client: reqwest::Client,
    base_url: String,
    access_token: Option<String>,
}

impl MercadoPagoClient {
    pub fn new(base_url: String, access_token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            base_url,
            access_token,
        }
    }
}

#[async_trait]
impl PaymentGateway for MercadoPagoClient {
    #[instrument(skip(self))]
    async fn get_payment(&self, payment_id: &str) -> Result<PaymentDetails, ServiceError> {
        let token = self.access_token.as_deref().ok_or_else(|| {
            ServiceError::ExternalApiError("MercadoPago access token not configured".to_string())
        })?;

        let url = format!("{}/v1/payments/{}", self.base_url, payment_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| {
                ServiceError::ExternalApiError(format!("payment lookup failed: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(ServiceError::ExternalApiError(format!(
                "payment lookup returned {}",
                response.status()
            )));
        }

        response.json::<PaymentDetails>().await.map_err(|e| {
            ServiceError::ExternalApiError(format!("invalid payment response: {}", e))
        })
    }
}

/// Parsed `x-signature` header: `ts=<unix>,v1=<hex>`.
#[derive(Debug, PartialEq, Eq)]
pub struct SignatureHeader {
    pub ts: String,
    pub v1: String,
}

/// Splits the comma-separated signature header. Missing `ts` or `v1` fails
/// closed.
pub fn parse_signature_header(raw: &str) -> Option<SignatureHeader> {
    let mut ts = "";
    let mut v1 = "";
    for part in raw.split(',') {
        let mut it = part.trim().splitn(2, '=');
        match (it.next(), it.next()) {
            (Some("ts"), Some(val)) => ts = val,
            (Some("v1"), Some(val)) => v1 = val,
            _ => {}
        }
    }
    if ts.is_empty() || v1.is_empty() {
        return None;
    }
    Some(SignatureHeader {
        ts: ts.to_string(),
        v1: v1.to_string(),
    })
}

/// Verifies a MercadoPago webhook delivery.
///
/// The canonical manifest is `id:<payment_id>;request-id:<x-request-id>;ts:<ts>;`
/// and the expected digest is HMAC-SHA256 over it with the shared secret,
/// compared in constant time against `v1`. An unset secret rejects every
/// delivery.
pub fn verify_webhook_signature(
    headers: &HeaderMap,
    payment_id: &str,
    secret: Option<&str>,
) -> bool {
    let Some(secret) = secret else {
        warn!("webhook secret not configured; rejecting delivery");
        return false;
    };

    let Some(raw_signature) = headers.get("x-signature").and_then(|h| h.to_str().ok()) else {
        return false;
    };
    let Some(sig) = parse_signature_header(raw_signature) else {
        return false;
    };
    let request_id = headers
        .get("x-request-id")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");

    let manifest = format!(
        "id:{};request-id:{};ts:{};",
        payment_id, request_id, sig.ts
    );

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(manifest.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());

    constant_time_eq(&expected, &sig.v1)
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
