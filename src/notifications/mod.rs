//! Outbound email notifications. Reconciliation treats this collaborator as
//! best-effort: a send failure is logged and never propagated.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument};

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("Email API error: {0}")]
    Api(String),
    #[error("Email transport error: {0}")]
    Transport(String),
}

/// A rendered message ready for delivery.
#[derive(Clone, Debug, Serialize)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, message: EmailMessage) -> Result<(), EmailError>;
}

/// Sends through a Resend-style HTTP email API.
pub struct HttpEmailSender {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    from: String,
}

impl HttpEmailSender {
    pub fn new(base_url: String, api_key: String, from: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            base_url,
            api_key,
            from,
        }
    }
}

#[async_trait]
impl EmailSender for HttpEmailSender {
    #[instrument(skip(self, message), fields(to = %message.to, subject = %message.subject))]
    async fn send(&self, message: EmailMessage) -> Result<(), EmailError> {
        let body = serde_json::json!({
            "from": self.from,
            "to": [message.to],
            "subject": message.subject,
            "html": message.html,
        });

        let response = self
            .client
            .post(format!("{}/emails", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| EmailError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EmailError::Api(format!(
                "email API returned {}",
                response.status()
            )));
        }

        info!("email dispatched");
        Ok(())
    }
}

/// Used when no email API key is configured; logs instead of sending.
pub struct NoopEmailSender;

#[async_trait]
impl EmailSender for NoopEmailSender {
    async fn send(&self, message: EmailMessage) -> Result<(), EmailError> {
        info!(to = %message.to, subject = %message.subject, "email delivery disabled; skipping send");
        Ok(())
    }
}
