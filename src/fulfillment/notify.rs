use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use tracing::info;
use url::Url;

use crate::error::{AppError, AppResult};

/// key: fulfillment-notify-message -> "invoice ready" mail payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvoiceNotification {
    pub invoice_id: i64,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl InvoiceNotification {
    pub fn invoice_ready(invoice_id: i64, from: &str, to: &str) -> Self {
        Self {
            invoice_id,
            from: from.to_string(),
            to: to.to_string(),
            subject: "Your Invoice is Ready".to_string(),
            body: format!(
                "Invoice {invoice_id} has been generated and is ready for viewing."
            ),
        }
    }
}

/// Notification channel. Errors come back to the notify job so it can retry.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &InvoiceNotification) -> AppResult<()>;
}

/// Posts notifications as JSON to a mail relay.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    endpoint: Url,
}

impl WebhookNotifier {
    pub fn new(endpoint: &str) -> AppResult<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|err| AppError::validation(format!("invalid notify endpoint: {err}")))?;
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
        })
    }

    pub fn with_client(client: reqwest::Client, endpoint: Url) -> Self {
        Self { client, endpoint }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, notification: &InvoiceNotification) -> AppResult<()> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(notification)
            .send()
            .await
            .map_err(|err| AppError::TransientJob(format!("notify relay unreachable: {err}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let detail = response.text().await.unwrap_or_default();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Err(AppError::TransientJob(format!(
                "notify relay returned {status}: {detail}"
            )))
        } else {
            Err(AppError::PermanentJob {
                attempts: 1,
                reason: format!("notify relay rejected message with {status}: {detail}"),
            })
        }
    }
}

/// Fallback channel when no relay is configured.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &InvoiceNotification) -> AppResult<()> {
        info!(
            invoice_id = notification.invoice_id,
            to = %notification.to,
            subject = %notification.subject,
            "invoice notification logged (no relay configured)"
        );
        Ok(())
    }
}
