use async_trait::async_trait;
use tracing::{error, info, warn};

use super::jobs::JobRecord;

/// key: fulfillment-events -> job completion callbacks for observability
#[async_trait]
pub trait FulfillmentEvents: Send + Sync {
    async fn on_document_rendered(&self, _invoice_id: i64, _document_ref: &str) {}
    async fn on_notify_failed(&self, _invoice_id: i64, _reason: &str) {}
    async fn on_job_dead(&self, _record: &JobRecord) {}
}

#[derive(Debug, Clone, Default)]
pub struct TracingEvents;

#[async_trait]
impl FulfillmentEvents for TracingEvents {
    async fn on_document_rendered(&self, invoice_id: i64, document_ref: &str) {
        info!(%invoice_id, %document_ref, "invoice document rendered");
    }

    async fn on_notify_failed(&self, invoice_id: i64, reason: &str) {
        warn!(%invoice_id, %reason, "invoice notification failed");
    }

    async fn on_job_dead(&self, record: &JobRecord) {
        error!(
            invoice_id = record.invoice_id,
            kind = %record.kind,
            attempts = record.attempt_count,
            last_error = record.last_error.as_deref().unwrap_or(""),
            "fulfillment job marked dead"
        );
    }
}
