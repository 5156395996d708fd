//! Async fulfillment queue: document rendering and customer notification run
//! outside the request path, keyed by `(invoice_id, kind)` so at most one job
//! of each kind is live per invoice.
//!
//! The two kinds are dispatched independently. A notification never waits for
//! the document, and a render that dies does not hold the notification back.

pub mod content_store;
pub mod events;
pub mod jobs;
pub mod notify;
pub mod render;
pub mod retry;
pub mod worker;

pub use content_store::{ContentStore, FsContentStore, MemoryContentStore, StoredDocument};
pub use events::{FulfillmentEvents, TracingEvents};
pub use jobs::{
    ClaimOutcome, EnqueueOutcome, FulfillmentJob, JobKey, JobKind, JobRecord, JobStatus,
};
pub use notify::{InvoiceNotification, LogNotifier, Notifier, WebhookNotifier};
pub use render::{DocumentRenderer, PlainTextRenderer, RenderedDocument};
pub use retry::RetryPolicy;
pub use worker::{FulfillmentQueue, FulfillmentWorker};
