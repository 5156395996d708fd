//! Persistence collaborator. Services only see these traits; `PgStore` backs the
//! worker tier and `MemoryStore` backs tests and local runs.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use rust_decimal::Decimal;

use crate::billing::{Bill, BillDraft, BillUpdate};
use crate::consumption::models::ConsumptionDraft;
use crate::consumption::{ConsumptionRecord, ConsumptionUpdate};
use crate::error::AppResult;
use crate::fulfillment::{ClaimOutcome, JobKey, JobRecord, JobStatus};
use crate::invoices::{Invoice, InvoiceDraft, InvoiceUpdate};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait ConsumptionStore: Send + Sync {
    async fn insert_consumption(&self, draft: ConsumptionDraft) -> AppResult<ConsumptionRecord>;
    async fn get_consumption(&self, id: i64) -> AppResult<Option<ConsumptionRecord>>;
    /// Newest date first. `None` lists every user.
    async fn list_consumption(&self, user_id: Option<i32>) -> AppResult<Vec<ConsumptionRecord>>;
    async fn update_consumption(
        &self,
        id: i64,
        update: &ConsumptionUpdate,
    ) -> AppResult<Option<ConsumptionRecord>>;
    async fn delete_consumption(&self, id: i64) -> AppResult<bool>;
    async fn sum_consumption(&self, user_id: Option<i32>) -> AppResult<Decimal>;
}

#[async_trait]
pub trait BillStore: Send + Sync {
    async fn insert_bill(&self, draft: BillDraft) -> AppResult<Bill>;
    async fn get_bill(&self, id: i64) -> AppResult<Option<Bill>>;
    /// Newest date first. `None` lists every user.
    async fn list_bills(&self, user_id: Option<i32>) -> AppResult<Vec<Bill>>;
    async fn update_bill(&self, id: i64, update: &BillUpdate) -> AppResult<Option<Bill>>;
    /// Moves an unpaid bill to paid. A paid bill is returned untouched.
    async fn mark_bill_paid(&self, id: i64) -> AppResult<Option<Bill>>;
    async fn delete_bill(&self, id: i64) -> AppResult<bool>;
    async fn sum_bills(&self, user_id: Option<i32>) -> AppResult<Decimal>;
}

#[async_trait]
pub trait InvoiceStore: Send + Sync {
    /// Commits the invoice row and every snapshot line as one unit.
    async fn insert_invoice(&self, draft: InvoiceDraft) -> AppResult<Invoice>;
    async fn get_invoice(&self, id: i64) -> AppResult<Option<Invoice>>;
    /// Newest first. `None` lists every user.
    async fn list_invoices(&self, user_id: Option<i32>) -> AppResult<Vec<Invoice>>;
    async fn update_invoice(&self, id: i64, update: &InvoiceUpdate) -> AppResult<Option<Invoice>>;
    /// Moves an unpaid invoice to paid. A paid invoice is returned untouched.
    async fn mark_invoice_paid(&self, id: i64) -> AppResult<Option<Invoice>>;
    /// Returns `false` when the invoice no longer exists.
    async fn set_document_ref(&self, id: i64, document_ref: &str) -> AppResult<bool>;
    async fn delete_invoice(&self, id: i64) -> AppResult<bool>;
    async fn sum_invoices(&self, user_id: Option<i32>) -> AppResult<Decimal>;
}

/// key: fulfillment-ledger -> one row per (invoice, job kind)
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Creates a pending row for `key`, or revives a dead one. Pending, running and
    /// succeeded rows are left untouched and reported back.
    async fn claim_job(&self, key: JobKey) -> AppResult<ClaimOutcome>;
    async fn get_job(&self, key: JobKey) -> AppResult<Option<JobRecord>>;
    async fn list_jobs(&self, statuses: &[JobStatus]) -> AppResult<Vec<JobRecord>>;
    /// Moves a pending row to running, bumps its attempt counter and stamps the
    /// lease. Returns `None` if the row is not pending (another runner owns it).
    async fn start_attempt(
        &self,
        key: JobKey,
        lease_until: DateTime<Utc>,
    ) -> AppResult<Option<JobRecord>>;
    /// Records the outcome of `attempt` and clears the lease. Returns `None` when
    /// the row is no longer running that attempt, i.e. the lease was lost.
    async fn finish_attempt(
        &self,
        key: JobKey,
        attempt: u32,
        status: JobStatus,
        last_error: Option<String>,
        at: DateTime<Utc>,
    ) -> AppResult<Option<JobRecord>>;
    /// Returns running rows whose lease ended before `now` to pending.
    async fn reclaim_expired(&self, now: DateTime<Utc>) -> AppResult<Vec<JobRecord>>;
}

/// Identity collaborator: where a user wants invoice notifications sent.
#[async_trait]
pub trait ContactDirectory: Send + Sync {
    async fn contact_address(&self, user_id: i32) -> AppResult<Option<String>>;
}

pub trait Store: ConsumptionStore + BillStore + InvoiceStore + JobStore + ContactDirectory {}

impl<T> Store for T where T: ConsumptionStore + BillStore + InvoiceStore + JobStore + ContactDirectory
{}
