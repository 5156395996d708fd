#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use energy_billing::billing::{Bill, BillDraft, BillUpdate};
use energy_billing::consumption::models::ConsumptionDraft;
use energy_billing::consumption::{ConsumptionRecord, ConsumptionUpdate};
use energy_billing::error::{AppError, AppResult};
use energy_billing::fulfillment::{
    ClaimOutcome, DocumentRenderer, EnqueueOutcome, FulfillmentEvents, FulfillmentJob,
    FulfillmentQueue, FulfillmentWorker, InvoiceNotification, JobKey, JobRecord, JobStatus,
    Notifier, PlainTextRenderer, RenderedDocument, RetryPolicy,
};
use energy_billing::invoices::{Invoice, InvoiceDraft, InvoiceUpdate};
use energy_billing::store::{
    BillStore, ConsumptionStore, ContactDirectory, InvoiceStore, JobStore, MemoryStore,
};

pub fn date(value: &str) -> NaiveDate {
    value.parse().expect("valid date")
}

pub fn at(value: &str) -> DateTime<Utc> {
    value.parse().expect("valid timestamp")
}

pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
    }
}

/// Queue double that records submissions without running anything.
#[derive(Default)]
pub struct RecordingQueue {
    jobs: Mutex<Vec<FulfillmentJob>>,
    fail: bool,
}

impl RecordingQueue {
    pub fn failing() -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn jobs(&self) -> Vec<FulfillmentJob> {
        self.jobs.lock().unwrap().clone()
    }
}

#[async_trait]
impl FulfillmentQueue for RecordingQueue {
    async fn enqueue(&self, job: FulfillmentJob) -> AppResult<EnqueueOutcome> {
        self.jobs.lock().unwrap().push(job);
        if self.fail {
            return Err(AppError::TransientJob("queue offline".into()));
        }
        Ok(EnqueueOutcome::Accepted)
    }
}

/// Fails the first `failures` renders with a transient error, then renders normally.
pub struct FlakyRenderer {
    failures: usize,
    calls: AtomicUsize,
}

impl FlakyRenderer {
    pub fn failing_first(failures: usize) -> Self {
        Self {
            failures,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn always_failing() -> Self {
        Self::failing_first(usize::MAX)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentRenderer for FlakyRenderer {
    async fn render(&self, invoice: &Invoice) -> AppResult<RenderedDocument> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(AppError::TransientJob("renderer timeout".into()));
        }
        PlainTextRenderer.render(invoice).await
    }
}

/// Blocks every render until released, so a job can be observed mid-flight.
pub struct GatedRenderer {
    gate: tokio::sync::Semaphore,
    calls: AtomicUsize,
}

impl GatedRenderer {
    pub fn closed() -> Self {
        Self {
            gate: tokio::sync::Semaphore::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn release(&self) {
        self.gate.add_permits(1_000);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentRenderer for GatedRenderer {
    async fn render(&self, invoice: &Invoice) -> AppResult<RenderedDocument> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|err| AppError::TransientJob(err.to_string()))?;
        PlainTextRenderer.render(invoice).await
    }
}

pub enum NotifyBehaviour {
    Deliver,
    Reject,
}

pub struct RecordingNotifier {
    behaviour: NotifyBehaviour,
    sent: Mutex<Vec<InvoiceNotification>>,
}

impl RecordingNotifier {
    pub fn delivering() -> Self {
        Self {
            behaviour: NotifyBehaviour::Deliver,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn rejecting() -> Self {
        Self {
            behaviour: NotifyBehaviour::Reject,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<InvoiceNotification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &InvoiceNotification) -> AppResult<()> {
        match self.behaviour {
            NotifyBehaviour::Deliver => {
                self.sent.lock().unwrap().push(notification.clone());
                Ok(())
            }
            NotifyBehaviour::Reject => Err(AppError::PermanentJob {
                attempts: 1,
                reason: "mailbox does not exist".into(),
            }),
        }
    }
}

#[derive(Default)]
pub struct RecordingEvents {
    pub rendered: Mutex<Vec<(i64, String)>>,
    pub notify_failed: Mutex<Vec<(i64, String)>>,
    pub dead: Mutex<Vec<JobRecord>>,
}

#[async_trait]
impl FulfillmentEvents for RecordingEvents {
    async fn on_document_rendered(&self, invoice_id: i64, document_ref: &str) {
        self.rendered
            .lock()
            .unwrap()
            .push((invoice_id, document_ref.to_string()));
    }

    async fn on_notify_failed(&self, invoice_id: i64, reason: &str) {
        self.notify_failed
            .lock()
            .unwrap()
            .push((invoice_id, reason.to_string()));
    }

    async fn on_job_dead(&self, record: &JobRecord) {
        self.dead.lock().unwrap().push(record.clone());
    }
}

/// Polls the ledger until the job reaches `status`, panicking after five seconds.
pub async fn wait_for_status(
    worker: &FulfillmentWorker,
    key: JobKey,
    status: JobStatus,
) -> JobRecord {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(record) = worker.job(key).await.expect("job lookup") {
            if record.status == status {
                return record;
            }
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("job {key} never reached {}", status.as_str());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Waits until `condition` holds, panicking after five seconds.
pub async fn eventually<F>(what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Ledger wrapper whose first `failures` outcome writes fail like a dropped
/// database connection. Everything else goes straight to the inner store.
pub struct FlakyLedger {
    inner: Arc<MemoryStore>,
    failures: usize,
    finish_calls: AtomicUsize,
}

impl FlakyLedger {
    pub fn failing_first_finish(inner: Arc<MemoryStore>, failures: usize) -> Self {
        Self {
            inner,
            failures,
            finish_calls: AtomicUsize::new(0),
        }
    }

    pub fn finish_calls(&self) -> usize {
        self.finish_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConsumptionStore for FlakyLedger {
    async fn insert_consumption(&self, draft: ConsumptionDraft) -> AppResult<ConsumptionRecord> {
        self.inner.insert_consumption(draft).await
    }

    async fn get_consumption(&self, id: i64) -> AppResult<Option<ConsumptionRecord>> {
        self.inner.get_consumption(id).await
    }

    async fn list_consumption(&self, user_id: Option<i32>) -> AppResult<Vec<ConsumptionRecord>> {
        self.inner.list_consumption(user_id).await
    }

    async fn update_consumption(
        &self,
        id: i64,
        update: &ConsumptionUpdate,
    ) -> AppResult<Option<ConsumptionRecord>> {
        self.inner.update_consumption(id, update).await
    }

    async fn delete_consumption(&self, id: i64) -> AppResult<bool> {
        self.inner.delete_consumption(id).await
    }

    async fn sum_consumption(&self, user_id: Option<i32>) -> AppResult<Decimal> {
        self.inner.sum_consumption(user_id).await
    }
}

#[async_trait]
impl BillStore for FlakyLedger {
    async fn insert_bill(&self, draft: BillDraft) -> AppResult<Bill> {
        self.inner.insert_bill(draft).await
    }

    async fn get_bill(&self, id: i64) -> AppResult<Option<Bill>> {
        self.inner.get_bill(id).await
    }

    async fn list_bills(&self, user_id: Option<i32>) -> AppResult<Vec<Bill>> {
        self.inner.list_bills(user_id).await
    }

    async fn update_bill(&self, id: i64, update: &BillUpdate) -> AppResult<Option<Bill>> {
        self.inner.update_bill(id, update).await
    }

    async fn mark_bill_paid(&self, id: i64) -> AppResult<Option<Bill>> {
        self.inner.mark_bill_paid(id).await
    }

    async fn delete_bill(&self, id: i64) -> AppResult<bool> {
        self.inner.delete_bill(id).await
    }

    async fn sum_bills(&self, user_id: Option<i32>) -> AppResult<Decimal> {
        self.inner.sum_bills(user_id).await
    }
}

#[async_trait]
impl InvoiceStore for FlakyLedger {
    async fn insert_invoice(&self, draft: InvoiceDraft) -> AppResult<Invoice> {
        self.inner.insert_invoice(draft).await
    }

    async fn get_invoice(&self, id: i64) -> AppResult<Option<Invoice>> {
        self.inner.get_invoice(id).await
    }

    async fn list_invoices(&self, user_id: Option<i32>) -> AppResult<Vec<Invoice>> {
        self.inner.list_invoices(user_id).await
    }

    async fn update_invoice(&self, id: i64, update: &InvoiceUpdate) -> AppResult<Option<Invoice>> {
        self.inner.update_invoice(id, update).await
    }

    async fn mark_invoice_paid(&self, id: i64) -> AppResult<Option<Invoice>> {
        self.inner.mark_invoice_paid(id).await
    }

    async fn set_document_ref(&self, id: i64, document_ref: &str) -> AppResult<bool> {
        self.inner.set_document_ref(id, document_ref).await
    }

    async fn delete_invoice(&self, id: i64) -> AppResult<bool> {
        self.inner.delete_invoice(id).await
    }

    async fn sum_invoices(&self, user_id: Option<i32>) -> AppResult<Decimal> {
        self.inner.sum_invoices(user_id).await
    }
}

#[async_trait]
impl JobStore for FlakyLedger {
    async fn claim_job(&self, key: JobKey) -> AppResult<ClaimOutcome> {
        self.inner.claim_job(key).await
    }

    async fn get_job(&self, key: JobKey) -> AppResult<Option<JobRecord>> {
        self.inner.get_job(key).await
    }

    async fn list_jobs(&self, statuses: &[JobStatus]) -> AppResult<Vec<JobRecord>> {
        self.inner.list_jobs(statuses).await
    }

    async fn start_attempt(
        &self,
        key: JobKey,
        lease_until: DateTime<Utc>,
    ) -> AppResult<Option<JobRecord>> {
        self.inner.start_attempt(key, lease_until).await
    }

    async fn finish_attempt(
        &self,
        key: JobKey,
        attempt: u32,
        status: JobStatus,
        last_error: Option<String>,
        at: DateTime<Utc>,
    ) -> AppResult<Option<JobRecord>> {
        let call = self.finish_calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(AppError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "ledger connection reset",
            )));
        }
        self.inner
            .finish_attempt(key, attempt, status, last_error, at)
            .await
    }

    async fn reclaim_expired(&self, now: DateTime<Utc>) -> AppResult<Vec<JobRecord>> {
        self.inner.reclaim_expired(now).await
    }
}

#[async_trait]
impl ContactDirectory for FlakyLedger {
    async fn contact_address(&self, user_id: i32) -> AppResult<Option<String>> {
        self.inner.contact_address(user_id).await
    }
}
