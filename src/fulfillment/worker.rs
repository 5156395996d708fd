use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio::time::{self, sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::{self, FulfillmentSettings};
use crate::error::{AppError, AppResult};
use crate::store::Store;

use super::content_store::{ContentStore, MemoryContentStore};
use super::events::{FulfillmentEvents, TracingEvents};
use super::jobs::{ClaimOutcome, EnqueueOutcome, FulfillmentJob, JobKey, JobKind, JobRecord, JobStatus};
use super::notify::{InvoiceNotification, LogNotifier, Notifier};
use super::render::{DocumentRenderer, PlainTextRenderer};
use super::retry::RetryPolicy;

/// key: fulfillment-queue -> job submission seam injected into the composer
#[async_trait]
pub trait FulfillmentQueue: Send + Sync {
    /// Idempotent per `(invoice_id, kind)`: a live or finished job for the same
    /// key is reported, never duplicated or superseded.
    async fn enqueue(&self, job: FulfillmentJob) -> AppResult<EnqueueOutcome>;
}

/// key: fulfillment-worker -> in-process executor backed by the job ledger
#[derive(Clone)]
pub struct FulfillmentWorker {
    inner: Arc<WorkerInner>,
    sender: Sender<JobKey>,
}

struct WorkerInner {
    store: Arc<dyn Store>,
    renderer: Arc<dyn DocumentRenderer>,
    content: Arc<dyn ContentStore>,
    notifier: Arc<dyn Notifier>,
    events: Arc<dyn FulfillmentEvents>,
    retry: RetryPolicy,
    lease: Duration,
    from_address: String,
    // Keys with a task in this process, so replay scans never double-launch.
    active: DashMap<JobKey, ()>,
}

pub struct FulfillmentWorkerBuilder {
    store: Arc<dyn Store>,
    renderer: Arc<dyn DocumentRenderer>,
    content: Arc<dyn ContentStore>,
    notifier: Arc<dyn Notifier>,
    events: Arc<dyn FulfillmentEvents>,
    settings: FulfillmentSettings,
    from_address: String,
}

impl FulfillmentWorkerBuilder {
    pub fn renderer(mut self, renderer: Arc<dyn DocumentRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn content_store(mut self, content: Arc<dyn ContentStore>) -> Self {
        self.content = content;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn events(mut self, events: Arc<dyn FulfillmentEvents>) -> Self {
        self.events = events;
        self
    }

    pub fn settings(mut self, settings: FulfillmentSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.settings.retry = retry;
        self
    }

    pub fn lease(mut self, lease: Duration) -> Self {
        self.settings.lease = lease;
        self
    }

    pub fn from_address(mut self, from_address: impl Into<String>) -> Self {
        self.from_address = from_address.into();
        self
    }

    /// Starts the dispatcher and the ledger replay loop. Must be called inside a
    /// Tokio runtime.
    pub fn spawn(self) -> FulfillmentWorker {
        let (tx, rx): (Sender<JobKey>, Receiver<JobKey>) =
            channel(self.settings.queue_capacity.max(1));
        let inner = Arc::new(WorkerInner {
            store: self.store,
            renderer: self.renderer,
            content: self.content,
            notifier: self.notifier,
            events: self.events,
            retry: self.settings.retry,
            lease: self.settings.lease.max(Duration::from_millis(1)),
            from_address: self.from_address,
            active: DashMap::new(),
        });

        tokio::spawn(dispatch_loop(inner.clone(), rx));
        tokio::spawn(replay_loop(
            inner.clone(),
            tx.clone(),
            self.settings.replay_interval,
        ));

        FulfillmentWorker { inner, sender: tx }
    }
}

impl FulfillmentWorker {
    pub fn builder(store: Arc<dyn Store>) -> FulfillmentWorkerBuilder {
        FulfillmentWorkerBuilder {
            store,
            renderer: Arc::new(PlainTextRenderer),
            content: Arc::new(MemoryContentStore::new()),
            notifier: Arc::new(LogNotifier),
            events: Arc::new(TracingEvents),
            settings: FulfillmentSettings::default(),
            from_address: config::NOTIFY_FROM_ADDRESS.clone(),
        }
    }

    pub async fn job(&self, key: JobKey) -> AppResult<Option<JobRecord>> {
        self.inner.store.get_job(key).await
    }

    /// Jobs that hit the attempt ceiling or failed permanently.
    pub async fn dead_jobs(&self) -> AppResult<Vec<JobRecord>> {
        self.inner.store.list_jobs(&[JobStatus::Dead]).await
    }
}

#[async_trait]
impl FulfillmentQueue for FulfillmentWorker {
    async fn enqueue(&self, job: FulfillmentJob) -> AppResult<EnqueueOutcome> {
        let key = job.key();
        let claim = self.inner.store.claim_job(key).await?;
        let outcome = EnqueueOutcome::from(&claim);
        match claim {
            ClaimOutcome::Claimed(_) => {
                // The ledger row is durable; a closed channel only delays the job
                // until the next replay.
                if let Err(err) = self.sender.send(key).await {
                    warn!(%key, ?err, "fulfillment dispatcher unavailable; job left for replay");
                }
                debug!(%key, "fulfillment job accepted");
            }
            ClaimOutcome::InFlight(record) => {
                debug!(%key, status = record.status.as_str(), "fulfillment job already in flight");
            }
            ClaimOutcome::Completed(_) => {
                debug!(%key, "fulfillment job already completed");
            }
        }
        Ok(outcome)
    }
}

async fn dispatch_loop(inner: Arc<WorkerInner>, mut rx: Receiver<JobKey>) {
    while let Some(key) = rx.recv().await {
        if inner.active.insert(key, ()).is_some() {
            debug!(%key, "fulfillment job already running in this worker");
            continue;
        }
        let worker = inner.clone();
        tokio::spawn(async move {
            worker.run(key).await;
            worker.active.remove(&key);
        });
    }
}

async fn replay_loop(inner: Arc<WorkerInner>, tx: Sender<JobKey>, interval: Duration) {
    let mut ticker = time::interval(interval.max(Duration::from_millis(1)));
    loop {
        ticker.tick().await;
        // Running rows are only taken over once their owner's lease has lapsed,
        // so a live attempt in another process is never run twice.
        match inner.store.reclaim_expired(Utc::now()).await {
            Ok(rows) => {
                for row in rows {
                    info!(key = %row.key(), attempt = row.attempt_count, "reclaimed fulfillment job with expired lease");
                }
            }
            Err(err) => warn!(?err, "failed to reclaim expired fulfillment jobs"),
        }

        let pending = match inner.store.list_jobs(&[JobStatus::Pending]).await {
            Ok(rows) => rows,
            Err(err) => {
                warn!(?err, "fulfillment replay scan failed");
                continue;
            }
        };
        for row in pending {
            let key = row.key();
            if inner.active.contains_key(&key) {
                continue;
            }
            if tx.send(key).await.is_err() {
                return;
            }
        }
    }
}

impl WorkerInner {
    async fn run(&self, key: JobKey) {
        loop {
            // The attempt must end before the lease another worker would wait out.
            let deadline = Instant::now() + self.lease;
            let lease_until = Utc::now() + self.lease_span();
            let record = match self.store.start_attempt(key, lease_until).await {
                Ok(Some(record)) => record,
                Ok(None) => {
                    debug!(%key, "fulfillment job no longer pending; skipping");
                    return;
                }
                Err(err) => {
                    warn!(%key, ?err, "failed to start fulfillment attempt");
                    return;
                }
            };
            let attempt = record.attempt_count;

            let outcome = match time::timeout_at(deadline, self.execute(key)).await {
                Ok(result) => result,
                Err(_) => Err(AppError::TransientJob(format!(
                    "attempt exceeded its {}ms lease",
                    self.lease.as_millis()
                ))),
            };

            match outcome {
                Ok(()) => {
                    if self
                        .finish(key, attempt, JobStatus::Succeeded, None)
                        .await
                        .is_some()
                    {
                        info!(%key, attempt, "fulfillment job succeeded");
                    }
                    return;
                }
                Err(err) if err.is_retryable() && !self.retry.exhausted(attempt) => {
                    let delay = self.retry.delay_after(attempt);
                    warn!(
                        %key,
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        %err,
                        "fulfillment attempt failed; retrying"
                    );
                    if self
                        .finish(key, attempt, JobStatus::Pending, Some(err.to_string()))
                        .await
                        .is_none()
                    {
                        return;
                    }
                    sleep(delay).await;
                }
                Err(err) => {
                    let reason = match err {
                        AppError::PermanentJob { reason, .. } => reason,
                        other => other.to_string(),
                    };
                    let failure = AppError::PermanentJob {
                        attempts: attempt,
                        reason: reason.clone(),
                    };
                    let dead = self
                        .finish(key, attempt, JobStatus::Dead, Some(failure.to_string()))
                        .await;
                    if let Some(record) = dead {
                        self.events.on_job_dead(&record).await;
                    }
                    if key.kind == JobKind::NotifyReady {
                        self.events.on_notify_failed(key.invoice_id, &reason).await;
                    }
                    return;
                }
            }
        }
    }

    fn lease_span(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.lease).unwrap_or_else(|_| chrono::Duration::seconds(300))
    }

    /// Records an attempt outcome, retrying store failures on the job's backoff.
    /// `None` means the outcome was not recorded: either the lease was lost to
    /// another worker or the ledger stayed unreachable, in which case the row is
    /// reclaimed once its lease expires.
    async fn finish(
        &self,
        key: JobKey,
        attempt: u32,
        status: JobStatus,
        last_error: Option<String>,
    ) -> Option<JobRecord> {
        let mut tries = 0;
        loop {
            tries += 1;
            match self
                .store
                .finish_attempt(key, attempt, status, last_error.clone(), Utc::now())
                .await
            {
                Ok(Some(record)) => return Some(record),
                Ok(None) => {
                    warn!(%key, attempt, status = status.as_str(), "fulfillment lease lost before outcome was recorded");
                    return None;
                }
                Err(err) if !self.retry.exhausted(tries) => {
                    let delay = self.retry.delay_after(tries);
                    warn!(
                        %key,
                        status = status.as_str(),
                        tries,
                        retry_in_ms = delay.as_millis() as u64,
                        ?err,
                        "failed to record fulfillment outcome; retrying"
                    );
                    sleep(delay).await;
                }
                Err(err) => {
                    warn!(%key, status = status.as_str(), tries, ?err, "giving up on fulfillment outcome; lease expiry will reclaim the job");
                    return None;
                }
            }
        }
    }

    async fn execute(&self, key: JobKey) -> AppResult<()> {
        match key.kind {
            JobKind::RenderDocument => self.render_document(key.invoice_id).await,
            JobKind::NotifyReady => self.notify_ready(key.invoice_id).await,
        }
    }

    async fn render_document(&self, invoice_id: i64) -> AppResult<()> {
        let invoice = self
            .store
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| AppError::not_found("invoice", invoice_id))?;
        if let Some(existing) = invoice.document_ref.as_deref() {
            debug!(%invoice_id, document_ref = %existing, "invoice already has a document");
            return Ok(());
        }

        let document = self.renderer.render(&invoice).await?;
        let stored = self.content.put(invoice_id, &document).await?;
        if !self
            .store
            .set_document_ref(invoice_id, &stored.reference)
            .await?
        {
            return Err(AppError::not_found("invoice", invoice_id));
        }
        debug!(
            %invoice_id,
            document_ref = %stored.reference,
            sha256 = %stored.sha256,
            size = stored.size,
            "invoice document stored"
        );
        self.events
            .on_document_rendered(invoice_id, &stored.reference)
            .await;
        Ok(())
    }

    async fn notify_ready(&self, invoice_id: i64) -> AppResult<()> {
        let invoice = self
            .store
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| AppError::not_found("invoice", invoice_id))?;
        let address = self
            .store
            .contact_address(invoice.user_id)
            .await?
            .ok_or_else(|| {
                AppError::validation(format!(
                    "user {} has no registered contact address",
                    invoice.user_id
                ))
            })?;
        let notification =
            InvoiceNotification::invoice_ready(invoice_id, &self.from_address, &address);
        self.notifier.send(&notification).await
    }
}
