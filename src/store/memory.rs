use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;

use crate::billing::{Bill, BillDraft, BillStatus, BillUpdate};
use crate::consumption::models::ConsumptionDraft;
use crate::consumption::{ConsumptionRecord, ConsumptionUpdate};
use crate::error::AppResult;
use crate::fulfillment::{ClaimOutcome, JobKey, JobRecord, JobStatus};
use crate::invoices::{Invoice, InvoiceDraft, InvoiceStatus, InvoiceUpdate};

use super::{BillStore, ContactDirectory, ConsumptionStore, InvoiceStore, JobStore};

/// key: memory-store -> single-lock store for tests and local runs
///
/// Every method takes the lock once, so multi-row writes such as
/// `insert_invoice` commit as a unit just like the Postgres transaction.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    next_id: i64,
    contacts: HashMap<i32, String>,
    consumption: BTreeMap<i64, ConsumptionRecord>,
    bills: BTreeMap<i64, Bill>,
    invoices: BTreeMap<i64, Invoice>,
    jobs: HashMap<JobKey, JobRecord>,
}

impl MemoryState {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the contact address the identity service would hold for a user.
    pub async fn register_user(&self, user_id: i32, email: impl Into<String>) {
        self.state.lock().await.contacts.insert(user_id, email.into());
    }
}

fn newest_first<T, K: Ord>(mut rows: Vec<T>, key: impl Fn(&T) -> K) -> Vec<T> {
    rows.sort_by(|a, b| key(b).cmp(&key(a)));
    rows
}

#[async_trait]
impl ConsumptionStore for MemoryStore {
    async fn insert_consumption(&self, draft: ConsumptionDraft) -> AppResult<ConsumptionRecord> {
        let mut state = self.state.lock().await;
        let record = ConsumptionRecord {
            id: state.allocate_id(),
            user_id: draft.user_id,
            date: draft.date,
            quantity: draft.quantity,
            unit: draft.unit,
        };
        state.consumption.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_consumption(&self, id: i64) -> AppResult<Option<ConsumptionRecord>> {
        Ok(self.state.lock().await.consumption.get(&id).cloned())
    }

    async fn list_consumption(&self, user_id: Option<i32>) -> AppResult<Vec<ConsumptionRecord>> {
        let state = self.state.lock().await;
        let rows: Vec<ConsumptionRecord> = state
            .consumption
            .values()
            .filter(|record| user_id.map_or(true, |user| record.user_id == user))
            .cloned()
            .collect();
        Ok(newest_first(rows, |record| (record.date, record.id)))
    }

    async fn update_consumption(
        &self,
        id: i64,
        update: &ConsumptionUpdate,
    ) -> AppResult<Option<ConsumptionRecord>> {
        let mut state = self.state.lock().await;
        let Some(record) = state.consumption.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(date) = update.date {
            record.date = date;
        }
        if let Some(quantity) = update.quantity {
            record.quantity = quantity;
        }
        if let Some(unit) = &update.unit {
            record.unit = unit.clone();
        }
        Ok(Some(record.clone()))
    }

    async fn delete_consumption(&self, id: i64) -> AppResult<bool> {
        let mut state = self.state.lock().await;
        let removed = state.consumption.remove(&id).is_some();
        if removed {
            for bill in state.bills.values_mut() {
                bill.consumption_ids.retain(|consumption_id| *consumption_id != id);
            }
        }
        Ok(removed)
    }

    async fn sum_consumption(&self, user_id: Option<i32>) -> AppResult<Decimal> {
        let state = self.state.lock().await;
        Ok(state
            .consumption
            .values()
            .filter(|record| user_id.map_or(true, |user| record.user_id == user))
            .map(|record| record.quantity)
            .sum())
    }
}

#[async_trait]
impl BillStore for MemoryStore {
    async fn insert_bill(&self, draft: BillDraft) -> AppResult<Bill> {
        let mut state = self.state.lock().await;
        let bill = Bill {
            id: state.allocate_id(),
            user_id: draft.user_id,
            date: draft.date,
            amount: draft.amount,
            status: draft.status,
            consumption_ids: draft.consumption_ids,
        };
        state.bills.insert(bill.id, bill.clone());
        Ok(bill)
    }

    async fn get_bill(&self, id: i64) -> AppResult<Option<Bill>> {
        Ok(self.state.lock().await.bills.get(&id).cloned())
    }

    async fn list_bills(&self, user_id: Option<i32>) -> AppResult<Vec<Bill>> {
        let state = self.state.lock().await;
        let rows: Vec<Bill> = state
            .bills
            .values()
            .filter(|bill| user_id.map_or(true, |user| bill.user_id == user))
            .cloned()
            .collect();
        Ok(newest_first(rows, |bill| (bill.date, bill.id)))
    }

    async fn update_bill(&self, id: i64, update: &BillUpdate) -> AppResult<Option<Bill>> {
        let mut state = self.state.lock().await;
        let Some(bill) = state.bills.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(date) = update.date {
            bill.date = date;
        }
        if let Some(amount) = update.amount {
            bill.amount = amount;
        }
        Ok(Some(bill.clone()))
    }

    async fn mark_bill_paid(&self, id: i64) -> AppResult<Option<Bill>> {
        let mut state = self.state.lock().await;
        Ok(state.bills.get_mut(&id).map(|bill| {
            bill.status = BillStatus::Paid;
            bill.clone()
        }))
    }

    async fn delete_bill(&self, id: i64) -> AppResult<bool> {
        Ok(self.state.lock().await.bills.remove(&id).is_some())
    }

    async fn sum_bills(&self, user_id: Option<i32>) -> AppResult<Decimal> {
        let state = self.state.lock().await;
        Ok(state
            .bills
            .values()
            .filter(|bill| user_id.map_or(true, |user| bill.user_id == user))
            .map(|bill| bill.amount)
            .sum())
    }
}

#[async_trait]
impl InvoiceStore for MemoryStore {
    async fn insert_invoice(&self, draft: InvoiceDraft) -> AppResult<Invoice> {
        let mut state = self.state.lock().await;
        let invoice = Invoice {
            id: state.allocate_id(),
            user_id: draft.user_id,
            billing_period_start: draft.billing_period_start,
            billing_period_end: draft.billing_period_end,
            total_amount: draft.total_amount(),
            due_date: draft.due_date,
            status: InvoiceStatus::Unpaid,
            document_ref: None,
            created_at: Utc::now(),
            lines: draft.lines,
        };
        state.invoices.insert(invoice.id, invoice.clone());
        Ok(invoice)
    }

    async fn get_invoice(&self, id: i64) -> AppResult<Option<Invoice>> {
        Ok(self.state.lock().await.invoices.get(&id).cloned())
    }

    async fn list_invoices(&self, user_id: Option<i32>) -> AppResult<Vec<Invoice>> {
        let state = self.state.lock().await;
        let rows: Vec<Invoice> = state
            .invoices
            .values()
            .filter(|invoice| user_id.map_or(true, |user| invoice.user_id == user))
            .cloned()
            .collect();
        Ok(newest_first(rows, |invoice| (invoice.created_at, invoice.id)))
    }

    async fn update_invoice(&self, id: i64, update: &InvoiceUpdate) -> AppResult<Option<Invoice>> {
        let mut state = self.state.lock().await;
        let Some(invoice) = state.invoices.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(start) = update.billing_period_start {
            invoice.billing_period_start = start;
        }
        if let Some(end) = update.billing_period_end {
            invoice.billing_period_end = end;
        }
        if let Some(due_date) = update.due_date {
            invoice.due_date = due_date;
        }
        Ok(Some(invoice.clone()))
    }

    async fn mark_invoice_paid(&self, id: i64) -> AppResult<Option<Invoice>> {
        let mut state = self.state.lock().await;
        Ok(state.invoices.get_mut(&id).map(|invoice| {
            invoice.status = InvoiceStatus::Paid;
            invoice.clone()
        }))
    }

    async fn set_document_ref(&self, id: i64, document_ref: &str) -> AppResult<bool> {
        let mut state = self.state.lock().await;
        match state.invoices.get_mut(&id) {
            Some(invoice) => {
                invoice.document_ref = Some(document_ref.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_invoice(&self, id: i64) -> AppResult<bool> {
        Ok(self.state.lock().await.invoices.remove(&id).is_some())
    }

    async fn sum_invoices(&self, user_id: Option<i32>) -> AppResult<Decimal> {
        let state = self.state.lock().await;
        Ok(state
            .invoices
            .values()
            .filter(|invoice| user_id.map_or(true, |user| invoice.user_id == user))
            .map(|invoice| invoice.total_amount)
            .sum())
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn claim_job(&self, key: JobKey) -> AppResult<ClaimOutcome> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.jobs.get(&key) {
            match existing.status {
                JobStatus::Pending | JobStatus::Running => {
                    return Ok(ClaimOutcome::InFlight(existing.clone()))
                }
                JobStatus::Succeeded => return Ok(ClaimOutcome::Completed(existing.clone())),
                JobStatus::Dead => {}
            }
        }
        let record = JobRecord {
            invoice_id: key.invoice_id,
            kind: key.kind,
            status: JobStatus::Pending,
            attempt_count: 0,
            last_error: None,
            updated_at: Utc::now(),
            lease_expires_at: None,
        };
        state.jobs.insert(key, record.clone());
        Ok(ClaimOutcome::Claimed(record))
    }

    async fn get_job(&self, key: JobKey) -> AppResult<Option<JobRecord>> {
        Ok(self.state.lock().await.jobs.get(&key).cloned())
    }

    async fn list_jobs(&self, statuses: &[JobStatus]) -> AppResult<Vec<JobRecord>> {
        let state = self.state.lock().await;
        let mut rows: Vec<JobRecord> = state
            .jobs
            .values()
            .filter(|record| statuses.contains(&record.status))
            .cloned()
            .collect();
        rows.sort_by_key(|record| (record.updated_at, record.invoice_id));
        Ok(rows)
    }

    async fn start_attempt(
        &self,
        key: JobKey,
        lease_until: DateTime<Utc>,
    ) -> AppResult<Option<JobRecord>> {
        let mut state = self.state.lock().await;
        let Some(record) = state.jobs.get_mut(&key) else {
            return Ok(None);
        };
        if record.status != JobStatus::Pending {
            return Ok(None);
        }
        record.status = JobStatus::Running;
        record.attempt_count += 1;
        record.updated_at = Utc::now();
        record.lease_expires_at = Some(lease_until);
        Ok(Some(record.clone()))
    }

    async fn finish_attempt(
        &self,
        key: JobKey,
        attempt: u32,
        status: JobStatus,
        last_error: Option<String>,
        at: DateTime<Utc>,
    ) -> AppResult<Option<JobRecord>> {
        let mut state = self.state.lock().await;
        let Some(record) = state.jobs.get_mut(&key) else {
            return Ok(None);
        };
        if record.status != JobStatus::Running || record.attempt_count != attempt {
            return Ok(None);
        }
        record.status = status;
        if last_error.is_some() {
            record.last_error = last_error;
        }
        record.updated_at = at;
        record.lease_expires_at = None;
        Ok(Some(record.clone()))
    }

    async fn reclaim_expired(&self, now: DateTime<Utc>) -> AppResult<Vec<JobRecord>> {
        let mut state = self.state.lock().await;
        let mut reclaimed: Vec<JobRecord> = Vec::new();
        for record in state.jobs.values_mut() {
            if !record.lease_expired(now) {
                continue;
            }
            record.status = JobStatus::Pending;
            record.last_error = Some("attempt lease expired".to_string());
            record.updated_at = now;
            record.lease_expires_at = None;
            reclaimed.push(record.clone());
        }
        reclaimed.sort_by_key(|record| (record.updated_at, record.invoice_id));
        Ok(reclaimed)
    }
}

#[async_trait]
impl ContactDirectory for MemoryStore {
    async fn contact_address(&self, user_id: i32) -> AppResult<Option<String>> {
        Ok(self.state.lock().await.contacts.get(&user_id).cloned())
    }
}
