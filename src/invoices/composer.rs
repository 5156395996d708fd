use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::fulfillment::{EnqueueOutcome, FulfillmentJob, FulfillmentQueue, JobKind};
use crate::identity::Actor;
use crate::store::Store;

use super::models::{
    ComposeInvoiceRequest, Invoice, InvoiceDraft, InvoiceLine, InvoiceUpdate, InvoiceView,
};

/// key: invoice-composer -> snapshot bills into invoices and dispatch fulfillment
#[derive(Clone)]
pub struct InvoiceComposer {
    store: Arc<dyn Store>,
    queue: Arc<dyn FulfillmentQueue>,
}

impl InvoiceComposer {
    pub fn new(store: Arc<dyn Store>, queue: Arc<dyn FulfillmentQueue>) -> Self {
        Self { store, queue }
    }

    /// Resolves every bill, snapshots it into a line and commits the invoice in
    /// one write. Fulfillment is dispatched after the commit; a dispatch failure
    /// is logged and left to the ledger replay, the caller still gets the invoice.
    pub async fn compose_invoice(
        &self,
        actor: &Actor,
        request: ComposeInvoiceRequest,
    ) -> AppResult<Invoice> {
        validate_period(request.billing_period_start, request.billing_period_end)?;
        let customer_id = request.customer_id.unwrap_or(actor.user_id);
        if customer_id != actor.user_id {
            actor.ensure_admin("composing an invoice for another user")?;
        }

        let mut seen = HashSet::new();
        let bill_ids: Vec<i64> = request
            .bill_ids
            .into_iter()
            .filter(|id| seen.insert(*id))
            .collect();
        if bill_ids.is_empty() {
            return Err(AppError::validation(
                "an invoice must reference at least one bill",
            ));
        }

        let mut lines = Vec::with_capacity(bill_ids.len());
        for bill_id in bill_ids {
            let bill = self
                .store
                .get_bill(bill_id)
                .await?
                .ok_or_else(|| AppError::not_found("bill", bill_id))?;
            if bill.user_id != customer_id {
                return Err(AppError::forbidden(format!(
                    "bill {bill_id} does not belong to user {customer_id}"
                )));
            }
            lines.push(InvoiceLine {
                bill_id: bill.id,
                bill_date: bill.date,
                amount: bill.amount,
            });
        }

        let draft = InvoiceDraft {
            user_id: customer_id,
            billing_period_start: request.billing_period_start,
            billing_period_end: request.billing_period_end,
            due_date: request.due_date,
            lines,
        };
        if draft.total_amount() <= Decimal::ZERO {
            return Err(AppError::validation("invoice total must be positive"));
        }

        let invoice = self.store.insert_invoice(draft).await?;
        info!(
            invoice_id = invoice.id,
            user_id = invoice.user_id,
            total = %invoice.total_amount,
            bills = invoice.lines.len(),
            due_date = %invoice.due_date,
            "invoice composed"
        );

        for job in [
            FulfillmentJob::render_document(invoice.id),
            FulfillmentJob::notify_ready(invoice.id),
        ] {
            if let Err(err) = self.queue.enqueue(job).await {
                warn!(
                    invoice_id = invoice.id,
                    kind = %job.kind,
                    %err,
                    "failed to dispatch fulfillment job"
                );
            }
        }

        Ok(invoice)
    }

    pub async fn get_invoice(
        &self,
        actor: &Actor,
        id: i64,
        now: DateTime<Utc>,
    ) -> AppResult<InvoiceView> {
        let invoice = self.fetch(id).await?;
        actor.ensure_owner_or_admin(invoice.user_id, "invoice", id)?;
        Ok(InvoiceView::at(invoice, now))
    }

    pub async fn list_for_user(
        &self,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<InvoiceView>> {
        let invoices = self.store.list_invoices(Some(actor.user_id)).await?;
        Ok(invoices
            .into_iter()
            .map(|invoice| InvoiceView::at(invoice, now))
            .collect())
    }

    pub async fn list_all(&self, actor: &Actor, now: DateTime<Utc>) -> AppResult<Vec<InvoiceView>> {
        actor.ensure_admin("listing all invoices")?;
        let invoices = self.store.list_invoices(None).await?;
        Ok(invoices
            .into_iter()
            .map(|invoice| InvoiceView::at(invoice, now))
            .collect())
    }

    pub async fn aggregate_for_user(&self, actor: &Actor) -> AppResult<Decimal> {
        self.store.sum_invoices(Some(actor.user_id)).await
    }

    /// Patches the period or due date. Totals and lines are fixed at composition.
    pub async fn update_invoice(
        &self,
        actor: &Actor,
        id: i64,
        update: InvoiceUpdate,
    ) -> AppResult<Invoice> {
        let invoice = self.fetch(id).await?;
        actor.ensure_owner_or_admin(invoice.user_id, "invoice", id)?;
        if update.is_empty() {
            return Ok(invoice);
        }
        validate_period(
            update
                .billing_period_start
                .unwrap_or(invoice.billing_period_start),
            update.billing_period_end.unwrap_or(invoice.billing_period_end),
        )?;

        let updated = self
            .store
            .update_invoice(id, &update)
            .await?
            .ok_or_else(|| AppError::not_found("invoice", id))?;
        info!(invoice_id = id, actor = actor.user_id, "invoice updated");
        Ok(updated)
    }

    /// Removes the invoice only. Its bills and job ledger rows stay.
    pub async fn delete_invoice(&self, actor: &Actor, id: i64) -> AppResult<bool> {
        let invoice = self.fetch(id).await?;
        actor.ensure_owner_or_admin(invoice.user_id, "invoice", id)?;
        let deleted = self.store.delete_invoice(id).await?;
        if deleted {
            info!(invoice_id = id, actor = actor.user_id, "invoice deleted");
        }
        Ok(deleted)
    }

    /// Operator path for dead jobs. Live or completed jobs are reported as such.
    pub async fn requeue_fulfillment(
        &self,
        actor: &Actor,
        id: i64,
    ) -> AppResult<Vec<(JobKind, EnqueueOutcome)>> {
        actor.ensure_admin("requeueing fulfillment")?;
        self.fetch(id).await?;

        let mut outcomes = Vec::with_capacity(2);
        for job in [
            FulfillmentJob::render_document(id),
            FulfillmentJob::notify_ready(id),
        ] {
            let outcome = self.queue.enqueue(job).await?;
            info!(invoice_id = id, kind = %job.kind, ?outcome, "fulfillment requeue requested");
            outcomes.push((job.kind, outcome));
        }
        Ok(outcomes)
    }

    async fn fetch(&self, id: i64) -> AppResult<Invoice> {
        self.store
            .get_invoice(id)
            .await?
            .ok_or_else(|| AppError::not_found("invoice", id))
    }
}

fn validate_period(start: NaiveDate, end: NaiveDate) -> AppResult<()> {
    if start > end {
        return Err(AppError::validation(format!(
            "billing period start {start} is after end {end}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_day_period_is_valid() {
        let day = NaiveDate::from_ymd_opt(2024, 1, 31).expect("date");
        assert!(validate_period(day, day).is_ok());
    }

    #[test]
    fn inverted_period_is_rejected() {
        let start = NaiveDate::from_ymd_opt(2024, 2, 1).expect("date");
        let end = NaiveDate::from_ymd_opt(2024, 1, 31).expect("date");
        assert!(matches!(
            validate_period(start, end),
            Err(AppError::Validation(_))
        ));
    }
}
