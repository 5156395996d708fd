//! Invoice settlement. Stored status only moves `unpaid -> paid`; overdue is a
//! read-time view recomputed from `(status, due_date, now)` on every read.
//!
//! Dates are compared on the UTC calendar: an unpaid invoice reads as overdue
//! for the whole of its due date and every day after.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::identity::Actor;
use crate::invoices::{InvoiceStatus, InvoiceView};
use crate::store::Store;

/// Status as presented to readers.
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EffectiveStatus {
    Unpaid,
    Paid,
    Overdue,
}

impl EffectiveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EffectiveStatus::Unpaid => "unpaid",
            EffectiveStatus::Paid => "paid",
            EffectiveStatus::Overdue => "overdue",
        }
    }
}

/// Result of applying a payment confirmation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaymentTransition {
    Applied,
    AlreadyPaid,
}

pub fn is_overdue(status: InvoiceStatus, due_date: NaiveDate, now: DateTime<Utc>) -> bool {
    status == InvoiceStatus::Unpaid && due_date <= now.date_naive()
}

pub fn effective_status(
    status: InvoiceStatus,
    due_date: NaiveDate,
    now: DateTime<Utc>,
) -> EffectiveStatus {
    match status {
        InvoiceStatus::Paid => EffectiveStatus::Paid,
        InvoiceStatus::Unpaid if is_overdue(status, due_date, now) => EffectiveStatus::Overdue,
        InvoiceStatus::Unpaid => EffectiveStatus::Unpaid,
    }
}

/// There is no edge out of `paid`, so a repeat confirmation is reported rather
/// than rejected.
pub fn apply_payment(status: InvoiceStatus) -> (InvoiceStatus, PaymentTransition) {
    match status {
        InvoiceStatus::Unpaid => (InvoiceStatus::Paid, PaymentTransition::Applied),
        InvoiceStatus::Paid => (InvoiceStatus::Paid, PaymentTransition::AlreadyPaid),
    }
}

/// key: settlement-service -> payment confirmation path
#[derive(Clone)]
pub struct SettlementService {
    store: Arc<dyn Store>,
}

impl SettlementService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn confirm_payment(
        &self,
        actor: &Actor,
        invoice_id: i64,
        now: DateTime<Utc>,
    ) -> AppResult<InvoiceView> {
        let invoice = self
            .store
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| AppError::not_found("invoice", invoice_id))?;
        actor.ensure_owner_or_admin(invoice.user_id, "invoice", invoice_id)?;

        let (_, transition) = apply_payment(invoice.status);
        if transition == PaymentTransition::AlreadyPaid {
            return Ok(InvoiceView::at(invoice, now));
        }

        let paid = self
            .store
            .mark_invoice_paid(invoice_id)
            .await?
            .ok_or_else(|| AppError::not_found("invoice", invoice_id))?;
        info!(
            %invoice_id,
            user_id = paid.user_id,
            total = %paid.total_amount,
            "invoice payment confirmed"
        );
        Ok(InvoiceView::at(paid, now))
    }
}
