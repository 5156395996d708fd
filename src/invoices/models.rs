use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::settlement::{self, EffectiveStatus};

/// key: invoice-model -> billing period bundle with a snapshot total
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: i64,
    pub user_id: i32,
    pub billing_period_start: NaiveDate,
    pub billing_period_end: NaiveDate,
    pub total_amount: Decimal,
    pub due_date: NaiveDate,
    pub status: InvoiceStatus,
    pub document_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub lines: Vec<InvoiceLine>,
}

impl Invoice {
    pub fn bill_ids(&self) -> Vec<i64> {
        self.lines.iter().map(|line| line.bill_id).collect()
    }

    pub fn effective_status(&self, now: DateTime<Utc>) -> EffectiveStatus {
        settlement::effective_status(self.status, self.due_date, now)
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        settlement::is_overdue(self.status, self.due_date, now)
    }
}

/// Bill amount as it stood when the invoice was composed. Later edits to the
/// bill never flow back into the invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub bill_id: i64,
    pub bill_date: NaiveDate,
    pub amount: Decimal,
}

/// Persisted invoice status. Overdue is never stored; see `settlement`.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    #[default]
    Unpaid,
    Paid,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Unpaid => "unpaid",
            InvoiceStatus::Paid => "paid",
        }
    }

    /// Legacy rows may carry `overdue`; that was only ever a cached view of `unpaid`.
    pub fn from_str(value: &str) -> Self {
        match value {
            "paid" => InvoiceStatus::Paid,
            _ => InvoiceStatus::Unpaid,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ComposeInvoiceRequest {
    pub billing_period_start: NaiveDate,
    pub billing_period_end: NaiveDate,
    pub due_date: NaiveDate,
    pub bill_ids: Vec<i64>,
    /// Customer the invoice is issued to. Defaults to the caller; only an admin
    /// may name someone else.
    #[serde(default)]
    pub customer_id: Option<i32>,
}

/// Validated invoice ready for the atomic insert.
#[derive(Debug, Clone)]
pub struct InvoiceDraft {
    pub user_id: i32,
    pub billing_period_start: NaiveDate,
    pub billing_period_end: NaiveDate,
    pub due_date: NaiveDate,
    pub lines: Vec<InvoiceLine>,
}

impl InvoiceDraft {
    pub fn total_amount(&self) -> Decimal {
        self.lines.iter().map(|line| line.amount).sum()
    }
}

/// The only invoice fields callers may patch. Totals, bill lines, status and the
/// document reference each have their own write path.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvoiceUpdate {
    #[serde(default)]
    pub billing_period_start: Option<NaiveDate>,
    #[serde(default)]
    pub billing_period_end: Option<NaiveDate>,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
}

impl InvoiceUpdate {
    pub fn is_empty(&self) -> bool {
        self.billing_period_start.is_none()
            && self.billing_period_end.is_none()
            && self.due_date.is_none()
    }
}

/// Read model returned to callers, with the overdue view computed for `now`.
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceView {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub effective_status: EffectiveStatus,
    pub is_overdue: bool,
}

impl InvoiceView {
    pub fn at(invoice: Invoice, now: DateTime<Utc>) -> Self {
        let effective_status = invoice.effective_status(now);
        Self {
            is_overdue: effective_status == EffectiveStatus::Overdue,
            effective_status,
            invoice,
        }
    }
}
