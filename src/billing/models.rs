use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// key: billing-models -> bills priced from consumption
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bill {
    pub id: i64,
    pub user_id: i32,
    pub date: NaiveDate,
    pub amount: Decimal,
    pub status: BillStatus,
    pub consumption_ids: Vec<i64>,
}

impl Bill {
    pub fn is_paid(&self) -> bool {
        self.status == BillStatus::Paid
    }
}

/// Payment status of a bill. Moves `unpaid -> paid` only.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BillStatus {
    #[default]
    Unpaid,
    Paid,
}

impl BillStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillStatus::Unpaid => "unpaid",
            BillStatus::Paid => "paid",
        }
    }

    pub fn from_str(value: &str) -> Self {
        match value {
            "paid" => BillStatus::Paid,
            _ => BillStatus::Unpaid,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BillDraft {
    pub user_id: i32,
    pub date: NaiveDate,
    pub amount: Decimal,
    pub status: BillStatus,
    pub consumption_ids: Vec<i64>,
}

/// Correctable bill fields. Status is deliberately absent: payment goes through
/// `BillingService::mark_paid`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BillUpdate {
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub amount: Option<Decimal>,
}

impl BillUpdate {
    pub fn is_empty(&self) -> bool {
        self.date.is_none() && self.amount.is_none()
    }
}
