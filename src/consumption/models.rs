use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// key: consumption-model -> metered usage per user/date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumptionRecord {
    pub id: i64,
    pub user_id: i32,
    pub date: NaiveDate,
    pub quantity: Decimal,
    pub unit: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewConsumption {
    pub date: NaiveDate,
    pub quantity: Decimal,
    #[serde(default)]
    pub unit: Option<String>,
}

/// Fields an owner or admin may correct after the fact.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConsumptionUpdate {
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub quantity: Option<Decimal>,
    #[serde(default)]
    pub unit: Option<String>,
}

impl ConsumptionUpdate {
    pub fn is_empty(&self) -> bool {
        self.date.is_none() && self.quantity.is_none() && self.unit.is_none()
    }
}

/// Row handed to the store once the service has validated and normalised it.
#[derive(Debug, Clone)]
pub struct ConsumptionDraft {
    pub user_id: i32,
    pub date: NaiveDate,
    pub quantity: Decimal,
    pub unit: String,
}
