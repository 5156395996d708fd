//! Consumption ledger: per-user usage observations that bills are priced from.

pub mod models;
pub mod service;

pub use models::{ConsumptionRecord, ConsumptionUpdate, NewConsumption};
pub use service::ConsumptionService;
