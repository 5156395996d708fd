pub mod models;
pub mod service;

pub use models::{Bill, BillDraft, BillStatus, BillUpdate};
pub use service::BillingService;
