pub mod billing;
pub mod config;
pub mod consumption;
pub mod error;
pub mod fulfillment;
pub mod identity;
pub mod invoices;
pub mod settlement;
pub mod store;

pub use error::{AppError, AppResult};
pub use identity::Actor;
