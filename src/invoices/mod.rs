//! Invoice composition: snapshot a user's bills into an invoice and hand the
//! rendering and notification work to the fulfillment queue.

pub mod composer;
pub mod models;

pub use composer::InvoiceComposer;
pub use models::{
    ComposeInvoiceRequest, Invoice, InvoiceDraft, InvoiceLine, InvoiceStatus, InvoiceUpdate,
    InvoiceView,
};
