use async_trait::async_trait;
use bytes::Bytes;
use std::fmt::Write as _;

use crate::error::{AppError, AppResult};
use crate::invoices::Invoice;

#[derive(Debug, Clone)]
pub struct RenderedDocument {
    pub content_type: &'static str,
    pub extension: &'static str,
    pub body: Bytes,
}

/// key: fulfillment-render -> invoice snapshot to document bytes
#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    async fn render(&self, invoice: &Invoice) -> AppResult<RenderedDocument>;
}

/// Fixed plain-text invoice layout built only from the invoice snapshot.
#[derive(Debug, Clone, Default)]
pub struct PlainTextRenderer;

#[async_trait]
impl DocumentRenderer for PlainTextRenderer {
    async fn render(&self, invoice: &Invoice) -> AppResult<RenderedDocument> {
        let mut out = String::new();
        write_document(&mut out, invoice)
            .map_err(|err| AppError::TransientJob(format!("document layout failed: {err}")))?;
        Ok(RenderedDocument {
            content_type: "text/plain; charset=utf-8",
            extension: "txt",
            body: Bytes::from(out),
        })
    }
}

fn write_document(out: &mut String, invoice: &Invoice) -> std::fmt::Result {
    writeln!(out, "INVOICE #{}", invoice.id)?;
    writeln!(out, "Customer: {}", invoice.user_id)?;
    writeln!(
        out,
        "Billing period: {} to {}",
        invoice.billing_period_start, invoice.billing_period_end
    )?;
    writeln!(out, "Issued: {}", invoice.created_at.format("%Y-%m-%d"))?;
    writeln!(out, "Due: {}", invoice.due_date)?;
    writeln!(out)?;
    writeln!(out, "{:<12} {:<12} {:>14}", "Bill", "Date", "Amount")?;
    for line in &invoice.lines {
        writeln!(
            out,
            "{:<12} {:<12} {:>14}",
            line.bill_id,
            line.bill_date,
            format!("{:.2}", line.amount)
        )?;
    }
    writeln!(out)?;
    writeln!(out, "{:<25} {:>14}", "TOTAL", format!("{:.2}", invoice.total_amount))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoices::{InvoiceLine, InvoiceStatus};
    use chrono::{NaiveDate, TimeZone, Utc};
    use rust_decimal::Decimal;

    fn sample_invoice() -> Invoice {
        let date = |s: &str| s.parse::<NaiveDate>().unwrap();
        Invoice {
            id: 17,
            user_id: 4,
            billing_period_start: date("2024-01-01"),
            billing_period_end: date("2024-01-31"),
            total_amount: Decimal::new(10000, 2),
            due_date: date("2024-02-10"),
            status: InvoiceStatus::Unpaid,
            document_ref: None,
            created_at: Utc.with_ymd_and_hms(2024, 2, 1, 8, 0, 0).unwrap(),
            lines: vec![
                InvoiceLine {
                    bill_id: 1,
                    bill_date: date("2024-01-05"),
                    amount: Decimal::new(4000, 2),
                },
                InvoiceLine {
                    bill_id: 2,
                    bill_date: date("2024-01-20"),
                    amount: Decimal::new(6000, 2),
                },
            ],
        }
    }

    #[tokio::test]
    async fn document_lists_every_snapshot_line_and_the_total() {
        let rendered = PlainTextRenderer.render(&sample_invoice()).await.unwrap();
        let text = String::from_utf8(rendered.body.to_vec()).unwrap();

        assert!(text.starts_with("INVOICE #17\n"));
        assert!(text.contains("Billing period: 2024-01-01 to 2024-01-31"));
        assert!(text.contains("Due: 2024-02-10"));
        assert!(text.contains("2024-01-05"));
        assert!(text.contains("40.00"));
        assert!(text.contains("60.00"));
        assert!(text.lines().last().unwrap().ends_with("100.00"));
        assert_eq!(rendered.extension, "txt");
    }
}
