use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::HashMap;

use crate::billing::{Bill, BillDraft, BillStatus, BillUpdate};
use crate::consumption::models::ConsumptionDraft;
use crate::consumption::{ConsumptionRecord, ConsumptionUpdate};
use crate::error::{AppError, AppResult};
use crate::fulfillment::{ClaimOutcome, JobKey, JobKind, JobRecord, JobStatus};
use crate::invoices::{Invoice, InvoiceDraft, InvoiceLine, InvoiceStatus, InvoiceUpdate};

use super::{BillStore, ContactDirectory, ConsumptionStore, InvoiceStore, JobStore};

/// key: pg-store -> sqlx-backed persistence for the worker tier
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn attach_lines(&self, rows: Vec<PgRow>) -> AppResult<Vec<Invoice>> {
        let ids: Vec<i64> = rows.iter().map(|row| row.get("id")).collect();
        let line_rows = sqlx::query(
            r#"
            SELECT invoice_id, bill_id, bill_date, amount
            FROM invoice_lines
            WHERE invoice_id = ANY($1)
            ORDER BY invoice_id, position
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut lines: HashMap<i64, Vec<InvoiceLine>> = HashMap::new();
        for row in line_rows {
            lines
                .entry(row.get("invoice_id"))
                .or_default()
                .push(InvoiceLine {
                    bill_id: row.get("bill_id"),
                    bill_date: row.get("bill_date"),
                    amount: row.get("amount"),
                });
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let id: i64 = row.get("id");
                invoice_from_row(&row, lines.remove(&id).unwrap_or_default())
            })
            .collect())
    }

    async fn fetch_invoice(&self, id: i64) -> AppResult<Option<Invoice>> {
        let row = sqlx::query(&format!("{INVOICE_SELECT} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(self.attach_lines(vec![row]).await?.pop())
    }

    async fn fetch_bill(&self, id: i64) -> AppResult<Option<Bill>> {
        let row = sqlx::query(&format!("{BILL_SELECT} WHERE b.id = $1 GROUP BY b.id"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(bill_from_row))
    }
}

const BILL_SELECT: &str = r#"
    SELECT
        b.id,
        b.user_id,
        b.date,
        b.amount,
        b.status,
        COALESCE(
            array_agg(bc.consumption_id ORDER BY bc.consumption_id)
                FILTER (WHERE bc.consumption_id IS NOT NULL),
            '{}'
        ) AS consumption_ids
    FROM bills b
    LEFT JOIN bill_consumption bc ON bc.bill_id = b.id
"#;

const INVOICE_SELECT: &str = r#"
    SELECT
        id,
        user_id,
        billing_period_start,
        billing_period_end,
        total_amount,
        due_date,
        status,
        document_ref,
        created_at
    FROM invoices
"#;

const JOB_COLUMNS: &str =
    "invoice_id, job_kind, status, attempt_count, last_error, updated_at, lease_expires_at";

fn consumption_from_row(row: &PgRow) -> ConsumptionRecord {
    ConsumptionRecord {
        id: row.get("id"),
        user_id: row.get("user_id"),
        date: row.get("date"),
        quantity: row.get("quantity"),
        unit: row.get("unit"),
    }
}

fn bill_from_row(row: &PgRow) -> Bill {
    let status: String = row.get("status");
    Bill {
        id: row.get("id"),
        user_id: row.get("user_id"),
        date: row.get("date"),
        amount: row.get("amount"),
        status: BillStatus::from_str(&status),
        consumption_ids: row.get("consumption_ids"),
    }
}

fn invoice_from_row(row: &PgRow, lines: Vec<InvoiceLine>) -> Invoice {
    let status: String = row.get("status");
    Invoice {
        id: row.get("id"),
        user_id: row.get("user_id"),
        billing_period_start: row.get("billing_period_start"),
        billing_period_end: row.get("billing_period_end"),
        total_amount: row.get("total_amount"),
        due_date: row.get("due_date"),
        status: InvoiceStatus::from_str(&status),
        document_ref: row.get("document_ref"),
        created_at: row.get("created_at"),
        lines,
    }
}

fn job_from_row(row: &PgRow) -> AppResult<JobRecord> {
    let kind: String = row.get("job_kind");
    let status: String = row.get("status");
    let attempt_count: i32 = row.get("attempt_count");
    Ok(JobRecord {
        invoice_id: row.get("invoice_id"),
        kind: JobKind::from_str(&kind)
            .ok_or_else(|| AppError::validation(format!("unknown job kind `{kind}`")))?,
        status: JobStatus::from_str(&status),
        attempt_count: attempt_count.max(0) as u32,
        last_error: row.get("last_error"),
        updated_at: row.get("updated_at"),
        lease_expires_at: row.get("lease_expires_at"),
    })
}

#[async_trait]
impl ConsumptionStore for PgStore {
    async fn insert_consumption(&self, draft: ConsumptionDraft) -> AppResult<ConsumptionRecord> {
        let row = sqlx::query(
            r#"
            INSERT INTO consumption_records (user_id, date, quantity, unit)
            VALUES ($1, $2, $3, $4)
            RETURNING id, user_id, date, quantity, unit
            "#,
        )
        .bind(draft.user_id)
        .bind(draft.date)
        .bind(draft.quantity)
        .bind(&draft.unit)
        .fetch_one(&self.pool)
        .await?;
        Ok(consumption_from_row(&row))
    }

    async fn get_consumption(&self, id: i64) -> AppResult<Option<ConsumptionRecord>> {
        let row = sqlx::query(
            "SELECT id, user_id, date, quantity, unit FROM consumption_records WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(consumption_from_row))
    }

    async fn list_consumption(&self, user_id: Option<i32>) -> AppResult<Vec<ConsumptionRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, date, quantity, unit
            FROM consumption_records
            WHERE $1::INTEGER IS NULL OR user_id = $1
            ORDER BY date DESC, id DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(consumption_from_row).collect())
    }

    async fn update_consumption(
        &self,
        id: i64,
        update: &ConsumptionUpdate,
    ) -> AppResult<Option<ConsumptionRecord>> {
        let row = sqlx::query(
            r#"
            UPDATE consumption_records
            SET date = COALESCE($2, date),
                quantity = COALESCE($3, quantity),
                unit = COALESCE($4, unit)
            WHERE id = $1
            RETURNING id, user_id, date, quantity, unit
            "#,
        )
        .bind(id)
        .bind(update.date)
        .bind(update.quantity)
        .bind(update.unit.as_deref())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(consumption_from_row))
    }

    async fn delete_consumption(&self, id: i64) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM consumption_records WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn sum_consumption(&self, user_id: Option<i32>) -> AppResult<Decimal> {
        let total: Decimal = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(quantity), 0)
            FROM consumption_records
            WHERE $1::INTEGER IS NULL OR user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(total)
    }
}

#[async_trait]
impl BillStore for PgStore {
    async fn insert_bill(&self, draft: BillDraft) -> AppResult<Bill> {
        let mut tx = self.pool.begin().await?;
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO bills (user_id, date, amount, status) VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(draft.user_id)
        .bind(draft.date)
        .bind(draft.amount)
        .bind(draft.status.as_str())
        .fetch_one(&mut tx)
        .await?;

        for consumption_id in &draft.consumption_ids {
            sqlx::query(
                "INSERT INTO bill_consumption (bill_id, consumption_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )
            .bind(id)
            .bind(consumption_id)
            .execute(&mut tx)
            .await?;
        }
        tx.commit().await?;

        self.fetch_bill(id)
            .await?
            .ok_or_else(|| AppError::not_found("bill", id))
    }

    async fn get_bill(&self, id: i64) -> AppResult<Option<Bill>> {
        self.fetch_bill(id).await
    }

    async fn list_bills(&self, user_id: Option<i32>) -> AppResult<Vec<Bill>> {
        let rows = sqlx::query(&format!(
            "{BILL_SELECT} WHERE $1::INTEGER IS NULL OR b.user_id = $1 GROUP BY b.id ORDER BY b.date DESC, b.id DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(bill_from_row).collect())
    }

    async fn update_bill(&self, id: i64, update: &BillUpdate) -> AppResult<Option<Bill>> {
        let result = sqlx::query(
            r#"
            UPDATE bills
            SET date = COALESCE($2, date),
                amount = COALESCE($3, amount)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(update.date)
        .bind(update.amount)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.fetch_bill(id).await
    }

    async fn mark_bill_paid(&self, id: i64) -> AppResult<Option<Bill>> {
        sqlx::query("UPDATE bills SET status = 'paid' WHERE id = $1 AND status = 'unpaid'")
            .bind(id)
            .execute(&self.pool)
            .await?;
        // Zero rows means missing or already paid; the read tells them apart.
        self.fetch_bill(id).await
    }

    async fn delete_bill(&self, id: i64) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM bills WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn sum_bills(&self, user_id: Option<i32>) -> AppResult<Decimal> {
        let total: Decimal = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM bills WHERE $1::INTEGER IS NULL OR user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(total)
    }
}

#[async_trait]
impl InvoiceStore for PgStore {
    async fn insert_invoice(&self, draft: InvoiceDraft) -> AppResult<Invoice> {
        let total = draft.total_amount();
        let mut tx = self.pool.begin().await?;
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO invoices (
                user_id,
                billing_period_start,
                billing_period_end,
                total_amount,
                due_date,
                status
            ) VALUES ($1, $2, $3, $4, $5, 'unpaid')
            RETURNING id
            "#,
        )
        .bind(draft.user_id)
        .bind(draft.billing_period_start)
        .bind(draft.billing_period_end)
        .bind(total)
        .bind(draft.due_date)
        .fetch_one(&mut tx)
        .await?;

        for (position, line) in draft.lines.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO invoice_lines (invoice_id, position, bill_id, bill_date, amount)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(id)
            .bind(position as i32)
            .bind(line.bill_id)
            .bind(line.bill_date)
            .bind(line.amount)
            .execute(&mut tx)
            .await?;
        }
        // Dropping `tx` on any early return above rolls the whole invoice back.
        tx.commit().await?;

        self.fetch_invoice(id)
            .await?
            .ok_or_else(|| AppError::not_found("invoice", id))
    }

    async fn get_invoice(&self, id: i64) -> AppResult<Option<Invoice>> {
        self.fetch_invoice(id).await
    }

    async fn list_invoices(&self, user_id: Option<i32>) -> AppResult<Vec<Invoice>> {
        let rows = sqlx::query(&format!(
            "{INVOICE_SELECT} WHERE $1::INTEGER IS NULL OR user_id = $1 ORDER BY created_at DESC, id DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        self.attach_lines(rows).await
    }

    async fn update_invoice(&self, id: i64, update: &InvoiceUpdate) -> AppResult<Option<Invoice>> {
        let result = sqlx::query(
            r#"
            UPDATE invoices
            SET billing_period_start = COALESCE($2, billing_period_start),
                billing_period_end = COALESCE($3, billing_period_end),
                due_date = COALESCE($4, due_date)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(update.billing_period_start)
        .bind(update.billing_period_end)
        .bind(update.due_date)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.fetch_invoice(id).await
    }

    async fn mark_invoice_paid(&self, id: i64) -> AppResult<Option<Invoice>> {
        sqlx::query("UPDATE invoices SET status = 'paid' WHERE id = $1 AND status = 'unpaid'")
            .bind(id)
            .execute(&self.pool)
            .await?;
        // Zero rows means missing or already paid; the read tells them apart.
        self.fetch_invoice(id).await
    }

    async fn set_document_ref(&self, id: i64, document_ref: &str) -> AppResult<bool> {
        let result = sqlx::query("UPDATE invoices SET document_ref = $2 WHERE id = $1")
            .bind(id)
            .bind(document_ref)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_invoice(&self, id: i64) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM invoices WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn sum_invoices(&self, user_id: Option<i32>) -> AppResult<Decimal> {
        let total: Decimal = sqlx::query_scalar(
            "SELECT COALESCE(SUM(total_amount), 0) FROM invoices WHERE $1::INTEGER IS NULL OR user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(total)
    }
}

#[async_trait]
impl JobStore for PgStore {
    async fn claim_job(&self, key: JobKey) -> AppResult<ClaimOutcome> {
        let claimed = sqlx::query(&format!(
            r#"
            INSERT INTO fulfillment_jobs (invoice_id, job_kind, status, attempt_count)
            VALUES ($1, $2, 'pending', 0)
            ON CONFLICT (invoice_id, job_kind)
            DO UPDATE SET
                status = 'pending',
                attempt_count = 0,
                last_error = NULL,
                lease_expires_at = NULL,
                updated_at = NOW()
            WHERE fulfillment_jobs.status = 'dead'
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(key.invoice_id)
        .bind(key.kind.as_str())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = claimed {
            return Ok(ClaimOutcome::Claimed(job_from_row(&row)?));
        }

        let existing = self
            .get_job(key)
            .await?
            .ok_or_else(|| AppError::TransientJob(format!("job {key} vanished during claim")))?;
        Ok(if existing.status == JobStatus::Succeeded {
            ClaimOutcome::Completed(existing)
        } else {
            ClaimOutcome::InFlight(existing)
        })
    }

    async fn get_job(&self, key: JobKey) -> AppResult<Option<JobRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM fulfillment_jobs WHERE invoice_id = $1 AND job_kind = $2"
        ))
        .bind(key.invoice_id)
        .bind(key.kind.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn list_jobs(&self, statuses: &[JobStatus]) -> AppResult<Vec<JobRecord>> {
        let statuses: Vec<String> = statuses
            .iter()
            .map(|status| status.as_str().to_string())
            .collect();
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM fulfillment_jobs WHERE status = ANY($1) ORDER BY updated_at, invoice_id"
        ))
        .bind(&statuses)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(job_from_row).collect()
    }

    async fn start_attempt(
        &self,
        key: JobKey,
        lease_until: DateTime<Utc>,
    ) -> AppResult<Option<JobRecord>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE fulfillment_jobs
            SET status = 'running',
                attempt_count = attempt_count + 1,
                lease_expires_at = $3,
                updated_at = NOW()
            WHERE invoice_id = $1 AND job_kind = $2 AND status = 'pending'
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(key.invoice_id)
        .bind(key.kind.as_str())
        .bind(lease_until)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn finish_attempt(
        &self,
        key: JobKey,
        attempt: u32,
        status: JobStatus,
        last_error: Option<String>,
        at: DateTime<Utc>,
    ) -> AppResult<Option<JobRecord>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE fulfillment_jobs
            SET status = $4,
                last_error = COALESCE($5, last_error),
                lease_expires_at = NULL,
                updated_at = $6
            WHERE invoice_id = $1
              AND job_kind = $2
              AND status = 'running'
              AND attempt_count = $3
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(key.invoice_id)
        .bind(key.kind.as_str())
        .bind(attempt as i32)
        .bind(status.as_str())
        .bind(last_error)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn reclaim_expired(&self, now: DateTime<Utc>) -> AppResult<Vec<JobRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            UPDATE fulfillment_jobs
            SET status = 'pending',
                last_error = 'attempt lease expired',
                lease_expires_at = NULL,
                updated_at = $1
            WHERE status = 'running'
              AND (lease_expires_at IS NULL OR lease_expires_at <= $1)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(job_from_row).collect()
    }
}

#[async_trait]
impl ContactDirectory for PgStore {
    async fn contact_address(&self, user_id: i32) -> AppResult<Option<String>> {
        let email: Option<String> = sqlx::query_scalar("SELECT email FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(email)
    }
}
