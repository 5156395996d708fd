use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::identity::Actor;
use crate::store::Store;

use super::models::{Bill, BillDraft, BillStatus, BillUpdate};

/// key: billing-service -> bill creation, payment and aggregation
#[derive(Clone)]
pub struct BillingService {
    store: Arc<dyn Store>,
}

impl BillingService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn create_bill(
        &self,
        actor: &Actor,
        date: NaiveDate,
        amount: Decimal,
        status: BillStatus,
    ) -> AppResult<Bill> {
        let amount = billable_amount(amount)?;
        let bill = self
            .store
            .insert_bill(BillDraft {
                user_id: actor.user_id,
                date,
                amount,
                status,
                consumption_ids: Vec::new(),
            })
            .await?;
        info!(
            bill_id = bill.id,
            user_id = bill.user_id,
            amount = %bill.amount,
            status = bill.status.as_str(),
            "bill created"
        );
        Ok(bill)
    }

    /// Prices the given consumption records at `rate` per unit and links them to
    /// the new bill.
    pub async fn bill_from_consumption(
        &self,
        actor: &Actor,
        date: NaiveDate,
        consumption_ids: &[i64],
        rate: Decimal,
    ) -> AppResult<Bill> {
        if rate <= Decimal::ZERO {
            return Err(AppError::validation("rate must be positive"));
        }
        let ids: BTreeSet<i64> = consumption_ids.iter().copied().collect();
        if ids.is_empty() {
            return Err(AppError::validation(
                "at least one consumption record is required",
            ));
        }

        let mut quantity = Decimal::ZERO;
        for id in &ids {
            let record = self
                .store
                .get_consumption(*id)
                .await?
                .ok_or_else(|| AppError::not_found("consumption record", *id))?;
            if record.user_id != actor.user_id {
                return Err(AppError::forbidden(format!(
                    "consumption record {id} belongs to another user"
                )));
            }
            quantity += record.quantity;
        }

        let amount = billable_amount(quantity * rate)?;
        let bill = self
            .store
            .insert_bill(BillDraft {
                user_id: actor.user_id,
                date,
                amount,
                status: BillStatus::Unpaid,
                consumption_ids: ids.into_iter().collect(),
            })
            .await?;
        info!(
            bill_id = bill.id,
            user_id = bill.user_id,
            %quantity,
            %rate,
            amount = %bill.amount,
            "bill priced from consumption"
        );
        Ok(bill)
    }

    pub async fn get(&self, actor: &Actor, id: i64) -> AppResult<Bill> {
        let bill = self.fetch(id).await?;
        actor.ensure_owner_or_admin(bill.user_id, "bill", id)?;
        Ok(bill)
    }

    pub async fn list_for_user(&self, actor: &Actor) -> AppResult<Vec<Bill>> {
        self.store.list_bills(Some(actor.user_id)).await
    }

    pub async fn list_all(&self, actor: &Actor) -> AppResult<Vec<Bill>> {
        actor.ensure_admin("listing all bills")?;
        self.store.list_bills(None).await
    }

    pub async fn update_bill(
        &self,
        actor: &Actor,
        id: i64,
        mut update: BillUpdate,
    ) -> AppResult<Bill> {
        let bill = self.fetch(id).await?;
        actor.ensure_owner_or_admin(bill.user_id, "bill", id)?;
        if update.is_empty() {
            return Ok(bill);
        }
        if let Some(amount) = update.amount {
            update.amount = Some(billable_amount(amount)?);
        }

        let updated = self
            .store
            .update_bill(id, &update)
            .await?
            .ok_or_else(|| AppError::not_found("bill", id))?;
        info!(bill_id = id, amount = %updated.amount, "bill updated");
        Ok(updated)
    }

    /// Confirms payment. Paying a bill that is already paid returns it unchanged.
    pub async fn mark_paid(&self, actor: &Actor, id: i64) -> AppResult<Bill> {
        let bill = self.fetch(id).await?;
        actor.ensure_owner_or_admin(bill.user_id, "bill", id)?;
        if bill.is_paid() {
            return Ok(bill);
        }

        let paid = self
            .store
            .mark_bill_paid(id)
            .await?
            .ok_or_else(|| AppError::not_found("bill", id))?;
        info!(bill_id = id, user_id = paid.user_id, amount = %paid.amount, "bill paid");
        Ok(paid)
    }

    /// Invoices that captured this bill keep their snapshot lines.
    pub async fn delete_bill(&self, actor: &Actor, id: i64) -> AppResult<()> {
        let bill = self.fetch(id).await?;
        actor.ensure_owner_or_admin(bill.user_id, "bill", id)?;
        if !self.store.delete_bill(id).await? {
            return Err(AppError::not_found("bill", id));
        }
        info!(bill_id = id, actor = actor.user_id, "bill deleted");
        Ok(())
    }

    pub async fn aggregate_for_user(&self, actor: &Actor) -> AppResult<Decimal> {
        self.store.sum_bills(Some(actor.user_id)).await
    }

    pub async fn aggregate_all(&self, actor: &Actor) -> AppResult<Decimal> {
        actor.ensure_admin("aggregating all bills")?;
        self.store.sum_bills(None).await
    }

    async fn fetch(&self, id: i64) -> AppResult<Bill> {
        self.store
            .get_bill(id)
            .await?
            .ok_or_else(|| AppError::not_found("bill", id))
    }
}

/// Rounds to cents and rejects anything that is not strictly positive afterwards.
pub fn billable_amount(amount: Decimal) -> AppResult<Decimal> {
    let rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    if rounded <= Decimal::ZERO {
        return Err(AppError::validation(format!(
            "amount must be greater than zero, got {amount}"
        )));
    }
    Ok(rounded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn billable_amount_rounds_to_cents() {
        assert_eq!(billable_amount(dec!(40)).expect("amount"), dec!(40.00));
        assert_eq!(billable_amount(dec!(12.345)).expect("amount"), dec!(12.35));
        assert_eq!(billable_amount(dec!(0.005)).expect("amount"), dec!(0.01));
    }

    #[test]
    fn non_positive_amounts_are_rejected() {
        for amount in [dec!(0), dec!(-5), dec!(0.004)] {
            assert!(matches!(
                billable_amount(amount),
                Err(AppError::Validation(_))
            ));
        }
    }
}
