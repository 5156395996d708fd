use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;

use crate::config;
use crate::error::{AppError, AppResult};
use crate::identity::Actor;
use crate::store::Store;

use super::models::{ConsumptionDraft, ConsumptionRecord, ConsumptionUpdate, NewConsumption};

const MAX_UNIT_LEN: usize = 10;

/// key: consumption-service -> ledger reads and owner/admin corrections
#[derive(Clone)]
pub struct ConsumptionService {
    store: Arc<dyn Store>,
}

impl ConsumptionService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn record(
        &self,
        actor: &Actor,
        input: NewConsumption,
    ) -> AppResult<ConsumptionRecord> {
        validate_quantity(input.quantity)?;
        let unit = match input.unit {
            Some(unit) => normalize_unit(&unit)?,
            None => config::DEFAULT_CONSUMPTION_UNIT.clone(),
        };

        let record = self
            .store
            .insert_consumption(ConsumptionDraft {
                user_id: actor.user_id,
                date: input.date,
                quantity: input.quantity,
                unit,
            })
            .await?;
        info!(
            consumption_id = record.id,
            user_id = record.user_id,
            quantity = %record.quantity,
            unit = %record.unit,
            "consumption recorded"
        );
        Ok(record)
    }

    pub async fn get(&self, actor: &Actor, id: i64) -> AppResult<ConsumptionRecord> {
        let record = self.fetch(id).await?;
        actor.ensure_owner_or_admin(record.user_id, "consumption record", id)?;
        Ok(record)
    }

    pub async fn list_for_user(&self, actor: &Actor) -> AppResult<Vec<ConsumptionRecord>> {
        self.store.list_consumption(Some(actor.user_id)).await
    }

    pub async fn list_all(&self, actor: &Actor) -> AppResult<Vec<ConsumptionRecord>> {
        actor.ensure_admin("listing all consumption")?;
        self.store.list_consumption(None).await
    }

    pub async fn update(
        &self,
        actor: &Actor,
        id: i64,
        mut update: ConsumptionUpdate,
    ) -> AppResult<ConsumptionRecord> {
        let record = self.fetch(id).await?;
        actor.ensure_owner_or_admin(record.user_id, "consumption record", id)?;
        if update.is_empty() {
            return Ok(record);
        }
        if let Some(quantity) = update.quantity {
            validate_quantity(quantity)?;
        }
        if let Some(unit) = update.unit.take() {
            update.unit = Some(normalize_unit(&unit)?);
        }

        let updated = self
            .store
            .update_consumption(id, &update)
            .await?
            .ok_or_else(|| AppError::not_found("consumption record", id))?;
        info!(consumption_id = id, actor = actor.user_id, "consumption record corrected");
        Ok(updated)
    }

    pub async fn delete(&self, actor: &Actor, id: i64) -> AppResult<()> {
        actor.ensure_admin("deleting consumption")?;
        if !self.store.delete_consumption(id).await? {
            return Err(AppError::not_found("consumption record", id));
        }
        info!(consumption_id = id, actor = actor.user_id, "consumption record deleted");
        Ok(())
    }

    pub async fn aggregate_for_user(&self, actor: &Actor) -> AppResult<Decimal> {
        self.store.sum_consumption(Some(actor.user_id)).await
    }

    pub async fn aggregate_all(&self, actor: &Actor) -> AppResult<Decimal> {
        actor.ensure_admin("aggregating all consumption")?;
        self.store.sum_consumption(None).await
    }

    async fn fetch(&self, id: i64) -> AppResult<ConsumptionRecord> {
        self.store
            .get_consumption(id)
            .await?
            .ok_or_else(|| AppError::not_found("consumption record", id))
    }
}

fn validate_quantity(quantity: Decimal) -> AppResult<()> {
    if quantity < Decimal::ZERO {
        return Err(AppError::validation("quantity must be non-negative"));
    }
    Ok(())
}

fn normalize_unit(unit: &str) -> AppResult<String> {
    let unit = unit.trim();
    if unit.is_empty() {
        return Err(AppError::validation("unit must not be empty"));
    }
    if unit.chars().count() > MAX_UNIT_LEN {
        return Err(AppError::validation(format!(
            "unit must be at most {MAX_UNIT_LEN} characters"
        )));
    }
    Ok(unit.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn negative_quantities_are_rejected() {
        assert!(validate_quantity(dec!(0)).is_ok());
        assert!(validate_quantity(dec!(12.5)).is_ok());
        assert!(matches!(
            validate_quantity(dec!(-0.01)),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn units_are_trimmed_and_bounded() {
        assert_eq!(normalize_unit(" kWh ").expect("unit"), "kWh");
        assert!(normalize_unit("   ").is_err());
        assert!(normalize_unit("megawatthours").is_err());
    }
}
