mod support;

use rust_decimal_macros::dec;
use std::sync::Arc;

use energy_billing::consumption::{ConsumptionService, ConsumptionUpdate, NewConsumption};
use energy_billing::error::AppError;
use energy_billing::identity::Actor;
use energy_billing::store::MemoryStore;

use support::date;

fn ledger() -> ConsumptionService {
    ConsumptionService::new(Arc::new(MemoryStore::new()))
}

fn reading(day: &str, quantity: rust_decimal::Decimal) -> NewConsumption {
    NewConsumption {
        date: date(day),
        quantity,
        unit: None,
    }
}

// key: consumption-ledger -> record,default-unit,validation
#[tokio::test]
async fn record_defaults_unit_and_rejects_negative_quantities() {
    let ledger = ledger();
    let user = Actor::user(5);

    let record = ledger
        .record(&user, reading("2024-01-05", dec!(12.75)))
        .await
        .unwrap();
    assert_eq!(record.unit, "kWh");
    assert_eq!(record.user_id, 5);

    let metered = ledger
        .record(
            &user,
            NewConsumption {
                unit: Some(" m3 ".into()),
                ..reading("2024-01-06", dec!(0))
            },
        )
        .await
        .unwrap();
    assert_eq!(metered.unit, "m3");

    let err = ledger
        .record(&user, reading("2024-01-07", dec!(-1)))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let err = ledger
        .record(
            &user,
            NewConsumption {
                unit: Some("kilowatt-hours".into()),
                ..reading("2024-01-07", dec!(1))
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

// key: consumption-ledger -> listing,aggregates
#[tokio::test]
async fn listings_are_newest_first_and_aggregates_default_to_zero() {
    let ledger = ledger();
    let alice = Actor::user(5);
    let bob = Actor::user(6);
    let admin = Actor::admin(1);

    assert_eq!(ledger.aggregate_for_user(&alice).await.unwrap(), dec!(0));
    assert_eq!(ledger.aggregate_all(&admin).await.unwrap(), dec!(0));

    let older = ledger
        .record(&alice, reading("2024-01-05", dec!(10)))
        .await
        .unwrap();
    let newer = ledger
        .record(&alice, reading("2024-01-09", dec!(2.5)))
        .await
        .unwrap();
    ledger
        .record(&bob, reading("2024-01-07", dec!(4)))
        .await
        .unwrap();

    let ids: Vec<_> = ledger
        .list_for_user(&alice)
        .await
        .unwrap()
        .into_iter()
        .map(|record| record.id)
        .collect();
    assert_eq!(ids, vec![newer.id, older.id]);

    assert_eq!(ledger.aggregate_for_user(&alice).await.unwrap(), dec!(12.5));
    assert_eq!(ledger.aggregate_all(&admin).await.unwrap(), dec!(16.5));
    assert_eq!(ledger.list_all(&admin).await.unwrap().len(), 3);

    assert!(matches!(
        ledger.aggregate_all(&alice).await.unwrap_err(),
        AppError::Authorization(_)
    ));
    assert!(matches!(
        ledger.list_all(&bob).await.unwrap_err(),
        AppError::Authorization(_)
    ));
}

// key: consumption-ledger -> owner-or-admin-correction
#[tokio::test]
async fn only_owner_or_admin_may_correct_a_reading() {
    let ledger = ledger();
    let owner = Actor::user(5);
    let record = ledger
        .record(&owner, reading("2024-01-05", dec!(10)))
        .await
        .unwrap();

    let err = ledger
        .update(
            &Actor::user(6),
            record.id,
            ConsumptionUpdate {
                quantity: Some(dec!(11)),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Authorization(_)));

    let corrected = ledger
        .update(
            &owner,
            record.id,
            ConsumptionUpdate {
                quantity: Some(dec!(11)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(corrected.quantity, dec!(11));
    assert_eq!(corrected.date, record.date);

    let relabelled = ledger
        .update(
            &Actor::admin(1),
            record.id,
            ConsumptionUpdate {
                unit: Some("MWh".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(relabelled.unit, "MWh");

    let err = ledger
        .update(
            &owner,
            record.id,
            ConsumptionUpdate {
                quantity: Some(dec!(-3)),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

// key: consumption-ledger -> admin-only-delete
#[tokio::test]
async fn only_admins_delete_readings() {
    let ledger = ledger();
    let owner = Actor::user(5);
    let record = ledger
        .record(&owner, reading("2024-01-05", dec!(10)))
        .await
        .unwrap();

    let err = ledger.delete(&owner, record.id).await.unwrap_err();
    assert!(matches!(err, AppError::Authorization(_)));

    ledger.delete(&Actor::admin(1), record.id).await.unwrap();
    let err = ledger.get(&owner, record.id).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound { .. }));

    let err = ledger.delete(&Actor::admin(1), record.id).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound { .. }));
}
