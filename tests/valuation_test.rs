mod common;

use assert_matches::assert_matches;
use chrono::TimeZone;
use rust_decimal_macros::dec;

use common::{key_for, seed_batch, seed_level, setup};
use stockledger_api::entities::inventory_level::ValuationMethod;
use stockledger_api::entities::inventory_movement::MovementType;
use stockledger_api::errors::ServiceError;
use stockledger_api::services::perpetual_inventory::PerpetualUpdate;

#[tokio::test]
async fn fifo_values_oldest_receipts_first() {
    let ctx = setup().await;
    let key = key_for(&ctx);
    seed_level(&ctx, key, dec!(15)).await;
    seed_batch(&ctx, key, "DAY1", dec!(10), dec!(5), 1).await;
    seed_batch(&ctx, key, "DAY2", dec!(10), dec!(7), 2).await;

    let valuation = ctx
        .services
        .valuation
        .valuate(&key, ValuationMethod::Fifo, None)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(valuation.total_value, dec!(85));
    assert_eq!(valuation.quantity, dec!(15));
    assert_eq!(valuation.unit_cost.round_dp(2), dec!(5.67));

    let lines = valuation.batches.unwrap();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0].batch_number, "DAY1");
    assert_eq!(lines[0].quantity, dec!(10));
    assert_eq!(lines[1].batch_number, "DAY2");
    assert_eq!(lines[1].quantity, dec!(5));
}

#[tokio::test]
async fn lifo_values_newest_receipts_first() {
    let ctx = setup().await;
    let key = key_for(&ctx);
    seed_level(&ctx, key, dec!(15)).await;
    seed_batch(&ctx, key, "DAY1", dec!(10), dec!(5), 1).await;
    seed_batch(&ctx, key, "DAY2", dec!(10), dec!(7), 2).await;

    let valuation = ctx
        .services
        .valuation
        .valuate(&key, ValuationMethod::Lifo, None)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(valuation.total_value, dec!(95));
}

#[tokio::test]
async fn as_of_date_excludes_later_receipts() {
    let ctx = setup().await;
    let key = key_for(&ctx);
    seed_level(&ctx, key, dec!(8)).await;
    seed_batch(&ctx, key, "DAY1", dec!(10), dec!(5), 1).await;
    seed_batch(&ctx, key, "DAY9", dec!(10), dec!(7), 9).await;

    let cutoff = chrono::Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap();
    let valuation = ctx
        .services
        .valuation
        .valuate(&key, ValuationMethod::Fifo, Some(cutoff))
        .await
        .unwrap()
        .unwrap();

    // Only the day-1 batch participates.
    assert_eq!(valuation.total_value, dec!(40));
    assert_eq!(valuation.batches.unwrap().len(), 1);
}

#[tokio::test]
async fn average_replays_cost_bearing_inbound_movements() {
    let ctx = setup().await;
    let key = key_for(&ctx);
    seed_level(&ctx, key, dec!(0)).await;

    for (quantity, cost) in [(dec!(10), dec!(5)), (dec!(30), dec!(9))] {
        ctx.services
            .perpetual
            .update_perpetual_inventory(PerpetualUpdate {
                key,
                movement_type: MovementType::Purchase,
                quantity,
                unit_cost: Some(cost),
                reference_type: None,
                reference_id: None,
                batch_number: None,
                reason: None,
                requires_approval: false,
                created_by: ctx.actor,
            })
            .await
            .unwrap();
    }
    // A costless outbound movement must not disturb the average.
    ctx.services
        .perpetual
        .update_perpetual_inventory(PerpetualUpdate {
            key,
            movement_type: MovementType::Sale,
            quantity: dec!(5),
            unit_cost: None,
            reference_type: None,
            reference_id: None,
            batch_number: None,
            reason: None,
            requires_approval: false,
            created_by: ctx.actor,
        })
        .await
        .unwrap();

    let valuation = ctx
        .services
        .valuation
        .valuate(&key, ValuationMethod::Average, None)
        .await
        .unwrap()
        .unwrap();

    // (10*5 + 30*9) / 40 = 8, over the 35 on hand.
    assert_eq!(valuation.unit_cost, dec!(8));
    assert_eq!(valuation.quantity, dec!(35));
    assert_eq!(valuation.total_value, dec!(280));
}

#[tokio::test]
async fn specific_sums_actual_batch_costs() {
    let ctx = setup().await;
    let key = key_for(&ctx);
    seed_level(&ctx, key, dec!(25)).await;
    seed_batch(&ctx, key, "A", dec!(10), dec!(5), 1).await;
    seed_batch(&ctx, key, "B", dec!(15), dec!(7), 2).await;

    let valuation = ctx
        .services
        .valuation
        .valuate(&key, ValuationMethod::Specific, None)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(valuation.quantity, dec!(25));
    assert_eq!(valuation.total_value, dec!(155));
}

#[tokio::test]
async fn zero_on_hand_yields_no_valuation() {
    let ctx = setup().await;
    let key = key_for(&ctx);
    seed_level(&ctx, key, dec!(0)).await;
    seed_batch(&ctx, key, "IDLE", dec!(10), dec!(5), 1).await;

    for method in [
        ValuationMethod::Fifo,
        ValuationMethod::Lifo,
        ValuationMethod::Average,
        ValuationMethod::Specific,
    ] {
        let valuation = ctx
            .services
            .valuation
            .valuate(&key, method, None)
            .await
            .unwrap();
        assert!(valuation.is_none(), "{:?} should report nothing", method);
    }
}

#[tokio::test]
async fn valuing_an_unknown_key_is_not_found() {
    let ctx = setup().await;
    let key = key_for(&ctx);

    let err = ctx
        .services
        .valuation
        .valuate(&key, ValuationMethod::Fifo, None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}

#[tokio::test]
async fn recalled_batches_drop_out_of_valuation() {
    let ctx = setup().await;
    let key = key_for(&ctx);
    seed_level(&ctx, key, dec!(15)).await;
    seed_batch(&ctx, key, "GOOD", dec!(10), dec!(5), 1).await;
    seed_batch(&ctx, key, "BAD", dec!(10), dec!(7), 2).await;

    ctx.services
        .batches
        .recall(ctx.tenant_id, "BAD")
        .await
        .unwrap();

    let valuation = ctx
        .services
        .valuation
        .valuate(&key, ValuationMethod::Specific, None)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(valuation.quantity, dec!(10));
    assert_eq!(valuation.total_value, dec!(50));
}
