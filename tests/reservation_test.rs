mod common;

use assert_matches::assert_matches;
use rust_decimal_macros::dec;
use uuid::Uuid;

use common::{key_for, seed_level, setup};
use stockledger_api::entities::inventory_movement::MovementType;
use stockledger_api::entities::inventory_reservation::ReservationStatus;
use stockledger_api::errors::ServiceError;
use stockledger_api::events::Event;
use stockledger_api::services::movement_ledger::MovementFilter;
use stockledger_api::services::reservations::ReserveRequest;

fn request(ctx: &common::TestContext, key: stockledger_api::services::LevelKey, quantity: rust_decimal::Decimal) -> ReserveRequest {
    ReserveRequest {
        key,
        quantity,
        reserved_for: "order".to_string(),
        reference_id: Some(Uuid::new_v4()),
        created_by: ctx.actor,
    }
}

#[tokio::test]
async fn reserving_holds_available_but_not_on_hand() {
    let ctx = setup().await;
    let key = key_for(&ctx);
    seed_level(&ctx, key, dec!(50)).await;

    let reservation = ctx
        .services
        .reservations
        .reserve(request(&ctx, key, dec!(20)))
        .await
        .unwrap();
    assert_eq!(reservation.status, ReservationStatus::Active.as_str());

    let level = ctx.services.perpetual.get_level(&key).await.unwrap().unwrap();
    assert_eq!(level.current_level, dec!(50));
    assert_eq!(level.reserved_level, dec!(20));
    assert_eq!(level.available_level, dec!(30));
    assert_eq!(level.available_level, level.current_level - level.reserved_level);
}

#[tokio::test]
async fn over_reservation_is_an_expected_business_outcome() {
    let ctx = setup().await;
    let key = key_for(&ctx);
    seed_level(&ctx, key, dec!(10)).await;

    ctx.services
        .reservations
        .reserve(request(&ctx, key, dec!(8)))
        .await
        .unwrap();

    let err = ctx
        .services
        .reservations
        .reserve(request(&ctx, key, dec!(3)))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InsufficientStock(_));
    assert!(err.is_domain_error());
    assert!(!err.is_retryable());

    let level = ctx.services.perpetual.get_level(&key).await.unwrap().unwrap();
    assert_eq!(level.reserved_level, dec!(8));
}

#[tokio::test]
async fn release_returns_quantity_and_is_not_idempotent() {
    let ctx = setup().await;
    let key = key_for(&ctx);
    seed_level(&ctx, key, dec!(50)).await;

    let reservation = ctx
        .services
        .reservations
        .reserve(request(&ctx, key, dec!(20)))
        .await
        .unwrap();

    let released = ctx
        .services
        .reservations
        .release(ctx.tenant_id, reservation.id)
        .await
        .unwrap();
    assert_eq!(released.status, ReservationStatus::Released.as_str());

    let level = ctx.services.perpetual.get_level(&key).await.unwrap().unwrap();
    assert_eq!(level.available_level, dec!(50));
    assert_eq!(level.reserved_level, dec!(0));

    // Releasing again is a rejected request, unlike batch recall.
    let err = ctx
        .services
        .reservations
        .release(ctx.tenant_id, reservation.id)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidOperation(_));
}

#[tokio::test]
async fn consuming_converts_the_hold_into_an_outbound_movement() {
    let mut ctx = setup().await;
    let key = key_for(&ctx);
    seed_level(&ctx, key, dec!(50)).await;

    let reservation = ctx
        .services
        .reservations
        .reserve(request(&ctx, key, dec!(20)))
        .await
        .unwrap();
    ctx.drain_events();

    let consumed = ctx
        .services
        .reservations
        .consume(ctx.tenant_id, reservation.id, ctx.actor)
        .await
        .unwrap();
    assert_eq!(consumed.status, ReservationStatus::Consumed.as_str());

    // Current and reserved both drop; available is unchanged.
    let level = ctx.services.perpetual.get_level(&key).await.unwrap().unwrap();
    assert_eq!(level.current_level, dec!(30));
    assert_eq!(level.reserved_level, dec!(0));
    assert_eq!(level.available_level, dec!(30));

    // The conversion is an ordinary ledger entry referencing the hold.
    let (movements, _) = ctx
        .services
        .ledger
        .query(
            ctx.tenant_id,
            MovementFilter {
                movement_type: Some(MovementType::Sale),
                reference_id: Some(reservation.id),
                ..Default::default()
            },
            1,
            10,
        )
        .await
        .unwrap();
    assert_eq!(movements.len(), 1);
    assert_eq!(movements[0].quantity, dec!(-20));
    assert_eq!(movements[0].new_level, dec!(30));

    let events = ctx.drain_events();
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::ReservationConsumed { .. })));

    // A consumed reservation cannot be released.
    let err = ctx
        .services
        .reservations
        .release(ctx.tenant_id, reservation.id)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidOperation(_));
}

#[tokio::test]
async fn reservations_require_an_existing_level() {
    let ctx = setup().await;
    let key = key_for(&ctx);

    let err = ctx
        .services
        .reservations
        .reserve(request(&ctx, key, dec!(1)))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}

#[tokio::test]
async fn active_holds_are_listed_per_key() {
    let ctx = setup().await;
    let key = key_for(&ctx);
    seed_level(&ctx, key, dec!(50)).await;

    let first = ctx
        .services
        .reservations
        .reserve(request(&ctx, key, dec!(5)))
        .await
        .unwrap();
    ctx.services
        .reservations
        .reserve(request(&ctx, key, dec!(7)))
        .await
        .unwrap();
    ctx.services
        .reservations
        .release(ctx.tenant_id, first.id)
        .await
        .unwrap();

    let active = ctx.services.reservations.list_active(&key).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].quantity, dec!(7));
    assert_eq!(
        ctx.services
            .reservations
            .active_quantity(&key)
            .await
            .unwrap(),
        dec!(7)
    );
}
