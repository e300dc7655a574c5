//! Property tests for the ledger's pure sign arithmetic.

use proptest::prelude::*;
use rust_decimal::Decimal;

use stockledger_api::entities::inventory_movement::{MovementDirection, MovementType};

const ALL_TYPES: [MovementType; 12] = [
    MovementType::Sale,
    MovementType::Purchase,
    MovementType::Adjustment,
    MovementType::TransferIn,
    MovementType::TransferOut,
    MovementType::Return,
    MovementType::Damage,
    MovementType::Theft,
    MovementType::Expired,
    MovementType::Recount,
    MovementType::Production,
    MovementType::Consumption,
];

fn any_movement_type() -> impl Strategy<Value = MovementType> {
    prop::sample::select(ALL_TYPES.to_vec())
}

fn any_quantity() -> impl Strategy<Value = Decimal> {
    // Two implied decimal places, spanning negative and positive inputs.
    (-1_000_000i64..1_000_000i64).prop_map(|n| Decimal::new(n, 2))
}

proptest! {
    #[test]
    fn signed_quantity_preserves_magnitude(
        movement_type in any_movement_type(),
        quantity in any_quantity(),
    ) {
        let signed = movement_type.signed_quantity(quantity);
        prop_assert_eq!(signed.abs(), quantity.abs());
    }

    #[test]
    fn signed_quantity_sign_follows_direction(
        movement_type in any_movement_type(),
        quantity in any_quantity(),
    ) {
        let signed = movement_type.signed_quantity(quantity);
        match movement_type.direction() {
            MovementDirection::Inbound => prop_assert!(signed >= Decimal::ZERO),
            MovementDirection::Outbound => prop_assert!(signed <= Decimal::ZERO),
            MovementDirection::Signed => prop_assert_eq!(signed, quantity),
        }
    }

    #[test]
    fn level_snapshots_always_reconcile(
        movement_type in any_movement_type(),
        quantity in any_quantity(),
        previous in any_quantity(),
    ) {
        // The invariant the ledger enforces on append: the recorded new
        // level is exactly the previous level plus the signed quantity.
        let signed = movement_type.signed_quantity(quantity);
        let new_level = previous + signed;
        prop_assert_eq!(new_level - previous, signed);
    }

    #[test]
    fn movement_type_strings_round_trip(movement_type in any_movement_type()) {
        prop_assert_eq!(
            MovementType::from_str(movement_type.as_str()),
            Some(movement_type)
        );
    }
}
