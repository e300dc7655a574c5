// Domain services of the ledger & valuation engine
pub mod batch_tracker;
pub mod movement_ledger;
pub mod perpetual_inventory;
pub mod reservations;
pub mod valuation;

use sea_orm::TransactionError;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::DbPool;
use crate::errors::ServiceError;
use crate::events::EventSender;

/// The four-part key every stock quantity lives under.
///
/// `variant_id` is an explicit option so the variant/no-variant dimension is
/// matched exhaustively in every repository lookup instead of being folded
/// into a sentinel value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelKey {
    pub tenant_id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub location_id: Uuid,
}

impl LevelKey {
    pub fn new(tenant_id: Uuid, product_id: Uuid, location_id: Uuid) -> Self {
        Self {
            tenant_id,
            product_id,
            variant_id: None,
            location_id,
        }
    }

    pub fn with_variant(mut self, variant_id: Uuid) -> Self {
        self.variant_id = Some(variant_id);
        self
    }

    pub fn at_location(mut self, location_id: Uuid) -> Self {
        self.location_id = location_id;
        self
    }
}

/// Unwraps sea-orm's transaction error wrapper back into our error type.
pub(crate) fn unwrap_txn_err(err: TransactionError<ServiceError>) -> ServiceError {
    match err {
        TransactionError::Connection(db_err) => ServiceError::db_error(db_err),
        TransactionError::Transaction(service_err) => service_err,
    }
}

/// Bundles every service over one pool and event sink.
#[derive(Clone)]
pub struct AppServices {
    pub ledger: movement_ledger::MovementLedgerService,
    pub perpetual: perpetual_inventory::PerpetualInventoryService,
    pub reservations: reservations::InventoryReservationService,
    pub batches: batch_tracker::BatchTrackerService,
    pub valuation: valuation::ValuationService,
}

impl AppServices {
    pub fn build(db_pool: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self {
            ledger: movement_ledger::MovementLedgerService::new(db_pool.clone()),
            perpetual: perpetual_inventory::PerpetualInventoryService::new(
                db_pool.clone(),
                event_sender.clone(),
            ),
            reservations: reservations::InventoryReservationService::new(
                db_pool.clone(),
                event_sender.clone(),
            ),
            batches: batch_tracker::BatchTrackerService::new(db_pool.clone(), event_sender),
            valuation: valuation::ValuationService::new(db_pool),
        }
    }
}
