//! Perpetual inventory coordinator.
//!
//! The central state machine: every quantity change flows through
//! [`PerpetualInventoryService::update_perpetual_inventory`], which appends
//! to the movement ledger and keeps the level row, the affected batch, and
//! the outbound notifications consistent within one database transaction.

use chrono::Utc;
use lazy_static::lazy_static;
use prometheus::IntCounter;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::db::DbPool;
use crate::entities::inventory_batch::{self, BatchStatus, Entity as InventoryBatch};
use crate::entities::inventory_level::{self, Entity as InventoryLevel, ValuationMethod};
use crate::entities::inventory_movement::{self, ApprovalStatus, MovementType};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::movement_ledger::{MovementLedgerService, NewMovement};
use crate::services::{unwrap_txn_err, LevelKey};

/// Tolerance for counted-vs-system comparisons during reconciliation.
const RECONCILIATION_EPSILON: Decimal = dec!(0.001);

lazy_static! {
    static ref MOVEMENTS_RECORDED: IntCounter = IntCounter::new(
        "stockledger_movements_total",
        "Total number of movements recorded"
    )
    .expect("metric can be created");
    static ref MOVEMENT_FAILURES: IntCounter = IntCounter::new(
        "stockledger_movement_failures_total",
        "Total number of rejected or failed movement requests"
    )
    .expect("metric can be created");
    static ref TRANSFERS: IntCounter = IntCounter::new(
        "stockledger_transfers_total",
        "Total number of completed stock transfers"
    )
    .expect("metric can be created");
    static ref TRANSFER_FAILURES: IntCounter = IntCounter::new(
        "stockledger_transfer_failures_total",
        "Total number of failed stock transfers"
    )
    .expect("metric can be created");
    static ref RECONCILIATIONS: IntCounter = IntCounter::new(
        "stockledger_reconciliations_total",
        "Total number of completed reconciliation runs"
    )
    .expect("metric can be created");
}

fn validate_nonzero_quantity(quantity: &Decimal) -> Result<(), validator::ValidationError> {
    if quantity.is_zero() {
        return Err(validator::ValidationError::new("quantity_must_be_nonzero"));
    }
    Ok(())
}

fn validate_positive_quantity(quantity: &Decimal) -> Result<(), validator::ValidationError> {
    if *quantity <= Decimal::ZERO {
        return Err(validator::ValidationError::new("quantity_must_be_positive"));
    }
    Ok(())
}

/// One perpetual-inventory change request.
#[derive(Debug, Clone, Validate)]
pub struct PerpetualUpdate {
    pub key: LevelKey,
    pub movement_type: MovementType,
    #[validate(custom = "validate_nonzero_quantity")]
    pub quantity: Decimal,
    pub unit_cost: Option<Decimal>,
    pub reference_type: Option<String>,
    pub reference_id: Option<Uuid>,
    pub batch_number: Option<String>,
    pub reason: Option<String>,
    pub requires_approval: bool,
    pub created_by: Uuid,
}

/// Result of one change request. `level` is `None` while the movement waits
/// for its second actor.
#[derive(Debug, Clone)]
pub struct PerpetualUpdateOutcome {
    pub movement: inventory_movement::Model,
    pub level: Option<inventory_level::Model>,
}

/// First stock registration for a key.
#[derive(Debug, Clone, Validate)]
pub struct NewLevel {
    pub key: LevelKey,
    pub initial_quantity: Decimal,
    pub min_stock_level: Decimal,
    pub max_stock_level: Option<Decimal>,
    pub reorder_point: Decimal,
    pub reorder_quantity: Decimal,
    pub valuation_method: ValuationMethod,
    pub unit_cost: Option<Decimal>,
    pub created_by: Uuid,
}

/// Cross-location stock transfer request.
#[derive(Debug, Clone, Validate)]
pub struct TransferRequest {
    pub tenant_id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub from_location_id: Uuid,
    pub to_location_id: Uuid,
    #[validate(custom = "validate_positive_quantity")]
    pub quantity: Decimal,
    pub reason: Option<String>,
    pub created_by: Uuid,
}

#[derive(Debug, Clone)]
pub struct TransferOutcome {
    pub reference_id: Uuid,
    pub from_level: inventory_level::Model,
    pub to_level: inventory_level::Model,
    pub outbound_movement: inventory_movement::Model,
    pub inbound_movement: inventory_movement::Model,
}

/// One (product, expected quantity) pair from a physical count.
#[derive(Debug, Clone)]
pub struct ExpectedCount {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub expected_quantity: Decimal,
    pub unit_cost: Option<Decimal>,
}

#[derive(Debug, Clone)]
pub struct VarianceRecord {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub system_quantity: Decimal,
    pub expected_quantity: Decimal,
    pub variance: Decimal,
    pub variance_value: Option<Decimal>,
    pub movement_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct ReconciliationResult {
    pub location_id: Uuid,
    pub total_items: u64,
    pub items_with_variance: u64,
    pub levels_created: u64,
    pub accuracy_percentage: Decimal,
    pub variances: Vec<VarianceRecord>,
    pub completed_at: chrono::DateTime<Utc>,
}

#[derive(Clone)]
pub struct PerpetualInventoryService {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
}

impl PerpetualInventoryService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Loads the level row for a key, matching the variant dimension
    /// exhaustively.
    pub(crate) async fn find_level<C: ConnectionTrait>(
        conn: &C,
        key: &LevelKey,
    ) -> Result<Option<inventory_level::Model>, ServiceError> {
        let mut query = InventoryLevel::find()
            .filter(inventory_level::Column::TenantId.eq(key.tenant_id))
            .filter(inventory_level::Column::ProductId.eq(key.product_id))
            .filter(inventory_level::Column::LocationId.eq(key.location_id));

        query = match key.variant_id {
            Some(variant_id) => query.filter(inventory_level::Column::VariantId.eq(variant_id)),
            None => query.filter(inventory_level::Column::VariantId.is_null()),
        };

        query.one(conn).await.map_err(ServiceError::db_error)
    }

    async fn require_level<C: ConnectionTrait>(
        conn: &C,
        key: &LevelKey,
    ) -> Result<inventory_level::Model, ServiceError> {
        Self::find_level(conn, key).await?.ok_or_else(|| {
            ServiceError::NotFound(format!(
                "no inventory level for product {} at location {}",
                key.product_id, key.location_id
            ))
        })
    }

    /// Writes new quantities onto a level row with an optimistic version
    /// check. Zero rows affected means another writer won the race.
    pub(crate) async fn apply_level_update<C: ConnectionTrait>(
        conn: &C,
        level: &inventory_level::Model,
        new_current: Decimal,
        new_reserved: Decimal,
    ) -> Result<inventory_level::Model, ServiceError> {
        let new_available = new_current - new_reserved;

        let result = InventoryLevel::update_many()
            .col_expr(inventory_level::Column::CurrentLevel, Expr::value(new_current))
            .col_expr(
                inventory_level::Column::AvailableLevel,
                Expr::value(new_available),
            )
            .col_expr(
                inventory_level::Column::ReservedLevel,
                Expr::value(new_reserved),
            )
            .col_expr(
                inventory_level::Column::Version,
                Expr::value(level.version + 1),
            )
            .col_expr(inventory_level::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(inventory_level::Column::Id.eq(level.id))
            .filter(inventory_level::Column::Version.eq(level.version))
            .exec(conn)
            .await
            .map_err(ServiceError::db_error)?;

        if result.rows_affected == 0 {
            return Err(ServiceError::ConcurrentModification(level.id));
        }

        InventoryLevel::find_by_id(level.id)
            .one(conn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::InternalError(format!("level {} vanished mid-update", level.id))
            })
    }

    /// Applies a movement's delta to the named batch within the caller's
    /// transaction. Terminal batches block the change.
    async fn adjust_batch_quantity<C: ConnectionTrait>(
        conn: &C,
        key: &LevelKey,
        batch_number: &str,
        delta: Decimal,
    ) -> Result<inventory_batch::Model, ServiceError> {
        let batch = InventoryBatch::find()
            .filter(inventory_batch::Column::TenantId.eq(key.tenant_id))
            .filter(inventory_batch::Column::ProductId.eq(key.product_id))
            .filter(inventory_batch::Column::LocationId.eq(key.location_id))
            .filter(inventory_batch::Column::BatchNumber.eq(batch_number))
            .one(conn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "batch {} not found at location {}",
                    batch_number, key.location_id
                ))
            })?;

        let status = batch.status().ok_or_else(|| {
            ServiceError::InternalError(format!("batch {} has unknown status", batch.id))
        })?;
        if status.is_terminal() {
            return Err(ServiceError::InvalidOperation(format!(
                "batch {} is {} and cannot change quantity",
                batch_number,
                status.as_str()
            )));
        }

        let new_quantity = batch.current_quantity + delta;
        if new_quantity < Decimal::ZERO || new_quantity > batch.original_quantity {
            return Err(ServiceError::InvalidOperation(format!(
                "batch {} quantity {} out of range 0..={}",
                batch_number, new_quantity, batch.original_quantity
            )));
        }

        let next_status = if new_quantity.is_zero() {
            BatchStatus::Consumed
        } else {
            BatchStatus::Active
        };

        let mut active: inventory_batch::ActiveModel = batch.into();
        active.current_quantity = Set(new_quantity);
        active.status = Set(next_status.as_str().to_string());
        active.updated_at = Set(Utc::now());
        active.update(conn).await.map_err(ServiceError::db_error)
    }

    /// Records one quantity change and applies it to the level, the batch,
    /// and the notification sink as a single unit.
    #[instrument(skip(self, change), fields(product_id = %change.key.product_id, movement_type = ?change.movement_type))]
    pub async fn update_perpetual_inventory(
        &self,
        change: PerpetualUpdate,
    ) -> Result<PerpetualUpdateOutcome, ServiceError> {
        change.validate().map_err(|e| {
            MOVEMENT_FAILURES.inc();
            ServiceError::ValidationError(format!("invalid change request: {}", e))
        })?;

        let db = self.db_pool.as_ref();
        let change_for_txn = change.clone();

        let outcome = db
            .transaction::<_, PerpetualUpdateOutcome, ServiceError>(move |txn| {
                Box::pin(async move {
                    let change = change_for_txn;
                    let level = Self::require_level(txn, &change.key).await?;

                    let signed = change.movement_type.signed_quantity(change.quantity);
                    let new_level_qty = level.current_level + signed;

                    if new_level_qty < Decimal::ZERO
                        && !change.movement_type.allows_negative_result()
                    {
                        return Err(ServiceError::InvalidOperation(format!(
                            "movement would drive level negative: {} {} leaves {}",
                            change.movement_type.as_str(),
                            change.quantity,
                            new_level_qty
                        )));
                    }

                    // The ledger row is written before the level is touched;
                    // its snapshot is the audit record of this change.
                    let movement = MovementLedgerService::append(
                        txn,
                        NewMovement {
                            tenant_id: change.key.tenant_id,
                            product_id: change.key.product_id,
                            variant_id: change.key.variant_id,
                            location_id: change.key.location_id,
                            movement_type: change.movement_type,
                            quantity: change.quantity,
                            unit_cost: change.unit_cost,
                            previous_level: level.current_level,
                            new_level: new_level_qty,
                            reference_type: change.reference_type.clone(),
                            reference_id: change.reference_id,
                            batch_number: change.batch_number.clone(),
                            reason: change.reason.clone(),
                            requires_approval: change.requires_approval,
                            created_by: change.created_by,
                        },
                    )
                    .await?;

                    // Approval-gated movements are recorded but not applied;
                    // the level waits for the second actor.
                    if change.requires_approval {
                        return Ok(PerpetualUpdateOutcome {
                            movement,
                            level: None,
                        });
                    }

                    let updated = Self::apply_level_update(
                        txn,
                        &level,
                        new_level_qty,
                        level.reserved_level,
                    )
                    .await?;

                    if let Some(batch_number) = &change.batch_number {
                        Self::adjust_batch_quantity(txn, &change.key, batch_number, signed)
                            .await?;
                    }

                    Ok(PerpetualUpdateOutcome {
                        movement,
                        level: Some(updated),
                    })
                })
            })
            .await
            .map_err(|e| {
                MOVEMENT_FAILURES.inc();
                unwrap_txn_err(e)
            })?;

        MOVEMENTS_RECORDED.inc();
        self.notify_movement(&change, &outcome).await;

        Ok(outcome)
    }

    async fn notify_movement(&self, change: &PerpetualUpdate, outcome: &PerpetualUpdateOutcome) {
        self.event_sender
            .emit(Event::MovementRecorded {
                tenant_id: change.key.tenant_id,
                movement_id: outcome.movement.id,
                movement_type: outcome.movement.movement_type.clone(),
                quantity: outcome.movement.quantity,
                pending_approval: outcome.level.is_none(),
            })
            .await;

        if let Some(level) = &outcome.level {
            self.notify_level_changed(level, &outcome.movement).await;
        }
    }

    async fn notify_level_changed(
        &self,
        level: &inventory_level::Model,
        movement: &inventory_movement::Model,
    ) {
        self.event_sender
            .emit(Event::LevelChanged {
                tenant_id: level.tenant_id,
                product_id: level.product_id,
                variant_id: level.variant_id,
                location_id: level.location_id,
                previous_level: movement.previous_level,
                new_level: movement.new_level,
                movement_id: movement.id,
            })
            .await;

        if level.is_low_stock() {
            self.event_sender
                .emit(Event::LowStock {
                    tenant_id: level.tenant_id,
                    product_id: level.product_id,
                    location_id: level.location_id,
                    current_level: level.current_level,
                    reorder_point: level.reorder_point,
                    reorder_quantity: level.reorder_quantity,
                })
                .await;
        }
    }

    /// Approves a pending movement and applies its deferred level change.
    #[instrument(skip(self))]
    pub async fn approve_movement(
        &self,
        tenant_id: Uuid,
        movement_id: Uuid,
        approved_by: Uuid,
    ) -> Result<PerpetualUpdateOutcome, ServiceError> {
        let db = self.db_pool.as_ref();

        let outcome = db
            .transaction::<_, PerpetualUpdateOutcome, ServiceError>(move |txn| {
                Box::pin(async move {
                    let movement = Self::require_movement(txn, tenant_id, movement_id).await?;
                    let movement_type =
                        movement.movement_type().ok_or_else(|| {
                            ServiceError::InternalError(format!(
                                "movement {} has unknown type",
                                movement.id
                            ))
                        })?;

                    let key = LevelKey {
                        tenant_id,
                        product_id: movement.product_id,
                        variant_id: movement.variant_id,
                        location_id: movement.location_id,
                    };
                    let level = Self::require_level(txn, &key).await?;

                    // The stored quantity is already signed; re-derive the
                    // resulting level from the state at approval time.
                    let new_level_qty = level.current_level + movement.quantity;
                    if new_level_qty < Decimal::ZERO && !movement_type.allows_negative_result() {
                        return Err(ServiceError::InvalidOperation(format!(
                            "approving movement {} would drive level to {}",
                            movement.id, new_level_qty
                        )));
                    }

                    let batch_number = movement.batch_number.clone();
                    let quantity = movement.quantity;

                    let stamped = MovementLedgerService::stamp_approval(
                        txn,
                        movement,
                        ApprovalStatus::Approved,
                        approved_by,
                    )
                    .await?;

                    let updated =
                        Self::apply_level_update(txn, &level, new_level_qty, level.reserved_level)
                            .await?;

                    if let Some(batch_number) = &batch_number {
                        Self::adjust_batch_quantity(txn, &key, batch_number, quantity).await?;
                    }

                    Ok(PerpetualUpdateOutcome {
                        movement: stamped,
                        level: Some(updated),
                    })
                })
            })
            .await
            .map_err(unwrap_txn_err)?;

        self.event_sender
            .emit(Event::MovementApproved {
                tenant_id,
                movement_id,
                approved_by,
            })
            .await;
        if let Some(level) = &outcome.level {
            self.notify_level_changed(level, &outcome.movement).await;
        }

        Ok(outcome)
    }

    /// Rejects a pending movement. The row stays in the ledger forever as a
    /// rejected-but-recorded audit entry; the level is never touched.
    #[instrument(skip(self))]
    pub async fn reject_movement(
        &self,
        tenant_id: Uuid,
        movement_id: Uuid,
        rejected_by: Uuid,
    ) -> Result<inventory_movement::Model, ServiceError> {
        let db = self.db_pool.as_ref();

        let stamped = db
            .transaction::<_, inventory_movement::Model, ServiceError>(move |txn| {
                Box::pin(async move {
                    let movement = Self::require_movement(txn, tenant_id, movement_id).await?;
                    MovementLedgerService::stamp_approval(
                        txn,
                        movement,
                        ApprovalStatus::Rejected,
                        rejected_by,
                    )
                    .await
                })
            })
            .await
            .map_err(unwrap_txn_err)?;

        self.event_sender
            .emit(Event::MovementRejected {
                tenant_id,
                movement_id,
                rejected_by,
            })
            .await;

        Ok(stamped)
    }

    async fn require_movement<C: ConnectionTrait>(
        conn: &C,
        tenant_id: Uuid,
        movement_id: Uuid,
    ) -> Result<inventory_movement::Model, ServiceError> {
        inventory_movement::Entity::find_by_id(movement_id)
            .filter(inventory_movement::Column::TenantId.eq(tenant_id))
            .one(conn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("movement {} not found", movement_id)))
    }

    /// First stock registration for a key. Fails with `Conflict` when the
    /// key already has a level row.
    #[instrument(skip(self, new_level), fields(product_id = %new_level.key.product_id))]
    pub async fn initialize_level(
        &self,
        new_level: NewLevel,
    ) -> Result<inventory_level::Model, ServiceError> {
        if new_level.initial_quantity < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "initial quantity must not be negative".to_string(),
            ));
        }

        let db = self.db_pool.as_ref();
        let params = new_level.clone();

        let created = db
            .transaction::<_, inventory_level::Model, ServiceError>(move |txn| {
                Box::pin(async move {
                    let created = Self::create_level_in_txn(txn, &params).await?;

                    // A non-zero opening balance is itself a ledger event.
                    if params.initial_quantity > Decimal::ZERO {
                        MovementLedgerService::append(
                            txn,
                            NewMovement {
                                tenant_id: params.key.tenant_id,
                                product_id: params.key.product_id,
                                variant_id: params.key.variant_id,
                                location_id: params.key.location_id,
                                movement_type: MovementType::Recount,
                                quantity: params.initial_quantity,
                                unit_cost: params.unit_cost,
                                previous_level: Decimal::ZERO,
                                new_level: params.initial_quantity,
                                reference_type: Some("stock_registration".to_string()),
                                reference_id: None,
                                batch_number: None,
                                reason: Some("initial stock registration".to_string()),
                                requires_approval: false,
                                created_by: params.created_by,
                            },
                        )
                        .await?;
                    }

                    Ok(created)
                })
            })
            .await
            .map_err(unwrap_txn_err)?;

        self.event_sender
            .emit(Event::LevelInitialized {
                tenant_id: created.tenant_id,
                product_id: created.product_id,
                location_id: created.location_id,
                quantity: created.current_level,
            })
            .await;

        Ok(created)
    }

    async fn create_level_in_txn<C: ConnectionTrait>(
        conn: &C,
        params: &NewLevel,
    ) -> Result<inventory_level::Model, ServiceError> {
        if Self::find_level(conn, &params.key).await?.is_some() {
            return Err(ServiceError::Conflict(format!(
                "inventory level already exists for product {} at location {}",
                params.key.product_id, params.key.location_id
            )));
        }

        let now = Utc::now();
        let row = inventory_level::ActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(params.key.tenant_id),
            product_id: Set(params.key.product_id),
            variant_id: Set(params.key.variant_id),
            location_id: Set(params.key.location_id),
            current_level: Set(params.initial_quantity),
            available_level: Set(params.initial_quantity),
            reserved_level: Set(Decimal::ZERO),
            min_stock_level: Set(params.min_stock_level),
            max_stock_level: Set(params.max_stock_level),
            reorder_point: Set(params.reorder_point),
            reorder_quantity: Set(params.reorder_quantity),
            valuation_method: Set(params.valuation_method.as_str().to_string()),
            average_cost: Set(params.unit_cost),
            total_value: Set(params.unit_cost.map(|c| c * params.initial_quantity)),
            version: Set(1),
            active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        };

        row.insert(conn).await.map_err(ServiceError::db_error)
    }

    /// Moves stock between two locations atomically: either both the debit
    /// and the credit commit, or neither does. Rows are touched in
    /// lexicographic location-id order so opposite transfers cannot
    /// deadlock.
    #[instrument(skip(self, request), fields(product_id = %request.product_id, quantity = %request.quantity))]
    pub async fn transfer(
        &self,
        request: TransferRequest,
    ) -> Result<TransferOutcome, ServiceError> {
        request.validate().map_err(|e| {
            TRANSFER_FAILURES.inc();
            ServiceError::ValidationError(format!("invalid transfer request: {}", e))
        })?;
        if request.from_location_id == request.to_location_id {
            TRANSFER_FAILURES.inc();
            return Err(ServiceError::InvalidOperation(
                "cannot transfer inventory to the same location".to_string(),
            ));
        }

        let db = self.db_pool.as_ref();
        let req = request.clone();

        let outcome = db
            .transaction::<_, TransferOutcome, ServiceError>(move |txn| {
                Box::pin(async move {
                    let source_key = LevelKey {
                        tenant_id: req.tenant_id,
                        product_id: req.product_id,
                        variant_id: req.variant_id,
                        location_id: req.from_location_id,
                    };
                    let dest_key = source_key.at_location(req.to_location_id);

                    // Consistent lock order: lower location id first.
                    let (source, dest) = if req.from_location_id < req.to_location_id {
                        let source = Self::require_level(txn, &source_key).await?;
                        let dest = Self::find_or_create_dest(txn, &dest_key, &req).await?;
                        (source, dest)
                    } else {
                        let dest = Self::find_or_create_dest(txn, &dest_key, &req).await?;
                        let source = Self::require_level(txn, &source_key).await?;
                        (source, dest)
                    };

                    if source.available_level < req.quantity {
                        return Err(ServiceError::InsufficientStock(format!(
                            "available {} is less than requested {}",
                            source.available_level, req.quantity
                        )));
                    }

                    let reference_id = Uuid::new_v4();

                    let outbound = MovementLedgerService::append(
                        txn,
                        NewMovement {
                            tenant_id: req.tenant_id,
                            product_id: req.product_id,
                            variant_id: req.variant_id,
                            location_id: req.from_location_id,
                            movement_type: MovementType::TransferOut,
                            quantity: req.quantity,
                            unit_cost: None,
                            previous_level: source.current_level,
                            new_level: source.current_level - req.quantity,
                            reference_type: Some("transfer".to_string()),
                            reference_id: Some(reference_id),
                            batch_number: None,
                            reason: req.reason.clone(),
                            requires_approval: false,
                            created_by: req.created_by,
                        },
                    )
                    .await?;

                    let from_level = Self::apply_level_update(
                        txn,
                        &source,
                        source.current_level - req.quantity,
                        source.reserved_level,
                    )
                    .await?;

                    let inbound = MovementLedgerService::append(
                        txn,
                        NewMovement {
                            tenant_id: req.tenant_id,
                            product_id: req.product_id,
                            variant_id: req.variant_id,
                            location_id: req.to_location_id,
                            movement_type: MovementType::TransferIn,
                            quantity: req.quantity,
                            unit_cost: None,
                            previous_level: dest.current_level,
                            new_level: dest.current_level + req.quantity,
                            reference_type: Some("transfer".to_string()),
                            reference_id: Some(reference_id),
                            batch_number: None,
                            reason: req.reason.clone(),
                            requires_approval: false,
                            created_by: req.created_by,
                        },
                    )
                    .await?;

                    let to_level = Self::apply_level_update(
                        txn,
                        &dest,
                        dest.current_level + req.quantity,
                        dest.reserved_level,
                    )
                    .await?;

                    Ok(TransferOutcome {
                        reference_id,
                        from_level,
                        to_level,
                        outbound_movement: outbound,
                        inbound_movement: inbound,
                    })
                })
            })
            .await
            .map_err(|e| {
                TRANSFER_FAILURES.inc();
                unwrap_txn_err(e)
            })?;

        TRANSFERS.inc();

        self.event_sender
            .emit(Event::TransferCompleted {
                tenant_id: request.tenant_id,
                product_id: request.product_id,
                from_location_id: request.from_location_id,
                to_location_id: request.to_location_id,
                quantity: request.quantity,
                reference_id: outcome.reference_id,
            })
            .await;
        self.notify_level_changed(&outcome.from_level, &outcome.outbound_movement)
            .await;
        self.notify_level_changed(&outcome.to_level, &outcome.inbound_movement)
            .await;

        info!(
            product_id = %request.product_id,
            from_location = %request.from_location_id,
            to_location = %request.to_location_id,
            quantity = %request.quantity,
            "Inventory transferred"
        );

        Ok(outcome)
    }

    /// The destination of a transfer is created with a zero baseline inside
    /// the same transaction when it does not exist yet.
    async fn find_or_create_dest<C: ConnectionTrait>(
        conn: &C,
        key: &LevelKey,
        req: &TransferRequest,
    ) -> Result<inventory_level::Model, ServiceError> {
        if let Some(existing) = Self::find_level(conn, key).await? {
            return Ok(existing);
        }

        let params = NewLevel {
            key: *key,
            initial_quantity: Decimal::ZERO,
            min_stock_level: Decimal::ZERO,
            max_stock_level: None,
            reorder_point: Decimal::ZERO,
            reorder_quantity: Decimal::ZERO,
            valuation_method: ValuationMethod::Fifo,
            unit_cost: None,
            created_by: req.created_by,
        };
        Self::create_level_in_txn(conn, &params).await
    }

    /// Reconciles system quantities against a physical count for one
    /// location. Each item is corrected in its own transaction; variances
    /// beyond the tolerance produce signed adjustment movements.
    #[instrument(skip(self, counts), fields(location_id = %location_id, items = counts.len()))]
    pub async fn perform_inventory_reconciliation(
        &self,
        tenant_id: Uuid,
        location_id: Uuid,
        counts: Vec<ExpectedCount>,
        counted_by: Uuid,
    ) -> Result<ReconciliationResult, ServiceError> {
        let total_items = counts.len() as u64;
        let mut items_with_variance = 0u64;
        let mut levels_created = 0u64;
        let mut variances = Vec::new();

        for count in counts {
            let key = LevelKey {
                tenant_id,
                product_id: count.product_id,
                variant_id: count.variant_id,
                location_id,
            };

            let db = self.db_pool.as_ref();
            let existing = Self::find_level(db, &key).await?;

            match existing {
                None => {
                    // No system record: establish a baseline at the counted
                    // quantity. This is not a detected variance.
                    self.initialize_level(NewLevel {
                        key,
                        initial_quantity: count.expected_quantity,
                        min_stock_level: Decimal::ZERO,
                        max_stock_level: None,
                        reorder_point: Decimal::ZERO,
                        reorder_quantity: Decimal::ZERO,
                        valuation_method: ValuationMethod::Fifo,
                        unit_cost: count.unit_cost,
                        created_by: counted_by,
                    })
                    .await?;
                    levels_created += 1;
                }
                Some(level) => {
                    let variance = count.expected_quantity - level.current_level;
                    if variance.abs() <= RECONCILIATION_EPSILON {
                        continue;
                    }

                    let unit_cost = count.unit_cost.or(level.average_cost);
                    let outcome = self
                        .update_perpetual_inventory(PerpetualUpdate {
                            key,
                            movement_type: MovementType::Adjustment,
                            quantity: variance,
                            unit_cost,
                            reference_type: Some("reconciliation".to_string()),
                            reference_id: None,
                            batch_number: None,
                            reason: Some("physical count variance".to_string()),
                            requires_approval: false,
                            created_by: counted_by,
                        })
                        .await?;

                    let variance_value = unit_cost.map(|cost| variance * cost);
                    items_with_variance += 1;

                    self.event_sender
                        .emit(Event::VarianceDetected {
                            tenant_id,
                            product_id: count.product_id,
                            location_id,
                            variance,
                            variance_value,
                        })
                        .await;

                    variances.push(VarianceRecord {
                        product_id: count.product_id,
                        variant_id: count.variant_id,
                        system_quantity: level.current_level,
                        expected_quantity: count.expected_quantity,
                        variance,
                        variance_value,
                        movement_id: outcome.movement.id,
                    });
                }
            }
        }

        let accuracy_percentage = accuracy_percentage(total_items, items_with_variance);
        let completed_at = Utc::now();

        RECONCILIATIONS.inc();
        self.event_sender
            .emit(Event::ReconciliationCompleted {
                tenant_id,
                location_id,
                total_items,
                items_with_variance,
                accuracy_percentage,
                completed_at,
            })
            .await;

        info!(
            location_id = %location_id,
            total_items,
            items_with_variance,
            accuracy = %accuracy_percentage,
            "Reconciliation completed"
        );

        Ok(ReconciliationResult {
            location_id,
            total_items,
            items_with_variance,
            levels_created,
            accuracy_percentage,
            variances,
            completed_at,
        })
    }

    /// Reads one level row; query-side, may sit behind the cache.
    pub async fn get_level(
        &self,
        key: &LevelKey,
    ) -> Result<Option<inventory_level::Model>, ServiceError> {
        Self::find_level(self.db_pool.as_ref(), key).await
    }

    /// Active levels at or under their reorder point.
    #[instrument(skip(self))]
    pub async fn low_stock_levels(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<inventory_level::Model>, ServiceError> {
        let db = self.db_pool.as_ref();

        InventoryLevel::find()
            .filter(inventory_level::Column::TenantId.eq(tenant_id))
            .filter(inventory_level::Column::Active.eq(true))
            .filter(
                Expr::col(inventory_level::Column::CurrentLevel)
                    .lte(Expr::col(inventory_level::Column::ReorderPoint)),
            )
            .order_by_asc(inventory_level::Column::ProductId)
            .all(db)
            .await
            .map_err(ServiceError::db_error)
    }

    /// Soft-deactivates a level row; history and the row itself remain.
    #[instrument(skip(self))]
    pub async fn deactivate_level(&self, key: &LevelKey) -> Result<(), ServiceError> {
        let db = self.db_pool.as_ref();
        let level = Self::require_level(db, key).await?;

        let mut active: inventory_level::ActiveModel = level.into();
        active.active = Set(false);
        active.updated_at = Set(Utc::now());
        active.update(db).await.map_err(ServiceError::db_error)?;

        Ok(())
    }
}

/// `(total - with_variance) / total * 100`, clamped to [0, 100] and defined
/// as 100 for an empty count.
fn accuracy_percentage(total_items: u64, items_with_variance: u64) -> Decimal {
    if total_items == 0 {
        return dec!(100);
    }
    let total = Decimal::from(total_items);
    let with_variance = Decimal::from(items_with_variance);
    let accuracy = (total - with_variance) / total * dec!(100);
    accuracy.clamp(Decimal::ZERO, dec!(100))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accuracy_is_100_for_empty_counts() {
        assert_eq!(accuracy_percentage(0, 0), dec!(100));
    }

    #[test]
    fn accuracy_scales_with_variances() {
        assert_eq!(accuracy_percentage(4, 1), dec!(75));
        assert_eq!(accuracy_percentage(10, 0), dec!(100));
        assert_eq!(accuracy_percentage(3, 3), dec!(0));
    }

    #[test]
    fn accuracy_clamps_even_if_variances_exceed_total() {
        assert_eq!(accuracy_percentage(2, 5), dec!(0));
    }

    #[test]
    fn transfer_request_rejects_non_positive_quantity() {
        let request = TransferRequest {
            tenant_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            variant_id: None,
            from_location_id: Uuid::new_v4(),
            to_location_id: Uuid::new_v4(),
            quantity: Decimal::ZERO,
            reason: None,
            created_by: Uuid::new_v4(),
        };
        assert!(request.validate().is_err());

        let negative = TransferRequest {
            quantity: dec!(-1),
            ..request
        };
        assert!(negative.validate().is_err());
    }
}
