//! Append-only movement ledger.
//!
//! Movements are the system of record for every quantity change. A row is
//! immutable once written; the single permitted post-write mutation is the
//! one-shot approval stamp on movements recorded with `requires_approval`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::inventory_movement::{
    self, ApprovalStatus, Entity as InventoryMovement, MovementType,
};
use crate::errors::ServiceError;

/// Input for one ledger append. `previous_level`/`new_level` are captured by
/// the caller at write time and become the immutable audit snapshot.
#[derive(Debug, Clone)]
pub struct NewMovement {
    pub tenant_id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub location_id: Uuid,
    pub movement_type: MovementType,
    pub quantity: Decimal,
    pub unit_cost: Option<Decimal>,
    pub previous_level: Decimal,
    pub new_level: Decimal,
    pub reference_type: Option<String>,
    pub reference_id: Option<Uuid>,
    pub batch_number: Option<String>,
    pub reason: Option<String>,
    pub requires_approval: bool,
    pub created_by: Uuid,
}

/// Filters for ledger queries; unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct MovementFilter {
    pub product_id: Option<Uuid>,
    pub location_id: Option<Uuid>,
    pub movement_type: Option<MovementType>,
    pub reference_id: Option<Uuid>,
    pub batch_number: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct MovementLedgerService {
    db_pool: Arc<DbPool>,
}

impl MovementLedgerService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Appends one movement inside the caller's transaction.
    ///
    /// Validates the movement-type-to-sign contract before writing: the
    /// recorded `new_level` must equal `previous_level` plus the signed
    /// quantity. Nothing mutates when validation fails.
    pub async fn append<C: ConnectionTrait>(
        conn: &C,
        movement: NewMovement,
    ) -> Result<inventory_movement::Model, ServiceError> {
        let signed = movement.movement_type.signed_quantity(movement.quantity);
        let expected = movement.previous_level + signed;
        if movement.new_level != expected {
            return Err(ServiceError::ValidationError(format!(
                "movement level snapshot violates sign contract: {} + {} != {}",
                movement.previous_level, signed, movement.new_level
            )));
        }

        // Movements that never needed a second actor are effective at write
        // time and recorded as approved.
        let approval_status = if movement.requires_approval {
            ApprovalStatus::Pending
        } else {
            ApprovalStatus::Approved
        };

        let total_cost = movement.unit_cost.map(|cost| cost * signed.abs());

        let row = inventory_movement::ActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(movement.tenant_id),
            product_id: Set(movement.product_id),
            variant_id: Set(movement.variant_id),
            location_id: Set(movement.location_id),
            movement_type: Set(movement.movement_type.as_str().to_string()),
            quantity: Set(signed),
            unit_cost: Set(movement.unit_cost),
            total_cost: Set(total_cost),
            previous_level: Set(movement.previous_level),
            new_level: Set(movement.new_level),
            reference_type: Set(movement.reference_type),
            reference_id: Set(movement.reference_id),
            batch_number: Set(movement.batch_number),
            reason: Set(movement.reason),
            requires_approval: Set(movement.requires_approval),
            approval_status: Set(approval_status.as_str().to_string()),
            approved_by: Set(None),
            approved_at: Set(None),
            created_by: Set(movement.created_by),
            created_at: Set(Utc::now()),
        };

        let inserted = row.insert(conn).await.map_err(ServiceError::db_error)?;

        info!(
            movement_id = %inserted.id,
            movement_type = %inserted.movement_type,
            quantity = %inserted.quantity,
            pending_approval = inserted.is_pending_approval(),
            "Movement appended to ledger"
        );

        Ok(inserted)
    }

    /// Stamps the one-shot approval decision on a pending movement.
    ///
    /// Re-stamping is a `Conflict` regardless of the prior decision; the
    /// ledger never rewrites history.
    pub async fn stamp_approval<C: ConnectionTrait>(
        conn: &C,
        movement: inventory_movement::Model,
        decision: ApprovalStatus,
        actor: Uuid,
    ) -> Result<inventory_movement::Model, ServiceError> {
        if decision == ApprovalStatus::Pending {
            return Err(ServiceError::ValidationError(
                "approval decision must be approved or rejected".to_string(),
            ));
        }
        if !movement.is_pending_approval() {
            return Err(ServiceError::Conflict(format!(
                "movement {} is not pending approval",
                movement.id
            )));
        }

        let movement_id = movement.id;
        let mut active: inventory_movement::ActiveModel = movement.into();
        active.approval_status = Set(decision.as_str().to_string());
        active.approved_by = Set(Some(actor));
        active.approved_at = Set(Some(Utc::now()));

        let stamped = active.update(conn).await.map_err(ServiceError::db_error)?;

        info!(
            movement_id = %movement_id,
            decision = decision.as_str(),
            actor = %actor,
            "Approval stamped on movement"
        );

        Ok(stamped)
    }

    /// Queries the ledger newest-first with pagination.
    #[instrument(skip(self))]
    pub async fn query(
        &self,
        tenant_id: Uuid,
        filter: MovementFilter,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<inventory_movement::Model>, u64), ServiceError> {
        if page == 0 {
            return Err(ServiceError::ValidationError(
                "Page number must be greater than 0".to_string(),
            ));
        }
        if limit == 0 || limit > 1000 {
            return Err(ServiceError::ValidationError(
                "Limit must be between 1 and 1000".to_string(),
            ));
        }

        let db = &*self.db_pool;

        let mut query = InventoryMovement::find()
            .filter(inventory_movement::Column::TenantId.eq(tenant_id));

        if let Some(product_id) = filter.product_id {
            query = query.filter(inventory_movement::Column::ProductId.eq(product_id));
        }
        if let Some(location_id) = filter.location_id {
            query = query.filter(inventory_movement::Column::LocationId.eq(location_id));
        }
        if let Some(movement_type) = filter.movement_type {
            query = query.filter(
                inventory_movement::Column::MovementType.eq(movement_type.as_str()),
            );
        }
        if let Some(reference_id) = filter.reference_id {
            query = query.filter(inventory_movement::Column::ReferenceId.eq(reference_id));
        }
        if let Some(batch_number) = filter.batch_number {
            query = query.filter(inventory_movement::Column::BatchNumber.eq(batch_number));
        }
        if let Some(after) = filter.created_after {
            query = query.filter(inventory_movement::Column::CreatedAt.gte(after));
        }
        if let Some(before) = filter.created_before {
            query = query.filter(inventory_movement::Column::CreatedAt.lte(before));
        }

        let paginator = query
            .order_by_desc(inventory_movement::Column::CreatedAt)
            .paginate(db, limit);

        let total = paginator.num_items().await.map_err(ServiceError::db_error)?;
        let movements = paginator
            .fetch_page(page - 1)
            .await
            .map_err(ServiceError::db_error)?;

        Ok((movements, total))
    }

    /// Movements recorded with `requires_approval` that still await their
    /// second actor. Rejected movements stay in the ledger but are excluded.
    #[instrument(skip(self))]
    pub async fn find_pending_approval(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<inventory_movement::Model>, ServiceError> {
        let db = &*self.db_pool;

        let movements = InventoryMovement::find()
            .filter(inventory_movement::Column::TenantId.eq(tenant_id))
            .filter(inventory_movement::Column::RequiresApproval.eq(true))
            .filter(
                inventory_movement::Column::ApprovalStatus.eq(ApprovalStatus::Pending.as_str()),
            )
            .order_by_asc(inventory_movement::Column::CreatedAt)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        Ok(movements)
    }
}
