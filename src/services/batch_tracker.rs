//! Batch/lot tracker.
//!
//! Partitions a key's stock into cost-bearing receipt lots and supplies the
//! ordered consumption sequences (FIFO/LIFO/FEFO) the pick and valuation
//! paths walk.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::inventory_batch::{self, BatchStatus, Entity as InventoryBatch, QualityStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::{unwrap_txn_err, LevelKey};

/// Consumption orderings over a key's active batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumptionOrder {
    /// Oldest received date first.
    Fifo,
    /// Newest received date first.
    Lifo,
    /// Soonest expiry first; batches without an expiry sort last.
    Fefo,
}

impl ConsumptionOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsumptionOrder::Fifo => "fifo",
            ConsumptionOrder::Lifo => "lifo",
            ConsumptionOrder::Fefo => "fefo",
        }
    }
}

/// A new receipt lot.
#[derive(Debug, Clone)]
pub struct NewBatch {
    pub key: LevelKey,
    pub batch_number: String,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub received_date: Option<DateTime<Utc>>,
    pub expiry_date: Option<NaiveDate>,
    pub quality_status: QualityStatus,
}

#[derive(Clone)]
pub struct BatchTrackerService {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
}

impl BatchTrackerService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Registers a receipt lot. Batch numbers are unique per
    /// (tenant, location); duplicates are a `Conflict`.
    #[instrument(skip(self, batch), fields(batch_number = %batch.batch_number))]
    pub async fn create_batch(
        &self,
        batch: NewBatch,
    ) -> Result<inventory_batch::Model, ServiceError> {
        if batch.quantity <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "batch quantity must be positive".to_string(),
            ));
        }

        let db = self.db_pool.as_ref();
        let params = batch.clone();

        let created = db
            .transaction::<_, inventory_batch::Model, ServiceError>(move |txn| {
                Box::pin(async move {
                    let existing = InventoryBatch::find()
                        .filter(inventory_batch::Column::TenantId.eq(params.key.tenant_id))
                        .filter(inventory_batch::Column::LocationId.eq(params.key.location_id))
                        .filter(inventory_batch::Column::BatchNumber.eq(params.batch_number.clone()))
                        .one(txn)
                        .await
                        .map_err(ServiceError::db_error)?;

                    if existing.is_some() {
                        return Err(ServiceError::Conflict(format!(
                            "batch {} already exists at location {}",
                            params.batch_number, params.key.location_id
                        )));
                    }

                    let now = Utc::now();
                    let row = inventory_batch::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        tenant_id: Set(params.key.tenant_id),
                        product_id: Set(params.key.product_id),
                        variant_id: Set(params.key.variant_id),
                        location_id: Set(params.key.location_id),
                        batch_number: Set(params.batch_number.clone()),
                        original_quantity: Set(params.quantity),
                        current_quantity: Set(params.quantity),
                        unit_cost: Set(params.unit_cost),
                        received_date: Set(params.received_date.unwrap_or(now)),
                        expiry_date: Set(params.expiry_date),
                        quality_status: Set(params.quality_status.as_str().to_string()),
                        status: Set(BatchStatus::Active.as_str().to_string()),
                        created_at: Set(now),
                        updated_at: Set(now),
                    };
                    row.insert(txn).await.map_err(ServiceError::db_error)
                })
            })
            .await
            .map_err(unwrap_txn_err)?;

        self.event_sender
            .emit(Event::BatchCreated {
                tenant_id: created.tenant_id,
                batch_id: created.id,
                batch_number: created.batch_number.clone(),
                quantity: created.original_quantity,
            })
            .await;

        info!(batch_id = %created.id, "Batch created");

        Ok(created)
    }

    /// Active batches of a key in the requested consumption order.
    #[instrument(skip(self))]
    pub async fn consumption_order(
        &self,
        key: &LevelKey,
        order: ConsumptionOrder,
    ) -> Result<Vec<inventory_batch::Model>, ServiceError> {
        let mut batches = self.list_active(key).await?;
        sort_for_consumption(&mut batches, order);
        Ok(batches)
    }

    /// Active batches of a key, unordered.
    pub async fn list_active(
        &self,
        key: &LevelKey,
    ) -> Result<Vec<inventory_batch::Model>, ServiceError> {
        let db = self.db_pool.as_ref();

        let mut query = InventoryBatch::find()
            .filter(inventory_batch::Column::TenantId.eq(key.tenant_id))
            .filter(inventory_batch::Column::ProductId.eq(key.product_id))
            .filter(inventory_batch::Column::LocationId.eq(key.location_id))
            .filter(inventory_batch::Column::Status.eq(BatchStatus::Active.as_str()));

        query = match key.variant_id {
            Some(variant_id) => query.filter(inventory_batch::Column::VariantId.eq(variant_id)),
            None => query.filter(inventory_batch::Column::VariantId.is_null()),
        };

        query.all(db).await.map_err(ServiceError::db_error)
    }

    /// Consumes quantity from one batch; at zero the batch transitions to
    /// consumed.
    #[instrument(skip(self))]
    pub async fn consume(
        &self,
        tenant_id: Uuid,
        batch_id: Uuid,
        quantity: Decimal,
        reason: Option<String>,
    ) -> Result<inventory_batch::Model, ServiceError> {
        if quantity <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "consumption quantity must be positive".to_string(),
            ));
        }

        let db = self.db_pool.as_ref();

        let updated = db
            .transaction::<_, inventory_batch::Model, ServiceError>(move |txn| {
                Box::pin(async move {
                    let batch = InventoryBatch::find_by_id(batch_id)
                        .filter(inventory_batch::Column::TenantId.eq(tenant_id))
                        .one(txn)
                        .await
                        .map_err(ServiceError::db_error)?
                        .ok_or_else(|| {
                            ServiceError::NotFound(format!("batch {} not found", batch_id))
                        })?;

                    if !batch.is_consumable() {
                        return Err(ServiceError::InvalidOperation(format!(
                            "batch {} is {} and cannot be consumed",
                            batch.batch_number, batch.status
                        )));
                    }
                    if batch.current_quantity < quantity {
                        return Err(ServiceError::InvalidOperation(format!(
                            "batch {} holds {} but {} was requested",
                            batch.batch_number, batch.current_quantity, quantity
                        )));
                    }

                    let remaining = batch.current_quantity - quantity;
                    let next_status = if remaining.is_zero() {
                        BatchStatus::Consumed
                    } else {
                        BatchStatus::Active
                    };

                    let mut active: inventory_batch::ActiveModel = batch.into();
                    active.current_quantity = Set(remaining);
                    active.status = Set(next_status.as_str().to_string());
                    active.updated_at = Set(Utc::now());
                    active.update(txn).await.map_err(ServiceError::db_error)
                })
            })
            .await
            .map_err(unwrap_txn_err)?;

        self.event_sender
            .emit(Event::BatchConsumed {
                tenant_id,
                batch_id,
                quantity,
                remaining: updated.current_quantity,
            })
            .await;

        info!(
            batch_id = %batch_id,
            quantity = %quantity,
            remaining = %updated.current_quantity,
            reason = reason.as_deref().unwrap_or("unspecified"),
            "Batch consumed"
        );

        Ok(updated)
    }

    /// Recalls every active batch sharing a number, across all locations.
    ///
    /// Idempotent: recalling an already-recalled number affects zero rows
    /// and emits nothing.
    #[instrument(skip(self))]
    pub async fn recall(
        &self,
        tenant_id: Uuid,
        batch_number: &str,
    ) -> Result<u64, ServiceError> {
        let db = self.db_pool.as_ref();

        let result = InventoryBatch::update_many()
            .col_expr(
                inventory_batch::Column::Status,
                Expr::value(BatchStatus::Recalled.as_str()),
            )
            .col_expr(inventory_batch::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(inventory_batch::Column::TenantId.eq(tenant_id))
            .filter(inventory_batch::Column::BatchNumber.eq(batch_number))
            .filter(inventory_batch::Column::Status.eq(BatchStatus::Active.as_str()))
            .exec(db)
            .await
            .map_err(ServiceError::db_error)?;

        if result.rows_affected > 0 {
            self.event_sender
                .emit(Event::BatchRecalled {
                    tenant_id,
                    batch_number: batch_number.to_string(),
                    batches_affected: result.rows_affected,
                })
                .await;
            info!(
                batch_number = %batch_number,
                batches_affected = result.rows_affected,
                "Batch recalled"
            );
        }

        Ok(result.rows_affected)
    }

    /// Synchronous expiry sweep: transitions past-expiry active batches to
    /// expired. Scheduling is the caller's responsibility.
    #[instrument(skip(self))]
    pub async fn mark_expired(
        &self,
        tenant_id: Uuid,
        as_of: NaiveDate,
    ) -> Result<u64, ServiceError> {
        let db = self.db_pool.as_ref();

        let expiring = InventoryBatch::find()
            .filter(inventory_batch::Column::TenantId.eq(tenant_id))
            .filter(inventory_batch::Column::Status.eq(BatchStatus::Active.as_str()))
            .filter(inventory_batch::Column::ExpiryDate.lte(as_of))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let mut expired = 0u64;
        for batch in expiring {
            let batch_id = batch.id;
            let batch_number = batch.batch_number.clone();

            let mut active: inventory_batch::ActiveModel = batch.into();
            active.status = Set(BatchStatus::Expired.as_str().to_string());
            active.updated_at = Set(Utc::now());
            active.update(db).await.map_err(ServiceError::db_error)?;

            expired += 1;
            self.event_sender
                .emit(Event::BatchExpired {
                    tenant_id,
                    batch_id,
                    batch_number,
                })
                .await;
        }

        if expired > 0 {
            info!(expired, "Expiry sweep transitioned batches");
        }

        Ok(expired)
    }

    /// Looks up one batch by number at a location.
    pub async fn find_by_number(
        &self,
        tenant_id: Uuid,
        location_id: Uuid,
        batch_number: &str,
    ) -> Result<Option<inventory_batch::Model>, ServiceError> {
        let db = self.db_pool.as_ref();

        InventoryBatch::find()
            .filter(inventory_batch::Column::TenantId.eq(tenant_id))
            .filter(inventory_batch::Column::LocationId.eq(location_id))
            .filter(inventory_batch::Column::BatchNumber.eq(batch_number))
            .one(db)
            .await
            .map_err(ServiceError::db_error)
    }
}

/// Sorts batches in place for the given consumption ordering. FEFO places
/// undated batches last and breaks expiry ties by received date.
pub fn sort_for_consumption(batches: &mut [inventory_batch::Model], order: ConsumptionOrder) {
    match order {
        ConsumptionOrder::Fifo => {
            batches.sort_by(|a, b| a.received_date.cmp(&b.received_date));
        }
        ConsumptionOrder::Lifo => {
            batches.sort_by(|a, b| b.received_date.cmp(&a.received_date));
        }
        ConsumptionOrder::Fefo => {
            batches.sort_by(|a, b| match (a.expiry_date, b.expiry_date) {
                (Some(ea), Some(eb)) => ea.cmp(&eb).then(a.received_date.cmp(&b.received_date)),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => a.received_date.cmp(&b.received_date),
            });
        }
    }
}
