//! Reservation manager.
//!
//! A reservation holds back available quantity for a pending order without
//! touching on-hand stock. Releasing is deliberately not idempotent: a
//! double release is a caller bug we surface, unlike batch recall.

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::inventory_movement::MovementType;
use crate::entities::inventory_reservation::{
    self, Entity as InventoryReservation, ReservationStatus,
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::movement_ledger::{MovementLedgerService, NewMovement};
use crate::services::perpetual_inventory::PerpetualInventoryService;
use crate::services::{unwrap_txn_err, LevelKey};

/// Request to hold available quantity.
#[derive(Debug, Clone)]
pub struct ReserveRequest {
    pub key: LevelKey,
    pub quantity: Decimal,
    pub reserved_for: String,
    pub reference_id: Option<Uuid>,
    pub created_by: Uuid,
}

#[derive(Clone)]
pub struct InventoryReservationService {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
}

impl InventoryReservationService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Places a hold on available quantity.
    ///
    /// Insufficient availability is an expected business outcome, not a
    /// retryable fault: the caller must re-check and re-request.
    #[instrument(skip(self, request), fields(product_id = %request.key.product_id, quantity = %request.quantity))]
    pub async fn reserve(
        &self,
        request: ReserveRequest,
    ) -> Result<inventory_reservation::Model, ServiceError> {
        if request.quantity <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "reservation quantity must be positive".to_string(),
            ));
        }

        let db = self.db_pool.as_ref();
        let req = request.clone();

        let reservation = db
            .transaction::<_, inventory_reservation::Model, ServiceError>(move |txn| {
                Box::pin(async move {
                    let level = PerpetualInventoryService::find_level(txn, &req.key)
                        .await?
                        .ok_or_else(|| {
                            ServiceError::NotFound(format!(
                                "no inventory level for product {} at location {}",
                                req.key.product_id, req.key.location_id
                            ))
                        })?;

                    if level.available_level < req.quantity {
                        return Err(ServiceError::InsufficientStock(format!(
                            "available {} is less than requested {}",
                            level.available_level, req.quantity
                        )));
                    }

                    PerpetualInventoryService::apply_level_update(
                        txn,
                        &level,
                        level.current_level,
                        level.reserved_level + req.quantity,
                    )
                    .await?;

                    let row = inventory_reservation::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        tenant_id: Set(req.key.tenant_id),
                        product_id: Set(req.key.product_id),
                        variant_id: Set(req.key.variant_id),
                        location_id: Set(req.key.location_id),
                        quantity: Set(req.quantity),
                        reserved_for: Set(req.reserved_for.clone()),
                        reference_id: Set(req.reference_id),
                        status: Set(ReservationStatus::Active.as_str().to_string()),
                        created_by: Set(req.created_by),
                        created_at: Set(Utc::now()),
                        updated_at: Set(None),
                    };
                    row.insert(txn).await.map_err(ServiceError::db_error)
                })
            })
            .await
            .map_err(unwrap_txn_err)?;

        self.event_sender
            .emit(Event::ReservationCreated {
                tenant_id: reservation.tenant_id,
                reservation_id: reservation.id,
                product_id: reservation.product_id,
                location_id: reservation.location_id,
                quantity: reservation.quantity,
            })
            .await;

        info!(reservation_id = %reservation.id, "Reservation created");

        Ok(reservation)
    }

    /// Returns a held quantity to available stock.
    #[instrument(skip(self))]
    pub async fn release(
        &self,
        tenant_id: Uuid,
        reservation_id: Uuid,
    ) -> Result<inventory_reservation::Model, ServiceError> {
        let db = self.db_pool.as_ref();

        let released = db
            .transaction::<_, inventory_reservation::Model, ServiceError>(move |txn| {
                Box::pin(async move {
                    let reservation =
                        Self::require_reservation(txn, tenant_id, reservation_id).await?;
                    if !reservation.is_active() {
                        return Err(ServiceError::InvalidOperation(format!(
                            "reservation {} is {} and cannot be released",
                            reservation.id, reservation.status
                        )));
                    }

                    let key = LevelKey {
                        tenant_id,
                        product_id: reservation.product_id,
                        variant_id: reservation.variant_id,
                        location_id: reservation.location_id,
                    };
                    let level = PerpetualInventoryService::find_level(txn, &key)
                        .await?
                        .ok_or_else(|| {
                            ServiceError::NotFound(format!(
                                "no inventory level for reservation {}",
                                reservation.id
                            ))
                        })?;

                    PerpetualInventoryService::apply_level_update(
                        txn,
                        &level,
                        level.current_level,
                        level.reserved_level - reservation.quantity,
                    )
                    .await?;

                    let mut active: inventory_reservation::ActiveModel = reservation.into();
                    active.status = Set(ReservationStatus::Released.as_str().to_string());
                    active.updated_at = Set(Some(Utc::now()));
                    active.update(txn).await.map_err(ServiceError::db_error)
                })
            })
            .await
            .map_err(unwrap_txn_err)?;

        self.event_sender
            .emit(Event::ReservationReleased {
                tenant_id,
                reservation_id,
                quantity: released.quantity,
            })
            .await;

        info!(reservation_id = %reservation_id, "Reservation released");

        Ok(released)
    }

    /// Converts a hold into an outbound sale movement: current and reserved
    /// both drop by the held quantity, available is unchanged.
    #[instrument(skip(self))]
    pub async fn consume(
        &self,
        tenant_id: Uuid,
        reservation_id: Uuid,
        consumed_by: Uuid,
    ) -> Result<inventory_reservation::Model, ServiceError> {
        let db = self.db_pool.as_ref();

        let (consumed, movement, level) = db
            .transaction::<_, _, ServiceError>(move |txn| {
                Box::pin(async move {
                    let reservation =
                        Self::require_reservation(txn, tenant_id, reservation_id).await?;
                    if !reservation.is_active() {
                        return Err(ServiceError::InvalidOperation(format!(
                            "reservation {} is {} and cannot be consumed",
                            reservation.id, reservation.status
                        )));
                    }

                    let key = LevelKey {
                        tenant_id,
                        product_id: reservation.product_id,
                        variant_id: reservation.variant_id,
                        location_id: reservation.location_id,
                    };
                    let level = PerpetualInventoryService::find_level(txn, &key)
                        .await?
                        .ok_or_else(|| {
                            ServiceError::NotFound(format!(
                                "no inventory level for reservation {}",
                                reservation.id
                            ))
                        })?;

                    let movement = MovementLedgerService::append(
                        txn,
                        NewMovement {
                            tenant_id,
                            product_id: reservation.product_id,
                            variant_id: reservation.variant_id,
                            location_id: reservation.location_id,
                            movement_type: MovementType::Sale,
                            quantity: reservation.quantity,
                            unit_cost: None,
                            previous_level: level.current_level,
                            new_level: level.current_level - reservation.quantity,
                            reference_type: Some("reservation".to_string()),
                            reference_id: Some(reservation.id),
                            batch_number: None,
                            reason: Some(reservation.reserved_for.clone()),
                            requires_approval: false,
                            created_by: consumed_by,
                        },
                    )
                    .await?;

                    let updated = PerpetualInventoryService::apply_level_update(
                        txn,
                        &level,
                        level.current_level - reservation.quantity,
                        level.reserved_level - reservation.quantity,
                    )
                    .await?;

                    let mut active: inventory_reservation::ActiveModel = reservation.into();
                    active.status = Set(ReservationStatus::Consumed.as_str().to_string());
                    active.updated_at = Set(Some(Utc::now()));
                    let consumed = active.update(txn).await.map_err(ServiceError::db_error)?;

                    Ok((consumed, movement, updated))
                })
            })
            .await
            .map_err(unwrap_txn_err)?;

        self.event_sender
            .emit(Event::ReservationConsumed {
                tenant_id,
                reservation_id,
                movement_id: movement.id,
            })
            .await;
        self.event_sender
            .emit(Event::LevelChanged {
                tenant_id,
                product_id: level.product_id,
                variant_id: level.variant_id,
                location_id: level.location_id,
                previous_level: movement.previous_level,
                new_level: movement.new_level,
                movement_id: movement.id,
            })
            .await;

        info!(reservation_id = %reservation_id, movement_id = %movement.id, "Reservation consumed");

        Ok(consumed)
    }

    async fn require_reservation<C: sea_orm::ConnectionTrait>(
        conn: &C,
        tenant_id: Uuid,
        reservation_id: Uuid,
    ) -> Result<inventory_reservation::Model, ServiceError> {
        InventoryReservation::find_by_id(reservation_id)
            .filter(inventory_reservation::Column::TenantId.eq(tenant_id))
            .one(conn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("reservation {} not found", reservation_id))
            })
    }

    /// Active holds for one key, oldest first.
    #[instrument(skip(self))]
    pub async fn list_active(
        &self,
        key: &LevelKey,
    ) -> Result<Vec<inventory_reservation::Model>, ServiceError> {
        let db = self.db_pool.as_ref();

        let mut query = InventoryReservation::find()
            .filter(inventory_reservation::Column::TenantId.eq(key.tenant_id))
            .filter(inventory_reservation::Column::ProductId.eq(key.product_id))
            .filter(inventory_reservation::Column::LocationId.eq(key.location_id))
            .filter(
                inventory_reservation::Column::Status.eq(ReservationStatus::Active.as_str()),
            );

        query = match key.variant_id {
            Some(variant_id) => {
                query.filter(inventory_reservation::Column::VariantId.eq(variant_id))
            }
            None => query.filter(inventory_reservation::Column::VariantId.is_null()),
        };

        query
            .order_by_asc(inventory_reservation::Column::CreatedAt)
            .all(db)
            .await
            .map_err(ServiceError::db_error)
    }

    /// Sum of active holds for one key.
    pub async fn active_quantity(&self, key: &LevelKey) -> Result<Decimal, ServiceError> {
        let reservations = self.list_active(key).await?;
        Ok(reservations.iter().map(|r| r.quantity).sum())
    }
}
