//! Multi-method cost valuation.
//!
//! Read-only: valuation consumes batch tracker output and ledger history but
//! never mutates either. FEFO is a pick-order policy, not a valuation
//! method; callers choose among FIFO, LIFO, average, and specific.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use std::sync::Arc;
use tracing::instrument;

use crate::db::DbPool;
use crate::entities::inventory_batch::{self, BatchStatus, Entity as InventoryBatch};
use crate::entities::inventory_level::ValuationMethod;
use crate::entities::inventory_movement::{self, ApprovalStatus, Entity as InventoryMovement};
use crate::errors::ServiceError;
use crate::services::batch_tracker::{sort_for_consumption, ConsumptionOrder};
use crate::services::perpetual_inventory::PerpetualInventoryService;
use crate::services::LevelKey;

/// One batch's contribution to a FIFO/LIFO valuation.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchConsumption {
    pub batch_id: uuid::Uuid,
    pub batch_number: String,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub value: Decimal,
}

/// Result of valuing a key's on-hand quantity.
#[derive(Debug, Clone)]
pub struct Valuation {
    pub method: ValuationMethod,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub total_value: Decimal,
    /// Per-batch consumption lines; present for FIFO/LIFO only.
    pub batches: Option<Vec<BatchConsumption>>,
}

#[derive(Clone)]
pub struct ValuationService {
    db_pool: Arc<DbPool>,
}

impl ValuationService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Values the current on-hand quantity of one key.
    ///
    /// Returns `None` when there is nothing to value: zero on-hand, or no
    /// cost-bearing history for the chosen method.
    #[instrument(skip(self), fields(product_id = %key.product_id, method = ?method))]
    pub async fn valuate(
        &self,
        key: &LevelKey,
        method: ValuationMethod,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<Option<Valuation>, ServiceError> {
        let db = self.db_pool.as_ref();

        let level = PerpetualInventoryService::find_level(db, key)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "no inventory level for product {} at location {}",
                    key.product_id, key.location_id
                ))
            })?;

        let on_hand = level.current_level;
        if on_hand <= Decimal::ZERO {
            return Ok(None);
        }

        match method {
            ValuationMethod::Fifo => self.valuate_by_walk(key, on_hand, ConsumptionOrder::Fifo, as_of).await,
            ValuationMethod::Lifo => self.valuate_by_walk(key, on_hand, ConsumptionOrder::Lifo, as_of).await,
            ValuationMethod::Average => self.valuate_average(key, on_hand, as_of).await,
            ValuationMethod::Specific => self.valuate_specific(key).await,
        }
    }

    async fn valuate_by_walk(
        &self,
        key: &LevelKey,
        on_hand: Decimal,
        order: ConsumptionOrder,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<Option<Valuation>, ServiceError> {
        let mut batches = self.active_batches(key).await?;
        if let Some(as_of) = as_of {
            batches.retain(|b| b.received_date <= as_of);
        }
        sort_for_consumption(&mut batches, order);

        let (valued_quantity, total_value, lines) = walk_batches(&batches, on_hand);
        if valued_quantity.is_zero() {
            return Ok(None);
        }

        let method = match order {
            ConsumptionOrder::Fifo => ValuationMethod::Fifo,
            ConsumptionOrder::Lifo => ValuationMethod::Lifo,
            ConsumptionOrder::Fefo => {
                return Err(ServiceError::InvalidOperation(
                    "FEFO is a consumption ordering, not a valuation method".to_string(),
                ))
            }
        };

        Ok(Some(Valuation {
            method,
            quantity: valued_quantity,
            unit_cost: total_value / valued_quantity,
            total_value,
            batches: Some(lines),
        }))
    }

    /// Weighted average over every applied, cost-bearing inbound movement up
    /// to `as_of`. Positive signed adjustments with a cost participate the
    /// same way receipts do.
    async fn valuate_average(
        &self,
        key: &LevelKey,
        on_hand: Decimal,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<Option<Valuation>, ServiceError> {
        let db = self.db_pool.as_ref();

        let mut query = InventoryMovement::find()
            .filter(inventory_movement::Column::TenantId.eq(key.tenant_id))
            .filter(inventory_movement::Column::ProductId.eq(key.product_id))
            .filter(inventory_movement::Column::LocationId.eq(key.location_id))
            .filter(inventory_movement::Column::Quantity.gt(Decimal::ZERO))
            .filter(inventory_movement::Column::UnitCost.gt(Decimal::ZERO))
            .filter(
                inventory_movement::Column::ApprovalStatus.eq(ApprovalStatus::Approved.as_str()),
            );

        query = match key.variant_id {
            Some(variant_id) => {
                query.filter(inventory_movement::Column::VariantId.eq(variant_id))
            }
            None => query.filter(inventory_movement::Column::VariantId.is_null()),
        };
        if let Some(as_of) = as_of {
            query = query.filter(inventory_movement::Column::CreatedAt.lte(as_of));
        }

        let movements = query.all(db).await.map_err(ServiceError::db_error)?;

        let pairs: Vec<(Decimal, Decimal)> = movements
            .iter()
            .filter_map(|m| m.unit_cost.map(|cost| (m.quantity, cost)))
            .collect();

        let Some(unit_cost) = weighted_average(&pairs) else {
            return Ok(None);
        };

        Ok(Some(Valuation {
            method: ValuationMethod::Average,
            quantity: on_hand,
            unit_cost,
            total_value: unit_cost * on_hand,
            batches: None,
        }))
    }

    /// Sums `current_quantity * unit_cost` across active batches; each
    /// unit's actual cost is preserved with no fungibility assumption.
    async fn valuate_specific(&self, key: &LevelKey) -> Result<Option<Valuation>, ServiceError> {
        let batches = self.active_batches(key).await?;

        let quantity: Decimal = batches.iter().map(|b| b.current_quantity).sum();
        if quantity.is_zero() {
            return Ok(None);
        }
        let total_value: Decimal = batches
            .iter()
            .map(|b| b.current_quantity * b.unit_cost)
            .sum();

        Ok(Some(Valuation {
            method: ValuationMethod::Specific,
            quantity,
            unit_cost: total_value / quantity,
            total_value,
            batches: None,
        }))
    }

    async fn active_batches(
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
}

/// Greedily consumes from ordered batches until `on_hand` is exhausted.
///
/// Returns the quantity actually valued (capped by what the batches hold),
/// the accumulated value, and the per-batch lines.
pub fn walk_batches(
    batches: &[inventory_batch::Model],
    on_hand: Decimal,
) -> (Decimal, Decimal, Vec<BatchConsumption>) {
    let mut remaining = on_hand;
    let mut total_value = Decimal::ZERO;
    let mut lines = Vec::new();

    for batch in batches {
        if remaining <= Decimal::ZERO {
            break;
        }
        let take = remaining.min(batch.current_quantity);
        if take <= Decimal::ZERO {
            continue;
        }
        let value = take * batch.unit_cost;
        total_value += value;
        remaining -= take;
        lines.push(BatchConsumption {
            batch_id: batch.id,
            batch_number: batch.batch_number.clone(),
            quantity: take,
            unit_cost: batch.unit_cost,
            value,
        });
    }

    (on_hand - remaining, total_value, lines)
}

/// `Σ(qty·cost) / Σ(qty)`, or `None` when no quantity participated.
pub fn weighted_average(pairs: &[(Decimal, Decimal)]) -> Option<Decimal> {
    let total_quantity: Decimal = pairs.iter().map(|(q, _)| *q).sum();
    if total_quantity.is_zero() {
        return None;
    }
    let weighted: Decimal = pairs.iter().map(|(q, c)| *q * *c).sum();
    Some(weighted / total_quantity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::inventory_batch::QualityStatus;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn batch(number: &str, quantity: Decimal, cost: Decimal, day: u32) -> inventory_batch::Model {
        inventory_batch::Model {
            id: Uuid::new_v4(),
            tenant_id: Uuid::nil(),
            product_id: Uuid::nil(),
            variant_id: None,
            location_id: Uuid::nil(),
            batch_number: number.to_string(),
            original_quantity: quantity,
            current_quantity: quantity,
            unit_cost: cost,
            received_date: Utc.with_ymd_and_hms(2024, 5, day, 9, 0, 0).unwrap(),
            expiry_date: None,
            quality_status: QualityStatus::Approved.as_str().to_string(),
            status: BatchStatus::Active.as_str().to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn fifo_walk_consumes_oldest_batches_first() {
        let mut batches = vec![batch("DAY1", dec!(10), dec!(5), 1), batch("DAY2", dec!(10), dec!(7), 2)];
        sort_for_consumption(&mut batches, ConsumptionOrder::Fifo);

        let (quantity, total, lines) = walk_batches(&batches, dec!(15));

        assert_eq!(quantity, dec!(15));
        assert_eq!(total, dec!(85));
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].quantity, dec!(10));
        assert_eq!(lines[1].quantity, dec!(5));
    }

    #[test]
    fn lifo_walk_consumes_newest_batches_first() {
        let mut batches = vec![batch("DAY1", dec!(10), dec!(5), 1), batch("DAY2", dec!(10), dec!(7), 2)];
        sort_for_consumption(&mut batches, ConsumptionOrder::Lifo);

        let (quantity, total, _) = walk_batches(&batches, dec!(15));

        assert_eq!(quantity, dec!(15));
        assert_eq!(total, dec!(95));
    }

    #[test]
    fn walk_caps_at_what_batches_hold() {
        let batches = vec![batch("ONLY", dec!(4), dec!(3), 1)];
        let (quantity, total, lines) = walk_batches(&batches, dec!(10));

        assert_eq!(quantity, dec!(4));
        assert_eq!(total, dec!(12));
        assert_eq!(lines.len(), 1);
    }

    #[test]
    fn weighted_average_weights_by_quantity() {
        let pairs = [(dec!(10), dec!(5)), (dec!(30), dec!(9))];
        assert_eq!(weighted_average(&pairs), Some(dec!(8)));
        assert_eq!(weighted_average(&[]), None);
    }
}
