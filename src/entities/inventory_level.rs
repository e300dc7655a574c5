use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One row per (tenant, product, variant-or-none, location).
///
/// `available_level` is maintained as `current_level - reserved_level` by
/// every writer; `version` increments on each successful mutation and backs
/// the optimistic concurrency check. Rows are soft-deactivated, never
/// deleted.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "inventory_levels")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub location_id: Uuid,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub current_level: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub available_level: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub reserved_level: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub min_stock_level: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub max_stock_level: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub reorder_point: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub reorder_quantity: Decimal,
    pub valuation_method: String,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub average_cost: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total_value: Option<Decimal>,
    pub version: i32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// Movements, batches, and reservations share the (tenant, product, variant,
// location) key rather than a foreign key to this row, so no ORM-level
// relations are declared.
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_low_stock(&self) -> bool {
        self.current_level <= self.reorder_point
    }
}

/// Costing convention used when valuing this level's on-hand quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValuationMethod {
    Fifo,
    Lifo,
    Average,
    Specific,
}

impl ValuationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValuationMethod::Fifo => "fifo",
            ValuationMethod::Lifo => "lifo",
            ValuationMethod::Average => "average",
            ValuationMethod::Specific => "specific",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "fifo" => Some(ValuationMethod::Fifo),
            "lifo" => Some(ValuationMethod::Lifo),
            "average" => Some(ValuationMethod::Average),
            "specific" => Some(ValuationMethod::Specific),
            _ => None,
        }
    }
}
