use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};

/// The kinds of quantity change the ledger records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MovementType {
    Sale,
    Purchase,
    Adjustment,
    TransferIn,
    TransferOut,
    Return,
    Damage,
    Theft,
    Expired,
    Recount,
    Production,
    Consumption,
}

/// How a movement type interprets its quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovementDirection {
    /// Adds `|quantity|` to the level.
    Inbound,
    /// Subtracts `|quantity|` from the level.
    Outbound,
    /// Applies the quantity exactly as written, sign included.
    Signed,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Sale => "sale",
            MovementType::Purchase => "purchase",
            MovementType::Adjustment => "adjustment",
            MovementType::TransferIn => "transfer_in",
            MovementType::TransferOut => "transfer_out",
            MovementType::Return => "return",
            MovementType::Damage => "damage",
            MovementType::Theft => "theft",
            MovementType::Expired => "expired",
            MovementType::Recount => "recount",
            MovementType::Production => "production",
            MovementType::Consumption => "consumption",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "sale" => Some(MovementType::Sale),
            "purchase" => Some(MovementType::Purchase),
            "adjustment" => Some(MovementType::Adjustment),
            "transfer_in" => Some(MovementType::TransferIn),
            "transfer_out" => Some(MovementType::TransferOut),
            "return" => Some(MovementType::Return),
            "damage" => Some(MovementType::Damage),
            "theft" => Some(MovementType::Theft),
            "expired" => Some(MovementType::Expired),
            "recount" => Some(MovementType::Recount),
            "production" => Some(MovementType::Production),
            "consumption" => Some(MovementType::Consumption),
            _ => None,
        }
    }

    pub fn direction(&self) -> MovementDirection {
        match self {
            MovementType::Sale
            | MovementType::TransferOut
            | MovementType::Damage
            | MovementType::Theft
            | MovementType::Expired
            | MovementType::Consumption => MovementDirection::Outbound,
            MovementType::Purchase
            | MovementType::TransferIn
            | MovementType::Return
            | MovementType::Production => MovementDirection::Inbound,
            MovementType::Adjustment | MovementType::Recount => MovementDirection::Signed,
        }
    }

    /// Normalizes a raw quantity to the signed delta this movement applies.
    pub fn signed_quantity(&self, quantity: Decimal) -> Decimal {
        match self.direction() {
            MovementDirection::Inbound => quantity.abs(),
            MovementDirection::Outbound => -quantity.abs(),
            MovementDirection::Signed => quantity,
        }
    }

    /// Whether the resulting level may go negative. Only signed corrections
    /// may represent stock pending investigation below zero.
    pub fn allows_negative_result(&self) -> bool {
        matches!(self, MovementType::Adjustment)
    }

    /// Inbound receipt types that carry cost into average valuation.
    pub fn is_cost_bearing_inbound(&self) -> bool {
        matches!(self.direction(), MovementDirection::Inbound)
    }
}

/// Outcome of the second-actor review on a movement recorded with
/// `requires_approval`. Stamped exactly once; rejected movements stay in the
/// ledger forever but are never applied to the level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ApprovalStatus::Pending),
            "approved" => Some(ApprovalStatus::Approved),
            "rejected" => Some(ApprovalStatus::Rejected),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "inventory_movements")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub location_id: Uuid,
    pub movement_type: String,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub quantity: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub unit_cost: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total_cost: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub previous_level: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub new_level: Decimal,
    pub reference_type: Option<String>,
    pub reference_id: Option<Uuid>,
    pub batch_number: Option<String>,
    pub reason: Option<String>,
    pub requires_approval: bool,
    pub approval_status: String,
    pub approved_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C: ConnectionTrait>(self, _db: &C, _insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        if let ActiveValue::NotSet = active_model.created_at {
            active_model.created_at = Set(Utc::now());
        }
        Ok(active_model)
    }
}

impl Model {
    pub fn movement_type(&self) -> Option<MovementType> {
        MovementType::from_str(&self.movement_type)
    }

    pub fn approval_status(&self) -> Option<ApprovalStatus> {
        ApprovalStatus::from_str(&self.approval_status)
    }

    /// A movement awaiting its second actor; the level has not been touched.
    pub fn is_pending_approval(&self) -> bool {
        self.requires_approval && self.approval_status() == Some(ApprovalStatus::Pending)
    }
}
