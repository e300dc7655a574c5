use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A receipt lot of a product at a location.
///
/// `current_quantity` only moves down between receipts; `expired` and
/// `recalled` are terminal states that block further consumption.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "inventory_batches")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub location_id: Uuid,
    pub batch_number: String,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub original_quantity: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub current_quantity: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub unit_cost: Decimal,
    pub received_date: DateTime<Utc>,
    pub expiry_date: Option<NaiveDate>,
    pub quality_status: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchStatus {
    Active,
    Consumed,
    Expired,
    Recalled,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Active => "active",
            BatchStatus::Consumed => "consumed",
            BatchStatus::Expired => "expired",
            BatchStatus::Recalled => "recalled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(BatchStatus::Active),
            "consumed" => Some(BatchStatus::Consumed),
            "expired" => Some(BatchStatus::Expired),
            "recalled" => Some(BatchStatus::Recalled),
            _ => None,
        }
    }

    /// Terminal states block consumption and never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Expired | BatchStatus::Recalled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityStatus {
    Approved,
    Rejected,
    Quarantine,
    Testing,
}

impl QualityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityStatus::Approved => "approved",
            QualityStatus::Rejected => "rejected",
            QualityStatus::Quarantine => "quarantine",
            QualityStatus::Testing => "testing",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "approved" => Some(QualityStatus::Approved),
            "rejected" => Some(QualityStatus::Rejected),
            "quarantine" => Some(QualityStatus::Quarantine),
            "testing" => Some(QualityStatus::Testing),
            _ => None,
        }
    }
}

impl Model {
    pub fn status(&self) -> Option<BatchStatus> {
        BatchStatus::from_str(&self.status)
    }

    pub fn is_consumable(&self) -> bool {
        self.status() == Some(BatchStatus::Active)
    }

    pub fn is_expired_as_of(&self, as_of: NaiveDate) -> bool {
        self.expiry_date.map(|d| d <= as_of).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_status_round_trips() {
        for status in [
            BatchStatus::Active,
            BatchStatus::Consumed,
            BatchStatus::Expired,
            BatchStatus::Recalled,
        ] {
            assert_eq!(BatchStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(BatchStatus::from_str("scrapped"), None);
    }

    #[test]
    fn expired_and_recalled_are_terminal() {
        assert!(BatchStatus::Expired.is_terminal());
        assert!(BatchStatus::Recalled.is_terminal());
        assert!(!BatchStatus::Active.is_terminal());
        assert!(!BatchStatus::Consumed.is_terminal());
    }
}
