use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
pub enum DiscountType {
    #[sea_orm(string_value = "percentage")]
    Percentage,
    #[sea_orm(string_value = "fixed")]
    Fixed,
}

/// Coupon record. `code` is stored normalized to uppercase; lookups must
/// normalize user input the same way before comparing.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "coupons")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(unique)]
    pub code: String,

    pub discount_type: DiscountType,
    pub discount_value: Decimal,

    /// JSON array of product UUIDs this coupon applies to. The coupon is
    /// per-line-item, not cart-wide.
    pub applicable_product_ids: Json,

    /// Inclusive validity window.
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,

    /// Kill-switch independent of the validity window.
    pub active: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Product ids parsed from the stored JSON array. Malformed entries are
    /// dropped rather than failing the whole coupon.
    pub fn product_ids(&self) -> Vec<Uuid> {
        self.applicable_product_ids
            .as_array()
            .map(|ids| {
                ids.iter()
                    .filter_map(|v| v.as_str())
                    .filter_map(|s| Uuid::parse_str(s).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn applies_to(&self, product_id: Uuid) -> bool {
        self.product_ids().contains(&product_id)
    }
}
