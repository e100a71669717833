use crate::{
    cache::InMemoryCache,
    entities::coupon::{self, DiscountType, Entity as Coupon, Model as CouponModel},
    errors::ServiceError,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, instrument};
use uuid::Uuid;

const MSG_EMPTY_CODE: &str = "Ingresa un código de descuento";
const MSG_INVALID_CODE: &str = "Código de descuento inválido";
const MSG_EXPIRED_CODE: &str = "Código de descuento expirado";
const MSG_VALID_CODE: &str = "Código de descuento aplicado";
const MSG_LOOKUP_FAILED: &str = "Error al validar el código";

/// Outcome of a coupon validation. Always a value, never an error: the
/// checkout UI renders `message` inline without a catch path.
#[derive(Clone, Debug, Serialize)]
pub struct CouponValidation {
    pub valid: bool,
    pub message: String,
    pub coupon: Option<CouponModel>,
}

impl CouponValidation {
    fn ok(coupon: CouponModel) -> Self {
        Self {
            valid: true,
            message: MSG_VALID_CODE.to_string(),
            coupon: Some(coupon),
        }
    }

    fn invalid(message: &str) -> Self {
        Self {
            valid: false,
            message: message.to_string(),
            coupon: None,
        }
    }
}

/// Per-line-item discount computed for one product.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct LineDiscount {
    pub discount_amount: Decimal,
    pub final_price: Decimal,
}

impl LineDiscount {
    fn none(original_price: Decimal) -> Self {
        Self {
            discount_amount: Decimal::ZERO,
            final_price: original_price,
        }
    }
}

#[derive(Clone)]
pub struct DiscountService {
    db: Arc<DatabaseConnection>,
    cache: InMemoryCache,
}

impl DiscountService {
    pub fn new(db: Arc<DatabaseConnection>, cache: InMemoryCache) -> Self {
        Self { db, cache }
    }

    /// Validates a user-entered coupon code against the stored record.
    ///
    /// Not-found and inactive codes produce the identical message so callers
    /// cannot probe which codes exist. The validity window is inclusive on
    /// both ends. Store failures are logged and folded into a generic
    /// user-facing result.
    #[instrument(skip(self))]
    pub async fn validate_coupon(&self, raw_code: &str, now: DateTime<Utc>) -> CouponValidation {
        let code = normalize_code(raw_code);
        if code.is_empty() {
            return CouponValidation::invalid(MSG_EMPTY_CODE);
        }

        let coupon = match self.find_coupon(&code).await {
            Ok(found) => found,
            Err(e) => {
                error!(code = %code, error = %e, "coupon lookup failed");
                return CouponValidation::invalid(MSG_LOOKUP_FAILED);
            }
        };

        let coupon = match coupon {
            Some(c) if c.active => c,
            _ => return CouponValidation::invalid(MSG_INVALID_CODE),
        };

        if !has_sane_bounds(&coupon) {
            error!(code = %code, value = %coupon.discount_value, "coupon has out-of-range discount value");
            return CouponValidation::invalid(MSG_INVALID_CODE);
        }

        if !in_validity_window(&coupon, now) {
            return CouponValidation::invalid(MSG_EXPIRED_CODE);
        }

        CouponValidation::ok(coupon)
    }

    /// Coupon lookup by normalized code, TTL-cached. Only hits are cached so
    /// a freshly created coupon is visible immediately.
    async fn find_coupon(&self, code: &str) -> Result<Option<CouponModel>, ServiceError> {
        let cache_key = format!("coupon:{}", code);
        if let Ok(Some(cached)) = self.cache.get_json::<CouponModel>(&cache_key) {
            debug!(code = %code, "coupon cache hit");
            return Ok(Some(cached));
        }

        let coupon = Coupon::find()
            .filter(coupon::Column::Code.eq(code))
            .one(&*self.db)
            .await
            .map_err(ServiceError::from)?;

        if let Some(ref found) = coupon {
            if let Err(e) = self.cache.set_json(&cache_key, found) {
                debug!(code = %code, error = %e, "failed to cache coupon");
            }
        }

        Ok(coupon)
    }

    /// Coupons usable for admin preview: active and not yet past their end
    /// date. `valid_from` is intentionally not checked so coupons that have
    /// not started yet still appear.
    #[instrument(skip(self))]
    pub async fn list_active_coupons(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<CouponModel>, ServiceError> {
        let coupons = Coupon::find()
            .filter(coupon::Column::Active.eq(true))
            .filter(coupon::Column::ValidUntil.gte(now))
            .all(&*self.db)
            .await
            .map_err(ServiceError::from)?;

        Ok(coupons)
    }
}

/// Computes the discount for a single line item. Pure and deterministic.
///
/// A coupon that does not list the product yields zero discount; that is a
/// normal outcome, not an error. The amount is clamped to `[0, original_price]`
/// so the final price can neither go negative nor exceed the original.
pub fn compute_line_discount(
    product_id: Uuid,
    original_price: Decimal,
    coupon: &CouponModel,
) -> LineDiscount {
    if !coupon.applies_to(product_id) {
        return LineDiscount::none(original_price);
    }

    let raw = match coupon.discount_type {
        DiscountType::Percentage => original_price * coupon.discount_value / Decimal::from(100),
        DiscountType::Fixed => coupon.discount_value,
    };

    let discount_amount = raw.max(Decimal::ZERO).min(original_price);

    LineDiscount {
        discount_amount,
        final_price: original_price - discount_amount,
    }
}

fn normalize_code(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Both window bounds are inclusive: a coupon is redeemable at the exact
/// `valid_from` and `valid_until` instants.
fn in_validity_window(coupon: &CouponModel, now: DateTime<Utc>) -> bool {
    now >= coupon.valid_from && now <= coupon.valid_until
}

/// A percentage outside [0, 100] or a negative fixed amount would either
/// zero the price or increase it; such records are treated as invalid.
fn has_sane_bounds(coupon: &CouponModel) -> bool {
    match coupon.discount_type {
        DiscountType::Percentage => {
            coupon.discount_value >= Decimal::ZERO && coupon.discount_value <= Decimal::from(100)
        }
        DiscountType::Fixed => coupon.discount_value >= Decimal::ZERO,
    }
}
