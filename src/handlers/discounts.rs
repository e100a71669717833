use axum::{extract::State, response::Json};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    entities::coupon::{DiscountType, Model as CouponModel},
    errors::ServiceError,
    ApiResponse, AppState,
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct ValidateDiscountRequest {
    pub code: String,
}

/// Coupon record as exposed over the API.
#[derive(Debug, Serialize, ToSchema)]
pub struct CouponResponse {
    pub id: Uuid,
    pub code: String,
    #[schema(value_type = String)]
    pub discount_type: DiscountType,
    #[schema(value_type = String)]
    pub discount_value: Decimal,
    pub applicable_product_ids: Vec<Uuid>,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub active: bool,
}

impl From<CouponModel> for CouponResponse {
    fn from(coupon: CouponModel) -> Self {
        let applicable_product_ids = coupon.product_ids();
        Self {
            id: coupon.id,
            code: coupon.code,
            discount_type: coupon.discount_type,
            discount_value: coupon.discount_value,
            applicable_product_ids,
            valid_from: coupon.valid_from,
            valid_until: coupon.valid_until,
            active: coupon.active,
        }
    }
}

/// Wire contract consumed inline by the checkout UI; field names are part of
/// the existing storefront contract.
#[derive(Debug, Serialize, ToSchema)]
pub struct DiscountValidationResponse {
    pub valido: bool,
    pub mensaje: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub descuento: Option<CouponResponse>,
}

// POST /api/v1/discounts/validate
#[utoipa::path(
    post,
    path = "/api/v1/discounts/validate",
    request_body = ValidateDiscountRequest,
    responses(
        (status = 200, description = "Validation outcome, valid or not", body = DiscountValidationResponse)
    ),
    tag = "Discounts"
)]
pub async fn validate_discount(
    State(state): State<AppState>,
    Json(request): Json<ValidateDiscountRequest>,
) -> Json<DiscountValidationResponse> {
    let validation = state
        .discount_service
        .validate_coupon(&request.code, Utc::now())
        .await;

    Json(DiscountValidationResponse {
        valido: validation.valid,
        mensaje: validation.message,
        descuento: validation.coupon.map(CouponResponse::from),
    })
}

// GET /api/v1/discounts/active
#[utoipa::path(
    get,
    path = "/api/v1/discounts/active",
    responses(
        (status = 200, description = "Active coupons, including not-yet-started ones", body = ApiResponse<Vec<CouponResponse>>)
    ),
    tag = "Discounts"
)]
pub async fn list_active_discounts(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<CouponResponse>>>, ServiceError> {
    let coupons = state
        .discount_service
        .list_active_coupons(Utc::now())
        .await?;

    Ok(Json(ApiResponse::success(
        coupons.into_iter().map(CouponResponse::from).collect(),
    )))
}
