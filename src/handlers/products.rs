use axum::{
    extract::{Path, State},
    response::Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{entities::product::Model as ProductModel, errors::ServiceError, ApiResponse, AppState};

#[derive(Debug, Serialize, ToSchema)]
pub struct ProductResponse {
    pub id: Uuid,
    pub sku: String,
    pub name: String,
    #[schema(value_type = String)]
    pub price: Decimal,
    pub currency: String,
    pub stock: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<ProductModel> for ProductResponse {
    fn from(p: ProductModel) -> Self {
        Self {
            id: p.id,
            sku: p.sku,
            name: p.name,
            price: p.price,
            currency: p.currency,
            stock: p.stock,
            is_active: p.is_active,
            created_at: p.created_at,
        }
    }
}

// GET /api/v1/products
#[utoipa::path(
    get,
    path = "/api/v1/products",
    responses(
        (status = 200, description = "Active products", body = ApiResponse<Vec<ProductResponse>>)
    ),
    tag = "Products"
)]
pub async fn list_products(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<ProductResponse>>>, ServiceError> {
    let products = state.product_service.list_active().await?;
    Ok(Json(ApiResponse::success(
        products.into_iter().map(ProductResponse::from).collect(),
    )))
}

// GET /api/v1/products/{id}
#[utoipa::path(
    get,
    path = "/api/v1/products/{id}",
    params(("id" = Uuid, Path, description = "Product id")),
    responses(
        (status = 200, description = "Product", body = ApiResponse<ProductResponse>),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Products"
)]
pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<ProductResponse>>, ServiceError> {
    let product = state.product_service.get(id).await?;
    Ok(Json(ApiResponse::success(ProductResponse::from(product))))
}
