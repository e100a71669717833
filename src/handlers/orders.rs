use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    entities::{order::Model as OrderModel, order_item::Model as OrderItemModel},
    errors::ServiceError,
    services::orders::{CreateOrderItem, CreateOrderRequest as ServiceCreateOrder},
    ApiResponse, AppState,
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateOrderItemRequest {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateOrderRequest {
    pub customer_email: String,
    pub items: Vec<CreateOrderItemRequest>,
    pub coupon_code: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderItemResponse {
    pub product_id: Uuid,
    pub name: String,
    pub quantity: i32,
    #[schema(value_type = String)]
    pub unit_price: Decimal,
    #[schema(value_type = String)]
    pub discount: Decimal,
    #[schema(value_type = String)]
    pub total_price: Decimal,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub order_number: String,
    pub customer_email: String,
    pub status: String,
    #[schema(value_type = String)]
    pub subtotal: Decimal,
    #[schema(value_type = String)]
    pub discount_total: Decimal,
    #[schema(value_type = String)]
    pub total_amount: Decimal,
    pub currency: String,
    pub coupon_code: Option<String>,
    pub payment_status: Option<String>,
    pub payment_id: Option<String>,
    pub items: Vec<OrderItemResponse>,
    pub created_at: DateTime<Utc>,
}

fn map_order(order: OrderModel, items: Vec<OrderItemModel>) -> OrderResponse {
    OrderResponse {
        id: order.id,
        order_number: order.order_number,
        customer_email: order.customer_email,
        status: order.status,
        subtotal: order.subtotal,
        discount_total: order.discount_total,
        total_amount: order.total_amount,
        currency: order.currency,
        coupon_code: order.coupon_code,
        payment_status: order.payment_status,
        payment_id: order.payment_id,
        items: items
            .into_iter()
            .map(|item| OrderItemResponse {
                product_id: item.product_id,
                name: item.name,
                quantity: item.quantity,
                unit_price: item.unit_price,
                discount: item.discount,
                total_price: item.total_price,
            })
            .collect(),
        created_at: order.created_at,
    }
}

// POST /api/v1/orders
#[utoipa::path(
    post,
    path = "/api/v1/orders",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order placed in pending_payment", body = ApiResponse<OrderResponse>),
        (status = 400, description = "Invalid items or coupon", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let (order, items) = state
        .order_service
        .create_order(ServiceCreateOrder {
            customer_email: request.customer_email,
            items: request
                .items
                .into_iter()
                .map(|i| CreateOrderItem {
                    product_id: i.product_id,
                    quantity: i.quantity,
                })
                .collect(),
            coupon_code: request.coupon_code,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(map_order(order, items))),
    ))
}

// GET /api/v1/orders/{id}
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order with items", body = ApiResponse<OrderResponse>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let (order, items) = state.order_service.get_order(id).await?;
    Ok(Json(ApiResponse::success(map_order(order, items))))
}
