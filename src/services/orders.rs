use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    TransactionTrait,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    entities::{
        coupon::Model as CouponModel,
        order::{ActiveModel as OrderActiveModel, Entity as OrderEntity, Model as OrderModel},
        order_item::{
            self, ActiveModel as OrderItemActiveModel, Entity as OrderItemEntity,
            Model as OrderItemModel,
        },
        product::Entity as ProductEntity,
        OrderStatus,
    },
    errors::ServiceError,
    services::discounts::{compute_line_discount, DiscountService},
};

#[derive(Clone, Debug, Deserialize)]
pub struct CreateOrderItem {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub customer_email: String,
    pub items: Vec<CreateOrderItem>,
    pub coupon_code: Option<String>,
}

#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    discounts: DiscountService,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>, discounts: DiscountService) -> Self {
        Self { db, discounts }
    }

    /// Places an order in `pending_payment`. Unit prices come from the
    /// product records, never from the client; an optional coupon is applied
    /// per line through the discount engine.
    #[instrument(skip(self, request), fields(customer = %request.customer_email))]
    pub async fn create_order(
        &self,
        request: CreateOrderRequest,
    ) -> Result<(OrderModel, Vec<OrderItemModel>), ServiceError> {
        if request.items.is_empty() {
            return Err(ServiceError::ValidationError(
                "Order must contain at least one item".to_string(),
            ));
        }
        if request.items.iter().any(|i| i.quantity <= 0) {
            return Err(ServiceError::ValidationError(
                "Item quantities must be positive".to_string(),
            ));
        }

        let coupon = self.resolve_coupon(request.coupon_code.as_deref()).await?;

        let txn = self.db.begin().await.map_err(ServiceError::DatabaseError)?;

        let order_id = Uuid::new_v4();
        let now = Utc::now();
        let mut subtotal = Decimal::ZERO;
        let mut discount_total = Decimal::ZERO;
        let mut currency = "CLP".to_string();
        let mut item_models = Vec::with_capacity(request.items.len());

        for item in &request.items {
            let product = ProductEntity::find_by_id(item.product_id)
                .one(&txn)
                .await
                .map_err(ServiceError::DatabaseError)?
                .ok_or_else(|| {
                    ServiceError::ValidationError(format!(
                        "Unknown product {}",
                        item.product_id
                    ))
                })?;

            if !product.is_active {
                return Err(ServiceError::ValidationError(format!(
                    "Product {} is not available",
                    product.sku
                )));
            }

            currency = product.currency.clone();
            let quantity = Decimal::from(item.quantity);

            let per_unit_discount = coupon
                .as_ref()
                .map(|c| compute_line_discount(product.id, product.price, c).discount_amount)
                .unwrap_or(Decimal::ZERO);

            let line_total = (product.price - per_unit_discount) * quantity;
            subtotal += product.price * quantity;
            discount_total += per_unit_discount * quantity;

            item_models.push(OrderItemModel {
                id: Uuid::new_v4(),
                order_id,
                product_id: product.id,
                name: product.name.clone(),
                quantity: item.quantity,
                unit_price: product.price,
                discount: per_unit_discount,
                total_price: line_total,
                created_at: now,
            });
        }

        let order_number = self.next_order_number(&txn).await?;

        let order = OrderModel {
            id: order_id,
            order_number: order_number.clone(),
            customer_email: request.customer_email.clone(),
            status: OrderStatus::PendingPayment.as_str().to_string(),
            subtotal,
            discount_total,
            total_amount: subtotal - discount_total,
            currency,
            coupon_code: coupon.as_ref().map(|c| c.code.clone()),
            payment_status: None,
            payment_id: None,
            payment_details: None,
            created_at: now,
            updated_at: None,
            version: 1,
        };

        let active: OrderActiveModel = order.clone().into();
        active.insert(&txn).await.map_err(ServiceError::DatabaseError)?;

        for item in &item_models {
            let active: OrderItemActiveModel = item.clone().into();
            active.insert(&txn).await.map_err(ServiceError::DatabaseError)?;
        }

        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        info!(order_number = %order_number, total = %order.total_amount, "order placed");

        Ok((order, item_models))
    }

    /// Sequential order number, derived inside the creation transaction. The
    /// unique constraint on `order_number` catches the remaining collision
    /// window between concurrent placements.
    async fn next_order_number(
        &self,
        txn: &sea_orm::DatabaseTransaction,
    ) -> Result<String, ServiceError> {
        let count = OrderEntity::find()
            .count(txn)
            .await
            .map_err(ServiceError::DatabaseError)?;
        Ok(format!("ORD-{:06}", count + 1))
    }

    #[instrument(skip(self))]
    pub async fn get_order(
        &self,
        order_id: Uuid,
    ) -> Result<(OrderModel, Vec<OrderItemModel>), ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        Ok((order, items))
    }

    /// Resolves an optional coupon code through the discount engine. A code
    /// that fails validation rejects the order with the engine's user-facing
    /// message.
    async fn resolve_coupon(
        &self,
        coupon_code: Option<&str>,
    ) -> Result<Option<CouponModel>, ServiceError> {
        let Some(code) = coupon_code else {
            return Ok(None);
        };

        let validation = self.discounts.validate_coupon(code, Utc::now()).await;
        if !validation.valid {
            return Err(ServiceError::ValidationError(validation.message));
        }

        Ok(validation.coupon)
    }
}
