//! Payment reconciliation: maps gateway payment states onto the order
//! lifecycle and applies the approved-payment side effects exactly once.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    TransactionTrait,
};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::{
        order::{self, ActiveModel as OrderActiveModel, Entity as OrderEntity},
        order_item::{self, Entity as OrderItemEntity},
        product::{ActiveModel as ProductActiveModel, Entity as ProductEntity},
        OrderStatus,
    },
    errors::ServiceError,
    notifications::{EmailMessage, EmailSender},
    services::mercadopago::{PaymentDetails, PaymentGateway},
};

/// Maps a raw gateway payment status onto the order lifecycle. Unknown
/// statuses park the order in `pending` rather than failing the delivery.
pub fn map_payment_status(gateway_status: &str) -> OrderStatus {
    match gateway_status {
        "approved" => OrderStatus::Confirmed,
        "pending" | "in_process" => OrderStatus::Pending,
        "rejected" | "cancelled" => OrderStatus::Cancelled,
        _ => OrderStatus::Pending,
    }
}

/// What a processed delivery did, mostly for logging and tests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconciliationOutcome {
    /// Order updated; `effects_fired` is true when stock was decremented and
    /// the confirmation email was dispatched.
    Updated {
        order_id: Uuid,
        new_status: OrderStatus,
        effects_fired: bool,
    },
    /// Delivery absorbed without touching any order.
    Skipped { reason: String },
}

#[derive(Clone)]
pub struct ReconciliationService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    email: Arc<dyn EmailSender>,
    notification_email: Option<String>,
}

impl ReconciliationService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        email: Arc<dyn EmailSender>,
        notification_email: Option<String>,
    ) -> Self {
        Self {
            db,
            gateway,
            email,
            notification_email,
        }
    }

    /// Processes one payment event end to end.
    ///
    /// The order transition and all stock decrements commit as a single
    /// transaction. The side-effect guard (new gateway status `approved` AND
    /// stored status still `pending_payment`) is evaluated against the row
    /// read inside that transaction, and the order write is conditioned on
    /// the version it was read at; a replayed or concurrent duplicate
    /// delivery either sees the updated status or loses the compare-and-swap,
    /// so stock is never decremented twice.
    #[instrument(skip(self))]
    pub async fn process_payment_event(
        &self,
        payment_id: &str,
    ) -> Result<ReconciliationOutcome, ServiceError> {
        // The webhook payload is not trusted for financial data; fetch the
        // payment from the gateway.
        let payment = self.gateway.get_payment(payment_id).await?;

        let order_ref = match payment.external_reference.as_deref() {
            Some(r) if !r.is_empty() && r != "undefined" => r.to_string(),
            _ => {
                warn!(payment_id, "payment has no usable external_reference; skipping");
                return Ok(ReconciliationOutcome::Skipped {
                    reason: "missing external_reference".to_string(),
                });
            }
        };

        let Ok(order_id) = Uuid::parse_str(&order_ref) else {
            warn!(payment_id, order_ref = %order_ref, "external_reference is not an order id; skipping");
            return Ok(ReconciliationOutcome::Skipped {
                reason: "malformed external_reference".to_string(),
            });
        };

        let new_status = map_payment_status(&payment.status);

        let txn = self.db.begin().await.map_err(ServiceError::DatabaseError)?;

        let Some(order) = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?
        else {
            info!(payment_id, %order_id, "order not found for payment; skipping");
            return Ok(ReconciliationOutcome::Skipped {
                reason: "order not found".to_string(),
            });
        };

        let previous_status = order.status.clone();
        let customer_email = order.customer_email.clone();
        let order_number = order.order_number.clone();
        let is_terminal = matches!(
            OrderStatus::parse(&previous_status),
            Some(OrderStatus::Delivered) | Some(OrderStatus::Cancelled)
        );

        // At-least-once delivery guard: effects fire only on the transition
        // out of pending_payment into an approved payment.
        let effects_fired = payment.status == "approved"
            && previous_status == OrderStatus::PendingPayment.as_str();

        let version = order.version;
        let mut active: OrderActiveModel = order.into();
        if !is_terminal {
            active.status = Set(new_status.as_str().to_string());
        }
        active.payment_status = Set(Some(payment.status.clone()));
        active.payment_id = Set(Some(payment.id.clone()));
        active.payment_details = Set(Some(payment_snapshot(&payment)));
        active.updated_at = Set(Some(Utc::now()));
        active.version = Set(version + 1);

        // Compare-and-swap on the version read in this transaction. A
        // concurrent delivery that committed first bumped the version, so a
        // writer holding a stale snapshot matches zero rows and must not
        // apply its effects either.
        let updated = OrderEntity::update_many()
            .set(active)
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Version.eq(version))
            .exec(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;

        if updated.rows_affected == 0 {
            warn!(
                payment_id,
                %order_id,
                "order changed concurrently; skipping delivery"
            );
            return Ok(ReconciliationOutcome::Skipped {
                reason: "concurrent update".to_string(),
            });
        }

        if effects_fired {
            self.decrement_stock_for_order(&txn, order_id).await?;
        }

        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        info!(
            payment_id,
            %order_id,
            previous_status = %previous_status,
            new_status = %new_status,
            effects_fired,
            "payment reconciled"
        );

        if effects_fired {
            self.send_confirmation_email(&order_number, &customer_email)
                .await;
        }

        Ok(ReconciliationOutcome::Updated {
            order_id,
            new_status,
            effects_fired,
        })
    }

    /// Decrements each line item's product stock by its ordered quantity,
    /// floored at zero, inside the caller's transaction.
    async fn decrement_stock_for_order(
        &self,
        txn: &sea_orm::DatabaseTransaction,
        order_id: Uuid,
    ) -> Result<(), ServiceError> {
        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(txn)
            .await
            .map_err(ServiceError::DatabaseError)?;

        for item in items {
            let Some(product) = ProductEntity::find_by_id(item.product_id)
                .one(txn)
                .await
                .map_err(ServiceError::DatabaseError)?
            else {
                warn!(product_id = %item.product_id, "order line references missing product; stock not adjusted");
                continue;
            };

            let new_stock = (product.stock - item.quantity).max(0);
            if product.stock < item.quantity {
                warn!(
                    product_id = %item.product_id,
                    stock = product.stock,
                    ordered = item.quantity,
                    "stock underflow floored at zero"
                );
            }

            let mut active: ProductActiveModel = product.into();
            active.stock = Set(new_stock);
            active.updated_at = Set(Some(Utc::now()));
            active.update(txn).await.map_err(ServiceError::DatabaseError)?;
        }

        Ok(())
    }

    /// Best-effort confirmation email. Failures are logged and swallowed so
    /// the webhook never reports failure because of the mail provider.
    async fn send_confirmation_email(&self, order_number: &str, customer_email: &str) {
        let to = self
            .notification_email
            .clone()
            .unwrap_or_else(|| customer_email.to_string());

        let message = EmailMessage {
            to,
            subject: format!("Nuevo pedido confirmado: {}", order_number),
            html: format!(
                "<p>El pedido <strong>{}</strong> fue confirmado y pagado.</p>",
                order_number
            ),
        };

        if let Err(e) = self.email.send(message).await {
            error!(order_number, error = %e, "confirmation email failed; continuing");
        }
    }
}

fn payment_snapshot(payment: &PaymentDetails) -> serde_json::Value {
    serde_json::json!({
        "amount": payment.transaction_amount,
        "method": payment.payment_method_id,
        "type": payment.payment_type_id,
        "status_detail": payment.status_detail,
        "date_approved": payment.date_approved,
        "date_created": payment.date_created,
        "last_updated": Utc::now(),
    })
}
