mod common;

use axum::http::{Method, StatusCode};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter};
use serde_json::json;
use storefront_api::entities::{
    order::{self, ActiveModel as OrderActiveModel, Entity as OrderEntity},
    product::Entity as ProductEntity,
};

use common::{response_json, TestApp};

#[tokio::test]
async fn first_approval_confirms_order_and_fires_effects() {
    let app = TestApp::new().await;

    let product = app.seed_product("SKU-001", Decimal::from(25000), 10).await;
    let (order, _) = app.seed_order("cliente@example.cl", vec![(product.id, 3)]).await;
    assert_eq!(order.status, "pending_payment");

    app.stub_payment("pay-1", "approved", Some(&order.id.to_string()));

    let response = app.signed_webhook("pay-1", "payment").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["received"], true);

    let stored = OrderEntity::find_by_id(order.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, "confirmed");
    assert_eq!(stored.payment_status.as_deref(), Some("approved"));
    assert_eq!(stored.payment_id.as_deref(), Some("pay-1"));
    assert!(stored.payment_details.is_some());

    let stored_product = ProductEntity::find_by_id(product.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored_product.stock, 7);

    assert_eq!(app.email.sent_count(), 1);
}

#[tokio::test]
async fn replayed_approval_does_not_repeat_effects() {
    let app = TestApp::new().await;

    let product = app.seed_product("SKU-002", Decimal::from(10000), 5).await;
    let (order, _) = app.seed_order("cliente@example.cl", vec![(product.id, 2)]).await;
    app.stub_payment("pay-2", "approved", Some(&order.id.to_string()));

    let first = app.signed_webhook("pay-2", "payment").await;
    assert_eq!(first.status(), StatusCode::OK);

    // Gateway redelivers the same approved event.
    let second = app.signed_webhook("pay-2", "payment").await;
    assert_eq!(second.status(), StatusCode::OK);

    let stored = OrderEntity::find_by_id(order.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, "confirmed");
    assert_eq!(stored.payment_status.as_deref(), Some("approved"));

    let stored_product = ProductEntity::find_by_id(product.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored_product.stock, 3, "stock must be decremented exactly once");

    assert_eq!(app.email.sent_count(), 1, "email must be sent exactly once");
}

#[tokio::test]
async fn stale_snapshot_writer_loses_the_version_race() {
    let app = TestApp::new().await;

    let product = app.seed_product("SKU-010", Decimal::from(12000), 10).await;
    let (order, _) = app.seed_order("cliente@example.cl", vec![(product.id, 2)]).await;
    let order_id = order.id;

    // Snapshot taken while the order is still pending_payment, as a second
    // in-flight delivery would hold it.
    let stale = OrderEntity::find_by_id(order_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    let stale_version = stale.version;

    app.stub_payment("pay-10", "approved", Some(&order_id.to_string()));
    let response = app.signed_webhook("pay-10", "payment").await;
    assert_eq!(response.status(), StatusCode::OK);

    // Replay the transition write from the stale snapshot with the same
    // version-conditioned update the service uses.
    let mut active: OrderActiveModel = stale.into();
    active.status = Set("confirmed".to_string());
    active.payment_status = Set(Some("approved".to_string()));
    active.version = Set(stale_version + 1);
    let result = OrderEntity::update_many()
        .set(active)
        .filter(order::Column::Id.eq(order_id))
        .filter(order::Column::Version.eq(stale_version))
        .exec(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(result.rows_affected, 0, "stale writer must match zero rows");

    let stored = OrderEntity::find_by_id(order_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, "confirmed");
    assert_eq!(stored.version, stale_version + 1);

    let stored_product = ProductEntity::find_by_id(product.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored_product.stock, 8, "stock decremented exactly once");
    assert_eq!(app.email.sent_count(), 1);
}

#[tokio::test]
async fn late_approval_on_delivered_order_keeps_status() {
    let app = TestApp::new().await;

    let product = app.seed_product("SKU-011", Decimal::from(7000), 5).await;
    let (order, _) = app.seed_order("cliente@example.cl", vec![(product.id, 1)]).await;

    // The order was already handed over before the gateway caught up.
    let mut active: OrderActiveModel = OrderEntity::find_by_id(order.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap()
        .into();
    active.status = Set("delivered".to_string());
    active.update(&*app.state.db).await.unwrap();

    app.stub_payment("pay-11", "approved", Some(&order.id.to_string()));
    let response = app.signed_webhook("pay-11", "payment").await;
    assert_eq!(response.status(), StatusCode::OK);

    let stored = OrderEntity::find_by_id(order.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, "delivered", "terminal status must not be re-entered");
    assert_eq!(stored.payment_status.as_deref(), Some("approved"));
    assert_eq!(stored.payment_id.as_deref(), Some("pay-11"));
    assert!(stored.payment_details.is_some());

    let stored_product = ProductEntity::find_by_id(product.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored_product.stock, 5, "late payment must not touch stock");
    assert_eq!(app.email.sent_count(), 0);
}

#[tokio::test]
async fn missing_signature_is_rejected_without_processing() {
    let app = TestApp::new().await;

    let product = app.seed_product("SKU-003", Decimal::from(5000), 4).await;
    let (order, _) = app.seed_order("cliente@example.cl", vec![(product.id, 1)]).await;
    app.stub_payment("pay-3", "approved", Some(&order.id.to_string()));

    let response = app
        .request(
            Method::POST,
            "/api/v1/mercadopago/webhook",
            Some(json!({
                "type": "payment",
                "action": "payment.updated",
                "data": { "id": "pay-3" }
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = response_json(response).await;
    assert_eq!(body["error"], "Invalid signature");

    let stored = OrderEntity::find_by_id(order.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, "pending_payment", "order must be untouched");
    assert_eq!(app.email.sent_count(), 0);
}

#[tokio::test]
async fn undefined_external_reference_is_absorbed() {
    let app = TestApp::new().await;

    let product = app.seed_product("SKU-004", Decimal::from(8000), 6).await;
    let (order, _) = app.seed_order("cliente@example.cl", vec![(product.id, 1)]).await;
    app.stub_payment("pay-4", "approved", Some("undefined"));

    let response = app.signed_webhook("pay-4", "payment").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["received"], true);

    let stored = OrderEntity::find_by_id(order.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, "pending_payment");
    assert_eq!(stored.payment_id, None);
}

#[tokio::test]
async fn unknown_order_reference_is_absorbed() {
    let app = TestApp::new().await;

    app.stub_payment(
        "pay-5",
        "approved",
        Some("3f0a5dd8-0000-0000-0000-000000000000"),
    );

    let response = app.signed_webhook("pay-5", "payment").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["received"], true);
}

#[tokio::test]
async fn rejected_payment_cancels_order_without_effects() {
    let app = TestApp::new().await;

    let product = app.seed_product("SKU-006", Decimal::from(15000), 9).await;
    let (order, _) = app.seed_order("cliente@example.cl", vec![(product.id, 2)]).await;
    app.stub_payment("pay-6", "rejected", Some(&order.id.to_string()));

    let response = app.signed_webhook("pay-6", "payment").await;
    assert_eq!(response.status(), StatusCode::OK);

    let stored = OrderEntity::find_by_id(order.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, "cancelled");
    assert_eq!(stored.payment_status.as_deref(), Some("rejected"));

    let stored_product = ProductEntity::find_by_id(product.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored_product.stock, 9, "rejected payment must not touch stock");
    assert_eq!(app.email.sent_count(), 0);
}

#[tokio::test]
async fn stock_decrement_floors_at_zero() {
    let app = TestApp::new().await;

    let product = app.seed_product("SKU-007", Decimal::from(3000), 2).await;
    let (order, _) = app.seed_order("cliente@example.cl", vec![(product.id, 5)]).await;
    app.stub_payment("pay-7", "approved", Some(&order.id.to_string()));

    let response = app.signed_webhook("pay-7", "payment").await;
    assert_eq!(response.status(), StatusCode::OK);

    let stored_product = ProductEntity::find_by_id(product.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored_product.stock, 0);
}

#[tokio::test]
async fn non_payment_events_are_ignored() {
    let app = TestApp::new().await;

    let product = app.seed_product("SKU-008", Decimal::from(2000), 3).await;
    let (order, _) = app.seed_order("cliente@example.cl", vec![(product.id, 1)]).await;
    app.stub_payment("pay-8", "approved", Some(&order.id.to_string()));

    let response = app.signed_webhook("pay-8", "plan").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["received"], true);

    let stored = OrderEntity::find_by_id(order.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, "pending_payment");
}

#[tokio::test]
async fn webhook_probe_answers_get() {
    let app = TestApp::new().await;

    let response = app
        .request(Method::GET, "/api/v1/mercadopago/webhook", None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert!(body["message"].is_string());
    assert!(body["timestamp"].is_string());
}
