use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = "0.1.0",
        description = "Storefront backend: product catalog, checkout, discount/coupon validation and MercadoPago payment reconciliation.",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    paths(
        crate::handlers::discounts::validate_discount,
        crate::handlers::discounts::list_active_discounts,
        crate::handlers::orders::create_order,
        crate::handlers::orders::get_order,
        crate::handlers::products::list_products,
        crate::handlers::products::get_product,
        crate::handlers::mercadopago::mercadopago_webhook,
        crate::handlers::mercadopago::mercadopago_webhook_probe,
    ),
    components(schemas(
        crate::errors::ErrorResponse,
        crate::handlers::discounts::ValidateDiscountRequest,
        crate::handlers::discounts::DiscountValidationResponse,
        crate::handlers::discounts::CouponResponse,
        crate::handlers::orders::CreateOrderRequest,
        crate::handlers::orders::CreateOrderItemRequest,
        crate::handlers::orders::OrderResponse,
        crate::handlers::orders::OrderItemResponse,
        crate::handlers::products::ProductResponse,
    )),
    tags(
        (name = "Discounts", description = "Coupon validation and preview"),
        (name = "Orders", description = "Checkout and order lookup"),
        (name = "Products", description = "Storefront catalog"),
        (name = "Payments", description = "Payment gateway webhook")
    )
)]
pub struct ApiDoc;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/docs")
        .url("/api-docs/openapi.json", ApiDoc::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}
