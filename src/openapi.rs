use utoipa::OpenApi;

/// OpenAPI document served at `/docs`.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        description = "Session-scoped carts, checkout sessions, and webhook-driven orders \
                       backed by an external payments platform."
    ),
    paths(
        crate::handlers::carts::get_cart,
        crate::handlers::carts::get_cart_count,
        crate::handlers::carts::add_item,
        crate::handlers::carts::update_item,
        crate::handlers::carts::remove_item,
        crate::handlers::carts::clear_cart,
        crate::handlers::checkout::create_session,
        crate::handlers::orders::get_order,
        crate::handlers::orders::get_order_by_session,
        crate::handlers::health::health,
    ),
    components(schemas(
        crate::errors::ErrorResponse,
        crate::services::assembler::AssembledCart,
        crate::services::assembler::AssembledCartItem,
        crate::handlers::carts::AddItemRequest,
        crate::handlers::carts::UpdateItemRequest,
        crate::handlers::carts::CartCountResponse,
        crate::handlers::checkout::CheckoutSessionResponse,
        crate::handlers::orders::OrderResponse,
        crate::handlers::orders::OrderItemResponse,
        crate::handlers::health::HealthResponse,
        crate::entities::OrderStatus,
    )),
    tags(
        (name = "cart", description = "Session-scoped shopping cart"),
        (name = "checkout", description = "Hosted checkout sessions"),
        (name = "orders", description = "Materialized orders"),
        (name = "health", description = "Service health")
    )
)]
pub struct ApiDoc;
