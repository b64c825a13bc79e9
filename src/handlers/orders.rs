use crate::{
    entities::{OrderItemModel, OrderModel, OrderStatus},
    errors::ApiError,
    AppState,
};
use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/:id", get(get_order))
        .route("/by-session/:checkout_session_id", get(get_order_by_session))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderItemResponse {
    pub product_id: String,
    pub quantity: i32,
    /// Unit price in minor currency units at the moment of payment
    pub price_at_time: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub checkout_session_id: String,
    pub payment_intent_id: Option<String>,
    pub customer_email: Option<String>,
    /// Total in minor currency units
    pub total_amount: i64,
    pub currency: String,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub items: Vec<OrderItemResponse>,
}

impl OrderResponse {
    fn from_parts(order: OrderModel, items: Vec<OrderItemModel>) -> Self {
        Self {
            id: order.id,
            checkout_session_id: order.checkout_session_id,
            payment_intent_id: order.payment_intent_id,
            customer_email: order.customer_email,
            total_amount: order.total_amount,
            currency: order.currency,
            status: order.status,
            created_at: order.created_at,
            items: items
                .into_iter()
                .map(|item| OrderItemResponse {
                    product_id: item.product_id,
                    quantity: item.quantity,
                    price_at_time: item.price_at_time,
                })
                .collect(),
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order with its lines", body = OrderResponse),
        (status = 404, description = "No such order")
    ),
    tag = "orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderResponse>, ApiError> {
    let (order, items) = state.services.orders.get_order_with_items(id).await?;
    Ok(Json(OrderResponse::from_parts(order, items)))
}

/// Order lookup by checkout session id, used by the post-payment success
/// page before the order id is known to the client.
#[utoipa::path(
    get,
    path = "/api/v1/orders/by-session/{checkout_session_id}",
    params((
        "checkout_session_id" = String,
        Path,
        description = "External checkout session id"
    )),
    responses(
        (status = 200, description = "Order with its lines", body = OrderResponse),
        (status = 404, description = "Session not yet materialized")
    ),
    tag = "orders"
)]
pub async fn get_order_by_session(
    State(state): State<AppState>,
    Path(checkout_session_id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let (order, items) = state
        .services
        .orders
        .get_by_checkout_session(&checkout_session_id)
        .await?;
    Ok(Json(OrderResponse::from_parts(order, items)))
}
