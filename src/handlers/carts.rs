use crate::{
    errors::ApiError,
    handlers::common::{
        apply_set_cookie, cart_session_from_headers, ensure_cart_session, validate_input,
    },
    services::assembler::AssembledCart,
    AppState,
};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_cart))
        .route("/count", get(get_cart_count))
        .route("/clear", post(clear_cart))
        .route("/items", post(add_item))
        .route("/items/:product_id", put(update_item).delete(remove_item))
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct AddItemRequest {
    /// External product id, e.g. `prod_ABC123`
    #[validate(length(min = 1, max = 255))]
    pub product_id: String,
    /// Quantity to add to any existing line
    #[serde(default = "default_quantity")]
    #[validate(range(min = 1, max = 999))]
    pub quantity: i32,
}

fn default_quantity() -> i32 {
    1
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateItemRequest {
    /// New absolute quantity; zero removes the line
    #[validate(range(min = 0, max = 999))]
    pub quantity: i32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CartCountResponse {
    pub count: i64,
}

/// The assembled cart, or JSON `null` when there is nothing in it.
async fn cart_response(
    state: &AppState,
    session_id: &str,
    status: StatusCode,
    cookie: Option<String>,
) -> Result<Response, ApiError> {
    let cart: Option<AssembledCart> = state.services.assembler.assemble(session_id).await?;
    let mut response = (status, Json(cart)).into_response();
    apply_set_cookie(&mut response, cookie)?;
    Ok(response)
}

/// Current cart with live catalog prices: `null` for an empty or unknown
/// cart. Reads never mint a session; only mutations set the cookie.
#[utoipa::path(
    get,
    path = "/api/v1/cart",
    responses(
        (status = 200, description = "Assembled cart, or null when empty", body = AssembledCart)
    ),
    tag = "cart"
)]
pub async fn get_cart(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    match cart_session_from_headers(&headers, &state.config.cart_cookie_name) {
        Some(session_id) => cart_response(&state, &session_id, StatusCode::OK, None).await,
        None => Ok(Json(None::<AssembledCart>).into_response()),
    }
}

/// Total quantity across the cart, cheap enough for a badge.
#[utoipa::path(
    get,
    path = "/api/v1/cart/count",
    responses(
        (status = 200, description = "Item count", body = CartCountResponse)
    ),
    tag = "cart"
)]
pub async fn get_cart_count(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<CartCountResponse>, ApiError> {
    let count = match cart_session_from_headers(&headers, &state.config.cart_cookie_name) {
        Some(session_id) => state.services.cart.count(&session_id).await?,
        None => 0,
    };
    Ok(Json(CartCountResponse { count }))
}

/// Adds quantity to a cart line, creating it if absent.
#[utoipa::path(
    post,
    path = "/api/v1/cart/items",
    request_body = AddItemRequest,
    responses(
        (status = 201, description = "Updated cart", body = AssembledCart),
        (status = 400, description = "Invalid payload or unknown product")
    ),
    tag = "cart"
)]
pub async fn add_item(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<AddItemRequest>,
) -> Result<Response, ApiError> {
    validate_input(&payload)?;
    let (session_id, cookie) = ensure_cart_session(&headers, &state.config);

    // Reject unknown products up front so a bad id never sits in the cart.
    state
        .services
        .lookup
        .resolve(&payload.product_id)
        .await?;
    state
        .services
        .cart
        .upsert_line(&session_id, &payload.product_id, payload.quantity, None)
        .await?;

    cart_response(&state, &session_id, StatusCode::CREATED, cookie).await
}

/// Sets the absolute quantity of a line; zero removes it.
#[utoipa::path(
    put,
    path = "/api/v1/cart/items/{product_id}",
    params(("product_id" = String, Path, description = "External product id")),
    request_body = UpdateItemRequest,
    responses(
        (status = 200, description = "Updated cart", body = AssembledCart),
        (status = 404, description = "No such line in the cart")
    ),
    tag = "cart"
)]
pub async fn update_item(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(product_id): Path<String>,
    Json(payload): Json<UpdateItemRequest>,
) -> Result<Response, ApiError> {
    validate_input(&payload)?;
    let (session_id, cookie) = ensure_cart_session(&headers, &state.config);

    state
        .services
        .cart
        .set_quantity(&session_id, &product_id, payload.quantity)
        .await?;

    cart_response(&state, &session_id, StatusCode::OK, cookie).await
}

/// Removes a line. Removing an absent line is a no-op, not an error.
#[utoipa::path(
    delete,
    path = "/api/v1/cart/items/{product_id}",
    params(("product_id" = String, Path, description = "External product id")),
    responses(
        (status = 200, description = "Updated cart", body = AssembledCart)
    ),
    tag = "cart"
)]
pub async fn remove_item(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(product_id): Path<String>,
) -> Result<Response, ApiError> {
    let (session_id, cookie) = ensure_cart_session(&headers, &state.config);

    state
        .services
        .cart
        .remove_line(&session_id, &product_id)
        .await?;

    cart_response(&state, &session_id, StatusCode::OK, cookie).await
}

/// Empties the cart.
#[utoipa::path(
    post,
    path = "/api/v1/cart/clear",
    responses((status = 204, description = "Cart emptied")),
    tag = "cart"
)]
pub async fn clear_cart(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let (session_id, cookie) = ensure_cart_session(&headers, &state.config);
    state.services.cart.clear(&session_id).await?;

    let mut response = StatusCode::NO_CONTENT.into_response();
    apply_set_cookie(&mut response, cookie)?;
    Ok(response)
}
