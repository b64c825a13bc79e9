use crate::{
    errors::ApiError,
    handlers::common::{apply_set_cookie, ensure_cart_session},
    services::CheckoutRedirect,
    AppState,
};
use axum::{
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::Serialize;
use utoipa::ToSchema;

pub fn routes() -> Router<AppState> {
    Router::new().route("/session", post(create_session))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckoutSessionResponse {
    /// Where the client should navigate next: the hosted payment page, or
    /// back to the cart when there is nothing to pay for.
    pub redirect_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_session_id: Option<String>,
}

/// Validates the cart and creates a hosted checkout session. The cart itself
/// is not modified; it is cleared only once payment is confirmed.
#[utoipa::path(
    post,
    path = "/api/v1/checkout/session",
    responses(
        (status = 200, description = "Redirect target", body = CheckoutSessionResponse),
        (status = 400, description = "Cart contains items that cannot be priced"),
        (status = 502, description = "Payments platform unavailable")
    ),
    tag = "checkout"
)]
pub async fn create_session(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let (session_id, cookie) = ensure_cart_session(&headers, &state.config);

    let redirect = state
        .services
        .checkout
        .create_checkout_session(&session_id)
        .await?;

    let body = match redirect {
        CheckoutRedirect::CartView => CheckoutSessionResponse {
            redirect_url: "/cart".to_string(),
            checkout_session_id: None,
        },
        CheckoutRedirect::Payment { session_id, url } => CheckoutSessionResponse {
            redirect_url: url,
            checkout_session_id: Some(session_id),
        },
    };

    let mut response = Json(body).into_response();
    apply_set_cookie(&mut response, cookie)?;
    Ok(response)
}
