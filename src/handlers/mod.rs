pub mod carts;
pub mod checkout;
pub mod common;
pub mod health;
pub mod orders;
pub mod webhooks;

use crate::AppState;
use axum::Router;

/// Everything under `/api/v1`.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/cart", carts::routes())
        .nest("/checkout", checkout::routes())
        .nest("/orders", orders::routes())
        .nest("/webhooks", webhooks::routes())
}
