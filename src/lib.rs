pub mod cache;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod openapi;
pub mod services;
pub mod stripe;

#[cfg(test)]
pub mod test_support;

use crate::{
    config::AppConfig,
    events::EventSender,
    services::{
        CartAssembler, CartService, CheckoutService, OrderNotifier, OrderService,
        ProductLookupService,
    },
    stripe::{PaymentSessions, ProductCatalog},
};
use axum::{
    http::{header, HeaderValue, Method},
    Router,
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer,
};
use tracing::warn;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Service graph behind the HTTP layer. Construction wires every service to
/// the same database handle, config, and event channel; nothing reaches for
/// globals.
#[derive(Clone)]
pub struct AppServices {
    pub cart: Arc<CartService>,
    pub lookup: Arc<ProductLookupService>,
    pub assembler: Arc<CartAssembler>,
    pub checkout: Arc<CheckoutService>,
    pub orders: Arc<OrderService>,
}

impl AppServices {
    pub fn build(
        db: Arc<DatabaseConnection>,
        config: Arc<AppConfig>,
        event_sender: Arc<EventSender>,
        catalog: Arc<dyn ProductCatalog>,
        payments: Arc<dyn PaymentSessions>,
        notifier: Arc<dyn OrderNotifier>,
    ) -> Self {
        let cart = Arc::new(CartService::new(db.clone(), event_sender.clone()));
        let lookup = Arc::new(ProductLookupService::new(
            catalog,
            config.product_cache_ttl(),
            config.product_cache_capacity,
        ));
        let assembler = Arc::new(CartAssembler::new(cart.clone(), lookup.clone()));
        let checkout = Arc::new(CheckoutService::new(
            assembler.clone(),
            payments.clone(),
            config.clone(),
            event_sender.clone(),
        ));
        let orders = Arc::new(OrderService::new(
            db,
            payments,
            cart.clone(),
            notifier,
            config,
            event_sender,
        ));

        Self {
            cart,
            lookup,
            assembler,
            checkout,
            orders,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
    pub event_sender: Arc<EventSender>,
    pub services: AppServices,
}

/// Assembles the full router: versioned API, health probe, OpenAPI docs, and
/// the shared middleware stack.
pub fn app_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    Router::new()
        .nest("/api/v1", handlers::api_routes())
        .merge(handlers::health::routes())
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi::ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(cors)
        .with_state(state)
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let methods = [Method::GET, Method::POST, Method::PUT, Method::DELETE];
    match &config.cors_allowed_origins {
        Some(origins) => {
            let parsed: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|origin| {
                    let origin = origin.trim();
                    match HeaderValue::from_str(origin) {
                        Ok(value) => Some(value),
                        Err(_) => {
                            warn!(origin, "Ignoring unparseable CORS origin");
                            None
                        }
                    }
                })
                .collect();
            CorsLayer::new()
                .allow_origin(parsed)
                .allow_methods(methods)
                .allow_headers([header::CONTENT_TYPE])
                .allow_credentials(true)
        }
        // Cookies never cross origins without an explicit allow list.
        None => CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods(methods)
            .allow_headers([header::CONTENT_TYPE]),
    }
}
