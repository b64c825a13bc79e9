use crate::{
    errors::ServiceError,
    events::Event,
    stripe::webhook::verify_signature,
    AppState,
};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

pub fn routes() -> Router<AppState> {
    Router::new().route("/stripe", post(stripe_webhook))
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    #[serde(default)]
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: WebhookData,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    object: Value,
}

/// Receives platform webhooks over the raw body so the signature can be
/// verified against the exact bytes sent. Unhandled event types are
/// acknowledged with 200; failing with anything else would only provoke
/// pointless redelivery.
async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match &state.config.stripe_webhook_secret {
        Some(secret) => {
            if !verify_signature(
                &headers,
                &body,
                secret,
                state.config.stripe_webhook_tolerance_secs,
            ) {
                warn!("Rejected webhook with missing or invalid signature");
                return StatusCode::UNAUTHORIZED.into_response();
            }
        }
        None => {
            if state.config.is_production() {
                error!("Webhook secret not configured, refusing unverified delivery");
                return StatusCode::UNAUTHORIZED.into_response();
            }
            // Local development only.
            warn!("Webhook secret not configured, accepting unverified delivery");
        }
    }

    let event: WebhookEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!("Unparseable webhook payload: {}", e);
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    info!(
        event_id = %event.id,
        event_type = %event.event_type,
        "Processing webhook event"
    );

    let result = dispatch(&state, &event).await;
    match result {
        Ok(()) => Json(json!({ "received": true })).into_response(),
        // Unpaid sessions will not become paid on redelivery.
        Err(ServiceError::PaymentFailed(msg)) => {
            warn!(
                event_type = %event.event_type,
                "Acknowledging event for unpaid session: {}", msg
            );
            Json(json!({ "received": true })).into_response()
        }
        Err(err) => {
            error!(
                event_type = %event.event_type,
                "Webhook processing failed: {}", err
            );
            err.into_response()
        }
    }
}

async fn dispatch(state: &AppState, event: &WebhookEvent) -> Result<(), ServiceError> {
    let object = &event.data.object;
    match event.event_type.as_str() {
        "checkout.session.completed" => {
            let session_id = require_str(object, "id")?;
            state
                .services
                .orders
                .create_from_checkout_session(session_id)
                .await?;
            Ok(())
        }
        "payment_intent.succeeded" => {
            let payment_intent_id = require_str(object, "id")?;
            state.services.orders.mark_processing(payment_intent_id).await
        }
        "payment_intent.payment_failed" => {
            let payment_intent_id = require_str(object, "id")?;
            let reason = object
                .pointer("/last_payment_error/message")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            state
                .services
                .orders
                .mark_cancelled(payment_intent_id, reason)
                .await
        }
        "product.updated" | "product.deleted" => {
            invalidate_product(state, require_str(object, "id")?).await;
            Ok(())
        }
        "price.created" | "price.updated" | "price.deleted" => {
            invalidate_product(state, require_str(object, "product")?).await;
            Ok(())
        }
        other => {
            info!(event_type = %other, "Ignoring unhandled webhook event type");
            Ok(())
        }
    }
}

async fn invalidate_product(state: &AppState, product_id: &str) {
    state.services.lookup.invalidate(product_id);
    state
        .event_sender
        .send_or_log(Event::ProductCacheInvalidated {
            product_id: product_id.to_string(),
        })
        .await;
}

fn require_str<'a>(object: &'a Value, field: &str) -> Result<&'a str, ServiceError> {
    object
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| {
            ServiceError::BadRequest(format!("Webhook object is missing '{}'", field))
        })
}
