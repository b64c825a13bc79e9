use crate::{
    config::AppConfig,
    errors::ServiceError,
    events::{Event, EventSender},
    services::assembler::{AssembledCart, CartAssembler},
    stripe::{CreateSessionRequest, PaymentSessions, SessionLineItem},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, instrument};

/// Metadata key carrying the (product, quantity) snapshot of the cart.
/// Materialization trusts it for quantities only, never for prices.
pub const CART_ITEMS_METADATA_KEY: &str = "cart_items";
/// Metadata key carrying the originating cart session, so the webhook can
/// clear the right cart after payment.
pub const CART_SESSION_METADATA_KEY: &str = "cart_session_id";

/// Snapshot entry serialized into session metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartSnapshotItem {
    pub id: String,
    pub quantity: i32,
}

/// Outcome of checkout initiation.
#[derive(Debug, Clone)]
pub enum CheckoutRedirect {
    /// Nothing to check out: send the client back to the cart view.
    CartView,
    /// Hosted payment page for the created session.
    Payment { session_id: String, url: String },
}

/// Validates an assembled cart and creates one external checkout session.
///
/// No local writes happen here: the cart is cleared only after the webhook
/// confirms payment, so an abandoned checkout leaves the cart intact.
#[derive(Clone)]
pub struct CheckoutService {
    assembler: Arc<CartAssembler>,
    payments: Arc<dyn PaymentSessions>,
    config: Arc<AppConfig>,
    event_sender: Arc<EventSender>,
}

impl CheckoutService {
    pub fn new(
        assembler: Arc<CartAssembler>,
        payments: Arc<dyn PaymentSessions>,
        config: Arc<AppConfig>,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self {
            assembler,
            payments,
            config,
            event_sender,
        }
    }

    #[instrument(skip(self))]
    pub async fn create_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<CheckoutRedirect, ServiceError> {
        let Some(cart) = self.assembler.assemble(session_id).await? else {
            info!(session_id, "Checkout attempted with empty cart");
            return Ok(CheckoutRedirect::CartView);
        };

        // The assembler guarantees a price exists for every item; a price of
        // exactly zero is a distinct, checkout-breaking condition checked here.
        let invalid: Vec<&str> = cart
            .items
            .iter()
            .filter(|item| item.unit_amount <= 0)
            .map(|item| item.name.as_str())
            .collect();
        if !invalid.is_empty() {
            error!(
                session_id,
                items = ?invalid,
                "Cart contains items with invalid prices"
            );
            return Err(ServiceError::InvalidOperation(format!(
                "Cannot proceed to checkout: {} item(s) have invalid pricing ({}). \
                 Please remove these items and try again.",
                invalid.len(),
                invalid.join(", ")
            )));
        }

        let request = self.build_session_request(&cart)?;
        let created = self.payments.create_session(request).await?;

        self.event_sender
            .send_or_log(Event::CheckoutSessionCreated {
                cart_session_id: session_id.to_string(),
                checkout_session_id: created.id.clone(),
            })
            .await;

        Ok(CheckoutRedirect::Payment {
            session_id: created.id,
            url: created.url,
        })
    }

    fn build_session_request(
        &self,
        cart: &AssembledCart,
    ) -> Result<CreateSessionRequest, ServiceError> {
        // Line items carry the freshly assembled unit price and the cart's
        // policy currency, never a client-supplied or previously cached one.
        let line_items = cart
            .items
            .iter()
            .map(|item| SessionLineItem {
                name: item.name.clone(),
                images: item.images.clone(),
                unit_amount: item.unit_amount,
                currency: cart.currency.clone(),
                quantity: item.quantity,
            })
            .collect();

        let snapshot: Vec<CartSnapshotItem> = cart
            .items
            .iter()
            .map(|item| CartSnapshotItem {
                id: item.product_id.clone(),
                quantity: item.quantity,
            })
            .collect();

        let mut metadata = HashMap::new();
        metadata.insert(
            CART_ITEMS_METADATA_KEY.to_string(),
            serde_json::to_string(&snapshot)?,
        );
        metadata.insert(CART_SESSION_METADATA_KEY.to_string(), cart.id.clone());

        let base_url = self.config.checkout_base_url();
        Ok(CreateSessionRequest {
            line_items,
            // The platform substitutes the placeholder with the real id.
            success_url: format!(
                "{}/checkout/success?session_id={{CHECKOUT_SESSION_ID}}",
                base_url
            ),
            cancel_url: format!("{}/checkout/cancel", base_url),
            metadata,
        })
    }
}
