use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info};
use uuid::Uuid;

/// Domain events emitted by the cart/checkout pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    CartUpdated {
        session_id: String,
    },
    CartCleared {
        session_id: String,
    },
    CheckoutSessionCreated {
        cart_session_id: String,
        checkout_session_id: String,
    },
    OrderCreated(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    ProductCacheInvalidated {
        product_id: String,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event, surfacing channel failures to the caller.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging (not propagating) channel failures. Used on
    /// paths where the business operation must not fail because the event
    /// loop is gone.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event.clone()).await {
            error!("Dropping event {:?}: {}", event, e);
        }
    }
}

/// Background consumer for the event channel. Events are currently logged;
/// this is the seam where analytics or outbound notifications would attach.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderCreated(order_id) => {
                info!(order_id = %order_id, "Order created");
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(
                    order_id = %order_id,
                    from = %old_status,
                    to = %new_status,
                    "Order status changed"
                );
            }
            Event::CheckoutSessionCreated {
                cart_session_id,
                checkout_session_id,
            } => {
                info!(
                    cart_session_id = %cart_session_id,
                    checkout_session_id = %checkout_session_id,
                    "Checkout session created"
                );
            }
            other => {
                info!("Event: {:?}", other);
            }
        }
    }

    info!("Event processing loop stopped");
}
