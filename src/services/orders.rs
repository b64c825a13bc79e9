use crate::{
    config::AppConfig,
    entities::{order, order_item, Order, OrderItem, OrderItemModel, OrderModel, OrderStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        cart::CartService,
        checkout::{CartSnapshotItem, CART_ITEMS_METADATA_KEY, CART_SESSION_METADATA_KEY},
        notifications::OrderNotifier,
    },
    stripe::{PaymentSessions, SessionDetails},
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    TransactionTrait,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Materializes durable orders from completed checkout sessions and applies
/// later payment-lifecycle transitions.
///
/// Materialization is idempotent per checkout session: the unique index on
/// `orders.checkout_session_id` is the arbiter, so concurrent webhook
/// deliveries converge on a single row.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    payments: Arc<dyn PaymentSessions>,
    cart: Arc<CartService>,
    notifier: Arc<dyn OrderNotifier>,
    config: Arc<AppConfig>,
    event_sender: Arc<EventSender>,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        payments: Arc<dyn PaymentSessions>,
        cart: Arc<CartService>,
        notifier: Arc<dyn OrderNotifier>,
        config: Arc<AppConfig>,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self {
            db,
            payments,
            cart,
            notifier,
            config,
            event_sender,
        }
    }

    /// Creates the order for a completed checkout session, or returns the
    /// existing one on redelivery.
    ///
    /// Prices come exclusively from the session's expanded line items;
    /// quantities come from the `cart_items` metadata snapshot written at
    /// session creation. Nothing client-held is trusted here.
    #[instrument(skip(self))]
    pub async fn create_from_checkout_session(
        &self,
        checkout_session_id: &str,
    ) -> Result<(OrderModel, Vec<OrderItemModel>), ServiceError> {
        if let Some(existing) = self.find_by_checkout_session(checkout_session_id).await? {
            info!(
                checkout_session_id,
                order_id = %existing.id,
                "Order already materialized, skipping"
            );
            let items = self.items_for(existing.id).await?;
            return Ok((existing, items));
        }

        let session = self.payments.retrieve_session(checkout_session_id).await?;
        if session.payment_status != "paid" {
            warn!(
                checkout_session_id,
                payment_status = %session.payment_status,
                "Refusing to materialize order for unpaid session"
            );
            return Err(ServiceError::PaymentFailed(
                "Payment not completed".to_string(),
            ));
        }

        let lines = self.order_lines_from_session(&session);
        if lines.is_empty() {
            return Err(ServiceError::InvalidOperation(format!(
                "Checkout session {} has no usable line items",
                checkout_session_id
            )));
        }

        let computed_total: i64 = lines
            .iter()
            .map(|(_, quantity, unit_amount)| unit_amount * (*quantity as i64))
            .sum();
        let currency = session
            .currency
            .as_deref()
            .map(str::to_ascii_lowercase)
            .unwrap_or_else(|| self.config.default_currency.clone());

        let order_id = Uuid::new_v4();
        let now = Utc::now();
        let order_model = order::ActiveModel {
            id: Set(order_id),
            checkout_session_id: Set(checkout_session_id.to_string()),
            payment_intent_id: Set(session.payment_intent_id.clone()),
            customer_email: Set(session.customer_email.clone()),
            total_amount: Set(session.amount_total.unwrap_or(computed_total)),
            currency: Set(currency),
            status: Set(OrderStatus::Pending),
            metadata: Set(Some(serde_json::json!(session.metadata))),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let inserted = {
            let txn = self.db.begin().await?;
            let insert_result = order_model.insert(&txn).await;
            match insert_result {
                Ok(model) => {
                    for (product_id, quantity, unit_amount) in &lines {
                        order_item::ActiveModel {
                            id: Set(Uuid::new_v4()),
                            order_id: Set(order_id),
                            product_id: Set(product_id.clone()),
                            quantity: Set(*quantity),
                            price_at_time: Set(*unit_amount),
                            created_at: Set(now),
                        }
                        .insert(&txn)
                        .await?;
                    }
                    txn.commit().await?;
                    Some(model)
                }
                Err(err) => {
                    txn.rollback().await.ok();
                    // A concurrent delivery may have won the unique index on
                    // checkout_session_id; re-read before treating this as a
                    // real failure.
                    match self.find_by_checkout_session(checkout_session_id).await? {
                        Some(winner) => {
                            info!(
                                checkout_session_id,
                                order_id = %winner.id,
                                "Lost materialization race, returning existing order"
                            );
                            let items = self.items_for(winner.id).await?;
                            return Ok((winner, items));
                        }
                        None => return Err(err.into()),
                    }
                }
            }
        };

        // Unwrap is safe: the race branch returned above.
        let order = inserted.ok_or_else(|| {
            ServiceError::InternalError("order insert yielded no model".to_string())
        })?;
        let items = self.items_for(order.id).await?;

        // Payment is confirmed, so the originating cart is done.
        if let Some(cart_session_id) = session.metadata.get(CART_SESSION_METADATA_KEY) {
            if let Err(e) = self.cart.clear(cart_session_id).await {
                warn!(
                    checkout_session_id,
                    cart_session_id, "Failed to clear cart after payment: {}", e
                );
            }
        } else {
            warn!(
                checkout_session_id,
                "Session metadata has no cart session id, leaving cart in place"
            );
        }

        if let Err(e) = self.notifier.order_confirmed(&order, &items).await {
            warn!(order_id = %order.id, "Order confirmation failed: {}", e);
        }

        self.event_sender.send_or_log(Event::OrderCreated(order.id)).await;
        info!(
            checkout_session_id,
            order_id = %order.id,
            total_amount = order.total_amount,
            "Order materialized"
        );

        Ok((order, items))
    }

    /// Builds (product_id, quantity, unit_amount) triples. Unit prices come
    /// from the session's line items; quantities from the cart snapshot in
    /// metadata, falling back to the line items when the snapshot is absent
    /// or unreadable. A snapshot pair with no priced line still becomes a
    /// line, recorded at 0 and logged.
    fn order_lines_from_session(&self, session: &SessionDetails) -> Vec<(String, i32, i64)> {
        let mut prices: HashMap<String, i64> = HashMap::new();
        for line in &session.line_items {
            if let (Some(product_id), Some(unit_amount)) = (&line.product_id, line.unit_amount) {
                prices.insert(product_id.clone(), unit_amount);
            }
        }

        let snapshot: Option<Vec<CartSnapshotItem>> = session
            .metadata
            .get(CART_ITEMS_METADATA_KEY)
            .and_then(|raw| match serde_json::from_str(raw) {
                Ok(items) => Some(items),
                Err(e) => {
                    warn!(
                        checkout_session_id = %session.id,
                        "Unreadable cart snapshot in session metadata: {}", e
                    );
                    None
                }
            });

        match snapshot {
            Some(items) => items
                .into_iter()
                .map(|item| {
                    let unit_amount = match prices.get(&item.id) {
                        Some(unit_amount) => *unit_amount,
                        None => {
                            warn!(
                                checkout_session_id = %session.id,
                                product_id = %item.id,
                                "Snapshot item has no priced session line, recording at 0"
                            );
                            0
                        }
                    };
                    (item.id, item.quantity, unit_amount)
                })
                .collect(),
            None => session
                .line_items
                .iter()
                .filter_map(|line| {
                    let product_id = line.product_id.clone()?;
                    let unit_amount = line.unit_amount?;
                    Some((product_id, line.quantity.unwrap_or(1) as i32, unit_amount))
                })
                .collect(),
        }
    }

    /// `pending -> processing` transition on payment-intent success. A
    /// payment intent we have no order for yet is a logged no-op: the
    /// session-completed delivery will carry the same facts.
    #[instrument(skip(self))]
    pub async fn mark_processing(&self, payment_intent_id: &str) -> Result<(), ServiceError> {
        let Some(found) = self.find_by_payment_intent(payment_intent_id).await? else {
            info!(
                payment_intent_id,
                "No order for payment intent yet, ignoring"
            );
            return Ok(());
        };

        if found.status != OrderStatus::Pending {
            info!(
                order_id = %found.id,
                status = ?found.status,
                "Order already past pending, ignoring payment success"
            );
            return Ok(());
        }

        let order_id = found.id;
        let mut active: order::ActiveModel = found.into();
        active.status = Set(OrderStatus::Processing);
        active.updated_at = Set(Utc::now());
        active.update(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: "pending".to_string(),
                new_status: "processing".to_string(),
            })
            .await;
        Ok(())
    }

    /// Cancels the order for a failed payment, recording the failure reason
    /// in the order metadata without discarding existing keys.
    #[instrument(skip(self))]
    pub async fn mark_cancelled(
        &self,
        payment_intent_id: &str,
        reason: &str,
    ) -> Result<(), ServiceError> {
        let Some(found) = self.find_by_payment_intent(payment_intent_id).await? else {
            info!(
                payment_intent_id,
                "No order for failed payment intent, ignoring"
            );
            return Ok(());
        };

        let order_id = found.id;
        let old_status = format!("{:?}", found.status).to_lowercase();
        let mut metadata = found
            .metadata
            .clone()
            .unwrap_or_else(|| serde_json::json!({}));
        if let Some(map) = metadata.as_object_mut() {
            map.insert(
                "failureReason".to_string(),
                serde_json::Value::String(reason.to_string()),
            );
        }

        let mut active: order::ActiveModel = found.into();
        active.status = Set(OrderStatus::Cancelled);
        active.metadata = Set(Some(metadata));
        active.updated_at = Set(Utc::now());
        active.update(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status: "cancelled".to_string(),
            })
            .await;
        Ok(())
    }

    pub async fn get_order_with_items(
        &self,
        order_id: Uuid,
    ) -> Result<(OrderModel, Vec<OrderItemModel>), ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        let items = self.items_for(order.id).await?;
        Ok((order, items))
    }

    pub async fn get_by_checkout_session(
        &self,
        checkout_session_id: &str,
    ) -> Result<(OrderModel, Vec<OrderItemModel>), ServiceError> {
        let order = self
            .find_by_checkout_session(checkout_session_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "No order for checkout session {}",
                    checkout_session_id
                ))
            })?;
        let items = self.items_for(order.id).await?;
        Ok((order, items))
    }

    async fn find_by_checkout_session(
        &self,
        checkout_session_id: &str,
    ) -> Result<Option<OrderModel>, ServiceError> {
        Ok(Order::find()
            .filter(order::Column::CheckoutSessionId.eq(checkout_session_id))
            .one(&*self.db)
            .await?)
    }

    async fn find_by_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<OrderModel>, ServiceError> {
        Ok(Order::find()
            .filter(order::Column::PaymentIntentId.eq(payment_intent_id))
            .one(&*self.db)
            .await?)
    }

    async fn items_for(&self, order_id: Uuid) -> Result<Vec<OrderItemModel>, ServiceError> {
        Ok(OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?)
    }
}
