use crate::entities::{OrderItemModel, OrderModel};
use async_trait::async_trait;
use tracing::info;

/// Outbound order confirmations. Failures are best-effort by contract: the
/// caller logs and continues, the order itself is already durable.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderNotifier: Send + Sync {
    async fn order_confirmed(
        &self,
        order: &OrderModel,
        items: &[OrderItemModel],
    ) -> Result<(), String>;
}

/// Default notifier: writes a structured confirmation record to the log.
/// Swap in an email/SMS implementation behind the same trait.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl OrderNotifier for LogNotifier {
    async fn order_confirmed(
        &self,
        order: &OrderModel,
        items: &[OrderItemModel],
    ) -> Result<(), String> {
        info!(
            order_id = %order.id,
            checkout_session_id = %order.checkout_session_id,
            customer_email = ?order.customer_email,
            total_amount = order.total_amount,
            currency = %order.currency,
            item_count = items.len(),
            "Order confirmation"
        );
        Ok(())
    }
}
