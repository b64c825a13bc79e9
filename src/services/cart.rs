use crate::{
    entities::{cart_item, CartItem},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Durable cart store: session-keyed (product, quantity) rows and nothing
/// else. All pricing is resolved at read time by the assembler.
///
/// Concurrent mutations of the same session resolve last-write-wins at the
/// row level; the store adds no optimistic locking.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// All lines for a session, oldest first.
    pub async fn get_lines(&self, session_id: &str) -> Result<Vec<cart_item::Model>, ServiceError> {
        let lines = CartItem::find()
            .filter(cart_item::Column::SessionId.eq(session_id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(lines)
    }

    /// Merges a quantity delta into the (session, product) line, creating it
    /// when absent. A merged quantity of zero or less deletes the line.
    #[instrument(skip(self))]
    pub async fn upsert_line(
        &self,
        session_id: &str,
        product_id: &str,
        quantity_delta: i32,
        user_id: Option<Uuid>,
    ) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;

        let existing = CartItem::find()
            .filter(cart_item::Column::SessionId.eq(session_id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .one(&txn)
            .await?;

        match existing {
            Some(line) => {
                let merged = line.quantity + quantity_delta;
                if merged <= 0 {
                    let line: cart_item::ActiveModel = line.into();
                    line.delete(&txn).await?;
                } else {
                    let mut line: cart_item::ActiveModel = line.into();
                    line.quantity = Set(merged);
                    line.updated_at = Set(Utc::now());
                    line.update(&txn).await?;
                }
            }
            None if quantity_delta > 0 => {
                let line = cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    session_id: Set(session_id.to_string()),
                    product_id: Set(product_id.to_string()),
                    quantity: Set(quantity_delta),
                    user_id: Set(user_id),
                    created_at: Set(Utc::now()),
                    updated_at: Set(Utc::now()),
                };
                line.insert(&txn).await?;
            }
            // Negative delta against a missing line has nothing to remove.
            None => {}
        }

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartUpdated {
                session_id: session_id.to_string(),
            })
            .await;

        Ok(())
    }

    /// Sets an absolute quantity. Zero or less deletes the line; a positive
    /// quantity for a line that does not exist is an error.
    #[instrument(skip(self))]
    pub async fn set_quantity(
        &self,
        session_id: &str,
        product_id: &str,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        if quantity <= 0 {
            return self.remove_line(session_id, product_id).await;
        }

        let line = CartItem::find()
            .filter(cart_item::Column::SessionId.eq(session_id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Cart line for product {} not found", product_id))
            })?;

        let mut line: cart_item::ActiveModel = line.into();
        line.quantity = Set(quantity);
        line.updated_at = Set(Utc::now());
        line.update(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::CartUpdated {
                session_id: session_id.to_string(),
            })
            .await;

        Ok(())
    }

    /// Removes one (session, product) line. Removing an absent line is a
    /// no-op, matching at-least-once client retries.
    #[instrument(skip(self))]
    pub async fn remove_line(&self, session_id: &str, product_id: &str) -> Result<(), ServiceError> {
        CartItem::delete_many()
            .filter(cart_item::Column::SessionId.eq(session_id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .exec(&*self.db)
            .await?;

        self.event_sender
            .send_or_log(Event::CartUpdated {
                session_id: session_id.to_string(),
            })
            .await;

        Ok(())
    }

    /// Deletes every line of a session. Called only after confirmed payment,
    /// or explicitly by the client.
    #[instrument(skip(self))]
    pub async fn clear(&self, session_id: &str) -> Result<(), ServiceError> {
        let result = CartItem::delete_many()
            .filter(cart_item::Column::SessionId.eq(session_id))
            .exec(&*self.db)
            .await?;

        info!(
            session_id,
            lines = result.rows_affected,
            "Cleared cart"
        );

        self.event_sender
            .send_or_log(Event::CartCleared {
                session_id: session_id.to_string(),
            })
            .await;

        Ok(())
    }

    /// Total quantity across the session's lines; zero for an unknown session.
    pub async fn count(&self, session_id: &str) -> Result<i64, ServiceError> {
        let lines = self.get_lines(session_id).await?;
        Ok(lines.iter().map(|l| l.quantity as i64).sum())
    }

    /// Deletes lines belonging to sessions with no owning user whose rows are
    /// older than the retention cutoff. Run periodically, not per-request.
    #[instrument(skip(self))]
    pub async fn sweep_expired(&self, older_than: DateTime<Utc>) -> Result<u64, ServiceError> {
        let result = CartItem::delete_many()
            .filter(cart_item::Column::UserId.is_null())
            .filter(cart_item::Column::CreatedAt.lt(older_than))
            .exec(&*self.db)
            .await?;

        if result.rows_affected > 0 {
            info!(
                swept = result.rows_affected,
                cutoff = %older_than,
                "Swept expired cart lines"
            );
        }
        Ok(result.rows_affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{test_db, test_event_sender};
    use chrono::Duration;

    async fn service() -> CartService {
        CartService::new(test_db().await, test_event_sender())
    }

    #[tokio::test]
    async fn upsert_merges_into_one_line() {
        let cart = service().await;

        cart.upsert_line("sess_1", "prod_a", 1, None).await.unwrap();
        cart.upsert_line("sess_1", "prod_a", 1, None).await.unwrap();

        let lines = cart.get_lines("sess_1").await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].quantity, 2);
    }

    #[tokio::test]
    async fn upsert_to_zero_deletes_the_line() {
        let cart = service().await;

        cart.upsert_line("sess_1", "prod_a", 2, None).await.unwrap();
        cart.upsert_line("sess_1", "prod_a", -2, None).await.unwrap();

        assert!(cart.get_lines("sess_1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upsert_negative_delta_on_missing_line_is_noop() {
        let cart = service().await;
        cart.upsert_line("sess_1", "prod_a", -3, None).await.unwrap();
        assert!(cart.get_lines("sess_1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let cart = service().await;

        cart.upsert_line("sess_1", "prod_a", 1, None).await.unwrap();
        cart.upsert_line("sess_2", "prod_a", 5, None).await.unwrap();

        assert_eq!(cart.get_lines("sess_1").await.unwrap()[0].quantity, 1);
        assert_eq!(cart.get_lines("sess_2").await.unwrap()[0].quantity, 5);
    }

    #[tokio::test]
    async fn set_quantity_zero_deletes() {
        let cart = service().await;

        cart.upsert_line("sess_1", "prod_a", 3, None).await.unwrap();
        cart.set_quantity("sess_1", "prod_a", 0).await.unwrap();

        assert!(cart.get_lines("sess_1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn set_quantity_overwrites_absolute_value() {
        let cart = service().await;

        cart.upsert_line("sess_1", "prod_a", 3, None).await.unwrap();
        cart.set_quantity("sess_1", "prod_a", 7).await.unwrap();

        assert_eq!(cart.get_lines("sess_1").await.unwrap()[0].quantity, 7);
    }

    #[tokio::test]
    async fn set_quantity_on_missing_line_is_not_found() {
        let cart = service().await;
        let err = cart.set_quantity("sess_1", "prod_a", 4).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn clear_removes_all_lines_for_the_session_only() {
        let cart = service().await;

        cart.upsert_line("sess_1", "prod_a", 1, None).await.unwrap();
        cart.upsert_line("sess_1", "prod_b", 2, None).await.unwrap();
        cart.upsert_line("sess_2", "prod_a", 1, None).await.unwrap();

        cart.clear("sess_1").await.unwrap();

        assert!(cart.get_lines("sess_1").await.unwrap().is_empty());
        assert_eq!(cart.get_lines("sess_2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn count_sums_quantities() {
        let cart = service().await;

        cart.upsert_line("sess_1", "prod_a", 2, None).await.unwrap();
        cart.upsert_line("sess_1", "prod_b", 3, None).await.unwrap();

        assert_eq!(cart.count("sess_1").await.unwrap(), 5);
        assert_eq!(cart.count("sess_missing").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn sweep_deletes_only_old_userless_rows() {
        let cart = service().await;

        cart.upsert_line("sess_old", "prod_a", 1, None).await.unwrap();
        cart.upsert_line("sess_owned", "prod_a", 1, Some(Uuid::new_v4()))
            .await
            .unwrap();
        cart.upsert_line("sess_fresh", "prod_a", 1, None).await.unwrap();

        // Backdate the first two rows past the retention window.
        let cutoff = Utc::now() - Duration::days(30);
        let old = Utc::now() - Duration::days(31);
        for session in ["sess_old", "sess_owned"] {
            let line = cart.get_lines(session).await.unwrap().remove(0);
            let mut line: cart_item::ActiveModel = line.into();
            line.created_at = Set(old);
            line.update(&*cart.db).await.unwrap();
        }

        let swept = cart.sweep_expired(cutoff).await.unwrap();
        assert_eq!(swept, 1);

        assert!(cart.get_lines("sess_old").await.unwrap().is_empty());
        assert_eq!(cart.get_lines("sess_owned").await.unwrap().len(), 1);
        assert_eq!(cart.get_lines("sess_fresh").await.unwrap().len(), 1);
    }
}
