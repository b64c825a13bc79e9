use crate::{
    errors::ServiceError,
    services::{cart::CartService, product_lookup::ProductLookupService},
};
use futures::future::try_join_all;
use serde::Serialize;
use std::sync::Arc;
use tracing::{instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// One cart line joined with its freshly resolved product and price.
/// Ephemeral: never persisted.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AssembledCartItem {
    /// Id of the underlying cart row
    pub line_id: Uuid,
    pub product_id: String,
    /// Resolved price identifier backing `unit_amount`
    pub variant_id: String,
    pub quantity: i32,
    /// Minor currency units
    pub unit_amount: i64,
    pub currency: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub images: Vec<String>,
}

/// A fully priced cart view. Total is integer minor-unit arithmetic.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AssembledCart {
    /// The cart session token
    pub id: String,
    pub items: Vec<AssembledCartItem>,
    pub total: i64,
    pub currency: String,
}

/// Joins durable cart rows with live catalog resolutions.
///
/// Strict-consistency choice: if any single line fails to price, the whole
/// assembly fails rather than rendering a partial or incorrect total. Mixed
/// currencies, by contrast, are recoverable (first-seen currency wins) and
/// only logged.
#[derive(Clone)]
pub struct CartAssembler {
    cart: Arc<CartService>,
    lookup: Arc<ProductLookupService>,
}

impl CartAssembler {
    pub fn new(cart: Arc<CartService>, lookup: Arc<ProductLookupService>) -> Self {
        Self { cart, lookup }
    }

    /// Produces the priced view of a session's cart, or `None` when the
    /// session has no lines. An empty cart is "no cart", not an empty-items
    /// cart, which keeps the downstream checkout check trivial.
    #[instrument(skip(self))]
    pub async fn assemble(&self, session_id: &str) -> Result<Option<AssembledCart>, ServiceError> {
        let lines = self.cart.get_lines(session_id).await?;
        if lines.is_empty() {
            return Ok(None);
        }

        // Per-line resolutions are independent reads: fan out concurrently.
        let items = try_join_all(lines.into_iter().map(|line| {
            let lookup = self.lookup.clone();
            async move {
                let resolved = lookup.resolve(&line.product_id).await?;
                Ok::<_, ServiceError>(AssembledCartItem {
                    line_id: line.id,
                    product_id: resolved.product_id,
                    variant_id: resolved.price_id,
                    quantity: line.quantity,
                    unit_amount: resolved.unit_amount,
                    currency: resolved.currency,
                    name: resolved.name,
                    description: resolved.description,
                    images: resolved.images,
                })
            }
        }))
        .await?;

        let currency = items[0].currency.clone();
        let mismatched: Vec<&str> = items
            .iter()
            .filter(|item| item.currency != currency)
            .map(|item| item.product_id.as_str())
            .collect();
        if !mismatched.is_empty() {
            warn!(
                session_id,
                cart_currency = %currency,
                products = ?mismatched,
                "Cart resolves to multiple currencies; using first line's currency"
            );
        }

        let total = items
            .iter()
            .map(|item| item.unit_amount * item.quantity as i64)
            .sum();

        Ok(Some(AssembledCart {
            id: session_id.to_string(),
            items,
            total,
            currency,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::cart::CartService;
    use crate::stripe::{MockProductCatalog, StripeError, StripePrice, StripeProduct};
    use crate::test_support::{test_db, test_event_sender};
    use std::collections::HashMap;
    use std::time::Duration;

    fn catalog_product(id: &str) -> StripeProduct {
        StripeProduct {
            id: id.to_string(),
            name: format!("Product {}", id),
            description: None,
            images: vec![],
            metadata: HashMap::new(),
            active: true,
        }
    }

    fn catalog_price(product_id: &str, unit_amount: i64, currency: &str) -> StripePrice {
        StripePrice {
            id: format!("price_{}", product_id),
            product: product_id.to_string(),
            unit_amount: Some(unit_amount),
            currency: currency.to_string(),
            active: true,
        }
    }

    /// Catalog stub where each product id maps to (unit_amount, currency).
    fn priced_catalog(prices: Vec<(&str, i64, &str)>) -> MockProductCatalog {
        let table: HashMap<String, (i64, String)> = prices
            .into_iter()
            .map(|(id, amount, cur)| (id.to_string(), (amount, cur.to_string())))
            .collect();

        let mut catalog = MockProductCatalog::new();
        catalog
            .expect_get_product()
            .returning(|id| Ok(catalog_product(id)));
        let lookup_table = table.clone();
        catalog.expect_list_prices().returning(move |id| {
            match lookup_table.get(id) {
                Some((amount, currency)) => Ok(vec![catalog_price(id, *amount, currency)]),
                None => Err(StripeError::NotFound(format!("product {}", id))),
            }
        });
        catalog
    }

    async fn assembler_with(
        catalog: MockProductCatalog,
    ) -> (CartAssembler, Arc<CartService>) {
        let db = test_db().await;
        let cart = Arc::new(CartService::new(db, test_event_sender()));
        let lookup = Arc::new(ProductLookupService::new(
            Arc::new(catalog),
            Duration::from_secs(300),
            100,
        ));
        (CartAssembler::new(cart.clone(), lookup), cart)
    }

    #[tokio::test]
    async fn empty_cart_assembles_to_none() {
        let (assembler, _cart) = assembler_with(priced_catalog(vec![])).await;
        assert!(assembler.assemble("sess_empty").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn total_is_integer_minor_unit_sum() {
        let (assembler, cart) =
            assembler_with(priced_catalog(vec![("prod_a", 1999, "eur")])).await;
        cart.upsert_line("sess_1", "prod_a", 2, None).await.unwrap();

        let assembled = assembler.assemble("sess_1").await.unwrap().unwrap();
        assert_eq!(assembled.total, 3998);
        assert_eq!(assembled.currency, "eur");
        assert_eq!(assembled.items.len(), 1);
        assert_eq!(assembled.items[0].variant_id, "price_prod_a");
    }

    #[tokio::test]
    async fn unresolvable_line_fails_the_whole_assembly() {
        let (assembler, cart) =
            assembler_with(priced_catalog(vec![("prod_a", 1000, "eur")])).await;
        cart.upsert_line("sess_1", "prod_a", 1, None).await.unwrap();
        cart.upsert_line("sess_1", "prod_missing", 1, None)
            .await
            .unwrap();

        let err = assembler.assemble("sess_1").await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn mixed_currencies_use_first_line_and_plain_sum() {
        let (assembler, cart) = assembler_with(priced_catalog(vec![
            ("prod_a", 1000, "eur"),
            ("prod_b", 2000, "eur"),
            ("prod_c", 3000, "usd"),
        ]))
        .await;
        cart.upsert_line("sess_1", "prod_a", 1, None).await.unwrap();
        cart.upsert_line("sess_1", "prod_b", 1, None).await.unwrap();
        cart.upsert_line("sess_1", "prod_c", 1, None).await.unwrap();

        let assembled = assembler.assemble("sess_1").await.unwrap().unwrap();
        assert_eq!(assembled.currency, "eur");
        assert_eq!(assembled.total, 6000);
    }

    #[tokio::test]
    async fn items_preserve_cart_order() {
        let (assembler, cart) = assembler_with(priced_catalog(vec![
            ("prod_a", 100, "usd"),
            ("prod_b", 200, "usd"),
        ]))
        .await;
        cart.upsert_line("sess_1", "prod_a", 1, None).await.unwrap();
        cart.upsert_line("sess_1", "prod_b", 1, None).await.unwrap();

        let assembled = assembler.assemble("sess_1").await.unwrap().unwrap();
        let ids: Vec<&str> = assembled
            .items
            .iter()
            .map(|i| i.product_id.as_str())
            .collect();
        assert_eq!(ids, vec!["prod_a", "prod_b"]);
    }
}
