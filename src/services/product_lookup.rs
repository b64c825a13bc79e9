use crate::{
    cache::TtlCache,
    errors::ServiceError,
    stripe::ProductCatalog,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// A product joined with its current active price, as resolved from the
/// external catalog. This is the only place prices enter the system.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedProduct {
    pub product_id: String,
    /// Identifier of the price record backing `unit_amount`
    pub price_id: String,
    pub name: String,
    pub description: Option<String>,
    pub images: Vec<String>,
    pub metadata: HashMap<String, String>,
    /// Minor currency units
    pub unit_amount: i64,
    /// Lowercase ISO code
    pub currency: String,
}

/// Read-through product resolution with a short-TTL bounded cache.
///
/// Cache entries expire naturally or are invalidated eagerly when a
/// product/price update event arrives over the webhook, which bounds
/// staleness without a live catalog call on every cart render.
pub struct ProductLookupService {
    catalog: Arc<dyn ProductCatalog>,
    cache: TtlCache<ResolvedProduct>,
}

impl ProductLookupService {
    pub fn new(catalog: Arc<dyn ProductCatalog>, ttl: Duration, capacity: usize) -> Self {
        Self::with_cache(catalog, TtlCache::new(ttl, capacity))
    }

    /// Construct with an externally built cache (tests inject a manual clock).
    pub fn with_cache(catalog: Arc<dyn ProductCatalog>, cache: TtlCache<ResolvedProduct>) -> Self {
        Self { catalog, cache }
    }

    /// Resolves a product id to its authoritative name, price, and display
    /// metadata.
    ///
    /// A product without an active, usable price is an error, never a
    /// zero-price default: a fabricated price must not reach a cart total.
    #[instrument(skip(self))]
    pub async fn resolve(&self, product_id: &str) -> Result<ResolvedProduct, ServiceError> {
        if let Some(hit) = self.cache.get(product_id) {
            return Ok(hit);
        }

        let product = self.catalog.get_product(product_id).await?;
        if !product.active {
            return Err(ServiceError::NotFound(format!(
                "Product {} is not active",
                product_id
            )));
        }

        let prices = self.catalog.list_prices(product_id).await?;
        let price = prices
            .into_iter()
            .find(|p| p.active && p.unit_amount.is_some())
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "Product {} is missing a valid price",
                    product_id
                ))
            })?;
        // find() guarantees the amount is present.
        let unit_amount = price.unit_amount.unwrap_or_default();

        let resolved = ResolvedProduct {
            product_id: product.id,
            price_id: price.id,
            name: product.name,
            description: product.description,
            images: product.images,
            metadata: product.metadata,
            unit_amount,
            currency: price.currency.to_lowercase(),
        };

        self.cache.insert(product_id, resolved.clone());
        Ok(resolved)
    }

    /// Eagerly drops a cached resolution; called when the platform reports a
    /// product or price change for this id.
    pub fn invalidate(&self, product_id: &str) {
        if self.cache.invalidate(product_id) {
            debug!(product_id, "Invalidated cached product resolution");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stripe::{MockProductCatalog, StripeError, StripePrice, StripeProduct};

    fn product(id: &str, active: bool) -> StripeProduct {
        StripeProduct {
            id: id.to_string(),
            name: format!("Product {}", id),
            description: Some("A fine product".to_string()),
            images: vec!["https://img.example/1.jpg".to_string()],
            metadata: HashMap::new(),
            active,
        }
    }

    fn price(product_id: &str, unit_amount: Option<i64>, currency: &str) -> StripePrice {
        StripePrice {
            id: format!("price_{}", product_id),
            product: product_id.to_string(),
            unit_amount,
            currency: currency.to_string(),
            active: true,
        }
    }

    fn service(catalog: MockProductCatalog) -> ProductLookupService {
        ProductLookupService::new(Arc::new(catalog), Duration::from_secs(300), 100)
    }

    #[tokio::test]
    async fn resolves_product_with_first_active_price() {
        let mut catalog = MockProductCatalog::new();
        catalog
            .expect_get_product()
            .times(1)
            .returning(|id| Ok(product(id, true)));
        catalog
            .expect_list_prices()
            .times(1)
            .returning(|id| Ok(vec![price(id, Some(1999), "EUR")]));

        let resolved = service(catalog).resolve("prod_a").await.unwrap();
        assert_eq!(resolved.unit_amount, 1999);
        assert_eq!(resolved.currency, "eur");
        assert_eq!(resolved.price_id, "price_prod_a");
    }

    #[tokio::test]
    async fn second_resolve_is_served_from_cache() {
        let mut catalog = MockProductCatalog::new();
        catalog
            .expect_get_product()
            .times(1)
            .returning(|id| Ok(product(id, true)));
        catalog
            .expect_list_prices()
            .times(1)
            .returning(|id| Ok(vec![price(id, Some(500), "usd")]));

        let lookup = service(catalog);
        let first = lookup.resolve("prod_a").await.unwrap();
        let second = lookup.resolve("prod_a").await.unwrap();
        assert_eq!(first.unit_amount, second.unit_amount);
    }

    #[tokio::test]
    async fn invalidate_forces_a_fresh_fetch() {
        let mut catalog = MockProductCatalog::new();
        catalog
            .expect_get_product()
            .times(2)
            .returning(|id| Ok(product(id, true)));
        catalog
            .expect_list_prices()
            .times(2)
            .returning(|id| Ok(vec![price(id, Some(1000), "usd")]));

        let lookup = service(catalog);
        lookup.resolve("prod_a").await.unwrap();
        lookup.invalidate("prod_a");
        lookup.resolve("prod_a").await.unwrap();
    }

    #[tokio::test]
    async fn missing_price_is_not_found_never_zero() {
        let mut catalog = MockProductCatalog::new();
        catalog
            .expect_get_product()
            .returning(|id| Ok(product(id, true)));
        catalog
            .expect_list_prices()
            .returning(|id| Ok(vec![price(id, None, "usd")]));

        let err = service(catalog).resolve("prod_a").await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn inactive_product_is_not_found() {
        let mut catalog = MockProductCatalog::new();
        catalog
            .expect_get_product()
            .returning(|id| Ok(product(id, false)));

        let err = service(catalog).resolve("prod_a").await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn catalog_failure_propagates_as_external_error() {
        let mut catalog = MockProductCatalog::new();
        catalog.expect_get_product().returning(|_| {
            Err(StripeError::Api {
                status: 503,
                message: "upstream down".to_string(),
            })
        });

        let err = service(catalog).resolve("prod_a").await.unwrap_err();
        assert!(matches!(err, ServiceError::ExternalServiceError(_)));
    }

    #[tokio::test]
    async fn zero_price_resolves_without_defaulting() {
        // Zero is a valid (if checkout-breaking) amount; rejecting it is the
        // checkout initiator's job, not the resolver's.
        let mut catalog = MockProductCatalog::new();
        catalog
            .expect_get_product()
            .returning(|id| Ok(product(id, true)));
        catalog
            .expect_list_prices()
            .returning(|id| Ok(vec![price(id, Some(0), "usd")]));

        let resolved = service(catalog).resolve("prod_a").await.unwrap();
        assert_eq!(resolved.unit_amount, 0);
    }
}
