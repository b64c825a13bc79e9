use super::{
    CreateSessionRequest, CreatedSession, PaymentSessions, ProductCatalog, SessionDetails,
    SessionLine, StripeError, StripePrice, StripeProduct,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, instrument};

/// Reqwest-backed client for the payments platform. Form-encoded writes,
/// bearer auth, and a bounded timeout on every call; a timeout surfaces as a
/// transport error, never as assumed success.
#[derive(Clone)]
pub struct StripeClient {
    http: reqwest::Client,
    api_base: String,
    secret_key: String,
}

impl StripeClient {
    pub fn new(
        api_base: impl Into<String>,
        secret_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, StripeError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(StripeError::Transport)?;

        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    async fn check<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        context: &str,
    ) -> Result<T, StripeError> {
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(StripeError::NotFound(context.to_string()));
        }
        if !status.is_success() {
            let message = response
                .json::<ApiErrorEnvelope>()
                .await
                .map(|e| e.error.message)
                .unwrap_or_else(|_| context.to_string());
            return Err(StripeError::Api {
                status: status.as_u16(),
                message,
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| StripeError::Decode(e.to_string()))
    }
}

#[async_trait]
impl ProductCatalog for StripeClient {
    #[instrument(skip(self))]
    async fn get_product(&self, id: &str) -> Result<StripeProduct, StripeError> {
        let response = self
            .http
            .get(self.url(&format!("/v1/products/{}", id)))
            .bearer_auth(&self.secret_key)
            .send()
            .await?;

        Self::check(response, &format!("product {}", id)).await
    }

    #[instrument(skip(self))]
    async fn list_prices(&self, product_id: &str) -> Result<Vec<StripePrice>, StripeError> {
        let response = self
            .http
            .get(self.url("/v1/prices"))
            .bearer_auth(&self.secret_key)
            .query(&[
                ("product", product_id),
                ("active", "true"),
                ("limit", "10"),
            ])
            .send()
            .await?;

        let list: ListEnvelope<StripePrice> =
            Self::check(response, &format!("prices for {}", product_id)).await?;
        Ok(list.data)
    }
}

#[async_trait]
impl PaymentSessions for StripeClient {
    #[instrument(skip(self, request), fields(line_items = request.line_items.len()))]
    async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<CreatedSession, StripeError> {
        let mut form: Vec<(String, String)> = vec![
            ("mode".into(), "payment".into()),
            ("payment_method_types[0]".into(), "card".into()),
            ("success_url".into(), request.success_url),
            ("cancel_url".into(), request.cancel_url),
        ];

        for (i, item) in request.line_items.iter().enumerate() {
            form.push((
                format!("line_items[{}][price_data][currency]", i),
                item.currency.clone(),
            ));
            form.push((
                format!("line_items[{}][price_data][product_data][name]", i),
                item.name.clone(),
            ));
            for (j, image) in item.images.iter().enumerate() {
                form.push((
                    format!("line_items[{}][price_data][product_data][images][{}]", i, j),
                    image.clone(),
                ));
            }
            form.push((
                format!("line_items[{}][price_data][unit_amount]", i),
                item.unit_amount.to_string(),
            ));
            form.push((
                format!("line_items[{}][quantity]", i),
                item.quantity.to_string(),
            ));
        }

        for (key, value) in &request.metadata {
            form.push((format!("metadata[{}]", key), value.clone()));
        }

        let response = self
            .http
            .post(self.url("/v1/checkout/sessions"))
            .bearer_auth(&self.secret_key)
            .form(&form)
            .send()
            .await?;

        let created: CreatedSession = Self::check(response, "checkout session").await?;
        debug!(session_id = %created.id, "Created checkout session");
        Ok(created)
    }

    #[instrument(skip(self))]
    async fn retrieve_session(&self, id: &str) -> Result<SessionDetails, StripeError> {
        let response = self
            .http
            .get(self.url(&format!("/v1/checkout/sessions/{}", id)))
            .bearer_auth(&self.secret_key)
            .query(&[
                ("expand[]", "line_items"),
                ("expand[]", "line_items.data.price"),
            ])
            .send()
            .await?;

        let session: SessionEnvelope =
            Self::check(response, &format!("checkout session {}", id)).await?;
        Ok(session.into())
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ListEnvelope<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct SessionEnvelope {
    id: String,
    payment_status: String,
    #[serde(default)]
    amount_total: Option<i64>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    customer_email: Option<String>,
    #[serde(default)]
    customer_details: Option<CustomerDetailsEnvelope>,
    #[serde(default)]
    payment_intent: Option<String>,
    #[serde(default)]
    line_items: Option<ListEnvelope<SessionLineEnvelope>>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct CustomerDetailsEnvelope {
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SessionLineEnvelope {
    #[serde(default)]
    quantity: Option<i64>,
    #[serde(default)]
    price: Option<SessionPriceEnvelope>,
}

#[derive(Debug, Deserialize)]
struct SessionPriceEnvelope {
    #[serde(default)]
    unit_amount: Option<i64>,
    #[serde(default)]
    product: Option<String>,
}

impl From<SessionEnvelope> for SessionDetails {
    fn from(envelope: SessionEnvelope) -> Self {
        let customer_email = envelope
            .customer_details
            .and_then(|d| d.email)
            .or(envelope.customer_email);

        let line_items = envelope
            .line_items
            .map(|list| {
                list.data
                    .into_iter()
                    .map(|line| SessionLine {
                        product_id: line.price.as_ref().and_then(|p| p.product.clone()),
                        unit_amount: line.price.as_ref().and_then(|p| p.unit_amount),
                        quantity: line.quantity,
                    })
                    .collect()
            })
            .unwrap_or_default();

        SessionDetails {
            id: envelope.id,
            payment_status: envelope.payment_status,
            amount_total: envelope.amount_total,
            currency: envelope.currency,
            customer_email,
            payment_intent_id: envelope.payment_intent,
            line_items,
            metadata: envelope.metadata,
        }
    }
}
