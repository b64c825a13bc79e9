//! Surface of the external payments platform: catalog reads, hosted checkout
//! sessions, and webhook signature verification. The platform is treated as
//! an opaque, trusted system; nothing here re-implements its guarantees.

pub mod client;
pub mod webhook;

pub use client::StripeClient;

use crate::errors::ServiceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StripeError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("api error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid response: {0}")]
    Decode(String),
}

impl From<StripeError> for ServiceError {
    fn from(err: StripeError) -> Self {
        match err {
            StripeError::NotFound(msg) => ServiceError::NotFound(msg),
            other => ServiceError::ExternalServiceError(other.to_string()),
        }
    }
}

/// Product record as the catalog reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripeProduct {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default = "default_true")]
    pub active: bool,
}

/// Price record. `unit_amount` is minor currency units; a product with no
/// usable price surfaces `None` and must never be defaulted to zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripePrice {
    pub id: String,
    pub product: String,
    #[serde(default)]
    pub unit_amount: Option<i64>,
    pub currency: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

/// One line of a checkout session being created, priced from a fresh catalog
/// resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLineItem {
    pub name: String,
    pub images: Vec<String>,
    pub unit_amount: i64,
    pub currency: String,
    pub quantity: i32,
}

#[derive(Debug, Clone)]
pub struct CreateSessionRequest {
    pub line_items: Vec<SessionLineItem>,
    pub success_url: String,
    pub cancel_url: String,
    pub metadata: HashMap<String, String>,
}

/// Freshly created session: the id we will key the order on, and the hosted
/// payment page the client is redirected to.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedSession {
    pub id: String,
    pub url: String,
}

/// One authoritative line of a completed session, as re-fetched with line
/// items expanded.
#[derive(Debug, Clone)]
pub struct SessionLine {
    pub product_id: Option<String>,
    pub unit_amount: Option<i64>,
    pub quantity: Option<i64>,
}

/// Completed-session view used by order materialization.
#[derive(Debug, Clone)]
pub struct SessionDetails {
    pub id: String,
    pub payment_status: String,
    pub amount_total: Option<i64>,
    pub currency: Option<String>,
    pub customer_email: Option<String>,
    pub payment_intent_id: Option<String>,
    pub line_items: Vec<SessionLine>,
    pub metadata: HashMap<String, String>,
}

/// Read access to the external product catalog.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn get_product(&self, id: &str) -> Result<StripeProduct, StripeError>;

    /// Active prices for a product, most relevant first.
    async fn list_prices(&self, product_id: &str) -> Result<Vec<StripePrice>, StripeError>;
}

/// Hosted checkout-session API.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentSessions: Send + Sync {
    async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<CreatedSession, StripeError>;

    /// Retrieves a session with its line items (and their prices) expanded.
    async fn retrieve_session(&self, id: &str) -> Result<SessionDetails, StripeError>;
}
