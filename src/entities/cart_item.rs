use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One (session, product) line of a shopping cart.
///
/// Price and currency are deliberately absent: they are resolved live from
/// the external catalog at read time so a stale cart can never quote a stale
/// price.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "cart_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Opaque cart session token from the client cookie
    pub session_id: String,
    /// External catalog product identifier, not locally owned
    pub product_id: String,
    pub quantity: i32,
    /// Owning user, when the session belongs to an authenticated customer.
    /// User-less rows are subject to the retention sweep.
    #[sea_orm(nullable)]
    pub user_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
