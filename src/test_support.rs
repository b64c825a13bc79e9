//! Shared fixtures for in-crate unit tests: an in-memory database with the
//! full schema applied, and an event sender draining into a background task.

use crate::events::EventSender;
use crate::migrator::Migrator;
use sea_orm::{Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use std::sync::Arc;
use tokio::sync::mpsc;

pub async fn test_db() -> Arc<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite should connect");
    Migrator::up(&db, None)
        .await
        .expect("migrations should apply");
    Arc::new(db)
}

pub fn test_event_sender() -> Arc<EventSender> {
    let (tx, mut rx) = mpsc::channel(64);
    tokio::spawn(async move { while rx.recv().await.is_some() {} });
    Arc::new(EventSender::new(tx))
}
