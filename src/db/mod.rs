//! Database layer
//!
//! This module handles local storage of:
//! - Projects, requirements, sprints and tasks
//! - The change history recorded when they are modified
//!
//! Modifications go through a [`DataContext`], which writes entity rows and
//! their change history in one transaction.

mod audit_repository;
mod context;
mod entity;
mod entity_repository;
mod error;
pub mod migrations;
mod tracking;

pub use audit_repository::{format_timestamp, AuditRepository, DEFAULT_HISTORY_LIMIT, MAX_HISTORY_LIMIT};
pub use context::DataContext;
pub use entity::{column_values, is_scalar, to_properties, Entity};
pub use entity_repository::{EntityRepository, MAX_PAGE_SIZE};
pub use error::StoreError;
pub use tracking::{EntryState, Tracked, TrackedEntity};

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use tracing::info;

use crate::config::DatabaseConfig;

/// Database connection pool type
pub type DbPool = Pool<Sqlite>;

/// Initialize the database connection pool and run migrations
pub async fn init_pool(config: &DatabaseConfig) -> Result<DbPool> {
    let options = SqliteConnectOptions::from_str(&config.url)
        .with_context(|| format!("Invalid database URL: {}", config.url))?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(config.connect_timeout_secs))
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .connect_with(options)
        .await
        .context("Failed to connect to database")?;

    migrations::run(&pool).await?;

    info!(
        max_connections = config.max_connections,
        "Database pool initialized"
    );

    Ok(pool)
}

/// Verify the database answers queries
pub async fn check_health(pool: &DbPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .context("Database health check failed")?;
    Ok(())
}
