//! Database migrations
//!
//! Migrations are handled by SQLx and stored in the `migrations/` directory.
//! This module provides utilities for working with migrations programmatically.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::debug;

/// Apply every pending embedded migration
pub async fn run(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("Failed to run database migrations")?;

    if let Some(version) = applied_version(pool).await? {
        debug!(version, "Database schema is up to date");
    }

    Ok(())
}

/// Latest applied migration version, if any
pub async fn applied_version(pool: &SqlitePool) -> Result<Option<i64>> {
    let version: Option<i64> =
        sqlx::query_scalar("SELECT MAX(version) FROM _sqlx_migrations WHERE success = 1")
            .fetch_one(pool)
            .await
            .context("Failed to read migration status")?;

    Ok(version)
}
