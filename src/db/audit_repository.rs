//! Change history repository

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{SqliteConnection, SqlitePool};

use crate::models::{ChangeGroup, ChangeHistoryQuery, ChangeItem, NewChangeGroup};

pub const DEFAULT_HISTORY_LIMIT: u32 = 100;
pub const MAX_HISTORY_LIMIT: u32 = 1000;

const GROUP_COLUMNS: &str = "id, entity_type, entity_id, changed_by, changed_at";

pub struct AuditRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> AuditRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist a staged change group and its items on `conn`.
    ///
    /// Called inside the commit transaction, so errors stay as [`sqlx::Error`]
    /// and roll back the whole commit.
    pub async fn insert_group(
        conn: &mut SqliteConnection,
        group: &NewChangeGroup,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO change_groups (entity_type, entity_id, changed_by, changed_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&group.entity_type)
        .bind(group.entity_id)
        .bind(&group.changed_by)
        .bind(format_timestamp(group.changed_at))
        .execute(&mut *conn)
        .await?;

        let group_id = result.last_insert_rowid();

        for item in &group.items {
            sqlx::query(
                r#"
                INSERT INTO change_items (change_group_id, field_name, old_value, new_value)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(group_id)
            .bind(&item.field_name)
            .bind(item.old_value.as_deref())
            .bind(item.new_value.as_deref())
            .execute(&mut *conn)
            .await?;
        }

        Ok(group_id)
    }

    /// Get one change group with its items
    pub async fn get(&self, id: i64) -> Result<Option<ChangeGroup>> {
        let sql = format!("SELECT {GROUP_COLUMNS} FROM change_groups WHERE id = ?");
        let group = sqlx::query_as::<_, ChangeGroup>(&sql)
            .bind(id)
            .fetch_optional(self.pool)
            .await
            .context("Failed to fetch change group")?;

        match group {
            Some(group) => Ok(self.with_items(vec![group]).await?.pop()),
            None => Ok(None),
        }
    }

    /// Full history of one entity, oldest first
    pub async fn history_for(&self, entity_type: &str, entity_id: i64) -> Result<Vec<ChangeGroup>> {
        let sql = format!(
            "SELECT {GROUP_COLUMNS} FROM change_groups \
             WHERE entity_type = ? AND entity_id = ? \
             ORDER BY changed_at ASC, id ASC"
        );
        let groups = sqlx::query_as::<_, ChangeGroup>(&sql)
            .bind(entity_type)
            .bind(entity_id)
            .fetch_all(self.pool)
            .await
            .context("Failed to fetch entity history")?;

        self.with_items(groups).await
    }

    /// Browse the change history, newest first
    pub async fn list(&self, query: &ChangeHistoryQuery) -> Result<Vec<ChangeGroup>> {
        let mut sql = format!("SELECT {GROUP_COLUMNS} FROM change_groups WHERE 1 = 1");

        if query.entity_type.is_some() {
            sql.push_str(" AND entity_type = ?");
        }
        if query.entity_id.is_some() {
            sql.push_str(" AND entity_id = ?");
        }
        if query.changed_by.is_some() {
            sql.push_str(" AND changed_by = ?");
        }
        if query.since.is_some() {
            sql.push_str(" AND changed_at >= ?");
        }
        if query.until.is_some() {
            sql.push_str(" AND changed_at < ?");
        }

        sql.push_str(" ORDER BY changed_at DESC, id DESC LIMIT ? OFFSET ?");

        let mut q = sqlx::query_as::<_, ChangeGroup>(&sql);
        if let Some(ref entity_type) = query.entity_type {
            q = q.bind(entity_type);
        }
        if let Some(entity_id) = query.entity_id {
            q = q.bind(entity_id);
        }
        if let Some(ref changed_by) = query.changed_by {
            q = q.bind(changed_by);
        }
        if let Some(since) = query.since {
            q = q.bind(format_timestamp(since));
        }
        if let Some(until) = query.until {
            q = q.bind(format_timestamp(until));
        }

        let limit = query
            .limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .min(MAX_HISTORY_LIMIT);
        let offset = query.offset.unwrap_or(0);

        let groups = q
            .bind(i64::from(limit))
            .bind(i64::from(offset))
            .fetch_all(self.pool)
            .await
            .context("Failed to list change history")?;

        self.with_items(groups).await
    }

    /// Load the items of every group in one query.
    async fn with_items(&self, mut groups: Vec<ChangeGroup>) -> Result<Vec<ChangeGroup>> {
        if groups.is_empty() {
            return Ok(groups);
        }

        let placeholders = vec!["?"; groups.len()].join(", ");
        let sql = format!(
            "SELECT id, change_group_id, field_name, old_value, new_value FROM change_items \
             WHERE change_group_id IN ({placeholders}) ORDER BY id"
        );

        let mut q = sqlx::query_as::<_, ChangeItem>(&sql);
        for group in &groups {
            q = q.bind(group.id);
        }

        let items = q
            .fetch_all(self.pool)
            .await
            .context("Failed to fetch change items")?;

        let mut by_group: HashMap<i64, Vec<ChangeItem>> = HashMap::new();
        for item in items {
            by_group.entry(item.change_group_id).or_default().push(item);
        }
        for group in &mut groups {
            group.items = by_group.remove(&group.id).unwrap_or_default();
        }

        Ok(groups)
    }
}

/// Storage format for `changed_at`; fixed width so text order is time order.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}
