//! Generic entity repository

use serde_json::Value;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments};
use sqlx::SqlitePool;

use super::entity::{column_values, quote_ident, Entity};
use super::StoreError;

/// Upper bound for a single list page
pub const MAX_PAGE_SIZE: u32 = 500;

/// Plain reads and inserts for any [`Entity`].
///
/// Reads here are untracked; load through a `DataContext` to modify.
pub struct EntityRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> EntityRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Get an entity by id
    pub async fn get<T: Entity>(&self, id: i64) -> Result<Option<T>, StoreError> {
        let sql = format!(
            "SELECT * FROM {} WHERE {} = ?",
            quote_ident(T::TABLE),
            quote_ident(T::ID_FIELD)
        );

        let entity = sqlx::query_as::<_, T>(&sql)
            .bind(id)
            .fetch_optional(self.pool)
            .await?;

        Ok(entity)
    }

    /// List entities, optionally restricted to one parent project
    pub async fn list<T: Entity>(
        &self,
        parent_id: Option<i64>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<T>, StoreError> {
        let mut sql = format!("SELECT * FROM {}", quote_ident(T::TABLE));

        let parent = match (T::PARENT_FIELD, parent_id) {
            (Some(field), Some(id)) => {
                sql.push_str(&format!(" WHERE {} = ?", quote_ident(field)));
                Some(id)
            }
            _ => None,
        };

        sql.push_str(&format!(" ORDER BY {} LIMIT ? OFFSET ?", quote_ident(T::ID_FIELD)));

        let mut q = sqlx::query_as::<_, T>(&sql);
        if let Some(id) = parent {
            q = q.bind(id);
        }

        let rows = q
            .bind(i64::from(limit.min(MAX_PAGE_SIZE)))
            .bind(i64::from(offset))
            .fetch_all(self.pool)
            .await?;

        Ok(rows)
    }

    /// Insert a new row and return the generated id
    pub async fn insert<T: Entity>(&self, entity: &T) -> Result<i64, StoreError> {
        let values = column_values(entity)?;

        let columns = values
            .iter()
            .map(|(column, _)| quote_ident(column))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = vec!["?"; values.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(T::TABLE),
            columns,
            placeholders
        );

        let mut q = sqlx::query(&sql);
        for (_, value) in &values {
            q = bind_json(q, value);
        }

        let result = q.execute(self.pool).await?;
        Ok(result.last_insert_rowid())
    }
}

/// Bind a serialized property value with its natural SQLite type.
pub(crate) fn bind_json<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64()),
        },
        Value::String(s) => query.bind(s.clone()),
        other => query.bind(other.to_string()),
    }
}
