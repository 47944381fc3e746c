//! Entity metadata shared by the data context and repositories

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::{sqlite::SqliteRow, FromRow};
use validator::ValidationErrors;

/// A persistent business object.
///
/// Columns are derived from the serde representation: every scalar property
/// except the identifier maps to a column of the same name in [`Self::TABLE`].
/// Array, object and declared navigation properties are not columns.
pub trait Entity:
    Serialize + for<'r> FromRow<'r, SqliteRow> + Clone + Send + Sync + Unpin + 'static
{
    /// Kind name recorded in the change history
    const ENTITY_TYPE: &'static str;
    const TABLE: &'static str;
    const ID_FIELD: &'static str = "id";
    /// Column referencing the owning project, if any
    const PARENT_FIELD: Option<&'static str> = None;
    /// Bookkeeping properties written by [`Entity::stamp`]
    const STAMPED_FIELDS: &'static [&'static str] = &[];

    fn id(&self) -> Option<i64>;

    fn navigation_properties() -> &'static [&'static str] {
        &[]
    }

    /// Update bookkeeping properties before a commit.
    fn stamp(&mut self, _actor: &str, _at: DateTime<Utc>) {}

    /// Cross-field rules a stored entity must satisfy, checked after a
    /// create request is converted and after a partial update is applied.
    fn check_invariants(&self) -> Result<(), ValidationErrors> {
        Ok(())
    }
}

/// Serialize a value into its property map.
pub fn to_properties<T: Serialize>(value: &T) -> Result<Map<String, Value>, serde_json::Error> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        _ => Err(<serde_json::Error as serde::ser::Error>::custom(
            "entity must serialize to an object",
        )),
    }
}

/// Whether a serialized property holds a plain value.
pub fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Array(_) | Value::Object(_))
}

/// Column/value pairs for every scalar, non-identifier property of `entity`.
pub fn column_values<T: Entity>(entity: &T) -> Result<Vec<(String, Value)>, serde_json::Error> {
    let navigation = T::navigation_properties();
    Ok(to_properties(entity)?
        .into_iter()
        .filter(|(name, value)| {
            name != T::ID_FIELD && !navigation.contains(&name.as_str()) && is_scalar(value)
        })
        .collect())
}

/// Quote an SQL identifier.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
