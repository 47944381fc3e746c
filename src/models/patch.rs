//! Request DTO plumbing shared by the entity models

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer};
use validator::{ValidationError, ValidationErrors};

/// Builds a new entity from a create request.
pub trait NewEntity<T> {
    fn into_entity(self, now: DateTime<Utc>, actor: Option<&str>) -> T;
}

/// Applies a partial update to an entity.
pub trait ApplyPatch<T> {
    /// Copy every provided field onto `target` and return the names of the
    /// touched properties. A field sent with its current value is still
    /// reported as touched.
    fn apply(self, target: &mut T) -> Vec<&'static str>;
}

/// Distinguishes a missing field (`None`) from an explicit `null` (`Some(None)`).
///
/// Use together with `#[serde(default)]`.
pub fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Assign `value` to `field` and record `name` as touched.
pub(crate) fn set<V>(touched: &mut Vec<&'static str>, name: &'static str, field: &mut V, value: Option<V>) {
    if let Some(value) = value {
        *field = value;
        touched.push(name);
    }
}

/// Reject a date range that ends before it starts.
pub(crate) fn check_date_order(start: NaiveDate, end: NaiveDate) -> Result<(), ValidationError> {
    if end < start {
        return Err(ValidationError::new("end_date_before_start_date"));
    }
    Ok(())
}

/// Wrap a single field failure into [`ValidationErrors`].
pub(crate) fn field_error(field: &'static str, error: ValidationError) -> ValidationErrors {
    let mut errors = ValidationErrors::new();
    errors.add(field, error);
    errors
}
