//! Canonical text rendering of property values
//!
//! Change items store values as text, and two values are considered equal
//! when they render to the same text. Everything goes through serde first, so
//! dates are already ISO-8601 strings, enums are their serde names and numbers
//! use JSON formatting regardless of locale.

use serde_json::Value;

/// Render a property value for comparison and storage.
///
/// `null` renders as `None`. Strings are returned as-is (no quoting).
pub fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}

/// Normalize a property name for exclusion matching.
///
/// `UpdatedAt`, `updatedAt` and `updated_at` all normalize to `updatedat`.
pub fn normalize_field_name(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}
