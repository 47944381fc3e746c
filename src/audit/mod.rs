//! Field-level change auditing
//!
//! Every commit that flows through the [`DataContext`](crate::db::DataContext)
//! is inspected by the [`AuditInterceptor`] before it reaches the database.
//! For each modified entity the interceptor compares the rendered original
//! and current value of every touched scalar property and stages one
//! [`NewChangeGroup`](crate::models::NewChangeGroup) holding the differences.
//! The groups are written in the same transaction as the entity rows.
//!
//! Auditing is best effort: a failure while diffing one entity is logged and
//! that entity is skipped, the commit itself is never affected.

mod interceptor;
mod render;

pub use interceptor::*;
pub use render::*;

use serde_json::Value;
use thiserror::Error;

/// Actor recorded when a commit carries no identity (background jobs, migrations).
pub const SYSTEM_ACTOR: &str = "system";

/// Bookkeeping properties stamped on every commit and never recorded.
///
/// Always excluded; `audit.excluded_fields` only adds to this list.
pub const BOOKKEEPING_FIELDS: [&str; 2] = ["UpdatedAt", "UpdatedBy"];

/// Errors raised while computing the diff for a single entity.
///
/// These never escape the interceptor; they are logged and the entity is
/// left out of the change history for that commit.
#[derive(Debug, Error)]
pub enum AuditError {
    /// The entity could not be serialized into a property snapshot
    #[error("failed to snapshot {entity_type}: {source}")]
    Snapshot {
        entity_type: String,
        #[source]
        source: serde_json::Error,
    },

    /// A property could not be read
    #[error("unreadable property {entity_type}.{property}: {reason}")]
    UnreadableProperty {
        entity_type: String,
        property: String,
        reason: String,
    },
}

/// Whether a property holds a plain value or points at other entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    Scalar,
    Navigation,
}

/// One property of a tracked entity as seen at commit time.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyEntry {
    pub name: String,
    pub kind: PropertyKind,
    pub original: Value,
    pub current: Value,
    /// Set when the property was touched since the entity was loaded.
    pub is_modified: bool,
}

impl PropertyEntry {
    pub fn scalar(name: impl Into<String>, original: Value, current: Value, is_modified: bool) -> Self {
        Self {
            name: name.into(),
            kind: PropertyKind::Scalar,
            original,
            current,
            is_modified,
        }
    }
}

/// Read-only view of a modified entity that the interceptor can audit.
pub trait AuditEntry {
    /// Kind name recorded as `entity_type` (e.g. `"Task"`).
    fn entity_type(&self) -> &str;

    /// Name of the identifier property, never diffed.
    fn id_field(&self) -> &str;

    /// Identifier of the row; entries without one are not audited.
    fn entity_id(&self) -> Option<i64>;

    /// All properties with their original and current values.
    fn properties(&self) -> Result<Vec<PropertyEntry>, AuditError>;
}
