//! Data context error types

use thiserror::Error;

/// Errors from the data context and entity repositories.
///
/// Database failures are passed through untouched in [`StoreError::Database`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// The entity was never loaded into (or attached to) this context
    #[error("{entity_type} #{id} is not tracked by this context")]
    NotTracked { entity_type: &'static str, id: i64 },

    /// A partial update named a property the entity does not have
    #[error("{entity_type} has no property named '{property}'")]
    UnknownProperty {
        entity_type: &'static str,
        property: String,
    },

    /// A tracked entity has no identifier to address its row
    #[error("{entity_type} has no identifier")]
    MissingIdentifier { entity_type: String },

    /// The entity could not be converted into column values
    #[error("failed to serialize entity: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The blocking commit path was used without a Tokio runtime
    #[error("no Tokio runtime available for a blocking commit")]
    NoRuntime,

    /// The commit was cancelled before the transaction completed
    #[error("commit cancelled")]
    Cancelled,

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}
