//! Change history models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::Entity;

/// One audited mutation of one entity in one commit.
///
/// Groups are append-only. The audited entity is referenced by
/// `entity_type` + `entity_id` only, there is no foreign key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ChangeGroup {
    pub id: i64,
    pub entity_type: String,
    pub entity_id: i64,
    pub changed_by: String,
    pub changed_at: DateTime<Utc>,
    #[sqlx(skip)]
    #[serde(default)]
    pub items: Vec<ChangeItem>,
}

impl Entity for ChangeGroup {
    const ENTITY_TYPE: &'static str = "ChangeGroup";
    const TABLE: &'static str = "change_groups";

    fn id(&self) -> Option<i64> {
        (self.id > 0).then_some(self.id)
    }

    fn navigation_properties() -> &'static [&'static str] {
        &["items"]
    }
}

/// One field-level before/after pair within a [`ChangeGroup`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ChangeItem {
    pub id: i64,
    pub change_group_id: i64,
    pub field_name: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

impl Entity for ChangeItem {
    const ENTITY_TYPE: &'static str = "ChangeItem";
    const TABLE: &'static str = "change_items";

    fn id(&self) -> Option<i64> {
        (self.id > 0).then_some(self.id)
    }
}

/// A change group staged during a commit, not yet persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewChangeGroup {
    pub entity_type: String,
    pub entity_id: i64,
    pub changed_by: String,
    pub changed_at: DateTime<Utc>,
    pub items: Vec<NewChangeItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewChangeItem {
    pub field_name: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

/// Filters for browsing the change history.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ChangeHistoryQuery {
    pub entity_type: Option<String>,
    pub entity_id: Option<i64>,
    pub changed_by: Option<String>,
    /// Inclusive lower bound on `changed_at`
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `changed_at`
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}
