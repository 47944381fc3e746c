//! Requirement model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::patch::{double_option, set, ApplyPatch, NewEntity};
use crate::db::Entity;

/// Priority scale shared by requirements and tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "kebab-case")]
#[sqlx(rename_all = "kebab-case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
            Priority::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "kebab-case")]
#[sqlx(rename_all = "kebab-case")]
pub enum RequirementStatus {
    #[default]
    Draft,
    Approved,
    Implemented,
    Rejected,
}

/// Requirement entity, owned by a project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Requirement {
    pub id: i64,
    pub project_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub status: RequirementStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub updated_by: Option<String>,
}

impl Entity for Requirement {
    const ENTITY_TYPE: &'static str = "Requirement";
    const TABLE: &'static str = "requirements";
    const PARENT_FIELD: Option<&'static str> = Some("project_id");
    const STAMPED_FIELDS: &'static [&'static str] = &["updated_at", "updated_by"];

    fn id(&self) -> Option<i64> {
        (self.id > 0).then_some(self.id)
    }

    fn stamp(&mut self, actor: &str, at: DateTime<Utc>) {
        self.updated_at = at;
        self.updated_by = Some(actor.to_string());
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateRequirementRequest {
    #[validate(range(min = 1))]
    pub project_id: i64,
    #[validate(length(min = 1, max = 300))]
    pub title: String,
    #[validate(length(max = 8000))]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub status: RequirementStatus,
}

impl NewEntity<Requirement> for CreateRequirementRequest {
    fn into_entity(self, now: DateTime<Utc>, actor: Option<&str>) -> Requirement {
        Requirement {
            id: 0,
            project_id: self.project_id,
            title: self.title,
            description: self.description,
            priority: self.priority,
            status: self.status,
            created_at: now,
            updated_at: now,
            updated_by: actor.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateRequirementRequest {
    #[validate(length(min = 1, max = 300))]
    pub title: Option<String>,
    #[validate(length(max = 8000))]
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    pub priority: Option<Priority>,
    pub status: Option<RequirementStatus>,
}

impl ApplyPatch<Requirement> for UpdateRequirementRequest {
    fn apply(self, target: &mut Requirement) -> Vec<&'static str> {
        let mut touched = Vec::new();
        set(&mut touched, "title", &mut target.title, self.title);
        set(&mut touched, "description", &mut target.description, self.description);
        set(&mut touched, "priority", &mut target.priority, self.priority);
        set(&mut touched, "status", &mut target.status, self.status);
        touched
    }
}
