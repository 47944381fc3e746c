//! Project model

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationErrors};

use super::patch::{check_date_order, double_option, field_error, set, ApplyPatch, NewEntity};
use crate::db::Entity;

/// Project lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "kebab-case")]
#[sqlx(rename_all = "kebab-case")]
pub enum ProjectStatus {
    #[default]
    Planned,
    Active,
    OnHold,
    Completed,
    Archived,
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProjectStatus::Planned => write!(f, "planned"),
            ProjectStatus::Active => write!(f, "active"),
            ProjectStatus::OnHold => write!(f, "on-hold"),
            ProjectStatus::Completed => write!(f, "completed"),
            ProjectStatus::Archived => write!(f, "archived"),
        }
    }
}

/// Project entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub status: ProjectStatus,
    pub owner: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub updated_by: Option<String>,
}

impl Entity for Project {
    const ENTITY_TYPE: &'static str = "Project";
    const TABLE: &'static str = "projects";
    const STAMPED_FIELDS: &'static [&'static str] = &["updated_at", "updated_by"];

    fn id(&self) -> Option<i64> {
        (self.id > 0).then_some(self.id)
    }

    fn stamp(&mut self, actor: &str, at: DateTime<Utc>) {
        self.updated_at = at;
        self.updated_by = Some(actor.to_string());
    }

    fn check_invariants(&self) -> Result<(), ValidationErrors> {
        match (self.start_date, self.end_date) {
            (Some(start), Some(end)) => {
                check_date_order(start, end).map_err(|e| field_error("end_date", e))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateProjectRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(max = 4000))]
    pub description: Option<String>,
    #[serde(default)]
    pub status: ProjectStatus,
    #[validate(length(min = 1, max = 100))]
    pub owner: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl NewEntity<Project> for CreateProjectRequest {
    fn into_entity(self, now: DateTime<Utc>, actor: Option<&str>) -> Project {
        Project {
            id: 0,
            name: self.name,
            description: self.description,
            status: self.status,
            owner: self.owner,
            start_date: self.start_date,
            end_date: self.end_date,
            created_at: now,
            updated_at: now,
            updated_by: actor.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateProjectRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    #[validate(length(max = 4000))]
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    pub status: Option<ProjectStatus>,
    #[validate(length(min = 1, max = 100))]
    #[serde(default, deserialize_with = "double_option")]
    pub owner: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub start_date: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "double_option")]
    pub end_date: Option<Option<NaiveDate>>,
}

impl ApplyPatch<Project> for UpdateProjectRequest {
    fn apply(self, target: &mut Project) -> Vec<&'static str> {
        let mut touched = Vec::new();
        set(&mut touched, "name", &mut target.name, self.name);
        set(&mut touched, "description", &mut target.description, self.description);
        set(&mut touched, "status", &mut target.status, self.status);
        set(&mut touched, "owner", &mut target.owner, self.owner);
        set(&mut touched, "start_date", &mut target.start_date, self.start_date);
        set(&mut touched, "end_date", &mut target.end_date, self.end_date);
        touched
    }
}
