//! Task model

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError, ValidationErrors};

use super::patch::{double_option, field_error, set, ApplyPatch, NewEntity};
use super::Priority;
use crate::db::Entity;

/// Task workflow status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "kebab-case")]
#[sqlx(rename_all = "kebab-case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Review,
    Done,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Todo => write!(f, "todo"),
            TaskStatus::InProgress => write!(f, "in-progress"),
            TaskStatus::Review => write!(f, "review"),
            TaskStatus::Done => write!(f, "done"),
        }
    }
}

/// Task entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Task {
    pub id: i64,
    pub project_id: i64,
    pub requirement_id: Option<i64>,
    pub sprint_id: Option<i64>,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: Priority,
    pub assignee: Option<String>,
    pub estimate_hours: Option<f64>,
    pub due_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub updated_by: Option<String>,
}

impl Entity for Task {
    const ENTITY_TYPE: &'static str = "Task";
    const TABLE: &'static str = "tasks";
    const PARENT_FIELD: Option<&'static str> = Some("project_id");
    const STAMPED_FIELDS: &'static [&'static str] = &["updated_at", "updated_by"];

    fn id(&self) -> Option<i64> {
        (self.id > 0).then_some(self.id)
    }

    fn stamp(&mut self, actor: &str, at: DateTime<Utc>) {
        self.updated_at = at;
        self.updated_by = Some(actor.to_string());
    }

    fn check_invariants(&self) -> Result<(), ValidationErrors> {
        match self.estimate_hours {
            Some(hours) if !(0.0..=MAX_ESTIMATE_HOURS).contains(&hours) => Err(field_error(
                "estimate_hours",
                ValidationError::new("estimate_out_of_range"),
            )),
            _ => Ok(()),
        }
    }
}

const MAX_ESTIMATE_HOURS: f64 = 10000.0;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateTaskRequest {
    #[validate(range(min = 1))]
    pub project_id: i64,
    pub requirement_id: Option<i64>,
    pub sprint_id: Option<i64>,
    #[validate(length(min = 1, max = 300))]
    pub title: String,
    #[validate(length(max = 8000))]
    pub description: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: Priority,
    #[validate(length(min = 1, max = 100))]
    pub assignee: Option<String>,
    #[validate(range(min = 0.0, max = 10000.0))]
    pub estimate_hours: Option<f64>,
    pub due_date: Option<NaiveDate>,
}

impl NewEntity<Task> for CreateTaskRequest {
    fn into_entity(self, now: DateTime<Utc>, actor: Option<&str>) -> Task {
        Task {
            id: 0,
            project_id: self.project_id,
            requirement_id: self.requirement_id,
            sprint_id: self.sprint_id,
            title: self.title,
            description: self.description,
            status: self.status,
            priority: self.priority,
            assignee: self.assignee,
            estimate_hours: self.estimate_hours,
            due_date: self.due_date,
            created_at: now,
            updated_at: now,
            updated_by: actor.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateTaskRequest {
    #[serde(default, deserialize_with = "double_option")]
    pub requirement_id: Option<Option<i64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub sprint_id: Option<Option<i64>>,
    #[validate(length(min = 1, max = 300))]
    pub title: Option<String>,
    #[validate(length(max = 8000))]
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    #[validate(length(min = 1, max = 100))]
    #[serde(default, deserialize_with = "double_option")]
    pub assignee: Option<Option<String>>,
    #[validate(range(min = 0.0, max = 10000.0))]
    #[serde(default, deserialize_with = "double_option")]
    pub estimate_hours: Option<Option<f64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub due_date: Option<Option<NaiveDate>>,
}

impl ApplyPatch<Task> for UpdateTaskRequest {
    fn apply(self, target: &mut Task) -> Vec<&'static str> {
        let mut touched = Vec::new();
        set(&mut touched, "requirement_id", &mut target.requirement_id, self.requirement_id);
        set(&mut touched, "sprint_id", &mut target.sprint_id, self.sprint_id);
        set(&mut touched, "title", &mut target.title, self.title);
        set(&mut touched, "description", &mut target.description, self.description);
        set(&mut touched, "status", &mut target.status, self.status);
        set(&mut touched, "priority", &mut target.priority, self.priority);
        set(&mut touched, "assignee", &mut target.assignee, self.assignee);
        set(&mut touched, "estimate_hours", &mut target.estimate_hours, self.estimate_hours);
        set(&mut touched, "due_date", &mut target.due_date, self.due_date);
        touched
    }
}
