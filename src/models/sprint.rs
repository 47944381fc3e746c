//! Sprint model

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError, ValidationErrors};

use super::patch::{check_date_order, double_option, field_error, set, ApplyPatch, NewEntity};
use crate::db::Entity;

/// Time-boxed iteration of a project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Sprint {
    pub id: i64,
    pub project_id: i64,
    pub name: String,
    pub goal: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub updated_by: Option<String>,
}

impl Entity for Sprint {
    const ENTITY_TYPE: &'static str = "Sprint";
    const TABLE: &'static str = "sprints";
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
        check_date_order(self.start_date, self.end_date).map_err(|e| field_error("end_date", e))
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[validate(schema(function = "validate_sprint_dates"))]
pub struct CreateSprintRequest {
    #[validate(range(min = 1))]
    pub project_id: i64,
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(length(max = 2000))]
    pub goal: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

fn validate_sprint_dates(req: &CreateSprintRequest) -> Result<(), ValidationError> {
    check_date_order(req.start_date, req.end_date)
}

impl NewEntity<Sprint> for CreateSprintRequest {
    fn into_entity(self, now: DateTime<Utc>, actor: Option<&str>) -> Sprint {
        Sprint {
            id: 0,
            project_id: self.project_id,
            name: self.name,
            goal: self.goal,
            start_date: self.start_date,
            end_date: self.end_date,
            created_at: now,
            updated_at: now,
            updated_by: actor.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateSprintRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    #[validate(length(max = 2000))]
    #[serde(default, deserialize_with = "double_option")]
    pub goal: Option<Option<String>>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl ApplyPatch<Sprint> for UpdateSprintRequest {
    fn apply(self, target: &mut Sprint) -> Vec<&'static str> {
        let mut touched = Vec::new();
        set(&mut touched, "name", &mut target.name, self.name);
        set(&mut touched, "goal", &mut target.goal, self.goal);
        set(&mut touched, "start_date", &mut target.start_date, self.start_date);
        set(&mut touched, "end_date", &mut target.end_date, self.end_date);
        touched
    }
}
