//! Change history endpoints

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};

use crate::{
    db::AuditRepository,
    models::{ChangeGroup, ChangeHistoryQuery},
    utils::{validation::validate_entity_type, AppError, AppResult},
    AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_history))
        .route("/groups/{id}", get(get_group))
        .route("/{entity_type}/{entity_id}", get(entity_history))
}

fn check_entity_type(entity_type: &str) -> AppResult<()> {
    if validate_entity_type(entity_type) {
        Ok(())
    } else {
        Err(AppError::bad_request(format!("Invalid entity type: {entity_type}")))
    }
}

/// Browse the change history, newest first
async fn list_history(
    State(state): State<AppState>,
    Query(query): Query<ChangeHistoryQuery>,
) -> AppResult<Json<Vec<ChangeGroup>>> {
    if let Some(ref entity_type) = query.entity_type {
        check_entity_type(entity_type)?;
    }
    if let (Some(since), Some(until)) = (query.since, query.until) {
        if until <= since {
            return Err(AppError::bad_request("until must be later than since"));
        }
    }

    let repo = AuditRepository::new(&state.db);
    let groups = repo.list(&query).await?;
    Ok(Json(groups))
}

/// Full history of one entity, oldest first
async fn entity_history(
    State(state): State<AppState>,
    Path((entity_type, entity_id)): Path<(String, i64)>,
) -> AppResult<Json<Vec<ChangeGroup>>> {
    check_entity_type(&entity_type)?;

    let repo = AuditRepository::new(&state.db);
    let groups = repo.history_for(&entity_type, entity_id).await?;
    Ok(Json(groups))
}

/// One change group with its items
async fn get_group(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<ChangeGroup>> {
    let repo = AuditRepository::new(&state.db);
    let group = repo
        .get(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("Change group {id} not found")))?;
    Ok(Json(group))
}
