//! Project, requirement, sprint and task endpoints
//!
//! Every entity kind exposes the same routes, built from generic handlers:
//!
//! - `GET /` list (optionally `?project_id=`), `POST /` create
//! - `GET /{id}`, `PUT /{id}` partial update, `DELETE /{id}`
//!
//! Updates and deletes run through a [`DataContext`](crate::db::DataContext),
//! so modifications land in the change history in the same transaction.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::{de::DeserializeOwned, Deserialize};
use tracing::info;
use validator::Validate;

use super::Actor;
use crate::{
    db::{Entity, EntityRepository},
    models::{
        ApplyPatch, CreateProjectRequest, CreateRequirementRequest, CreateSprintRequest,
        CreateTaskRequest, NewEntity, Project, Requirement, Sprint, Task, UpdateProjectRequest,
        UpdateRequirementRequest, UpdateSprintRequest, UpdateTaskRequest,
    },
    utils::{AppError, AppResult},
    AppState,
};

const DEFAULT_PAGE_SIZE: u32 = 50;

pub fn project_routes() -> Router<AppState> {
    entity_routes::<Project, CreateProjectRequest, UpdateProjectRequest>()
}

pub fn requirement_routes() -> Router<AppState> {
    entity_routes::<Requirement, CreateRequirementRequest, UpdateRequirementRequest>()
}

pub fn sprint_routes() -> Router<AppState> {
    entity_routes::<Sprint, CreateSprintRequest, UpdateSprintRequest>()
}

pub fn task_routes() -> Router<AppState> {
    entity_routes::<Task, CreateTaskRequest, UpdateTaskRequest>()
}

fn entity_routes<T, C, U>() -> Router<AppState>
where
    T: Entity,
    C: DeserializeOwned + Validate + NewEntity<T> + Send + 'static,
    U: DeserializeOwned + Validate + ApplyPatch<T> + Send + 'static,
{
    Router::new()
        .route("/", get(list_entities::<T>).post(create_entity::<T, C>))
        .route(
            "/{id}",
            get(get_entity::<T>)
                .put(update_entity::<T, U>)
                .delete(delete_entity::<T>),
        )
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub project_id: Option<i64>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

fn not_found<T: Entity>(id: i64) -> AppError {
    AppError::not_found(format!("{} {} not found", T::ENTITY_TYPE, id))
}

async fn list_entities<T: Entity>(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<T>>> {
    let repo = EntityRepository::new(&state.db);
    let entities = repo
        .list::<T>(
            query.project_id,
            query.limit.unwrap_or(DEFAULT_PAGE_SIZE),
            query.offset.unwrap_or(0),
        )
        .await?;
    Ok(Json(entities))
}

async fn get_entity<T: Entity>(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<T>> {
    let repo = EntityRepository::new(&state.db);
    let entity = repo.get::<T>(id).await?.ok_or_else(|| not_found::<T>(id))?;
    Ok(Json(entity))
}

async fn create_entity<T, C>(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<C>,
) -> AppResult<(StatusCode, Json<T>)>
where
    T: Entity,
    C: Validate + NewEntity<T>,
{
    payload.validate()?;

    let entity = payload.into_entity(Utc::now(), actor.as_deref());
    entity.check_invariants()?;
    let repo = EntityRepository::new(&state.db);
    let id = repo.insert(&entity).await?;
    let created = repo
        .get::<T>(id)
        .await?
        .ok_or_else(|| AppError::internal(format!("{} {} vanished after insert", T::ENTITY_TYPE, id)))?;

    info!(entity_type = T::ENTITY_TYPE, id, "Entity created");
    Ok((StatusCode::CREATED, Json(created)))
}

/// Apply a partial update; only the fields present in the body are touched.
async fn update_entity<T, U>(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<i64>,
    Json(payload): Json<U>,
) -> AppResult<Json<T>>
where
    T: Entity,
    U: Validate + ApplyPatch<T>,
{
    payload.validate()?;

    let mut ctx = state.data_context();
    let mut entity = ctx.find::<T>(id).await?.ok_or_else(|| not_found::<T>(id))?;

    let touched = payload.apply(&mut entity);
    entity.check_invariants()?;
    if !touched.is_empty() {
        ctx.update_fields(&entity, &touched)?;
        ctx.save_changes(actor.as_deref()).await?;
    }

    let updated = ctx.find::<T>(id).await?.ok_or_else(|| not_found::<T>(id))?;
    Ok(Json(updated))
}

async fn delete_entity<T: Entity>(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    let mut ctx = state.data_context();
    let entity = ctx.find::<T>(id).await?.ok_or_else(|| not_found::<T>(id))?;

    ctx.remove(&entity)?;
    ctx.save_changes(actor.as_deref()).await?;

    info!(entity_type = T::ENTITY_TYPE, id, actor = ?actor.as_deref(), "Entity deleted");
    Ok(StatusCode::NO_CONTENT)
}
