//! API routes and handlers
//!
//! This module defines all API endpoints and their routing.

use axum::{routing::get, Router};

use crate::AppState;

mod actor;
mod entities;
mod health;
mod history;

pub use actor::Actor;
pub use health::*;

/// Create the full API router
pub fn routes() -> Router<AppState> {
    Router::new()
        // Health check endpoints
        .route("/health", get(health::health_check))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        // Resource endpoints
        .nest("/projects", entities::project_routes())
        .nest("/requirements", entities::requirement_routes())
        .nest("/sprints", entities::sprint_routes())
        .nest("/tasks", entities::task_routes())
        // Change history
        .nest("/history", history::routes())
}
