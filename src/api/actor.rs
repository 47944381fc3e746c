//! Acting user extraction

use std::convert::Infallible;

use axum::{extract::FromRequestParts, http::request::Parts};
use tracing::warn;

use crate::{utils::validation::validate_actor_name, AppState};

/// Name of the user a request acts on behalf of.
///
/// Read from the configured actor header. Identity is trusted as sent; a
/// missing or blank header leaves the actor unset, which the change history
/// records as `system`. A header that is not valid text or not a valid actor
/// name is logged and treated as missing, so the save itself never fails on
/// the acting user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Actor(pub Option<String>);

impl Actor {
    pub fn as_deref(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl FromRequestParts<AppState> for Actor {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = state.config.audit.actor_header.as_str();

        let Some(value) = parts.headers.get(header) else {
            return Ok(Actor(None));
        };

        let Ok(name) = value.to_str() else {
            warn!(header, "Actor header is not valid text, recording as system");
            return Ok(Actor(None));
        };
        let name = name.trim();

        if name.is_empty() {
            return Ok(Actor(None));
        }
        if !validate_actor_name(name) {
            warn!(header, length = name.len(), "Invalid actor name, recording as system");
            return Ok(Actor(None));
        }

        Ok(Actor(Some(name.to_string())))
    }
}
