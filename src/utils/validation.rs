//! Input validation utilities

use once_cell::sync::Lazy;
use regex::Regex;

/// Entity kinds are type names such as `Task` or `ChangeGroup`
static ENTITY_TYPE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Z][A-Za-z0-9]*$").unwrap()
});

/// Printable names without control characters
static ACTOR_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^\p{Cc}]+$").unwrap()
});

/// Validate an entity type name used in history lookups
pub fn validate_entity_type(entity_type: &str) -> bool {
    entity_type.len() <= 64 && ENTITY_TYPE_REGEX.is_match(entity_type)
}

/// Validate an acting user's name as received from a request header
pub fn validate_actor_name(actor: &str) -> bool {
    let actor = actor.trim();
    !actor.is_empty() && actor.chars().count() <= 100 && ACTOR_REGEX.is_match(actor)
}
