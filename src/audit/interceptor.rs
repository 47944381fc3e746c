//! Commit interceptor that turns property diffs into change groups

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::{
    normalize_field_name, render_value, AuditEntry, AuditError, PropertyKind, BOOKKEEPING_FIELDS,
    SYSTEM_ACTOR,
};
use crate::config::AuditConfig;
use crate::db::Entity;
use crate::models::{ChangeGroup, ChangeItem, NewChangeGroup, NewChangeItem};

/// Entity kinds that make up the change history itself and are never audited.
const AUDIT_RECORD_TYPES: [&str; 2] = [ChangeGroup::ENTITY_TYPE, ChangeItem::ENTITY_TYPE];

/// Builds change groups for the modified entries of a commit.
///
/// The interceptor holds no per-commit state and performs no I/O; the data
/// context calls [`build_change_groups`](Self::build_change_groups) and writes
/// the result in the same transaction as the entity rows.
#[derive(Debug, Clone)]
pub struct AuditInterceptor {
    enabled: bool,
    /// Normalized names of bookkeeping fields that change on every save
    excluded_fields: Vec<String>,
}

impl Default for AuditInterceptor {
    fn default() -> Self {
        Self::new(&AuditConfig::default())
    }
}

impl AuditInterceptor {
    pub fn new(config: &AuditConfig) -> Self {
        Self {
            enabled: config.enabled,
            excluded_fields: BOOKKEEPING_FIELDS
                .iter()
                .copied()
                .chain(config.excluded_fields.iter().map(String::as_str))
                .map(normalize_field_name)
                .collect(),
        }
    }

    /// An interceptor that never stages anything.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Diff every entry and return one group per entity with at least one change.
    ///
    /// All groups share `changed_at` and the resolved actor. An entry whose
    /// diff fails is logged and skipped; the remaining entries are still
    /// processed.
    pub fn build_change_groups<'a, E>(
        &self,
        entries: impl IntoIterator<Item = &'a E>,
        actor: Option<&str>,
        changed_at: DateTime<Utc>,
    ) -> Vec<NewChangeGroup>
    where
        E: AuditEntry + ?Sized + 'a,
    {
        if !self.enabled {
            return Vec::new();
        }

        let changed_by = resolve_actor(actor);
        let mut groups = Vec::new();

        for entry in entries {
            let entity_type = entry.entity_type();
            if is_audit_record(entity_type) {
                continue;
            }

            let Some(entity_id) = entry.entity_id() else {
                debug!(entity_type, "Skipping change history for entity without identifier");
                continue;
            };

            let items = match self.diff_entry(entry) {
                Ok(items) => items,
                Err(e) => {
                    warn!(
                        entity_type,
                        entity_id,
                        error = %e,
                        "Failed to compute change history, entity not audited"
                    );
                    continue;
                }
            };

            if items.is_empty() {
                continue;
            }

            debug!(
                entity_type,
                entity_id,
                changes = items.len(),
                changed_by = %changed_by,
                "Staged change group"
            );

            groups.push(NewChangeGroup {
                entity_type: entity_type.to_string(),
                entity_id,
                changed_by: changed_by.clone(),
                changed_at,
                items,
            });
        }

        groups
    }

    /// Compute the change items of a single entry.
    pub fn diff_entry<E>(&self, entry: &E) -> Result<Vec<NewChangeItem>, AuditError>
    where
        E: AuditEntry + ?Sized,
    {
        let id_field = entry.id_field();
        let mut items = Vec::new();

        for property in entry.properties()? {
            if !property.is_modified
                || property.kind == PropertyKind::Navigation
                || property.name == id_field
                || self.is_excluded_field(&property.name)
            {
                continue;
            }

            let old_value = render_value(&property.original);
            let new_value = render_value(&property.current);
            if old_value != new_value {
                items.push(NewChangeItem {
                    field_name: property.name,
                    old_value,
                    new_value,
                });
            }
        }

        Ok(items)
    }

    fn is_excluded_field(&self, name: &str) -> bool {
        let normalized = normalize_field_name(name);
        self.excluded_fields.iter().any(|f| *f == normalized)
    }
}

/// Actor name to record, falling back to [`SYSTEM_ACTOR`] when absent or blank.
pub fn resolve_actor(actor: Option<&str>) -> String {
    actor
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .unwrap_or(SYSTEM_ACTOR)
        .to_string()
}

fn is_audit_record(entity_type: &str) -> bool {
    AUDIT_RECORD_TYPES.contains(&entity_type)
}
