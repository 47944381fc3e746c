//! Change tracking for entities held by a data context

use std::any::Any;
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::entity::{is_scalar, to_properties, Entity};
use super::StoreError;
use crate::audit::{AuditEntry, AuditError, PropertyEntry, PropertyKind};

/// Lifecycle of a tracked entry within one unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Unchanged,
    Modified,
    Deleted,
}

/// An entry the data context can stamp, audit and write.
///
/// [`Tracked`] covers every [`Entity`]; implement this directly only for
/// entries whose property snapshot is produced some other way.
pub trait TrackedEntity: AuditEntry + Send + Sync {
    fn table(&self) -> &str;

    fn state(&self) -> EntryState;

    /// Update bookkeeping properties before the commit is prepared.
    fn stamp(&mut self, actor: &str, at: DateTime<Utc>);

    /// Columns to write for a modified entry, identifier excluded.
    fn pending_values(&self) -> Result<Vec<(String, Value)>, StoreError>;

    /// Make the current values the new originals after a successful commit.
    fn accept_changes(&mut self);

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Touched {
    /// Whole-entity update, every property counts as touched
    All,
    Fields(BTreeSet<String>),
}

/// Original and current value of one entity.
#[derive(Debug, Clone)]
pub struct Tracked<T: Entity> {
    original: T,
    current: T,
    state: EntryState,
    touched: Touched,
}

impl<T: Entity> Tracked<T> {
    pub fn unchanged(entity: T) -> Self {
        Self {
            original: entity.clone(),
            current: entity,
            state: EntryState::Unchanged,
            touched: Touched::Fields(BTreeSet::new()),
        }
    }

    pub fn original(&self) -> &T {
        &self.original
    }

    pub fn current(&self) -> &T {
        &self.current
    }

    pub(crate) fn mark_modified(&mut self, entity: &T) {
        self.current = entity.clone();
        self.state = EntryState::Modified;
        self.touched = Touched::All;
    }

    pub(crate) fn mark_fields_modified<'f>(
        &mut self,
        entity: &T,
        fields: impl IntoIterator<Item = &'f str>,
    ) {
        self.current = entity.clone();
        self.state = EntryState::Modified;
        if let Touched::Fields(set) = &mut self.touched {
            set.extend(fields.into_iter().map(str::to_string));
        }
    }

    pub(crate) fn mark_deleted(&mut self) {
        self.state = EntryState::Deleted;
    }

    fn is_touched(&self, name: &str) -> bool {
        if self.state != EntryState::Modified {
            return false;
        }
        match &self.touched {
            Touched::All => true,
            Touched::Fields(set) => set.contains(name),
        }
    }

    fn snapshot_error(source: serde_json::Error) -> AuditError {
        AuditError::Snapshot {
            entity_type: T::ENTITY_TYPE.to_string(),
            source,
        }
    }
}

impl<T: Entity> AuditEntry for Tracked<T> {
    fn entity_type(&self) -> &str {
        T::ENTITY_TYPE
    }

    fn id_field(&self) -> &str {
        T::ID_FIELD
    }

    fn entity_id(&self) -> Option<i64> {
        self.current.id()
    }

    fn properties(&self) -> Result<Vec<PropertyEntry>, AuditError> {
        let original = to_properties(&self.original).map_err(Self::snapshot_error)?;
        let current = to_properties(&self.current).map_err(Self::snapshot_error)?;
        let navigation = T::navigation_properties();

        let names: BTreeSet<&String> = original.keys().chain(current.keys()).collect();

        Ok(names
            .into_iter()
            .map(|name| {
                let old = original.get(name).cloned().unwrap_or(Value::Null);
                let new = current.get(name).cloned().unwrap_or(Value::Null);
                let kind = if navigation.contains(&name.as_str()) || !is_scalar(&old) || !is_scalar(&new) {
                    PropertyKind::Navigation
                } else {
                    PropertyKind::Scalar
                };
                PropertyEntry {
                    name: name.clone(),
                    kind,
                    original: old,
                    current: new,
                    is_modified: self.is_touched(name),
                }
            })
            .collect())
    }
}

impl<T: Entity> TrackedEntity for Tracked<T> {
    fn table(&self) -> &str {
        T::TABLE
    }

    fn state(&self) -> EntryState {
        self.state
    }

    fn stamp(&mut self, actor: &str, at: DateTime<Utc>) {
        self.current.stamp(actor, at);
        if let Touched::Fields(set) = &mut self.touched {
            set.extend(T::STAMPED_FIELDS.iter().map(|f| f.to_string()));
        }
    }

    fn pending_values(&self) -> Result<Vec<(String, Value)>, StoreError> {
        if self.state != EntryState::Modified {
            return Ok(Vec::new());
        }
        Ok(super::entity::column_values(&self.current)?
            .into_iter()
            .filter(|(name, _)| self.is_touched(name))
            .collect())
    }

    fn accept_changes(&mut self) {
        self.original = self.current.clone();
        self.state = EntryState::Unchanged;
        self.touched = Touched::Fields(BTreeSet::new());
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
