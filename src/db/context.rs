//! Unit of work over the SQLite pool
//!
//! A [`DataContext`] loads entities, remembers their original values and
//! commits every pending modification in one transaction. Commits go through
//! the [`AuditInterceptor`], so the change history is written in the same
//! transaction as the rows it describes.

use chrono::Utc;
use serde_json::Value;
use sqlx::SqliteConnection;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::entity::{quote_ident, to_properties, Entity};
use super::entity_repository::{bind_json, EntityRepository};
use super::tracking::{EntryState, Tracked, TrackedEntity};
use super::{AuditRepository, DbPool, StoreError};
use crate::audit::{resolve_actor, AuditInterceptor};
use crate::models::NewChangeGroup;

/// Request-scoped unit of work.
pub struct DataContext {
    pool: DbPool,
    interceptor: AuditInterceptor,
    runtime: Option<Handle>,
    entries: Vec<Box<dyn TrackedEntity>>,
}

/// Everything one commit will write.
#[derive(Debug)]
struct PendingCommit {
    writes: Vec<EntityWrite>,
    change_groups: Vec<NewChangeGroup>,
}

#[derive(Debug)]
enum EntityWrite {
    Update {
        table: String,
        id_field: String,
        id: i64,
        values: Vec<(String, Value)>,
    },
    Delete {
        table: String,
        id_field: String,
        id: i64,
    },
}

impl EntityWrite {
    async fn execute(&self, conn: &mut SqliteConnection) -> Result<u64, sqlx::Error> {
        match self {
            EntityWrite::Update {
                table,
                id_field,
                id,
                values,
            } => {
                let assignments = values
                    .iter()
                    .map(|(column, _)| format!("{} = ?", quote_ident(column)))
                    .collect::<Vec<_>>()
                    .join(", ");
                let sql = format!(
                    "UPDATE {} SET {} WHERE {} = ?",
                    quote_ident(table),
                    assignments,
                    quote_ident(id_field)
                );

                let mut query = sqlx::query(&sql);
                for (_, value) in values {
                    query = bind_json(query, value);
                }
                let result = query.bind(*id).execute(&mut *conn).await?;
                Ok(result.rows_affected())
            }
            EntityWrite::Delete { table, id_field, id } => {
                let sql = format!(
                    "DELETE FROM {} WHERE {} = ?",
                    quote_ident(table),
                    quote_ident(id_field)
                );
                let result = sqlx::query(&sql).bind(*id).execute(&mut *conn).await?;
                Ok(result.rows_affected())
            }
        }
    }
}

impl DataContext {
    /// Create a context with the default audit settings.
    pub fn new(pool: DbPool) -> Self {
        Self::with_interceptor(pool, AuditInterceptor::default())
    }

    pub fn with_interceptor(pool: DbPool, interceptor: AuditInterceptor) -> Self {
        Self {
            pool,
            interceptor,
            runtime: Handle::try_current().ok(),
            entries: Vec::new(),
        }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Load an entity by id and start tracking it.
    ///
    /// An entity that is already tracked is returned from the context,
    /// including any pending modifications.
    pub async fn find<T: Entity>(&mut self, id: i64) -> Result<Option<T>, StoreError> {
        if let Some(tracked) = self.tracked::<T>(id) {
            return Ok(Some(tracked.current().clone()));
        }

        let entity = EntityRepository::new(&self.pool).get::<T>(id).await?;
        if let Some(ref entity) = entity {
            self.entries.push(Box::new(Tracked::unchanged(entity.clone())));
        }
        Ok(entity)
    }

    /// Track an entity loaded elsewhere as unchanged.
    ///
    /// A previous entry for the same entity is replaced, discarding its
    /// pending modifications.
    pub fn attach<T: Entity>(&mut self, entity: T) -> Result<(), StoreError> {
        let id = require_id(&entity)?;
        self.entries.retain(|e| !is_entry_for(e.as_ref(), T::ENTITY_TYPE, id));
        self.entries.push(Box::new(Tracked::unchanged(entity)));
        Ok(())
    }

    /// Track a custom entry.
    pub fn attach_entry(&mut self, entry: Box<dyn TrackedEntity>) {
        self.entries.push(entry);
    }

    /// Mark a tracked entity as modified; every property counts as touched.
    pub fn update<T: Entity>(&mut self, entity: &T) -> Result<(), StoreError> {
        let id = require_id(entity)?;
        self.tracked_mut::<T>(id)?.mark_modified(entity);
        Ok(())
    }

    /// Mark only the named properties of a tracked entity as touched.
    pub fn update_fields<T: Entity>(&mut self, entity: &T, fields: &[&str]) -> Result<(), StoreError> {
        let id = require_id(entity)?;
        let properties = to_properties(entity)?;
        if let Some(unknown) = fields.iter().find(|f| !properties.contains_key(**f)) {
            return Err(StoreError::UnknownProperty {
                entity_type: T::ENTITY_TYPE,
                property: unknown.to_string(),
            });
        }

        self.tracked_mut::<T>(id)?
            .mark_fields_modified(entity, fields.iter().copied());
        Ok(())
    }

    /// Mark a tracked entity for deletion.
    pub fn remove<T: Entity>(&mut self, entity: &T) -> Result<(), StoreError> {
        let id = require_id(entity)?;
        self.tracked_mut::<T>(id)?.mark_deleted();
        Ok(())
    }

    /// Insert a new row immediately and return its id.
    ///
    /// Inserts bypass the unit of work; only modifications are audited.
    pub async fn insert<T: Entity>(&self, entity: &T) -> Result<i64, StoreError> {
        EntityRepository::new(&self.pool).insert(entity).await
    }

    pub fn has_changes(&self) -> bool {
        self.entries.iter().any(|e| e.state() != EntryState::Unchanged)
    }

    pub fn tracked_count(&self) -> usize {
        self.entries.len()
    }

    /// Commit all pending changes.
    ///
    /// Returns the number of entity rows affected. Change history rows are
    /// written in the same transaction but are not counted.
    pub async fn save_changes(&mut self, actor: Option<&str>) -> Result<u64, StoreError> {
        let commit = self.prepare_commit(actor)?;
        let result = execute_commit(&self.pool, &commit).await;
        self.finish_commit(&commit, result)
    }

    /// Commit all pending changes unless `cancel` fires first.
    ///
    /// Cancellation is honoured while the writes are being staged: the
    /// transaction is rolled back and the tracked entries stay pending.
    /// Once every write has succeeded the commit is issued and runs to
    /// completion, so [`StoreError::Cancelled`] always means nothing was
    /// persisted.
    pub async fn save_changes_cancellable(
        &mut self,
        actor: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<u64, StoreError> {
        let commit = self.prepare_commit(actor)?;
        let result = execute_commit_cancellable(&self.pool, &commit, cancel).await;
        self.finish_commit(&commit, result)
    }

    /// Blocking variant of [`save_changes`](Self::save_changes).
    ///
    /// Must not be called from an async task; use it from plain threads or
    /// `spawn_blocking`.
    pub fn save_changes_blocking(&mut self, actor: Option<&str>) -> Result<u64, StoreError> {
        let runtime = self.runtime.clone().ok_or(StoreError::NoRuntime)?;
        let commit = self.prepare_commit(actor)?;
        let result = runtime.block_on(execute_commit(&self.pool, &commit));
        self.finish_commit(&commit, result)
    }

    /// Stamp, audit and collect the writes of every pending entry.
    fn prepare_commit(&mut self, actor: Option<&str>) -> Result<PendingCommit, StoreError> {
        let changed_at = Utc::now();
        let stamped_by = resolve_actor(actor);

        for entry in self.entries.iter_mut() {
            if entry.state() == EntryState::Modified {
                entry.stamp(&stamped_by, changed_at);
            }
        }

        let change_groups = self.interceptor.build_change_groups(
            self.entries
                .iter()
                .filter(|e| e.state() == EntryState::Modified)
                .map(|e| e.as_ref()),
            actor,
            changed_at,
        );

        let mut writes = Vec::new();
        for entry in &self.entries {
            match entry.state() {
                EntryState::Modified => {
                    let values = entry.pending_values()?;
                    if values.is_empty() {
                        continue;
                    }
                    writes.push(EntityWrite::Update {
                        table: entry.table().to_string(),
                        id_field: entry.id_field().to_string(),
                        id: entry_id(entry.as_ref())?,
                        values,
                    });
                }
                EntryState::Deleted => {
                    writes.push(EntityWrite::Delete {
                        table: entry.table().to_string(),
                        id_field: entry.id_field().to_string(),
                        id: entry_id(entry.as_ref())?,
                    });
                }
                EntryState::Unchanged => {}
            }
        }

        debug!(
            writes = writes.len(),
            change_groups = change_groups.len(),
            %changed_at,
            "Prepared commit"
        );

        Ok(PendingCommit {
            writes,
            change_groups,
        })
    }

    fn finish_commit(
        &mut self,
        commit: &PendingCommit,
        result: Result<u64, StoreError>,
    ) -> Result<u64, StoreError> {
        match result {
            Ok(rows_affected) => {
                self.entries.retain(|e| e.state() != EntryState::Deleted);
                for entry in self.entries.iter_mut() {
                    entry.accept_changes();
                }
                debug!(
                    rows_affected,
                    change_groups = commit.change_groups.len(),
                    "Changes saved"
                );
                Ok(rows_affected)
            }
            Err(e) => {
                warn!(error = %e, "Failed to save changes");
                Err(e)
            }
        }
    }

    fn tracked<T: Entity>(&self, id: i64) -> Option<&Tracked<T>> {
        self.entries
            .iter()
            .filter(|e| is_entry_for(e.as_ref(), T::ENTITY_TYPE, id))
            .find_map(|e| e.as_any().downcast_ref::<Tracked<T>>())
    }

    fn tracked_mut<T: Entity>(&mut self, id: i64) -> Result<&mut Tracked<T>, StoreError> {
        self.entries
            .iter_mut()
            .filter(|e| is_entry_for(e.as_ref(), T::ENTITY_TYPE, id))
            .find_map(|e| e.as_any_mut().downcast_mut::<Tracked<T>>())
            .ok_or(StoreError::NotTracked {
                entity_type: T::ENTITY_TYPE,
                id,
            })
    }
}

/// Run the entity writes, then the staged change groups, in one transaction.
async fn execute_commit(pool: &DbPool, commit: &PendingCommit) -> Result<u64, StoreError> {
    let mut tx = pool.begin().await?;
    let rows_affected = write_commit(&mut tx, commit).await?;
    tx.commit().await?;
    Ok(rows_affected)
}

/// Like [`execute_commit`], but `cancel` can abandon the transaction up to
/// the point where it is committed.
async fn execute_commit_cancellable(
    pool: &DbPool,
    commit: &PendingCommit,
    cancel: &CancellationToken,
) -> Result<u64, StoreError> {
    let mut tx = pool.begin().await?;
    let rows_affected = tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(StoreError::Cancelled),
        result = write_commit(&mut tx, commit) => result?,
    };

    // Returning on cancellation drops `tx`, which rolls back. The commit itself is not raced.
    tx.commit().await?;
    Ok(rows_affected)
}

async fn write_commit(conn: &mut SqliteConnection, commit: &PendingCommit) -> Result<u64, StoreError> {
    let mut rows_affected = 0;
    for write in &commit.writes {
        rows_affected += write.execute(conn).await?;
    }
    for group in &commit.change_groups {
        AuditRepository::insert_group(conn, group).await?;
    }
    Ok(rows_affected)
}

fn is_entry_for(entry: &dyn TrackedEntity, entity_type: &str, id: i64) -> bool {
    entry.entity_type() == entity_type && entry.entity_id() == Some(id)
}

fn require_id<T: Entity>(entity: &T) -> Result<i64, StoreError> {
    entity.id().ok_or_else(|| StoreError::MissingIdentifier {
        entity_type: T::ENTITY_TYPE.to_string(),
    })
}

fn entry_id(entry: &dyn TrackedEntity) -> Result<i64, StoreError> {
    entry.entity_id().ok_or_else(|| StoreError::MissingIdentifier {
        entity_type: entry.entity_type().to_string(),
    })
}

