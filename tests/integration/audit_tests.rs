//! Change history recorded through the data context

use std::any::Any;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use planboard::{
    audit::{AuditEntry, AuditError, AuditInterceptor, PropertyEntry},
    config::AuditConfig,
    db::{AuditRepository, DataContext, EntityRepository, EntryState, StoreError, TrackedEntity},
    models::{ChangeGroup, Project, ProjectStatus, Task, TaskStatus},
};

use crate::common::{count_rows, seed_project, seed_task, test_pool};

async fn history(ctx: &DataContext, entity_type: &str, id: i64) -> Vec<ChangeGroup> {
    AuditRepository::new(ctx.pool())
        .history_for(entity_type, id)
        .await
        .expect("Failed to load history")
}

#[tokio::test]
async fn test_single_field_change_records_one_item() {
    let (pool, _dir) = test_pool().await;
    let project = seed_project(&pool, "Apollo").await;
    let task = seed_task(&pool, project.id, "Write docs").await;

    let mut ctx = DataContext::new(pool.clone());
    let mut loaded: Task = ctx.find(task.id).await.unwrap().unwrap();
    loaded.status = TaskStatus::InProgress;
    ctx.update(&loaded).unwrap();

    let rows = ctx.save_changes(Some("alice")).await.unwrap();
    assert_eq!(rows, 1);

    let groups = history(&ctx, "Task", task.id).await;
    assert_eq!(groups.len(), 1);
    let group = &groups[0];
    assert_eq!(group.entity_type, "Task");
    assert_eq!(group.entity_id, task.id);
    assert_eq!(group.changed_by, "alice");
    assert_eq!(group.items.len(), 1);
    assert_eq!(group.items[0].field_name, "status");
    assert_eq!(group.items[0].old_value.as_deref(), Some("todo"));
    assert_eq!(group.items[0].new_value.as_deref(), Some("in-progress"));
}

#[tokio::test]
async fn test_unchanged_save_records_nothing() {
    let (pool, _dir) = test_pool().await;
    let project = seed_project(&pool, "Apollo").await;

    let mut ctx = DataContext::new(pool.clone());
    let loaded: Project = ctx.find(project.id).await.unwrap().unwrap();
    ctx.update(&loaded).unwrap();

    // The row is still written (bookkeeping stamp) but no field changed
    let rows = ctx.save_changes(Some("alice")).await.unwrap();
    assert_eq!(rows, 1);
    assert_eq!(count_rows(&pool, "change_groups").await, 0);
    assert_eq!(count_rows(&pool, "change_items").await, 0);
}

#[tokio::test]
async fn test_touched_field_with_same_value_is_not_recorded() {
    let (pool, _dir) = test_pool().await;
    let project = seed_project(&pool, "Apollo").await;

    let mut ctx = DataContext::new(pool.clone());
    let loaded: Project = ctx.find(project.id).await.unwrap().unwrap();
    ctx.update_fields(&loaded, &["name", "owner"]).unwrap();
    ctx.save_changes(None).await.unwrap();

    assert!(history(&ctx, "Project", project.id).await.is_empty());
}

#[tokio::test]
async fn test_bookkeeping_fields_are_written_but_not_recorded() {
    let (pool, _dir) = test_pool().await;
    let project = seed_project(&pool, "Apollo").await;

    let mut ctx = DataContext::new(pool.clone());
    let mut loaded: Project = ctx.find(project.id).await.unwrap().unwrap();
    loaded.status = ProjectStatus::Active;
    ctx.update_fields(&loaded, &["status"]).unwrap();
    ctx.save_changes(Some("bob")).await.unwrap();

    let stored: Project = DataContext::new(pool.clone()).find(project.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ProjectStatus::Active);
    assert_eq!(stored.updated_by.as_deref(), Some("bob"));
    assert!(stored.updated_at >= project.updated_at);

    let groups = history(&ctx, "Project", project.id).await;
    assert_eq!(groups.len(), 1);
    let fields: Vec<&str> = groups[0].items.iter().map(|i| i.field_name.as_str()).collect();
    assert_eq!(fields, vec!["status"]);
}

#[tokio::test]
async fn test_missing_actor_is_recorded_as_system() {
    let (pool, _dir) = test_pool().await;
    let project = seed_project(&pool, "Apollo").await;

    for (actor, name) in [(None, "Artemis"), (Some("   "), "Gemini")] {
        let mut ctx = DataContext::new(pool.clone());
        let mut loaded: Project = ctx.find(project.id).await.unwrap().unwrap();
        loaded.name = name.to_string();
        ctx.update(&loaded).unwrap();
        ctx.save_changes(actor).await.unwrap();
    }

    let groups = AuditRepository::new(&pool).history_for("Project", project.id).await.unwrap();
    assert_eq!(groups.len(), 2);
    assert!(groups.iter().all(|g| g.changed_by == "system"));
}

#[tokio::test]
async fn test_multi_entity_commit_records_one_group_per_entity() {
    let (pool, _dir) = test_pool().await;
    let project = seed_project(&pool, "Apollo").await;
    let first = seed_task(&pool, project.id, "First").await;
    let second = seed_task(&pool, project.id, "Second").await;

    let mut ctx = DataContext::new(pool.clone());

    let mut p: Project = ctx.find(project.id).await.unwrap().unwrap();
    p.owner = None;
    ctx.update_fields(&p, &["owner"]).unwrap();

    let mut t1: Task = ctx.find(first.id).await.unwrap().unwrap();
    t1.assignee = Some("carol".to_string());
    ctx.update(&t1).unwrap();

    let mut t2: Task = ctx.find(second.id).await.unwrap().unwrap();
    t2.estimate_hours = Some(8.0);
    ctx.update(&t2).unwrap();

    let rows = ctx.save_changes(Some("alice")).await.unwrap();
    assert_eq!(rows, 3);
    assert_eq!(count_rows(&pool, "change_groups").await, 3);

    let project_history = history(&ctx, "Project", project.id).await;
    assert_eq!(project_history[0].items[0].field_name, "owner");
    assert_eq!(project_history[0].items[0].old_value.as_deref(), Some("alice"));
    assert_eq!(project_history[0].items[0].new_value, None);

    let first_history = history(&ctx, "Task", first.id).await;
    assert_eq!(first_history[0].items[0].old_value, None);
    assert_eq!(first_history[0].items[0].new_value.as_deref(), Some("carol"));

    let second_history = history(&ctx, "Task", second.id).await;
    assert_eq!(second_history[0].items[0].field_name, "estimate_hours");
    assert_eq!(second_history[0].items[0].old_value.as_deref(), Some("3.5"));
    assert_eq!(second_history[0].items[0].new_value.as_deref(), Some("8.0"));

    // All groups of one commit share actor and timestamp
    assert_eq!(project_history[0].changed_at, first_history[0].changed_at);
    assert_eq!(first_history[0].changed_at, second_history[0].changed_at);
}

#[tokio::test]
async fn test_history_round_trip_is_ordered_and_exact() {
    let (pool, _dir) = test_pool().await;
    let project = seed_project(&pool, "Apollo").await;
    let task = seed_task(&pool, project.id, "Write docs").await;

    let titles = ["Write docs", "Write the docs ✍️", "  spaced  \"quoted\"  ", "Ship"];
    let mut ctx = DataContext::new(pool.clone());
    for title in &titles[1..] {
        let mut loaded: Task = ctx.find(task.id).await.unwrap().unwrap();
        loaded.title = title.to_string();
        ctx.update_fields(&loaded, &["title"]).unwrap();
        ctx.save_changes(Some("alice")).await.unwrap();
    }

    let groups = history(&ctx, "Task", task.id).await;
    assert_eq!(groups.len(), 3);
    for (i, group) in groups.iter().enumerate() {
        assert_eq!(group.items.len(), 1);
        assert_eq!(group.items[0].old_value.as_deref(), Some(titles[i]));
        assert_eq!(group.items[0].new_value.as_deref(), Some(titles[i + 1]));
    }
    assert!(groups.windows(2).all(|w| w[0].changed_at <= w[1].changed_at));
}

#[tokio::test]
async fn test_disabled_interceptor_records_nothing() {
    let (pool, _dir) = test_pool().await;
    let project = seed_project(&pool, "Apollo").await;

    let mut ctx = DataContext::with_interceptor(pool.clone(), AuditInterceptor::disabled());
    let mut loaded: Project = ctx.find(project.id).await.unwrap().unwrap();
    loaded.name = "Artemis".to_string();
    ctx.update(&loaded).unwrap();

    assert_eq!(ctx.save_changes(Some("alice")).await.unwrap(), 1);
    assert_eq!(count_rows(&pool, "change_groups").await, 0);
}

#[tokio::test]
async fn test_configured_exclusions_add_to_bookkeeping_exclusions() {
    let (pool, _dir) = test_pool().await;
    let project = seed_project(&pool, "Apollo").await;

    let config = AuditConfig {
        excluded_fields: vec!["Description".into()],
        ..AuditConfig::default()
    };
    let mut ctx = DataContext::with_interceptor(pool.clone(), AuditInterceptor::new(&config));
    let mut loaded: Project = ctx.find(project.id).await.unwrap().unwrap();
    loaded.description = Some("Moon landing".to_string());
    loaded.status = ProjectStatus::OnHold;
    ctx.update(&loaded).unwrap();
    ctx.save_changes(None).await.unwrap();

    let groups = history(&ctx, "Project", project.id).await;
    let fields: Vec<&str> = groups[0].items.iter().map(|i| i.field_name.as_str()).collect();
    assert_eq!(fields, vec!["status"]);
}

#[tokio::test]
async fn test_stamped_fields_stay_excluded_with_custom_exclusions() {
    let (pool, _dir) = test_pool().await;
    let project = seed_project(&pool, "Apollo").await;

    let config = AuditConfig {
        excluded_fields: vec!["Description".into()],
        ..AuditConfig::default()
    };
    let mut ctx = DataContext::with_interceptor(pool.clone(), AuditInterceptor::new(&config));
    let mut loaded: Project = ctx.find(project.id).await.unwrap().unwrap();
    loaded.status = ProjectStatus::Active;
    ctx.update_fields(&loaded, &["status"]).unwrap();
    ctx.save_changes(Some("bob")).await.unwrap();

    let stored: Project = DataContext::new(pool.clone()).find(project.id).await.unwrap().unwrap();
    assert_eq!(stored.updated_by.as_deref(), Some("bob"));

    let groups = history(&ctx, "Project", project.id).await;
    assert_eq!(groups.len(), 1);
    let fields: Vec<&str> = groups[0].items.iter().map(|i| i.field_name.as_str()).collect();
    assert_eq!(fields, vec!["status"]);
}

#[tokio::test]
async fn test_change_history_records_are_not_audited() {
    let (pool, _dir) = test_pool().await;
    let project = seed_project(&pool, "Apollo").await;

    let mut ctx = DataContext::new(pool.clone());
    let mut loaded: Project = ctx.find(project.id).await.unwrap().unwrap();
    loaded.name = "Artemis".to_string();
    ctx.update(&loaded).unwrap();
    ctx.save_changes(Some("alice")).await.unwrap();

    let group_id = history(&ctx, "Project", project.id).await[0].id;
    let mut group: ChangeGroup = ctx.find(group_id).await.unwrap().unwrap();
    group.changed_by = "mallory".to_string();
    ctx.update_fields(&group, &["changed_by"]).unwrap();

    assert_eq!(ctx.save_changes(Some("alice")).await.unwrap(), 1);
    assert_eq!(count_rows(&pool, "change_groups").await, 1);
    assert!(history(&ctx, "ChangeGroup", group.id).await.is_empty());
}

/// Entry whose property snapshot always fails
struct UnreadableEntry {
    id: i64,
}

impl AuditEntry for UnreadableEntry {
    fn entity_type(&self) -> &str {
        "Task"
    }

    fn id_field(&self) -> &str {
        "id"
    }

    fn entity_id(&self) -> Option<i64> {
        Some(self.id)
    }

    fn properties(&self) -> Result<Vec<PropertyEntry>, AuditError> {
        Err(AuditError::UnreadableProperty {
            entity_type: "Task".to_string(),
            property: "title".to_string(),
            reason: "getter failed".to_string(),
        })
    }
}

impl TrackedEntity for UnreadableEntry {
    fn table(&self) -> &str {
        "tasks"
    }

    fn state(&self) -> EntryState {
        EntryState::Modified
    }

    fn stamp(&mut self, _actor: &str, _at: DateTime<Utc>) {}

    fn pending_values(&self) -> Result<Vec<(String, Value)>, StoreError> {
        Ok(Vec::new())
    }

    fn accept_changes(&mut self) {}

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[tokio::test]
async fn test_audit_failure_for_one_entity_does_not_affect_commit() {
    let (pool, _dir) = test_pool().await;
    let project = seed_project(&pool, "Apollo").await;
    let task = seed_task(&pool, project.id, "Write docs").await;

    let mut ctx = DataContext::new(pool.clone());
    ctx.attach_entry(Box::new(UnreadableEntry { id: 999 }));

    let mut loaded: Task = ctx.find(task.id).await.unwrap().unwrap();
    loaded.status = TaskStatus::Done;
    ctx.update(&loaded).unwrap();

    let rows = ctx.save_changes(Some("alice")).await.unwrap();
    assert_eq!(rows, 1);

    assert!(history(&ctx, "Task", 999).await.is_empty());
    let groups = history(&ctx, "Task", task.id).await;
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].items[0].new_value.as_deref(), Some("done"));
}

#[tokio::test]
async fn test_failed_commit_persists_nothing_and_retry_records_once() {
    let (pool, _dir) = test_pool().await;
    let project = seed_project(&pool, "Apollo").await;
    let task = seed_task(&pool, project.id, "Write docs").await;

    let mut ctx = DataContext::new(pool.clone());

    let mut p: Project = ctx.find(project.id).await.unwrap().unwrap();
    p.status = ProjectStatus::Active;
    ctx.update(&p).unwrap();

    // Points at a project that does not exist
    let mut t: Task = ctx.find(task.id).await.unwrap().unwrap();
    t.title = "Write better docs".to_string();
    t.project_id = 4242;
    ctx.update(&t).unwrap();

    let err = ctx.save_changes(Some("alice")).await.unwrap_err();
    assert!(matches!(err, StoreError::Database(_)));
    assert!(ctx.has_changes());
    assert_eq!(count_rows(&pool, "change_groups").await, 0);

    let stored: Project = DataContext::new(pool.clone()).find(project.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ProjectStatus::Planned);

    t.project_id = project.id;
    ctx.update(&t).unwrap();
    assert_eq!(ctx.save_changes(Some("alice")).await.unwrap(), 2);
    assert!(!ctx.has_changes());

    assert_eq!(history(&ctx, "Project", project.id).await.len(), 1);
    let task_history = history(&ctx, "Task", task.id).await;
    assert_eq!(task_history.len(), 1);
    let fields: Vec<&str> = task_history[0].items.iter().map(|i| i.field_name.as_str()).collect();
    assert_eq!(fields, vec!["title"]);
}

#[tokio::test]
async fn test_cancelled_commit_leaves_changes_pending() {
    let (pool, _dir) = test_pool().await;
    let project = seed_project(&pool, "Apollo").await;

    let mut ctx = DataContext::new(pool.clone());
    let mut loaded: Project = ctx.find(project.id).await.unwrap().unwrap();
    loaded.name = "Artemis".to_string();
    ctx.update(&loaded).unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = ctx.save_changes_cancellable(Some("alice"), &cancel).await.unwrap_err();
    assert!(matches!(err, StoreError::Cancelled));
    assert!(ctx.has_changes());
    assert_eq!(count_rows(&pool, "change_groups").await, 0);

    let rows = ctx
        .save_changes_cancellable(Some("alice"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(rows, 1);
    assert_eq!(history(&ctx, "Project", project.id).await.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancellation_during_commit_never_reports_persisted_changes() {
    let (pool, _dir) = test_pool().await;
    let project = seed_project(&pool, "Apollo").await;
    let mut ctx = DataContext::new(pool.clone());
    let mut recorded = 0;

    for round in 0..20u64 {
        let mut loaded: Project = ctx.find(project.id).await.unwrap().unwrap();
        loaded.name = format!("Apollo {round}");
        ctx.update(&loaded).unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_micros(round * 50)).await;
            trigger.cancel();
        });

        match ctx.save_changes_cancellable(Some("alice"), &cancel).await {
            Ok(rows) => {
                assert_eq!(rows, 1);
                assert!(!ctx.has_changes());
                recorded += 1;
            }
            Err(StoreError::Cancelled) => assert!(ctx.has_changes()),
            Err(e) => panic!("unexpected error: {e}"),
        }
        assert_eq!(count_rows(&pool, "change_groups").await, recorded);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blocking_and_async_commits_record_the_same_history() {
    let (pool, _dir) = test_pool().await;
    let project = seed_project(&pool, "Apollo").await;
    let via_async = seed_task(&pool, project.id, "Async").await;
    let via_blocking = seed_task(&pool, project.id, "Blocking").await;

    let mut ctx = DataContext::new(pool.clone());
    let mut loaded: Task = ctx.find(via_async.id).await.unwrap().unwrap();
    loaded.status = TaskStatus::Review;
    loaded.assignee = Some("dave".to_string());
    ctx.update(&loaded).unwrap();
    let async_rows = ctx.save_changes(Some("alice")).await.unwrap();

    let mut ctx = DataContext::new(pool.clone());
    let mut loaded: Task = ctx.find(via_blocking.id).await.unwrap().unwrap();
    loaded.status = TaskStatus::Review;
    loaded.assignee = Some("dave".to_string());
    ctx.update(&loaded).unwrap();
    let blocking_rows = tokio::task::spawn_blocking(move || ctx.save_changes_blocking(Some("alice")))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(async_rows, blocking_rows);

    let repo = AuditRepository::new(&pool);
    let a = repo.history_for("Task", via_async.id).await.unwrap();
    let b = repo.history_for("Task", via_blocking.id).await.unwrap();
    assert_eq!(a.len(), 1);
    assert_eq!(b.len(), 1);
    assert_eq!(a[0].changed_by, b[0].changed_by);

    let items = |g: &ChangeGroup| {
        g.items
            .iter()
            .map(|i| (i.field_name.clone(), i.old_value.clone(), i.new_value.clone()))
            .collect::<Vec<_>>()
    };
    assert_eq!(items(&a[0]), items(&b[0]));
}

#[test]
fn test_blocking_commit_requires_runtime() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let (pool, _dir) = runtime.block_on(test_pool());

    // Created outside any runtime context
    let mut ctx = DataContext::new(pool);
    let err = ctx.save_changes_blocking(None).unwrap_err();
    assert!(matches!(err, StoreError::NoRuntime));
}

#[tokio::test]
async fn test_update_requires_tracked_entity() {
    let (pool, _dir) = test_pool().await;
    let project = seed_project(&pool, "Apollo").await;

    let mut ctx = DataContext::new(pool.clone());
    let err = ctx.update(&project).unwrap_err();
    assert!(matches!(err, StoreError::NotTracked { entity_type: "Project", .. }));

    let loaded: Project = ctx.find(project.id).await.unwrap().unwrap();
    let err = ctx.update_fields(&loaded, &["colour"]).unwrap_err();
    assert!(matches!(err, StoreError::UnknownProperty { .. }));
}

#[tokio::test]
async fn test_removed_entity_is_deleted_without_history() {
    let (pool, _dir) = test_pool().await;
    let project = seed_project(&pool, "Apollo").await;
    let task = seed_task(&pool, project.id, "Write docs").await;

    let mut ctx = DataContext::new(pool.clone());
    let loaded: Task = ctx.find(task.id).await.unwrap().unwrap();
    ctx.remove(&loaded).unwrap();

    assert_eq!(ctx.save_changes(Some("alice")).await.unwrap(), 1);
    assert_eq!(ctx.tracked_count(), 0);
    assert_eq!(count_rows(&pool, "tasks").await, 0);
    assert_eq!(count_rows(&pool, "change_groups").await, 0);
}

#[tokio::test]
async fn test_attached_entity_is_audited() {
    let (pool, _dir) = test_pool().await;
    let project = seed_project(&pool, "Apollo").await;
    let task = seed_task(&pool, project.id, "Write docs").await;

    let mut loaded: Task = EntityRepository::new(&pool).get(task.id).await.unwrap().unwrap();
    let mut ctx = DataContext::new(pool.clone());
    ctx.attach(loaded.clone()).unwrap();

    loaded.assignee = Some("erin".to_string());
    ctx.update(&loaded).unwrap();
    ctx.save_changes(Some("alice")).await.unwrap();

    let groups = history(&ctx, "Task", task.id).await;
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].items[0].field_name, "assignee");
    assert_eq!(groups[0].items[0].old_value, None);
    assert_eq!(groups[0].items[0].new_value.as_deref(), Some("erin"));
}

#[tokio::test]
async fn test_attach_discards_pending_changes() {
    let (pool, _dir) = test_pool().await;
    let project = seed_project(&pool, "Apollo").await;

    let mut ctx = DataContext::new(pool.clone());
    let mut loaded: Project = ctx.find(project.id).await.unwrap().unwrap();
    loaded.name = "Artemis".to_string();
    ctx.update(&loaded).unwrap();
    assert!(ctx.has_changes());

    ctx.attach(project.clone()).unwrap();
    assert!(!ctx.has_changes());
    assert_eq!(ctx.tracked_count(), 1);

    ctx.save_changes(None).await.unwrap();
    assert_eq!(count_rows(&pool, "change_groups").await, 0);
    let stored: Project = EntityRepository::new(&pool).get(project.id).await.unwrap().unwrap();
    assert_eq!(stored.name, "Apollo");
}
