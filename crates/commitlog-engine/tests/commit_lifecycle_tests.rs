// Commit lifecycle: callbacks, transaction boundary, failures, nesting

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{
    default_runtime, id, resolver, runtime_with, seed, FailingListener, RecordingListener, CHAR1,
    CHAR2,
};
use commitlog_core::logging_facility::test_capture::init_test_capture;
use commitlog_core::{
    AttributeChange, ChangeMap, ExError, ExErrorKind, ObjectChangeType, ToOneRelationshipChange,
};
use commitlog_core_types::schema::{
    EVENT_START, FIELD_CHANGES, FIELD_COMMIT_ID, FIELD_CONTEXT_ID, FIELD_LISTENERS,
    FIELD_UNIQUE_CHANGES,
};
use commitlog_engine::{CommitLogModule, JournalListener, LifecyclePhase, ObjectContext, Runtime};
use commitlog_store::Store;
use serde_json::{json, Value};
use std::sync::Arc;

fn stored_char1(runtime: &Arc<Runtime>, pk: i64) -> serde_json::Value {
    let mut reader = runtime.new_context();
    let a = reader.select_by_id("Auditable1", pk).unwrap();
    reader.attribute(&a, CHAR1).unwrap()
}

#[test]
fn test_empty_commit_is_a_noop() {
    let (runtime, listener) = default_runtime();
    let mut context = runtime.new_context();
    context.commit_changes().unwrap();
    assert!(listener.captured().is_empty());
}

#[test]
fn test_rollback_changes_discards_pending_work() {
    let (runtime, listener) = default_runtime();
    let mut context = runtime.new_context();

    let a1 = context.select_by_id("Auditable1", 1).unwrap();
    context.set_attribute(&a1, CHAR1, "yy").unwrap();
    let fresh = context.new_object("Auditable1").unwrap();
    context.rollback_changes();

    assert!(!context.has_changes());
    assert_eq!(context.state(&fresh), None);
    assert_eq!(context.attribute(&a1, CHAR1).unwrap(), json!("xx"));
    context.commit_changes().unwrap();
    assert!(listener.captured().is_empty());
}

#[test]
fn test_each_commit_gets_its_own_change_map() {
    let (runtime, listener) = default_runtime();
    let mut context = runtime.new_context();

    let a1 = context.select_by_id("Auditable1", 1).unwrap();
    context.set_attribute(&a1, CHAR1, "first").unwrap();
    context.commit_changes().unwrap();
    context.set_attribute(&a1, CHAR1, "second").unwrap();
    context.commit_changes().unwrap();

    let captured = listener.captured();
    assert_eq!(captured.len(), 2);
    let second = captured[1].get(&a1).unwrap().attribute(CHAR1).unwrap();
    assert_eq!(second.old, json!("first"));
    assert_eq!(second.new, json!("second"));

    let ids = listener.commit_ids();
    assert_eq!(ids.len(), 2);
    assert_ne!(ids[0], ids[1]);
}

#[test]
fn test_listeners_notified_in_registration_order() {
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));
    let first = {
        let order = Arc::clone(&order);
        move |_: &ObjectContext, _: &ChangeMap| -> Result<(), ExError> {
            order.lock().unwrap().push("first");
            Ok(())
        }
    };
    let second = {
        let order = Arc::clone(&order);
        move |_: &ObjectContext, _: &ChangeMap| -> Result<(), ExError> {
            order.lock().unwrap().push("second");
            Ok(())
        }
    };
    let (runtime, _) = runtime_with(
        CommitLogModule::extend()
            .add_listener(first)
            .add_listener(second),
    );

    let mut context = runtime.new_context();
    let a1 = context.select_by_id("Auditable1", 1).unwrap();
    context.set_attribute(&a1, CHAR1, "yy").unwrap();
    context.commit_changes().unwrap();

    assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
}

// ===== Callbacks =====

#[test]
fn test_pre_persist_callback_changes_are_captured() {
    let listener = RecordingListener::new();
    let runtime = Runtime::builder(resolver())
        .callback("Auditable1", LifecyclePhase::PrePersist, |ctx, id| {
            let child = ctx.new_object("AuditableChild1")?;
            ctx.set_attribute(&child, CHAR1, "companion")?;
            ctx.set_to_one(&child, "parent", Some(id))
        })
        .commit_log(CommitLogModule::extend().add_shared_listener(listener.clone()))
        .build()
        .unwrap();
    seed(&runtime);

    let mut context = runtime.new_context();
    let a = context.new_object("Auditable1").unwrap();
    context.set_attribute(&a, CHAR1, "parent").unwrap();
    context.commit_changes().unwrap();

    let changes = listener.last();
    assert_eq!(changes.unique_changes().len(), 2);
    assert!(changes
        .unique_changes()
        .iter()
        .all(|c| c.change_type == ObjectChangeType::Insert));

    let parent = changes.get(&a).unwrap().post_commit_id.clone();
    let child = changes
        .unique_changes()
        .iter()
        .find(|c| c.post_commit_id.entity_name() == "AuditableChild1")
        .unwrap();
    let link = child.to_one("parent").unwrap();
    assert_eq!(link.new.as_ref(), Some(&parent));
    assert!(!parent.is_temporary());
}

#[test]
fn test_pre_update_callback_runs_once() {
    let listener = RecordingListener::new();
    let runtime = Runtime::builder(resolver())
        .callback("Auditable1", LifecyclePhase::PreUpdate, |ctx, id| {
            ctx.set_attribute(id, CHAR2, "touched")
        })
        .commit_log(CommitLogModule::extend().add_shared_listener(listener.clone()))
        .build()
        .unwrap();
    seed(&runtime);

    let mut context = runtime.new_context();
    let a1 = context.select_by_id("Auditable1", 1).unwrap();
    context.set_attribute(&a1, CHAR1, "yy").unwrap();
    context.commit_changes().unwrap();

    let change = listener.last().get(&a1).cloned().unwrap();
    assert_eq!(change.attribute_changes.len(), 2);
    assert_eq!(change.attribute(CHAR2).unwrap().new, json!("touched"));
}

#[test]
fn test_pre_update_callback_deleting_object_reports_delete() {
    let listener = RecordingListener::new();
    let runtime = Runtime::builder(resolver())
        .callback("AuditableChild1", LifecyclePhase::PreUpdate, |ctx, id| {
            ctx.delete_object(id)
        })
        .commit_log(CommitLogModule::extend().add_shared_listener(listener.clone()))
        .build()
        .unwrap();
    seed(&runtime);

    let mut context = runtime.new_context();
    let a1 = id("Auditable1", 1);
    let c1 = context.select_by_id("AuditableChild1", 1).unwrap();
    context.set_attribute(&c1, CHAR1, "c1b").unwrap();
    context.commit_changes().unwrap();

    let changes = listener.last();
    let change = changes.get(&c1).unwrap();
    assert_eq!(change.change_type, ObjectChangeType::Delete);
    assert_eq!(
        change.attribute(CHAR1),
        Some(&AttributeChange::new(json!("c1"), Value::Null))
    );
    assert_eq!(
        change.to_one("parent"),
        Some(&ToOneRelationshipChange::new(Some(a1), None))
    );
    assert!(runtime
        .store()
        .select_row(runtime.resolver(), &c1)
        .unwrap()
        .is_none());
}

#[test]
fn test_failing_callback_aborts_before_flush() {
    let listener = RecordingListener::new();
    let runtime = Runtime::builder(resolver())
        .callback("Auditable1", LifecyclePhase::PreUpdate, |_, _| {
            Err(ExError::new(ExErrorKind::InvalidInput).with_message("rejected"))
        })
        .commit_log(CommitLogModule::extend().add_shared_listener(listener.clone()))
        .build()
        .unwrap();
    seed(&runtime);

    let mut context = runtime.new_context();
    let a1 = context.select_by_id("Auditable1", 1).unwrap();
    context.set_attribute(&a1, CHAR1, "yy").unwrap();
    let err = context.commit_changes().unwrap_err();

    assert_eq!(err.kind(), ExErrorKind::CallbackFailed);
    assert_eq!(err.entity(), Some("Auditable1"));
    assert_eq!(
        err.source_error().map(ExError::kind),
        Some(ExErrorKind::InvalidInput)
    );
    assert!(listener.captured().is_empty());
    assert_eq!(stored_char1(&runtime, 1), json!("xx"));
}

// ===== Transaction boundary =====

#[test]
fn test_listener_runs_inside_transaction_by_default() {
    let (runtime, listener) = default_runtime();
    let mut context = runtime.new_context();
    let a1 = context.select_by_id("Auditable1", 1).unwrap();
    context.set_attribute(&a1, CHAR1, "yy").unwrap();
    context.commit_changes().unwrap();

    assert_eq!(listener.in_transaction(), vec![true]);
    assert!(!runtime.store().in_transaction());
}

#[test]
fn test_listener_runs_after_transaction_when_excluded() {
    let (runtime, listener) = runtime_with(CommitLogModule::extend().exclude_from_transaction());
    let mut context = runtime.new_context();
    let a1 = context.select_by_id("Auditable1", 1).unwrap();
    context.set_attribute(&a1, CHAR1, "yy").unwrap();
    context.commit_changes().unwrap();

    assert_eq!(listener.in_transaction(), vec![false]);
}

#[test]
fn test_listener_failure_keeps_committed_data() {
    for module in [
        CommitLogModule::extend(),
        CommitLogModule::extend().exclude_from_transaction(),
    ] {
        let (runtime, listener) = runtime_with(module.add_listener(FailingListener));
        let mut context = runtime.new_context();
        let a1 = context.select_by_id("Auditable1", 1).unwrap();
        context.set_attribute(&a1, CHAR1, "yy").unwrap();
        let err = context.commit_changes().unwrap_err();

        assert_eq!(err.kind(), ExErrorKind::ListenerFailed);
        assert_eq!(
            err.source_error().map(ExError::kind),
            Some(ExErrorKind::Internal)
        );
        assert!(err.commit_id().is_some());
        // dispatch stops at the failing listener
        assert!(listener.captured().is_empty());
        assert_eq!(stored_char1(&runtime, 1), json!("yy"));
        assert!(!context.has_changes());
    }
}

#[test]
fn test_flush_failure_rolls_back_and_skips_dispatch() {
    let (runtime, listener) = default_runtime();
    let mut context = runtime.new_context();

    let a1 = context.select_by_id("Auditable1", 1).unwrap();
    context.set_attribute(&a1, CHAR1, "yy").unwrap();
    // "log" is mandatory
    context.new_object("AuditLog").unwrap();
    let err = context.commit_changes().unwrap_err();

    assert_eq!(err.kind(), ExErrorKind::FlushFailed);
    assert_eq!(
        err.source_error().map(ExError::kind),
        Some(ExErrorKind::Persistence)
    );
    assert!(listener.captured().is_empty());
    assert!(context.has_changes());
    assert!(!runtime.store().in_transaction());
    assert_eq!(stored_char1(&runtime, 1), json!("xx"));
    assert!(runtime.new_context().select_all("AuditLog").unwrap().is_empty());
}

// ===== Nested commits =====

fn audit_listener(
    log: Option<&'static str>,
) -> impl Fn(&ObjectContext, &ChangeMap) -> Result<(), ExError> + Send + Sync {
    move |origin: &ObjectContext, changes: &ChangeMap| {
        let mut audit = origin.runtime().new_context();
        let entry = audit.new_object("AuditLog")?;
        if let Some(prefix) = log {
            audit.set_attribute(&entry, "log", format!("{} {}", prefix, changes.key_count()))?;
        }
        audit.commit_changes()
    }
}

#[test]
fn test_listener_commits_nested_changes_in_same_transaction() {
    let (runtime, listener) = runtime_with(
        CommitLogModule::extend()
            .commit_log_annotation_entities_only()
            .add_listener(audit_listener(Some("changed"))),
    );
    let mut context = runtime.new_context();
    let a1 = context.select_by_id("Auditable1", 1).unwrap();
    context.set_attribute(&a1, CHAR1, "yy").unwrap();
    context.commit_changes().unwrap();

    // the nested AuditLog commit is filtered out and not dispatched again
    assert_eq!(listener.captured().len(), 1);
    let mut reader = runtime.new_context();
    let logs = reader.select_all("AuditLog").unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(reader.attribute(&logs[0], "log").unwrap(), json!("changed 1"));
    assert_eq!(stored_char1(&runtime, 1), json!("yy"));
}

#[test]
fn test_failed_nested_commit_rolls_back_outer_commit() {
    let (runtime, _) = runtime_with(
        CommitLogModule::extend()
            .commit_log_annotation_entities_only()
            .add_listener(audit_listener(None)),
    );
    let mut context = runtime.new_context();
    let a1 = context.select_by_id("Auditable1", 1).unwrap();
    context.set_attribute(&a1, CHAR1, "yy").unwrap();
    let err = context.commit_changes().unwrap_err();

    assert_eq!(err.kind(), ExErrorKind::TransactionRolledBack);
    // the listener failure that caused the rollback is kept
    let listener_err = err.source_error().unwrap();
    assert_eq!(listener_err.kind(), ExErrorKind::ListenerFailed);
    assert_eq!(
        listener_err.source_error().map(ExError::kind),
        Some(ExErrorKind::FlushFailed)
    );
    assert!(!runtime.store().in_transaction());
    assert_eq!(stored_char1(&runtime, 1), json!("xx"));
    assert!(runtime.new_context().select_all("AuditLog").unwrap().is_empty());
}

// ===== Journal =====

#[test]
fn test_journal_listener_records_each_commit() {
    let (runtime, listener) =
        runtime_with(CommitLogModule::extend().add_listener(JournalListener::new()));
    let mut context = runtime.new_context();

    let a1 = context.select_by_id("Auditable1", 1).unwrap();
    context.set_attribute(&a1, CHAR1, "yy").unwrap();
    context.commit_changes().unwrap();
    context.delete_object(&id("AuditableChild1", 3)).unwrap();
    context.commit_changes().unwrap();

    let entries = runtime.store().journal_entries().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].commit_id, listener.commit_ids()[0]);
    assert_eq!(&entries[0].context_id, context.context_id());
    assert_eq!(entries[0].changes, listener.captured()[0]);
    assert_eq!(entries[1].changes, listener.captured()[1]);
}

#[test]
fn test_journal_row_rolled_back_with_failed_listener() {
    let (runtime, _) = runtime_with(
        CommitLogModule::extend()
            .add_listener(JournalListener::new())
            .add_listener(audit_listener(None)),
    );
    let mut context = runtime.new_context();
    let a1 = context.select_by_id("Auditable1", 1).unwrap();
    context.set_attribute(&a1, CHAR1, "yy").unwrap();
    assert!(context.commit_changes().is_err());

    assert!(runtime.store().journal_entries().unwrap().is_empty());
}

#[test]
fn test_journal_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("commitlog.db");

    let commit_id = {
        let listener = RecordingListener::new();
        let runtime = Runtime::builder(resolver())
            .store(Store::open(&path).unwrap())
            .commit_log(
                CommitLogModule::extend()
                    .add_listener(JournalListener::new())
                    .add_shared_listener(listener.clone()),
            )
            .build()
            .unwrap();
        let mut context = runtime.new_context();
        let a = context.new_object("Auditable1").unwrap();
        context.set_attribute(&a, CHAR1, "persisted").unwrap();
        context.commit_changes().unwrap();
        listener.commit_ids()[0].clone()
    };

    let runtime = Runtime::builder(resolver())
        .store(Store::open(&path).unwrap())
        .build()
        .unwrap();
    let entries = runtime.store().journal_entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].commit_id, commit_id);
    assert_eq!(entries[0].changes.unique_changes().len(), 1);
    assert_eq!(stored_char1(&runtime, 1), json!("persisted"));
}

// ===== Logging =====

#[test]
fn test_commit_phases_logged_in_order() {
    let capture = init_test_capture();
    let (runtime, listener) = default_runtime();
    let mut context = runtime.new_context();
    let a1 = context.select_by_id("Auditable1", 1).unwrap();
    context.set_attribute(&a1, CHAR1, "yy").unwrap();
    context.commit_changes().unwrap();

    let commit_id = listener.commit_ids()[0].clone();
    assert_eq!(
        capture.phases_for_commit(commit_id.as_str()),
        vec![
            "pre_commit_running",
            "flushing",
            "building_change_map",
            "dispatching",
            "idle"
        ]
    );
    capture.assert_event_exists("commit_changes", "end");

    let events = capture.events();
    let start = events
        .iter()
        .find(|e| {
            e.event.as_deref() == Some(EVENT_START)
                && e.field(FIELD_COMMIT_ID) == Some(commit_id.as_str())
        })
        .expect("start event");
    assert_eq!(start.field(FIELD_CONTEXT_ID), Some(context.context_id().as_str()));

    let dispatch = events
        .iter()
        .find(|e| {
            e.field(FIELD_COMMIT_ID) == Some(commit_id.as_str())
                && e.field(FIELD_LISTENERS).is_some()
        })
        .expect("dispatch event");
    assert_eq!(dispatch.field(FIELD_CHANGES), Some("1"));
    assert_eq!(dispatch.field(FIELD_UNIQUE_CHANGES), Some("1"));
    assert_eq!(dispatch.field(FIELD_LISTENERS), Some("1"));
}

#[test]
fn test_runtime_rejects_ignore_list_for_unknown_entity() {
    let err = Runtime::builder(resolver())
        .store(Store::open_in_memory().unwrap())
        .commit_log(CommitLogModule::extend().ignored_attributes("NoSuchEntity", &[CHAR1]))
        .build()
        .unwrap_err();
    assert_eq!(err.kind(), ExErrorKind::FilterMisconfigured);
}
