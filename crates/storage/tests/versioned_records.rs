#![forbid(unsafe_code)]

use std::path::PathBuf;
use tl_core::model::{ActorType, VersionedKind};
use tl_storage::{
    ActorRef, CreateVersionRequest, ListAuditRequest, SqliteStore, StoreError,
    VersionHistoryRequest,
};

fn temp_dir(test_name: &str) -> PathBuf {
    let base = std::env::temp_dir();
    let pid = std::process::id();
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dir = base.join(format!("tl_storage_{test_name}_{pid}_{nonce}"));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn user() -> ActorRef {
    ActorRef {
        actor_type: ActorType::User,
        actor_id: "valuer-1".to_string(),
    }
}

fn version(scope_key: &str, body: &str, supersede: bool) -> CreateVersionRequest {
    CreateVersionRequest {
        workspace_id: "ws1".to_string(),
        kind: VersionedKind::PlanCycle,
        scope_key: scope_key.to_string(),
        record_json: body.to_string(),
        supersede_existing: supersede,
        run_id: None,
        actor: user(),
    }
}

#[test]
fn second_current_requires_explicit_supersession() {
    let mut store = SqliteStore::open(temp_dir("explicit_supersede")).expect("open store");

    let v1 = store
        .create_version(version("authority-a/draft", r#"{"rev":1}"#, false))
        .expect("create v1");
    assert!(v1.is_current);

    match store.create_version(version("authority-a/draft", r#"{"rev":2}"#, false)) {
        Err(StoreError::CurrentVersionConflict {
            scope_key,
            current_id,
            ..
        }) => {
            assert_eq!(scope_key, "authority-a/draft");
            assert_eq!(current_id, v1.id);
        }
        other => panic!("expected CurrentVersionConflict, got {other:?}"),
    }

    // The retry with the flag set is the confirmation path.
    let v2 = store
        .create_version(version("authority-a/draft", r#"{"rev":2}"#, true))
        .expect("supersede v1");
    assert!(v2.is_current);
    assert_ne!(v1.id, v2.id);

    let current = store
        .current_version("ws1", VersionedKind::PlanCycle, "authority-a/draft")
        .expect("current")
        .expect("has current");
    assert_eq!(current.id, v2.id);

    let old = store
        .get_version("ws1", VersionedKind::PlanCycle, &v1.id)
        .expect("get v1")
        .expect("v1 still stored");
    assert!(!old.is_current);
    assert_eq!(old.superseded_by.as_deref(), Some(v2.id.as_str()));
}

#[test]
fn history_is_append_only_and_linear_per_scope() {
    let mut store = SqliteStore::open(temp_dir("history_chain")).expect("open store");

    store
        .create_version(version("authority-a/draft", r#"{"rev":1}"#, false))
        .expect("v1");
    for rev in 2..=4 {
        store
            .create_version(version(
                "authority-a/draft",
                &format!(r#"{{"rev":{rev}}}"#),
                true,
            ))
            .expect("supersede");
    }

    let history = store
        .version_history(VersionHistoryRequest {
            workspace_id: "ws1".to_string(),
            kind: VersionedKind::PlanCycle,
            scope_key: "authority-a/draft".to_string(),
            limit: 100,
            offset: 0,
        })
        .expect("history");
    assert_eq!(history.len(), 4);

    // Exactly one current, at the end of the chain; every earlier row points
    // at its successor.
    let current: Vec<_> = history.iter().filter(|row| row.is_current).collect();
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].id, history[3].id);
    for pair in history.windows(2) {
        assert_eq!(pair[0].superseded_by.as_deref(), Some(pair[1].id.as_str()));
    }
}

#[test]
fn different_scope_keys_are_independent() {
    let mut store = SqliteStore::open(temp_dir("independent_scopes")).expect("open store");

    let draft = store
        .create_version(version("authority-a/draft", r#"{"stage":"draft"}"#, false))
        .expect("draft");
    let adopted = store
        .create_version(version("authority-a/adopted", r#"{"stage":"adopted"}"#, false))
        .expect("adopted");

    assert!(draft.is_current);
    assert!(adopted.is_current);
    assert!(
        store
            .current_version("ws1", VersionedKind::PlanCycle, "authority-a/draft")
            .expect("current draft")
            .is_some()
    );
    assert!(
        store
            .current_version("ws1", VersionedKind::PlanCycle, "authority-a/adopted")
            .expect("current adopted")
            .is_some()
    );
}

#[test]
fn supersession_leaves_an_audit_trail() {
    let mut store = SqliteStore::open(temp_dir("audit_trail")).expect("open store");

    let v1 = store
        .create_version(version("authority-a/draft", r#"{"rev":1}"#, false))
        .expect("v1");
    let v2 = store
        .create_version(version("authority-a/draft", r#"{"rev":2}"#, true))
        .expect("v2");

    let audit = store
        .list_audit(ListAuditRequest {
            workspace_id: "ws1".to_string(),
            run_id: None,
            since_seq: None,
            limit: 100,
        })
        .expect("list audit");
    let types: Vec<&str> = audit.iter().map(|event| event.event_type.as_str()).collect();
    assert_eq!(types, vec!["version_created", "version_superseded"]);

    let payload: serde_json::Value =
        serde_json::from_str(&audit[1].payload_json).expect("payload json");
    assert_eq!(payload["old_id"], v1.id.as_str());
    assert_eq!(payload["new_id"], v2.id.as_str());
    assert_eq!(payload["scope_key"], "authority-a/draft");
}

#[test]
fn record_body_must_be_json() {
    let mut store = SqliteStore::open(temp_dir("record_json")).expect("open store");
    match store.create_version(version("authority-a/draft", "not json", false)) {
        Err(StoreError::InvalidInput(_)) => {}
        other => panic!("expected InvalidInput, got {other:?}"),
    }
}
