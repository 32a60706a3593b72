#![forbid(unsafe_code)]

use std::path::PathBuf;
use tl_core::model::ToolRunStatus;
use tl_storage::{
    CancelToolRunRequest, CompleteToolRunRequest, SqliteStore, StartToolRunRequest, StoreError,
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

fn start(store: &mut SqliteStore) -> String {
    store
        .start_tool_run(StartToolRunRequest {
            workspace_id: "ws1".to_string(),
            tool_name: "flood-lookup".to_string(),
            inputs_json: r#"{"parcel":"P-9"}"#.to_string(),
        })
        .expect("start tool run")
        .id
}

fn complete(id: &str, status: ToolRunStatus) -> CompleteToolRunRequest {
    CompleteToolRunRequest {
        workspace_id: "ws1".to_string(),
        tool_run_id: id.to_string(),
        status,
        outputs_json: r#"{"zone":"3a"}"#.to_string(),
        confidence_hint: Some(0.8),
        uncertainty_note: None,
    }
}

#[test]
fn lifecycle_running_to_succeeded() {
    let mut store = SqliteStore::open(temp_dir("succeeded")).expect("open store");
    let id = start(&mut store);

    let running = store
        .get_tool_run("ws1", &id)
        .expect("get")
        .expect("exists");
    assert_eq!(running.status, ToolRunStatus::Running);
    assert!(running.ended_at_ms.is_none());

    let done = store
        .complete_tool_run(complete(&id, ToolRunStatus::Succeeded))
        .expect("complete");
    assert_eq!(done.status, ToolRunStatus::Succeeded);
    assert_eq!(done.outputs_json.as_deref(), Some(r#"{"zone":"3a"}"#));
    assert_eq!(done.confidence_hint, Some(0.8));
    assert!(done.ended_at_ms.is_some());
}

#[test]
fn failed_runs_are_recorded_not_erased() {
    let mut store = SqliteStore::open(temp_dir("failed")).expect("open store");
    let id = start(&mut store);

    let mut request = complete(&id, ToolRunStatus::Failed);
    request.outputs_json = r#"{"error":"upstream timeout"}"#.to_string();
    request.confidence_hint = None;
    request.uncertainty_note = Some("service flaked mid-request".to_string());
    let failed = store.complete_tool_run(request).expect("complete failed");
    assert_eq!(failed.status, ToolRunStatus::Failed);

    let stored = store
        .get_tool_run("ws1", &id)
        .expect("get")
        .expect("failed run still retrievable");
    assert_eq!(
        stored.uncertainty_note.as_deref(),
        Some("service flaked mid-request")
    );
}

#[test]
fn terminal_runs_are_immutable() {
    let mut store = SqliteStore::open(temp_dir("immutable")).expect("open store");
    let id = start(&mut store);
    store
        .complete_tool_run(complete(&id, ToolRunStatus::Succeeded))
        .expect("first completion");

    match store.complete_tool_run(complete(&id, ToolRunStatus::Failed)) {
        Err(StoreError::ToolRunClosed { status, .. }) => assert_eq!(status, "succeeded"),
        other => panic!("expected ToolRunClosed, got {other:?}"),
    }
    match store.cancel_tool_run(CancelToolRunRequest {
        workspace_id: "ws1".to_string(),
        tool_run_id: id.clone(),
        note: None,
    }) {
        Err(StoreError::ToolRunClosed { .. }) => {}
        other => panic!("expected ToolRunClosed, got {other:?}"),
    }

    // The first outcome is what stays on record.
    let stored = store.get_tool_run("ws1", &id).expect("get").expect("exists");
    assert_eq!(stored.status, ToolRunStatus::Succeeded);
}

#[test]
fn cancel_marks_abandoned_and_keeps_the_row() {
    let mut store = SqliteStore::open(temp_dir("abandoned")).expect("open store");
    let id = start(&mut store);

    let cancelled = store
        .cancel_tool_run(CancelToolRunRequest {
            workspace_id: "ws1".to_string(),
            tool_run_id: id.clone(),
            note: Some("caller gave up".to_string()),
        })
        .expect("cancel");
    assert_eq!(cancelled.status, ToolRunStatus::Abandoned);
    assert!(cancelled.ended_at_ms.is_some());

    match store.complete_tool_run(complete(&id, ToolRunStatus::Succeeded)) {
        Err(StoreError::ToolRunClosed { status, .. }) => assert_eq!(status, "abandoned"),
        other => panic!("expected ToolRunClosed, got {other:?}"),
    }
}

#[test]
fn completion_inputs_are_validated() {
    let mut store = SqliteStore::open(temp_dir("validation")).expect("open store");
    let id = start(&mut store);

    let mut request = complete(&id, ToolRunStatus::Running);
    request.status = ToolRunStatus::Running;
    match store.complete_tool_run(request) {
        Err(StoreError::InvalidInput(_)) => {}
        other => panic!("expected InvalidInput for running status, got {other:?}"),
    }

    let mut request = complete(&id, ToolRunStatus::Succeeded);
    request.confidence_hint = Some(1.5);
    match store.complete_tool_run(request) {
        Err(StoreError::InvalidInput(_)) => {}
        other => panic!("expected InvalidInput for confidence hint, got {other:?}"),
    }

    let mut request = complete(&id, ToolRunStatus::Succeeded);
    request.outputs_json = "not json".to_string();
    match store.complete_tool_run(request) {
        Err(StoreError::InvalidInput(_)) => {}
        other => panic!("expected InvalidInput for outputs, got {other:?}"),
    }

    match store.complete_tool_run(complete("TOOL-404", ToolRunStatus::Succeeded)) {
        Err(StoreError::UnknownToolRun) => {}
        other => panic!("expected UnknownToolRun, got {other:?}"),
    }
}
