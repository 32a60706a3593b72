#![forbid(unsafe_code)]

use serde_json::{Value, json};
use std::path::PathBuf;
use tl_api::{ApiServer, ApiServerConfig, JsonRpcRequest};
use tl_storage::SqliteStore;

fn temp_dir(test_name: &str) -> PathBuf {
    let base = std::env::temp_dir();
    let pid = std::process::id();
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dir = base.join(format!("tl_api_{test_name}_{pid}_{nonce}"));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn server(test_name: &str) -> ApiServer {
    let store = SqliteStore::open(temp_dir(test_name)).expect("open store");
    ApiServer::new(
        store,
        ApiServerConfig {
            default_workspace: Some("ws1".to_string()),
        },
    )
}

fn rpc(method: &str, params: Value) -> JsonRpcRequest {
    serde_json::from_value(json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": method,
        "params": params,
    }))
    .expect("well-formed request")
}

fn call(server: &mut ApiServer, method: &str, params: Value) -> Value {
    let response = server.handle(rpc(method, params)).expect("response");
    response
        .get("result")
        .cloned()
        .unwrap_or_else(|| panic!("expected result, got {response}"))
}

fn call_err(server: &mut ApiServer, method: &str, params: Value) -> Value {
    let response = server.handle(rpc(method, params)).expect("response");
    response
        .get("error")
        .cloned()
        .unwrap_or_else(|| panic!("expected error, got {response}"))
}

fn error_kind(error: &Value) -> &str {
    error["data"]["kind"].as_str().unwrap_or("")
}

fn actor() -> Value {
    json!({ "type": "agent", "id": "agent-1" })
}

#[test]
fn initialize_and_ping() {
    let mut server = server("initialize");
    let result = call(&mut server, "initialize", json!({ "protocolVersion": "2024-11-05" }));
    assert_eq!(result["protocolVersion"], "2024-11-05");
    assert_eq!(result["serverInfo"]["name"], "traceledger-api");

    let result = call(&mut server, "ping", json!({}));
    assert_eq!(result, json!({}));
}

#[test]
fn unknown_method_is_rejected() {
    let mut server = server("unknown_method");
    let error = call_err(&mut server, "runs/destroy", json!({}));
    assert_eq!(error["code"], -32601);
}

#[test]
fn ledger_round_trip_through_the_wire() {
    let mut server = server("round_trip");

    let result = call(
        &mut server,
        "runs/create",
        json!({ "profile": "site-appraisal", "anchor": { "stage": "draft" }, "actor": actor() }),
    );
    let run_id = result["run"]["id"].as_str().expect("run id").to_string();

    let result = call(
        &mut server,
        "tool-runs/start",
        json!({ "tool": "flood-lookup", "inputs": { "parcel": "P-9" } }),
    );
    let tool_run_id = result["tool_run"]["id"].as_str().expect("tool id").to_string();
    call(
        &mut server,
        "tool-runs/complete",
        json!({
            "tool_run": tool_run_id,
            "status": "succeeded",
            "outputs": { "zone": "3a" },
            "confidence_hint": 0.9,
        }),
    );

    let result = call(
        &mut server,
        "evidence/ensure",
        json!({ "source_type": "document", "source_id": "DOC-12", "fragment_id": "p4" }),
    );
    let evidence_id = result["evidence"]["id"].as_str().expect("evidence id").to_string();

    let result = call(
        &mut server,
        "moves/append",
        json!({
            "run": run_id,
            "move_type": "framing",
            "status": "complete",
            "outputs": { "framing": "v1" },
            "evidence": [{ "evidence_id": evidence_id, "role": "relied_on" }],
            "tool_run_ids": [tool_run_id],
            "actor": actor(),
        }),
    );
    assert_eq!(result["move"]["seq"], 1);
    assert_eq!(result["move"]["outputs"]["framing"], "v1");

    let result = call(&mut server, "moves/list", json!({ "run": run_id }));
    assert_eq!(result["moves"].as_array().expect("moves").len(), 1);

    let result = call(
        &mut server,
        "trace/get",
        json!({ "run": run_id, "mode": "inspect" }),
    );
    let nodes = result["trace"]["nodes"].as_array().expect("nodes");
    assert!(nodes.iter().any(|node| node["kind"] == "move"));
    assert!(nodes.iter().any(|node| node["kind"] == "tool"));
    assert!(nodes.iter().any(|node| node["kind"] == "evidence"));
}

#[test]
fn default_workspace_applies_when_requests_omit_one() {
    let mut server = server("default_ws");
    call(
        &mut server,
        "runs/create",
        json!({ "profile": "site-appraisal", "actor": actor() }),
    );
    let result = call(&mut server, "runs/list", json!({}));
    assert_eq!(result["runs"].as_array().expect("runs").len(), 1);

    // An explicit workspace scopes away from the default.
    let result = call(&mut server, "runs/list", json!({ "workspace": "other" }));
    assert!(result["runs"].as_array().expect("runs").is_empty());
}

#[test]
fn domain_errors_carry_machine_readable_kinds() {
    let mut server = server("error_kinds");

    let error = call_err(&mut server, "runs/get", json!({ "run": "RUN-404" }));
    assert_eq!(error_kind(&error), "NOT_FOUND");
    assert_eq!(error["code"], -32004);

    let error = call_err(
        &mut server,
        "graph/add-edge",
        json!({ "src": "a", "dst": "b", "edge_type": "adjacent_to" }),
    );
    assert_eq!(error_kind(&error), "PROVENANCE_MISSING");

    call(
        &mut server,
        "versioned/create",
        json!({
            "kind": "plan_cycle",
            "scope_key": "authority-a/draft",
            "record": { "rev": 1 },
            "actor": actor(),
        }),
    );
    let error = call_err(
        &mut server,
        "versioned/create",
        json!({
            "kind": "plan_cycle",
            "scope_key": "authority-a/draft",
            "record": { "rev": 2 },
            "actor": actor(),
        }),
    );
    assert_eq!(error_kind(&error), "CONFLICT");

    let error = call_err(
        &mut server,
        "moves/append",
        json!({ "run": "RUN-001", "move_type": "meditating", "actor": actor() }),
    );
    assert_eq!(error_kind(&error), "INVALID_INPUT");
}

#[test]
fn supersession_flows_through_the_wire() {
    let mut server = server("supersession");

    call(
        &mut server,
        "versioned/create",
        json!({
            "kind": "plan_cycle",
            "scope_key": "authority-a/draft",
            "record": { "rev": 1 },
            "actor": actor(),
        }),
    );
    let result = call(
        &mut server,
        "versioned/create",
        json!({
            "kind": "plan_cycle",
            "scope_key": "authority-a/draft",
            "record": { "rev": 2 },
            "supersede_existing": true,
            "actor": actor(),
        }),
    );
    let v2 = result["version"]["id"].as_str().expect("version id").to_string();

    let result = call(
        &mut server,
        "versioned/current",
        json!({ "kind": "plan_cycle", "scope_key": "authority-a/draft" }),
    );
    assert_eq!(result["version"]["id"], v2.as_str());

    let result = call(
        &mut server,
        "versioned/history",
        json!({ "kind": "plan_cycle", "scope_key": "authority-a/draft" }),
    );
    assert_eq!(result["versions"].as_array().expect("versions").len(), 2);

    let result = call(
        &mut server,
        "versioned/current",
        json!({ "kind": "plan_cycle", "scope_key": "authority-a/untouched" }),
    );
    assert!(result["version"].is_null());

    let result = call(&mut server, "audit/list", json!({}));
    let events = result["events"].as_array().expect("events");
    assert!(
        events
            .iter()
            .any(|event| event["event_type"] == "version_superseded")
    );
}
