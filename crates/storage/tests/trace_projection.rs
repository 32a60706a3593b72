#![forbid(unsafe_code)]

use std::path::PathBuf;
use tl_core::model::{ActorType, EvidenceRole, MoveStatus, MoveType, ToolRunStatus, VersionedKind};
use tl_core::trace::{self, TraceGraph, TraceMode, rels};
use tl_storage::{
    ActorRef, AppendAuditRequest, AppendMoveRequest, CompleteToolRunRequest, CreateRunRequest,
    CreateVersionRequest, EnsureEvidenceRequest, EvidenceLinkInput, ProjectTraceRequest,
    SqliteStore, StartToolRunRequest, StoreError,
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

fn agent() -> ActorRef {
    ActorRef {
        actor_type: ActorType::Agent,
        actor_id: "agent-1".to_string(),
    }
}

fn project(store: &mut SqliteStore, run_id: &str, mode: TraceMode) -> TraceGraph {
    store
        .project_trace(ProjectTraceRequest {
            workspace_id: "ws1".to_string(),
            run_id: run_id.to_string(),
            mode,
            as_of_seq: None,
        })
        .expect("project trace")
}

fn node_ids(graph: &TraceGraph) -> Vec<&str> {
    graph.nodes.iter().map(|node| node.id.as_str()).collect()
}

fn edge_triples(graph: &TraceGraph) -> Vec<(&str, &str, &str)> {
    graph
        .edges
        .iter()
        .map(|edge| (edge.from.as_str(), edge.rel, edge.to.as_str()))
        .collect()
}

/// One run with a tool-backed, evidence-cited framing move that later gets
/// backtracked. Returns (run_id, tool_run_id, evidence_id).
fn seed_run(store: &mut SqliteStore) -> (String, String, String) {
    let run_id = store
        .create_run(CreateRunRequest {
            workspace_id: "ws1".to_string(),
            profile: "site-appraisal".to_string(),
            anchor_json: None,
            actor: agent(),
        })
        .expect("create run")
        .id;

    let tool_run_id = store
        .start_tool_run(StartToolRunRequest {
            workspace_id: "ws1".to_string(),
            tool_name: "flood-lookup".to_string(),
            inputs_json: r#"{"parcel":"P-9"}"#.to_string(),
        })
        .expect("start tool run")
        .id;
    store
        .complete_tool_run(CompleteToolRunRequest {
            workspace_id: "ws1".to_string(),
            tool_run_id: tool_run_id.clone(),
            status: ToolRunStatus::Succeeded,
            outputs_json: r#"{"zone":"3a"}"#.to_string(),
            confidence_hint: Some(0.9),
            uncertainty_note: None,
        })
        .expect("complete tool run");

    let evidence_id = store
        .ensure_evidence_ref(EnsureEvidenceRequest {
            workspace_id: "ws1".to_string(),
            source_type: "document".to_string(),
            source_id: "DOC-12".to_string(),
            fragment_id: "p4".to_string(),
        })
        .expect("ensure evidence")
        .id;

    store
        .append_move(AppendMoveRequest {
            workspace_id: "ws1".to_string(),
            run_id: run_id.clone(),
            move_type: MoveType::Framing,
            status: MoveStatus::Complete,
            inputs_json: None,
            outputs_json: Some(r#"{"framing":"v1"}"#.to_string()),
            assumptions_json: None,
            uncertainties_json: None,
            evidence: vec![EvidenceLinkInput {
                evidence_id: evidence_id.clone(),
                role: EvidenceRole::ReliedOn,
                note: None,
            }],
            tool_run_ids: vec![tool_run_id.clone()],
            backtrack_of_seq: None,
            backtrack_reason: None,
            actor: agent(),
        })
        .expect("append move 1");

    store
        .append_move(AppendMoveRequest {
            workspace_id: "ws1".to_string(),
            run_id: run_id.clone(),
            move_type: MoveType::Framing,
            status: MoveStatus::Complete,
            inputs_json: None,
            outputs_json: Some(r#"{"framing":"v2"}"#.to_string()),
            assumptions_json: None,
            uncertainties_json: None,
            evidence: vec![],
            tool_run_ids: vec![],
            backtrack_of_seq: Some(1),
            backtrack_reason: Some("missed the flood constraint".to_string()),
            actor: agent(),
        })
        .expect("append move 2");

    (run_id, tool_run_id, evidence_id)
}

#[test]
fn run_with_no_moves_projects_to_an_empty_graph() {
    let mut store = SqliteStore::open(temp_dir("empty_run")).expect("open store");
    let run_id = store
        .create_run(CreateRunRequest {
            workspace_id: "ws1".to_string(),
            profile: "site-appraisal".to_string(),
            anchor_json: None,
            actor: agent(),
        })
        .expect("create run")
        .id;

    for mode in [TraceMode::Summary, TraceMode::Inspect, TraceMode::Forensic] {
        let graph = project(&mut store, &run_id, mode);
        assert!(graph.is_empty(), "{mode:?} must be empty for a bare run");
    }
}

#[test]
fn unknown_run_is_not_found() {
    let mut store = SqliteStore::open(temp_dir("unknown_run")).expect("open store");
    match store.project_trace(ProjectTraceRequest {
        workspace_id: "ws1".to_string(),
        run_id: "RUN-404".to_string(),
        mode: TraceMode::Summary,
        as_of_seq: None,
    }) {
        Err(StoreError::UnknownRun) => {}
        other => panic!("expected UnknownRun, got {other:?}"),
    }
}

#[test]
fn summary_shows_moves_and_terminal_outputs_only() {
    let mut store = SqliteStore::open(temp_dir("summary")).expect("open store");
    let (run_id, _, _) = seed_run(&mut store);

    let graph = project(&mut store, &run_id, TraceMode::Summary);
    let ids = node_ids(&graph);

    assert!(ids.contains(&trace::move_node_id(&run_id, 1).as_str()));
    assert!(ids.contains(&trace::move_node_id(&run_id, 2).as_str()));
    // Move 1 was backtracked, so only move 2 counts as terminal output.
    assert!(!ids.contains(&trace::output_node_id(&run_id, 1).as_str()));
    assert!(ids.contains(&trace::output_node_id(&run_id, 2).as_str()));
    assert!(!ids.iter().any(|id| id.starts_with("tool:")));
    assert!(!ids.iter().any(|id| id.starts_with("evidence:")));

    let triples = edge_triples(&graph);
    let move1 = trace::move_node_id(&run_id, 1);
    let move2 = trace::move_node_id(&run_id, 2);
    assert!(triples.contains(&(move1.as_str(), rels::FOLLOWS, move2.as_str())));
    assert!(
        !triples
            .iter()
            .any(|(_, rel, _)| *rel == rels::SUPERSEDES),
        "backtrack links are forensic detail"
    );
}

#[test]
fn inspect_adds_tool_and_evidence_nodes() {
    let mut store = SqliteStore::open(temp_dir("inspect")).expect("open store");
    let (run_id, tool_run_id, evidence_id) = seed_run(&mut store);

    let graph = project(&mut store, &run_id, TraceMode::Inspect);
    let ids = node_ids(&graph);
    assert!(ids.contains(&trace::tool_node_id(&tool_run_id).as_str()));
    assert!(ids.contains(&trace::evidence_node_id(&evidence_id).as_str()));
    // Raw payloads stay behind the forensic gate.
    assert!(!ids.contains(&trace::tool_input_node_id(&tool_run_id).as_str()));

    let triples = edge_triples(&graph);
    let move1 = trace::move_node_id(&run_id, 1);
    assert!(triples.contains(&(
        move1.as_str(),
        rels::USED,
        trace::tool_node_id(&tool_run_id).as_str()
    )));
    assert!(triples.contains(&(
        move1.as_str(),
        rels::CITES,
        trace::evidence_node_id(&evidence_id).as_str()
    )));
}

#[test]
fn forensic_surfaces_payloads_backtracks_and_decisions() {
    let mut store = SqliteStore::open(temp_dir("forensic")).expect("open store");
    let (run_id, tool_run_id, _) = seed_run(&mut store);

    store
        .append_audit(AppendAuditRequest {
            workspace_id: "ws1".to_string(),
            event_type: "suggestion_accepted".to_string(),
            actor: ActorRef {
                actor_type: ActorType::User,
                actor_id: "valuer-1".to_string(),
            },
            run_id: Some(run_id.clone()),
            scope_key: None,
            tool_run_id: None,
            payload_json: r#"{"seq":2}"#.to_string(),
        })
        .expect("append decision audit");

    let graph = project(&mut store, &run_id, TraceMode::Forensic);
    let ids = node_ids(&graph);
    assert!(ids.contains(&trace::tool_input_node_id(&tool_run_id).as_str()));
    assert!(ids.contains(&trace::tool_output_node_id(&tool_run_id).as_str()));
    assert!(ids.iter().any(|id| id.starts_with("audit:")));

    let triples = edge_triples(&graph);
    let move1 = trace::move_node_id(&run_id, 1);
    let move2 = trace::move_node_id(&run_id, 2);
    assert!(triples.contains(&(move2.as_str(), rels::SUPERSEDES, move1.as_str())));
    assert!(
        triples
            .iter()
            .any(|(from, rel, to)| from.starts_with("audit:")
                && *rel == rels::DECIDED_IN
                && *to == move2.as_str())
    );

    // Every edge endpoint must resolve to a projected node.
    let all_ids: std::collections::BTreeSet<&str> = node_ids(&graph).into_iter().collect();
    for edge in &graph.edges {
        assert!(all_ids.contains(edge.from.as_str()), "dangling {}", edge.from);
        assert!(all_ids.contains(edge.to.as_str()), "dangling {}", edge.to);
    }
}

#[test]
fn forensic_includes_version_supersessions_attributed_to_the_run() {
    let mut store = SqliteStore::open(temp_dir("versions")).expect("open store");
    let (run_id, _, _) = seed_run(&mut store);

    let v1 = store
        .create_version(CreateVersionRequest {
            workspace_id: "ws1".to_string(),
            kind: VersionedKind::PlanCycle,
            scope_key: "authority-a/draft".to_string(),
            record_json: r#"{"rev":1}"#.to_string(),
            supersede_existing: false,
            run_id: Some(run_id.clone()),
            actor: agent(),
        })
        .expect("v1");
    let v2 = store
        .create_version(CreateVersionRequest {
            workspace_id: "ws1".to_string(),
            kind: VersionedKind::PlanCycle,
            scope_key: "authority-a/draft".to_string(),
            record_json: r#"{"rev":2}"#.to_string(),
            supersede_existing: true,
            run_id: Some(run_id.clone()),
            actor: agent(),
        })
        .expect("v2");

    let graph = project(&mut store, &run_id, TraceMode::Forensic);
    let new_node = trace::version_node_id(VersionedKind::PlanCycle.as_str(), &v2.id);
    let old_node = trace::version_node_id(VersionedKind::PlanCycle.as_str(), &v1.id);
    assert!(node_ids(&graph).contains(&new_node.as_str()));
    assert!(
        edge_triples(&graph).contains(&(new_node.as_str(), rels::SUPERSEDES, old_node.as_str()))
    );

    // Below forensic the versioning machinery stays invisible.
    let inspect = project(&mut store, &run_id, TraceMode::Inspect);
    assert!(!node_ids(&inspect).contains(&new_node.as_str()));
}

#[test]
fn projection_is_deterministic() {
    let mut store = SqliteStore::open(temp_dir("deterministic")).expect("open store");
    let (run_id, _, _) = seed_run(&mut store);

    let first = project(&mut store, &run_id, TraceMode::Forensic);
    let second = project(&mut store, &run_id, TraceMode::Forensic);
    assert_eq!(node_ids(&first), node_ids(&second));
    assert_eq!(edge_triples(&first), edge_triples(&second));
}

#[test]
fn as_of_seq_pins_the_projection() {
    let mut store = SqliteStore::open(temp_dir("as_of")).expect("open store");
    let (run_id, _, _) = seed_run(&mut store);

    let graph = store
        .project_trace(ProjectTraceRequest {
            workspace_id: "ws1".to_string(),
            run_id: run_id.clone(),
            mode: TraceMode::Summary,
            as_of_seq: Some(1),
        })
        .expect("project trace");

    let ids = node_ids(&graph);
    assert!(ids.contains(&trace::move_node_id(&run_id, 1).as_str()));
    assert!(!ids.contains(&trace::move_node_id(&run_id, 2).as_str()));
    // Within the pinned window move 1 has not been backtracked yet.
    assert!(ids.contains(&trace::output_node_id(&run_id, 1).as_str()));
}
