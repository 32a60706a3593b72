use super::*;

#[test]
fn trace_mode_round_trip() {
    for mode in [TraceMode::Summary, TraceMode::Inspect, TraceMode::Forensic] {
        assert_eq!(TraceMode::from_str(mode.as_str()), Some(mode));
    }
    assert_eq!(TraceMode::from_str("debug"), None);
}

#[test]
fn trace_modes_are_ordered_by_detail() {
    assert!(TraceMode::Summary < TraceMode::Inspect);
    assert!(TraceMode::Inspect < TraceMode::Forensic);
}

#[test]
fn node_ids_are_deterministic() {
    assert_eq!(move_node_id("RUN-001", 3), "move:RUN-001/3");
    assert_eq!(move_node_id("RUN-001", 3), move_node_id("RUN-001", 3));
    assert_eq!(output_node_id("RUN-001", 7), "output:RUN-001/7");
    assert_eq!(tool_node_id("TOOL-002"), "tool:TOOL-002");
    assert_eq!(evidence_node_id("EV-001"), "evidence:EV-001");
    assert_eq!(audit_node_id(42), "audit:adt_0000000000000042");
    assert_eq!(
        version_node_id("plan_cycle", "VER-002"),
        "version:plan_cycle/VER-002"
    );
}

#[test]
fn node_ids_do_not_collide_across_kinds() {
    let ids = [
        move_node_id("RUN-001", 1),
        output_node_id("RUN-001", 1),
        tool_node_id("RUN-001/1"),
        evidence_node_id("RUN-001/1"),
    ];
    let mut unique = ids.to_vec();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), ids.len());
}

#[test]
fn empty_graph_is_empty() {
    let graph = TraceGraph::default();
    assert!(graph.is_empty());
}
