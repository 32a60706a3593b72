#![forbid(unsafe_code)]

use super::evidence::evidence_row_tx;
use super::moves::{move_evidence_links_tx, move_tool_links_tx};
use super::tool_runs::read_tool_run_tx;
use super::*;
use std::collections::{BTreeMap, BTreeSet};
use tl_core::model::{MoveStatus, MoveType};
use tl_core::trace::{self, TraceEdge, TraceGraph, TraceMode, TraceNode, rels};

impl SqliteStore {
    /// Deterministically derives the trace graph for a run.
    ///
    /// The projector is read-only: it never re-invokes any generator, only
    /// reads already-persisted rows, so the same underlying state always
    /// yields the same node and edge identifier sets. Nodes are assembled in
    /// a first pass and edges in a second, so no edge can dangle. A run with
    /// zero moves projects to an empty graph.
    pub fn project_trace(&mut self, request: ProjectTraceRequest) -> Result<TraceGraph, StoreError> {
        let workspace = canonical_workspace(&request.workspace_id)?;
        let run_id = canonical_id("run_id", &request.run_id)?;

        let tx = self.conn.transaction()?;
        ensure_run_exists_tx(&tx, &workspace, &run_id)?;

        let moves = load_moves_tx(&tx, &workspace, &run_id, request.as_of_seq)?;
        let mut builder = TraceBuilder::default();

        if moves.is_empty() {
            tx.commit()?;
            return Ok(TraceGraph::default());
        }

        let superseded: BTreeSet<i64> = moves
            .iter()
            .filter_map(|event| event.backtrack_of_seq)
            .collect();

        // Pass 1: nodes.
        for event in &moves {
            let props = serde_json::json!({
                "move_type": event.move_type.as_str(),
                "status": event.status.as_str(),
                "tool_runs": event.tool_run_ids.len(),
                "evidence": event.evidence.len(),
                "backtrack_of_seq": event.backtrack_of_seq,
            });
            builder.node(TraceNode {
                id: trace::move_node_id(&run_id, event.seq),
                kind: trace::MOVE_KIND,
                label: Some(event.move_type.as_str().to_string()),
                props_json: Some(props.to_string()),
            });

            if event.status == MoveStatus::Complete && !superseded.contains(&event.seq) {
                builder.node(TraceNode {
                    id: trace::output_node_id(&run_id, event.seq),
                    kind: trace::OUTPUT_KIND,
                    label: None,
                    props_json: event.outputs_json.clone(),
                });
            }
        }

        if request.mode >= TraceMode::Inspect {
            for event in &moves {
                for tool_run_id in &event.tool_run_ids {
                    let Some(tool_run) = read_tool_run_tx(&tx, &workspace, tool_run_id)? else {
                        continue;
                    };
                    let props = serde_json::json!({
                        "tool_name": tool_run.tool_name,
                        "status": tool_run.status.as_str(),
                        "confidence_hint": tool_run.confidence_hint,
                        "uncertainty_note": tool_run.uncertainty_note,
                    });
                    builder.node(TraceNode {
                        id: trace::tool_node_id(tool_run_id),
                        kind: trace::TOOL_KIND,
                        label: Some(tool_run.tool_name.clone()),
                        props_json: Some(props.to_string()),
                    });

                    if request.mode >= TraceMode::Forensic {
                        builder.node(TraceNode {
                            id: trace::tool_input_node_id(tool_run_id),
                            kind: trace::TOOL_INPUT_KIND,
                            label: None,
                            props_json: Some(tool_run.inputs_json.clone()),
                        });
                        if let Some(outputs) = &tool_run.outputs_json {
                            builder.node(TraceNode {
                                id: trace::tool_output_node_id(tool_run_id),
                                kind: trace::TOOL_OUTPUT_KIND,
                                label: None,
                                props_json: Some(outputs.clone()),
                            });
                        }
                    }
                }

                for link in &event.evidence {
                    let Some(evidence) = evidence_row_tx(&tx, &workspace, &link.evidence_id)?
                    else {
                        continue;
                    };
                    let props = serde_json::json!({
                        "source_type": evidence.source_type,
                        "source_id": evidence.source_id,
                        "fragment_id": evidence.fragment_id,
                    });
                    builder.node(TraceNode {
                        id: trace::evidence_node_id(&link.evidence_id),
                        kind: trace::EVIDENCE_KIND,
                        label: Some(format!("{}:{}", evidence.source_type, evidence.source_id)),
                        props_json: Some(props.to_string()),
                    });
                }
            }
        }

        let mut decisions = Vec::new();
        let mut supersessions = Vec::new();
        if request.mode >= TraceMode::Forensic {
            for audit in load_run_audit_tx(&tx, &workspace, &run_id)? {
                if audit.event_type == "version_superseded" {
                    if let Some((kind, old_id, new_id)) = parse_supersession(&audit.payload_json) {
                        for version_id in [&old_id, &new_id] {
                            builder.node(TraceNode {
                                id: trace::version_node_id(&kind, version_id),
                                kind: trace::VERSION_KIND,
                                label: Some(kind.clone()),
                                props_json: audit.scope_key.as_ref().map(|scope_key| {
                                    serde_json::json!({ "scope_key": scope_key }).to_string()
                                }),
                            });
                        }
                        supersessions.push((kind, old_id, new_id));
                    }
                    continue;
                }
                if !is_decision_event(&audit.event_type) {
                    continue;
                }
                let props = serde_json::json!({
                    "event_type": audit.event_type,
                    "actor_type": audit.actor_type.as_str(),
                    "actor_id": audit.actor_id,
                    "payload": audit.payload_json,
                });
                builder.node(TraceNode {
                    id: trace::audit_node_id(audit.seq),
                    kind: trace::AUDIT_KIND,
                    label: Some(audit.event_type.clone()),
                    props_json: Some(props.to_string()),
                });
                decisions.push(audit);
            }
        }

        // Pass 2: edges, now that every endpoint exists.
        let mut previous_seq: Option<i64> = None;
        for event in &moves {
            let move_id = trace::move_node_id(&run_id, event.seq);
            if let Some(prev) = previous_seq {
                builder.edge(TraceEdge {
                    from: trace::move_node_id(&run_id, prev),
                    rel: rels::FOLLOWS,
                    to: move_id.clone(),
                    props_json: None,
                });
            }
            previous_seq = Some(event.seq);

            if builder.has_node(&trace::output_node_id(&run_id, event.seq)) {
                builder.edge(TraceEdge {
                    from: move_id.clone(),
                    rel: rels::PRODUCES,
                    to: trace::output_node_id(&run_id, event.seq),
                    props_json: None,
                });
            }

            if request.mode >= TraceMode::Inspect {
                for tool_run_id in &event.tool_run_ids {
                    let tool_node = trace::tool_node_id(tool_run_id);
                    if !builder.has_node(&tool_node) {
                        continue;
                    }
                    builder.edge(TraceEdge {
                        from: move_id.clone(),
                        rel: rels::USED,
                        to: tool_node.clone(),
                        props_json: None,
                    });
                    if request.mode >= TraceMode::Forensic {
                        builder.edge(TraceEdge {
                            from: tool_node.clone(),
                            rel: rels::LOGGED_INPUT,
                            to: trace::tool_input_node_id(tool_run_id),
                            props_json: None,
                        });
                        if builder.has_node(&trace::tool_output_node_id(tool_run_id)) {
                            builder.edge(TraceEdge {
                                from: tool_node,
                                rel: rels::LOGGED_OUTPUT,
                                to: trace::tool_output_node_id(tool_run_id),
                                props_json: None,
                            });
                        }
                    }
                }

                for link in &event.evidence {
                    let evidence_node = trace::evidence_node_id(&link.evidence_id);
                    if !builder.has_node(&evidence_node) {
                        continue;
                    }
                    let props = serde_json::json!({
                        "role": link.role.as_str(),
                        "note": link.note,
                    });
                    builder.edge(TraceEdge {
                        from: move_id.clone(),
                        rel: rels::CITES,
                        to: evidence_node,
                        props_json: Some(props.to_string()),
                    });
                }
            }

            if request.mode >= TraceMode::Forensic
                && let Some(target_seq) = event.backtrack_of_seq
            {
                let target = trace::move_node_id(&run_id, target_seq);
                if builder.has_node(&target) {
                    builder.edge(TraceEdge {
                        from: move_id.clone(),
                        rel: rels::SUPERSEDES,
                        to: target,
                        props_json: event.backtrack_reason.as_ref().map(|reason| {
                            serde_json::json!({ "reason": reason }).to_string()
                        }),
                    });
                }
            }
        }

        for audit in &decisions {
            let audit_node = trace::audit_node_id(audit.seq);
            if let Some(seq) = payload_move_seq(&audit.payload_json) {
                let move_node = trace::move_node_id(&run_id, seq);
                if builder.has_node(&move_node) {
                    builder.edge(TraceEdge {
                        from: audit_node,
                        rel: rels::DECIDED_IN,
                        to: move_node,
                        props_json: None,
                    });
                    continue;
                }
            }
            if let Some(tool_run_id) = &audit.tool_run_id {
                let tool_node = trace::tool_node_id(tool_run_id);
                if builder.has_node(&tool_node) {
                    builder.edge(TraceEdge {
                        from: audit_node,
                        rel: rels::DECIDED_IN,
                        to: tool_node,
                        props_json: None,
                    });
                }
            }
        }

        for (kind, old_id, new_id) in &supersessions {
            builder.edge(TraceEdge {
                from: trace::version_node_id(kind, new_id),
                rel: rels::SUPERSEDES,
                to: trace::version_node_id(kind, old_id),
                props_json: None,
            });
        }

        tx.commit()?;
        Ok(builder.finish())
    }
}

/// Accumulates nodes keyed by deterministic id and edges deduplicated on the
/// (from, rel, to) triple, so repeated projection is idempotent.
#[derive(Default)]
struct TraceBuilder {
    nodes: BTreeMap<String, TraceNode>,
    edges: Vec<TraceEdge>,
    edge_keys: BTreeSet<(String, &'static str, String)>,
}

impl TraceBuilder {
    fn node(&mut self, node: TraceNode) {
        self.nodes.entry(node.id.clone()).or_insert(node);
    }

    fn has_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    fn edge(&mut self, edge: TraceEdge) {
        let key = (edge.from.clone(), edge.rel, edge.to.clone());
        if self.edge_keys.insert(key) {
            self.edges.push(edge);
        }
    }

    fn finish(mut self) -> TraceGraph {
        self.edges
            .sort_by(|a, b| (&a.from, a.rel, &a.to).cmp(&(&b.from, b.rel, &b.to)));
        TraceGraph {
            nodes: self.nodes.into_values().collect(),
            edges: self.edges,
        }
    }
}

fn load_moves_tx(
    tx: &Transaction<'_>,
    workspace: &str,
    run_id: &str,
    as_of_seq: Option<i64>,
) -> Result<Vec<MoveEventRow>, StoreError> {
    let bound = as_of_seq.unwrap_or(i64::MAX);
    let mut out = Vec::new();
    {
        let mut stmt = tx.prepare(
            r#"
            SELECT seq, move_type, status, outputs_json, backtrack_of_seq, backtrack_reason, created_at_ms
            FROM move_events
            WHERE workspace=?1 AND run_id=?2 AND seq <= ?3
            ORDER BY seq ASC
            "#,
        )?;
        let mut rows = stmt.query(params![workspace, run_id, bound])?;
        while let Some(row) = rows.next()? {
            let move_type_raw = row.get::<_, String>(1)?;
            let status_raw = row.get::<_, String>(2)?;
            out.push(MoveEventRow {
                run_id: run_id.to_string(),
                seq: row.get(0)?,
                move_type: MoveType::from_str(&move_type_raw)
                    .ok_or(StoreError::InvalidInput("invalid move type row"))?,
                status: MoveStatus::from_str(&status_raw)
                    .ok_or(StoreError::InvalidInput("invalid move status row"))?,
                inputs_json: None,
                outputs_json: row.get(3)?,
                assumptions_json: None,
                uncertainties_json: None,
                backtrack_of_seq: row.get(4)?,
                backtrack_reason: row.get(5)?,
                evidence: Vec::new(),
                tool_run_ids: Vec::new(),
                created_at_ms: row.get(6)?,
            });
        }
    }
    for event in &mut out {
        event.evidence = move_evidence_links_tx(tx, workspace, run_id, event.seq)?;
        event.tool_run_ids = move_tool_links_tx(tx, workspace, run_id, event.seq)?;
    }
    Ok(out)
}

fn load_run_audit_tx(
    tx: &Transaction<'_>,
    workspace: &str,
    run_id: &str,
) -> Result<Vec<AuditRow>, StoreError> {
    let mut stmt = tx.prepare(
        r#"
        SELECT seq, ts_ms, event_type, actor_type, actor_id, run_id, scope_key, tool_run_id, payload_json
        FROM audit_events
        WHERE workspace=?1 AND run_id=?2
        ORDER BY seq ASC
        "#,
    )?;
    let mut rows = stmt.query(params![workspace, run_id])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(super::audit::read_audit_row(row)?);
    }
    Ok(out)
}

/// Accept/reject decisions are the audit events forensic mode surfaces.
fn is_decision_event(event_type: &str) -> bool {
    event_type.ends_with("accepted") || event_type.ends_with("rejected")
}

fn parse_supersession(payload_json: &str) -> Option<(String, String, String)> {
    let payload: serde_json::Value = serde_json::from_str(payload_json).ok()?;
    let kind = payload.get("kind")?.as_str()?.to_string();
    let old_id = payload.get("old_id")?.as_str()?.to_string();
    let new_id = payload.get("new_id")?.as_str()?.to_string();
    Some((kind, old_id, new_id))
}

fn payload_move_seq(payload_json: &str) -> Option<i64> {
    let payload: serde_json::Value = serde_json::from_str(payload_json).ok()?;
    payload.get("seq")?.as_i64()
}
