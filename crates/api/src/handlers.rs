#![forbid(unsafe_code)]

use crate::server::{ApiError, ApiServer};
use crate::support::ts_ms_to_rfc3339;
use serde_json::{Map, Value, json};
use tl_core::model::{ActorType, EvidenceRole, MoveStatus, MoveType, ToolRunStatus, VersionedKind};
use tl_core::trace::{TraceGraph, TraceMode};
use tl_storage::{
    ActorRef, AddEdgeRequest, AppendAuditRequest, AppendMoveRequest, AuditRow,
    CancelToolRunRequest, CompleteToolRunRequest, CreateRunRequest, CreateVersionRequest,
    EdgeRow, EnsureEvidenceRequest, EnsureNodeRequest, EvidenceLinkInput, EvidenceRefRow,
    ListAuditRequest, ListMovesRequest, MoveEventRow, NeighborsRequest, NodeRow,
    ProjectTraceRequest, RunRow, StartToolRunRequest, ToolRunRow, VersionHistoryRequest,
    VersionRow,
};

type Params = Map<String, Value>;

impl ApiServer {
    pub(crate) fn dispatch(
        &mut self,
        method: &str,
        params: &Value,
    ) -> Option<Result<Value, ApiError>> {
        Some(match method {
            "runs/create" => self.runs_create(params),
            "runs/get" => self.runs_get(params),
            "runs/list" => self.runs_list(params),
            "moves/append" => self.moves_append(params),
            "moves/list" => self.moves_list(params),
            "tool-runs/start" => self.tool_runs_start(params),
            "tool-runs/complete" => self.tool_runs_complete(params),
            "tool-runs/cancel" => self.tool_runs_cancel(params),
            "evidence/ensure" => self.evidence_ensure(params),
            "evidence/get" => self.evidence_get(params),
            "graph/ensure-node" => self.graph_ensure_node(params),
            "graph/add-edge" => self.graph_add_edge(params),
            "graph/neighbors" => self.graph_neighbors(params),
            "versioned/create" => self.versioned_create(params),
            "versioned/current" => self.versioned_current(params),
            "versioned/history" => self.versioned_history(params),
            "audit/append" => self.audit_append(params),
            "audit/list" => self.audit_list(params),
            "trace/get" => self.trace_get(params),
            _ => return None,
        })
    }

    fn workspace(&self, obj: &Params) -> Result<String, ApiError> {
        if let Some(value) = obj.get("workspace").and_then(Value::as_str) {
            return Ok(value.to_string());
        }
        self.default_workspace
            .clone()
            .ok_or_else(|| ApiError::Invalid("workspace is required".to_string()))
    }

    fn runs_create(&mut self, params: &Value) -> Result<Value, ApiError> {
        let obj = params_object(params)?;
        let run = self.store.create_run(CreateRunRequest {
            workspace_id: self.workspace(obj)?,
            profile: req_str(obj, "profile")?,
            anchor_json: json_field(obj, "anchor"),
            actor: parse_actor(obj)?,
        })?;
        Ok(json!({ "run": run_json(&run) }))
    }

    fn runs_get(&mut self, params: &Value) -> Result<Value, ApiError> {
        let obj = params_object(params)?;
        let workspace = self.workspace(obj)?;
        let run_id = req_str(obj, "run")?;
        let run = self
            .store
            .get_run(&workspace, &run_id)?
            .ok_or_else(|| ApiError::NotFound(format!("run {run_id} not found")))?;
        Ok(json!({ "run": run_json(&run) }))
    }

    fn runs_list(&mut self, params: &Value) -> Result<Value, ApiError> {
        let obj = params_object(params)?;
        let workspace = self.workspace(obj)?;
        let runs = self.store.list_runs(
            &workspace,
            opt_usize(obj, "limit").unwrap_or(100),
            opt_usize(obj, "offset").unwrap_or(0),
        )?;
        Ok(json!({ "runs": runs.iter().map(run_json).collect::<Vec<_>>() }))
    }

    fn moves_append(&mut self, params: &Value) -> Result<Value, ApiError> {
        let obj = params_object(params)?;
        let move_type = parse_enum(obj, "move_type", MoveType::from_str)?;
        let status = match obj.get("status").and_then(Value::as_str) {
            Some(raw) => MoveStatus::from_str(raw)
                .ok_or_else(|| ApiError::Invalid("status must be a known move status".to_string()))?,
            None => MoveStatus::Complete,
        };
        let event = self.store.append_move(AppendMoveRequest {
            workspace_id: self.workspace(obj)?,
            run_id: req_str(obj, "run")?,
            move_type,
            status,
            inputs_json: json_field(obj, "inputs"),
            outputs_json: json_field(obj, "outputs"),
            assumptions_json: json_field(obj, "assumptions"),
            uncertainties_json: json_field(obj, "uncertainties"),
            evidence: parse_evidence_links(obj)?,
            tool_run_ids: parse_string_array(obj, "tool_run_ids")?,
            backtrack_of_seq: opt_i64(obj, "backtrack_of_seq"),
            backtrack_reason: opt_str(obj, "backtrack_reason"),
            actor: parse_actor(obj)?,
        })?;
        Ok(json!({ "move": move_json(&event) }))
    }

    fn moves_list(&mut self, params: &Value) -> Result<Value, ApiError> {
        let obj = params_object(params)?;
        let moves = self.store.list_moves(ListMovesRequest {
            workspace_id: self.workspace(obj)?,
            run_id: req_str(obj, "run")?,
            since_seq: opt_i64(obj, "since_seq"),
            limit: opt_usize(obj, "limit").unwrap_or(100),
        })?;
        Ok(json!({ "moves": moves.iter().map(move_json).collect::<Vec<_>>() }))
    }

    fn tool_runs_start(&mut self, params: &Value) -> Result<Value, ApiError> {
        let obj = params_object(params)?;
        let tool_run = self.store.start_tool_run(StartToolRunRequest {
            workspace_id: self.workspace(obj)?,
            tool_name: req_str(obj, "tool")?,
            inputs_json: req_json_field(obj, "inputs")?,
        })?;
        Ok(json!({ "tool_run": tool_run_json(&tool_run) }))
    }

    fn tool_runs_complete(&mut self, params: &Value) -> Result<Value, ApiError> {
        let obj = params_object(params)?;
        let status = parse_enum(obj, "status", ToolRunStatus::from_str)?;
        let tool_run = self.store.complete_tool_run(CompleteToolRunRequest {
            workspace_id: self.workspace(obj)?,
            tool_run_id: req_str(obj, "tool_run")?,
            status,
            outputs_json: req_json_field(obj, "outputs")?,
            confidence_hint: obj.get("confidence_hint").and_then(Value::as_f64),
            uncertainty_note: opt_str(obj, "uncertainty_note"),
        })?;
        Ok(json!({ "tool_run": tool_run_json(&tool_run) }))
    }

    fn tool_runs_cancel(&mut self, params: &Value) -> Result<Value, ApiError> {
        let obj = params_object(params)?;
        let tool_run = self.store.cancel_tool_run(CancelToolRunRequest {
            workspace_id: self.workspace(obj)?,
            tool_run_id: req_str(obj, "tool_run")?,
            note: opt_str(obj, "note"),
        })?;
        Ok(json!({ "tool_run": tool_run_json(&tool_run) }))
    }

    fn evidence_ensure(&mut self, params: &Value) -> Result<Value, ApiError> {
        let obj = params_object(params)?;
        let evidence = self.store.ensure_evidence_ref(EnsureEvidenceRequest {
            workspace_id: self.workspace(obj)?,
            source_type: req_str(obj, "source_type")?,
            source_id: req_str(obj, "source_id")?,
            fragment_id: req_str(obj, "fragment_id")?,
        })?;
        Ok(json!({ "evidence": evidence_json(&evidence) }))
    }

    fn evidence_get(&mut self, params: &Value) -> Result<Value, ApiError> {
        let obj = params_object(params)?;
        let workspace = self.workspace(obj)?;
        let evidence_id = req_str(obj, "evidence")?;
        let evidence = self
            .store
            .get_evidence_ref(&workspace, &evidence_id)?
            .ok_or_else(|| ApiError::NotFound(format!("evidence {evidence_id} not found")))?;
        Ok(json!({ "evidence": evidence_json(&evidence) }))
    }

    fn graph_ensure_node(&mut self, params: &Value) -> Result<Value, ApiError> {
        let obj = params_object(params)?;
        let node = self.store.ensure_node(EnsureNodeRequest {
            workspace_id: self.workspace(obj)?,
            node_id: req_str(obj, "node")?,
            node_type: req_str(obj, "node_type")?,
            props_json: json_field(obj, "props"),
            canonical_fk: opt_str(obj, "canonical_fk"),
        })?;
        Ok(json!({ "node": node_json(&node) }))
    }

    fn graph_add_edge(&mut self, params: &Value) -> Result<Value, ApiError> {
        let obj = params_object(params)?;
        let edge = self.store.add_edge(AddEdgeRequest {
            workspace_id: self.workspace(obj)?,
            src_id: req_str(obj, "src")?,
            dst_id: req_str(obj, "dst")?,
            edge_type: req_str(obj, "edge_type")?,
            props_json: json_field(obj, "props"),
            evidence_id: opt_str(obj, "evidence"),
            tool_run_id: opt_str(obj, "tool_run"),
        })?;
        Ok(json!({ "edge": edge_json(&edge) }))
    }

    fn graph_neighbors(&mut self, params: &Value) -> Result<Value, ApiError> {
        let obj = params_object(params)?;
        let hits = self.store.neighbors(NeighborsRequest {
            workspace_id: self.workspace(obj)?,
            node_id: req_str(obj, "node")?,
            edge_type: opt_str(obj, "edge_type"),
            depth: opt_usize(obj, "depth").unwrap_or(1),
            limit: opt_usize(obj, "limit").unwrap_or(50),
        })?;
        let hits = hits
            .iter()
            .map(|(edge, node)| json!({ "edge": edge_json(edge), "node": node_json(node) }))
            .collect::<Vec<_>>();
        Ok(json!({ "hits": hits }))
    }

    fn versioned_create(&mut self, params: &Value) -> Result<Value, ApiError> {
        let obj = params_object(params)?;
        let kind = parse_enum(obj, "kind", VersionedKind::from_str)?;
        let version = self.store.create_version(CreateVersionRequest {
            workspace_id: self.workspace(obj)?,
            kind,
            scope_key: req_str(obj, "scope_key")?,
            record_json: req_json_field(obj, "record")?,
            supersede_existing: obj
                .get("supersede_existing")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            run_id: opt_str(obj, "run"),
            actor: parse_actor(obj)?,
        })?;
        Ok(json!({ "version": version_json(&version) }))
    }

    fn versioned_current(&mut self, params: &Value) -> Result<Value, ApiError> {
        let obj = params_object(params)?;
        let workspace = self.workspace(obj)?;
        let kind = parse_enum(obj, "kind", VersionedKind::from_str)?;
        let scope_key = req_str(obj, "scope_key")?;
        // No current version is a normal state for a scope, not an error.
        let version = self.store.current_version(&workspace, kind, &scope_key)?;
        Ok(json!({ "version": version.as_ref().map(version_json) }))
    }

    fn versioned_history(&mut self, params: &Value) -> Result<Value, ApiError> {
        let obj = params_object(params)?;
        let kind = parse_enum(obj, "kind", VersionedKind::from_str)?;
        let versions = self.store.version_history(VersionHistoryRequest {
            workspace_id: self.workspace(obj)?,
            kind,
            scope_key: req_str(obj, "scope_key")?,
            limit: opt_usize(obj, "limit").unwrap_or(100),
            offset: opt_usize(obj, "offset").unwrap_or(0),
        })?;
        Ok(json!({ "versions": versions.iter().map(version_json).collect::<Vec<_>>() }))
    }

    fn audit_append(&mut self, params: &Value) -> Result<Value, ApiError> {
        let obj = params_object(params)?;
        let event = self.store.append_audit(AppendAuditRequest {
            workspace_id: self.workspace(obj)?,
            event_type: req_str(obj, "event_type")?,
            actor: parse_actor(obj)?,
            run_id: opt_str(obj, "run"),
            scope_key: opt_str(obj, "scope_key"),
            tool_run_id: opt_str(obj, "tool_run"),
            payload_json: req_json_field(obj, "payload")?,
        })?;
        Ok(json!({ "event": audit_json(&event) }))
    }

    fn audit_list(&mut self, params: &Value) -> Result<Value, ApiError> {
        let obj = params_object(params)?;
        let events = self.store.list_audit(ListAuditRequest {
            workspace_id: self.workspace(obj)?,
            run_id: opt_str(obj, "run"),
            since_seq: opt_i64(obj, "since_seq"),
            limit: opt_usize(obj, "limit").unwrap_or(100),
        })?;
        Ok(json!({ "events": events.iter().map(audit_json).collect::<Vec<_>>() }))
    }

    fn trace_get(&mut self, params: &Value) -> Result<Value, ApiError> {
        let obj = params_object(params)?;
        let mode = match obj.get("mode").and_then(Value::as_str) {
            Some(raw) => TraceMode::from_str(raw).ok_or_else(|| {
                ApiError::Invalid("mode must be summary, inspect or forensic".to_string())
            })?,
            None => TraceMode::Summary,
        };
        let graph = self.store.project_trace(ProjectTraceRequest {
            workspace_id: self.workspace(obj)?,
            run_id: req_str(obj, "run")?,
            mode,
            as_of_seq: opt_i64(obj, "as_of"),
        })?;
        Ok(json!({ "mode": mode.as_str(), "trace": trace_json(&graph) }))
    }
}

fn params_object(params: &Value) -> Result<&Params, ApiError> {
    params
        .as_object()
        .ok_or_else(|| ApiError::Invalid("params object is required".to_string()))
}

fn req_str(obj: &Params, key: &str) -> Result<String, ApiError> {
    obj.get(key)
        .and_then(Value::as_str)
        .filter(|value| !value.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::Invalid(format!("{key} must be a non-empty string")))
}

fn opt_str(obj: &Params, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

fn opt_i64(obj: &Params, key: &str) -> Option<i64> {
    obj.get(key).and_then(Value::as_i64)
}

fn opt_usize(obj: &Params, key: &str) -> Option<usize> {
    obj.get(key).and_then(Value::as_u64).map(|value| value as usize)
}

/// Structured JSON parameters are stored as canonical JSON text.
fn json_field(obj: &Params, key: &str) -> Option<String> {
    match obj.get(key) {
        None | Some(Value::Null) => None,
        Some(value) => Some(value.to_string()),
    }
}

fn req_json_field(obj: &Params, key: &str) -> Result<String, ApiError> {
    json_field(obj, key).ok_or_else(|| ApiError::Invalid(format!("{key} is required")))
}

fn parse_enum<T>(
    obj: &Params,
    key: &str,
    from_str: fn(&str) -> Option<T>,
) -> Result<T, ApiError> {
    obj.get(key)
        .and_then(Value::as_str)
        .and_then(from_str)
        .ok_or_else(|| ApiError::Invalid(format!("{key} must be a known value")))
}

fn parse_actor(obj: &Params) -> Result<ActorRef, ApiError> {
    let actor = obj
        .get("actor")
        .and_then(Value::as_object)
        .ok_or_else(|| ApiError::Invalid("actor is required".to_string()))?;
    let actor_type = actor
        .get("type")
        .and_then(Value::as_str)
        .and_then(ActorType::from_str)
        .ok_or_else(|| ApiError::Invalid("actor.type must be user, agent or system".to_string()))?;
    let actor_id = actor
        .get("id")
        .and_then(Value::as_str)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ApiError::Invalid("actor.id is required".to_string()))?;
    Ok(ActorRef {
        actor_type,
        actor_id: actor_id.to_string(),
    })
}

fn parse_string_array(obj: &Params, key: &str) -> Result<Vec<String>, ApiError> {
    let Some(value) = obj.get(key) else {
        return Ok(Vec::new());
    };
    let items = value
        .as_array()
        .ok_or_else(|| ApiError::Invalid(format!("{key} must be an array of strings")))?;
    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| ApiError::Invalid(format!("{key} must be an array of strings")))
        })
        .collect()
}

fn parse_evidence_links(obj: &Params) -> Result<Vec<EvidenceLinkInput>, ApiError> {
    let Some(value) = obj.get("evidence") else {
        return Ok(Vec::new());
    };
    let items = value
        .as_array()
        .ok_or_else(|| ApiError::Invalid("evidence must be an array".to_string()))?;
    items
        .iter()
        .map(|item| {
            let link = item
                .as_object()
                .ok_or_else(|| ApiError::Invalid("evidence entries must be objects".to_string()))?;
            let role = link
                .get("role")
                .and_then(Value::as_str)
                .and_then(EvidenceRole::from_str)
                .ok_or_else(|| {
                    ApiError::Invalid(
                        "evidence role must be relied_on, contradicted or considered".to_string(),
                    )
                })?;
            Ok(EvidenceLinkInput {
                evidence_id: req_str(link, "evidence_id")?,
                role,
                note: opt_str(link, "note"),
            })
        })
        .collect()
}

fn json_or_string(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn opt_json(raw: &Option<String>) -> Value {
    raw.as_deref().map(json_or_string).unwrap_or(Value::Null)
}

fn run_json(run: &RunRow) -> Value {
    json!({
        "id": run.id,
        "profile": run.profile,
        "anchor": opt_json(&run.anchor_json),
        "created_at": ts_ms_to_rfc3339(run.created_at_ms),
    })
}

fn move_json(event: &MoveEventRow) -> Value {
    json!({
        "id": event.move_id(),
        "run": event.run_id,
        "seq": event.seq,
        "move_type": event.move_type.as_str(),
        "status": event.status.as_str(),
        "inputs": opt_json(&event.inputs_json),
        "outputs": opt_json(&event.outputs_json),
        "assumptions": opt_json(&event.assumptions_json),
        "uncertainties": opt_json(&event.uncertainties_json),
        "evidence": event
            .evidence
            .iter()
            .map(|link| json!({
                "evidence_id": link.evidence_id,
                "role": link.role.as_str(),
                "note": link.note,
            }))
            .collect::<Vec<_>>(),
        "tool_run_ids": event.tool_run_ids,
        "backtrack_of_seq": event.backtrack_of_seq,
        "backtrack_reason": event.backtrack_reason,
        "created_at": ts_ms_to_rfc3339(event.created_at_ms),
    })
}

fn tool_run_json(tool_run: &ToolRunRow) -> Value {
    json!({
        "id": tool_run.id,
        "tool": tool_run.tool_name,
        "status": tool_run.status.as_str(),
        "inputs": json_or_string(&tool_run.inputs_json),
        "outputs": opt_json(&tool_run.outputs_json),
        "confidence_hint": tool_run.confidence_hint,
        "uncertainty_note": tool_run.uncertainty_note,
        "started_at": ts_ms_to_rfc3339(tool_run.started_at_ms),
        "ended_at": tool_run.ended_at_ms.map(ts_ms_to_rfc3339),
    })
}

fn evidence_json(evidence: &EvidenceRefRow) -> Value {
    json!({
        "id": evidence.id,
        "source_type": evidence.source_type,
        "source_id": evidence.source_id,
        "fragment_id": evidence.fragment_id,
        "created_at": ts_ms_to_rfc3339(evidence.created_at_ms),
    })
}

fn node_json(node: &NodeRow) -> Value {
    json!({
        "id": node.id,
        "node_type": node.node_type,
        "props": opt_json(&node.props_json),
        "canonical_fk": node.canonical_fk,
        "created_at": ts_ms_to_rfc3339(node.created_at_ms),
    })
}

fn edge_json(edge: &EdgeRow) -> Value {
    json!({
        "id": edge.id,
        "src": edge.src_id,
        "dst": edge.dst_id,
        "edge_type": edge.edge_type,
        "props": opt_json(&edge.props_json),
        "evidence": edge.evidence_id,
        "tool_run": edge.tool_run_id,
        "created_at": ts_ms_to_rfc3339(edge.created_at_ms),
    })
}

fn version_json(version: &VersionRow) -> Value {
    json!({
        "id": version.id,
        "kind": version.kind.as_str(),
        "scope_key": version.scope_key,
        "record": json_or_string(&version.record_json),
        "is_current": version.is_current,
        "superseded_by": version.superseded_by,
        "created_at": ts_ms_to_rfc3339(version.created_at_ms),
    })
}

fn audit_json(event: &AuditRow) -> Value {
    json!({
        "id": event.event_id(),
        "seq": event.seq,
        "ts": ts_ms_to_rfc3339(event.ts_ms),
        "event_type": event.event_type,
        "actor": { "type": event.actor_type.as_str(), "id": event.actor_id },
        "run": event.run_id,
        "scope_key": event.scope_key,
        "tool_run": event.tool_run_id,
        "payload": json_or_string(&event.payload_json),
    })
}

fn trace_json(graph: &TraceGraph) -> Value {
    json!({
        "nodes": graph
            .nodes
            .iter()
            .map(|node| json!({
                "id": node.id,
                "kind": node.kind,
                "label": node.label,
                "props": opt_json(&node.props_json),
            }))
            .collect::<Vec<_>>(),
        "edges": graph
            .edges
            .iter()
            .map(|edge| json!({
                "from": edge.from,
                "rel": edge.rel,
                "to": edge.to,
                "props": opt_json(&edge.props_json),
            }))
            .collect::<Vec<_>>(),
    })
}
