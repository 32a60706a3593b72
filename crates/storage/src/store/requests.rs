#![forbid(unsafe_code)]

use tl_core::model::{ActorType, EvidenceRole, MoveStatus, MoveType, ToolRunStatus, VersionedKind};
use tl_core::trace::TraceMode;

/// Who caused a write. Recorded verbatim in the audit log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActorRef {
    pub actor_type: ActorType,
    pub actor_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateRunRequest {
    pub workspace_id: String,
    pub profile: String,
    pub anchor_json: Option<String>,
    pub actor: ActorRef,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EvidenceLinkInput {
    pub evidence_id: String,
    pub role: EvidenceRole,
    pub note: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppendMoveRequest {
    pub workspace_id: String,
    pub run_id: String,
    pub move_type: MoveType,
    pub status: MoveStatus,
    pub inputs_json: Option<String>,
    pub outputs_json: Option<String>,
    pub assumptions_json: Option<String>,
    pub uncertainties_json: Option<String>,
    pub evidence: Vec<EvidenceLinkInput>,
    pub tool_run_ids: Vec<String>,
    pub backtrack_of_seq: Option<i64>,
    pub backtrack_reason: Option<String>,
    pub actor: ActorRef,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListMovesRequest {
    pub workspace_id: String,
    pub run_id: String,
    pub since_seq: Option<i64>,
    pub limit: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StartToolRunRequest {
    pub workspace_id: String,
    pub tool_name: String,
    pub inputs_json: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CompleteToolRunRequest {
    pub workspace_id: String,
    pub tool_run_id: String,
    /// Must be `Succeeded` or `Failed`; abandonment goes through cancel.
    pub status: ToolRunStatus,
    pub outputs_json: String,
    pub confidence_hint: Option<f64>,
    pub uncertainty_note: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CancelToolRunRequest {
    pub workspace_id: String,
    pub tool_run_id: String,
    pub note: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnsureEvidenceRequest {
    pub workspace_id: String,
    pub source_type: String,
    pub source_id: String,
    pub fragment_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnsureNodeRequest {
    pub workspace_id: String,
    pub node_id: String,
    pub node_type: String,
    pub props_json: Option<String>,
    pub canonical_fk: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddEdgeRequest {
    pub workspace_id: String,
    pub src_id: String,
    pub dst_id: String,
    pub edge_type: String,
    pub props_json: Option<String>,
    pub evidence_id: Option<String>,
    pub tool_run_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NeighborsRequest {
    pub workspace_id: String,
    pub node_id: String,
    pub edge_type: Option<String>,
    pub depth: usize,
    pub limit: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateVersionRequest {
    pub workspace_id: String,
    pub kind: VersionedKind,
    pub scope_key: String,
    pub record_json: String,
    pub supersede_existing: bool,
    /// Attributes the supersession to a run so forensic traces can surface it.
    pub run_id: Option<String>,
    pub actor: ActorRef,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionHistoryRequest {
    pub workspace_id: String,
    pub kind: VersionedKind,
    pub scope_key: String,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppendAuditRequest {
    pub workspace_id: String,
    pub event_type: String,
    pub actor: ActorRef,
    pub run_id: Option<String>,
    pub scope_key: Option<String>,
    pub tool_run_id: Option<String>,
    pub payload_json: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListAuditRequest {
    pub workspace_id: String,
    pub run_id: Option<String>,
    pub since_seq: Option<i64>,
    pub limit: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProjectTraceRequest {
    pub workspace_id: String,
    pub run_id: String,
    pub mode: TraceMode,
    /// Upper bound on the move sequence scanned; gives callers a stable
    /// snapshot while other writers append.
    pub as_of_seq: Option<i64>,
}
