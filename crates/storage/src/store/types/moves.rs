#![forbid(unsafe_code)]

use tl_core::model::{EvidenceRole, MoveStatus, MoveType};

#[derive(Clone, Debug)]
pub struct MoveEventRow {
    pub run_id: String,
    pub seq: i64,
    pub move_type: MoveType,
    pub status: MoveStatus,
    pub inputs_json: Option<String>,
    pub outputs_json: Option<String>,
    pub assumptions_json: Option<String>,
    pub uncertainties_json: Option<String>,
    pub backtrack_of_seq: Option<i64>,
    pub backtrack_reason: Option<String>,
    pub evidence: Vec<EvidenceLinkRow>,
    pub tool_run_ids: Vec<String>,
    pub created_at_ms: i64,
}

impl MoveEventRow {
    pub fn move_id(&self) -> String {
        format!("{}/{}", self.run_id, self.seq)
    }
}

#[derive(Clone, Debug)]
pub struct EvidenceLinkRow {
    pub evidence_id: String,
    pub role: EvidenceRole,
    pub note: Option<String>,
}
