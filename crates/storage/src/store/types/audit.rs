#![forbid(unsafe_code)]

use tl_core::model::ActorType;

#[derive(Clone, Debug)]
pub struct AuditRow {
    pub seq: i64,
    pub ts_ms: i64,
    pub event_type: String,
    pub actor_type: ActorType,
    pub actor_id: String,
    pub run_id: Option<String>,
    pub scope_key: Option<String>,
    pub tool_run_id: Option<String>,
    pub payload_json: String,
}

impl AuditRow {
    pub fn event_id(&self) -> String {
        format!("adt_{:016}", self.seq)
    }
}
