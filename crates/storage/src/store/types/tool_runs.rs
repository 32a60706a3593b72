#![forbid(unsafe_code)]

use tl_core::model::ToolRunStatus;

#[derive(Clone, Debug)]
pub struct ToolRunRow {
    pub id: String,
    pub tool_name: String,
    pub status: ToolRunStatus,
    pub inputs_json: String,
    pub outputs_json: Option<String>,
    pub confidence_hint: Option<f64>,
    pub uncertainty_note: Option<String>,
    pub started_at_ms: i64,
    pub ended_at_ms: Option<i64>,
}
