#![forbid(unsafe_code)]

//! Deterministic trace-node identifiers.
//!
//! Projection must be replayable: the same ledger state always yields the same
//! node ids, so ids are pure functions of (entity kind, entity id) and never
//! contain timestamps or random material.

pub const MOVE_KIND: &str = "move";
pub const OUTPUT_KIND: &str = "output";
pub const TOOL_KIND: &str = "tool";
pub const TOOL_INPUT_KIND: &str = "tool_input";
pub const TOOL_OUTPUT_KIND: &str = "tool_output";
pub const EVIDENCE_KIND: &str = "evidence";
pub const AUDIT_KIND: &str = "audit";
pub const VERSION_KIND: &str = "version";

pub fn move_node_id(run_id: &str, seq: i64) -> String {
    format!("{MOVE_KIND}:{run_id}/{seq}")
}

pub fn output_node_id(run_id: &str, seq: i64) -> String {
    format!("{OUTPUT_KIND}:{run_id}/{seq}")
}

pub fn tool_node_id(tool_run_id: &str) -> String {
    format!("{TOOL_KIND}:{tool_run_id}")
}

pub fn tool_input_node_id(tool_run_id: &str) -> String {
    format!("{TOOL_INPUT_KIND}:{tool_run_id}")
}

pub fn tool_output_node_id(tool_run_id: &str) -> String {
    format!("{TOOL_OUTPUT_KIND}:{tool_run_id}")
}

pub fn evidence_node_id(evidence_id: &str) -> String {
    format!("{EVIDENCE_KIND}:{evidence_id}")
}

pub fn audit_node_id(audit_seq: i64) -> String {
    format!("{AUDIT_KIND}:adt_{audit_seq:016}")
}

pub fn version_node_id(kind: &str, version_id: &str) -> String {
    format!("{VERSION_KIND}:{kind}/{version_id}")
}
