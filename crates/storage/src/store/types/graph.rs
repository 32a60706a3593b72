#![forbid(unsafe_code)]

#[derive(Clone, Debug)]
pub struct NodeRow {
    pub id: String,
    pub node_type: String,
    pub props_json: Option<String>,
    pub canonical_fk: Option<String>,
    pub created_at_ms: i64,
}

#[derive(Clone, Debug)]
pub struct EdgeRow {
    pub id: String,
    pub src_id: String,
    pub dst_id: String,
    pub edge_type: String,
    pub props_json: Option<String>,
    pub evidence_id: Option<String>,
    pub tool_run_id: Option<String>,
    pub created_at_ms: i64,
}
