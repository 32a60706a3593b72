#![forbid(unsafe_code)]

/// Canonical pointer to a fragment of source material. Unique on the
/// (source_type, source_id, fragment_id) triple within a workspace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EvidenceRefRow {
    pub id: String,
    pub source_type: String,
    pub source_id: String,
    pub fragment_id: String,
    pub created_at_ms: i64,
}
