#![forbid(unsafe_code)]

use tl_core::model::VersionedKind;

#[derive(Clone, Debug)]
pub struct VersionRow {
    pub kind: VersionedKind,
    pub id: String,
    pub scope_key: String,
    pub record_json: String,
    pub is_current: bool,
    pub superseded_by: Option<String>,
    pub created_at_ms: i64,
}
