#![forbid(unsafe_code)]

#[derive(Clone, Debug)]
pub struct RunRow {
    pub id: String,
    pub profile: String,
    pub anchor_json: Option<String>,
    pub created_at_ms: i64,
}
