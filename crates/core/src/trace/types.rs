#![forbid(unsafe_code)]

/// Detail level of a projected trace graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TraceMode {
    Summary,
    Inspect,
    Forensic,
}

impl TraceMode {
    pub fn as_str(self) -> &'static str {
        match self {
            TraceMode::Summary => "summary",
            TraceMode::Inspect => "inspect",
            TraceMode::Forensic => "forensic",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim() {
            "summary" => Some(TraceMode::Summary),
            "inspect" => Some(TraceMode::Inspect),
            "forensic" => Some(TraceMode::Forensic),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceNode {
    pub id: String,
    pub kind: &'static str,
    pub label: Option<String>,
    pub props_json: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceEdge {
    pub from: String,
    pub rel: &'static str,
    pub to: String,
    pub props_json: Option<String>,
}

/// Derived, read-only view over the ledger. Nodes always precede edges when
/// the graph is assembled, so every edge endpoint is present in `nodes`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TraceGraph {
    pub nodes: Vec<TraceNode>,
    pub edges: Vec<TraceEdge>,
}

impl TraceGraph {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}

pub mod rels {
    pub const FOLLOWS: &str = "FOLLOWS";
    pub const PRODUCES: &str = "PRODUCES";
    pub const USED: &str = "USED";
    pub const CITES: &str = "CITES";
    pub const LOGGED_INPUT: &str = "LOGGED_INPUT";
    pub const LOGGED_OUTPUT: &str = "LOGGED_OUTPUT";
    pub const DECIDED_IN: &str = "DECIDED_IN";
    pub const SUPERSEDES: &str = "SUPERSEDES";
}
