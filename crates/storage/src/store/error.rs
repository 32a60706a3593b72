#![forbid(unsafe_code)]

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Sql(rusqlite::Error),
    InvalidInput(&'static str),
    UnknownRun,
    UnknownMove,
    UnknownToolRun,
    UnknownNode,
    CurrentVersionConflict {
        kind: &'static str,
        scope_key: String,
        current_id: String,
    },
    DanglingReference {
        kind: &'static str,
        id: String,
    },
    ProvenanceMissing,
    ToolRunClosed {
        id: String,
        status: &'static str,
    },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "io: {err}"),
            Self::Sql(err) => write!(f, "sqlite: {err}"),
            Self::InvalidInput(message) => write!(f, "invalid input: {message}"),
            Self::UnknownRun => write!(f, "unknown run"),
            Self::UnknownMove => write!(f, "unknown move event"),
            Self::UnknownToolRun => write!(f, "unknown tool run"),
            Self::UnknownNode => write!(f, "unknown graph node"),
            Self::CurrentVersionConflict {
                kind,
                scope_key,
                current_id,
            } => write!(
                f,
                "current version conflict (kind={kind}, scope_key={scope_key}, current={current_id})"
            ),
            Self::DanglingReference { kind, id } => {
                write!(f, "dangling {kind} reference (id={id})")
            }
            Self::ProvenanceMissing => {
                write!(f, "edge must reference an evidence ref or a tool run")
            }
            Self::ToolRunClosed { id, status } => {
                write!(f, "tool run already closed (id={id}, status={status})")
            }
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql(value)
    }
}
