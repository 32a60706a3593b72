#![forbid(unsafe_code)]

pub mod trace;

pub mod ids {
    #[derive(Clone, Debug, PartialEq, Eq, Hash)]
    pub struct WorkspaceId(String);

    impl WorkspaceId {
        pub fn as_str(&self) -> &str {
            &self.0
        }

        pub fn try_new(value: impl Into<String>) -> Result<Self, IdentifierError> {
            Ok(Self(canonical_identifier("workspace_id", value.into())?))
        }
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct IdentifierError {
        pub field: &'static str,
        pub reason: IdentifierErrorReason,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum IdentifierErrorReason {
        Empty,
        TooLong,
        InvalidFirstChar,
        InvalidChar,
    }

    impl IdentifierError {
        pub fn message(&self) -> String {
            let reason = match self.reason {
                IdentifierErrorReason::Empty => "must not be empty",
                IdentifierErrorReason::TooLong => "is too long (max 128)",
                IdentifierErrorReason::InvalidFirstChar => "must start with an ASCII letter or digit",
                IdentifierErrorReason::InvalidChar => {
                    "may only contain ASCII letters, digits and . _ / : -"
                }
            };
            format!("{} {reason}", self.field)
        }
    }

    /// Trims and validates an identifier used as a storage key.
    ///
    /// Identifiers end up in SQL keys and in deterministic trace-node ids, so the
    /// accepted alphabet is deliberately narrow.
    pub fn canonical_identifier(
        field: &'static str,
        value: String,
    ) -> Result<String, IdentifierError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(IdentifierError {
                field,
                reason: IdentifierErrorReason::Empty,
            });
        }
        if trimmed.len() > 128 {
            return Err(IdentifierError {
                field,
                reason: IdentifierErrorReason::TooLong,
            });
        }
        let mut chars = trimmed.chars();
        let first = chars.next().unwrap_or('\u{0}');
        if !first.is_ascii_alphanumeric() {
            return Err(IdentifierError {
                field,
                reason: IdentifierErrorReason::InvalidFirstChar,
            });
        }
        for ch in chars {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '/' | ':' | '-') {
                continue;
            }
            return Err(IdentifierError {
                field,
                reason: IdentifierErrorReason::InvalidChar,
            });
        }
        Ok(trimmed.to_string())
    }
}

pub mod model {
    /// The eight fixed reasoning move types. Ordering among them is a soft
    /// convention; the ledger never rejects out-of-order moves.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub enum MoveType {
        Framing,
        IssueSurfacing,
        EvidenceCuration,
        EvidenceInterpretation,
        ConsiderationsFormation,
        Weighing,
        Negotiation,
        Positioning,
    }

    impl MoveType {
        pub const ALL: [MoveType; 8] = [
            MoveType::Framing,
            MoveType::IssueSurfacing,
            MoveType::EvidenceCuration,
            MoveType::EvidenceInterpretation,
            MoveType::ConsiderationsFormation,
            MoveType::Weighing,
            MoveType::Negotiation,
            MoveType::Positioning,
        ];

        pub fn as_str(self) -> &'static str {
            match self {
                MoveType::Framing => "framing",
                MoveType::IssueSurfacing => "issue_surfacing",
                MoveType::EvidenceCuration => "evidence_curation",
                MoveType::EvidenceInterpretation => "evidence_interpretation",
                MoveType::ConsiderationsFormation => "considerations_formation",
                MoveType::Weighing => "weighing",
                MoveType::Negotiation => "negotiation",
                MoveType::Positioning => "positioning",
            }
        }

        pub fn from_str(value: &str) -> Option<Self> {
            let value = value.trim();
            Self::ALL.into_iter().find(|kind| kind.as_str() == value)
        }
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum MoveStatus {
        Pending,
        InProgress,
        Complete,
    }

    impl MoveStatus {
        pub fn as_str(self) -> &'static str {
            match self {
                MoveStatus::Pending => "pending",
                MoveStatus::InProgress => "in_progress",
                MoveStatus::Complete => "complete",
            }
        }

        pub fn from_str(value: &str) -> Option<Self> {
            match value.trim() {
                "pending" => Some(MoveStatus::Pending),
                "in_progress" => Some(MoveStatus::InProgress),
                "complete" => Some(MoveStatus::Complete),
                _ => None,
            }
        }
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum ToolRunStatus {
        Running,
        Succeeded,
        Failed,
        Abandoned,
    }

    impl ToolRunStatus {
        pub fn as_str(self) -> &'static str {
            match self {
                ToolRunStatus::Running => "running",
                ToolRunStatus::Succeeded => "succeeded",
                ToolRunStatus::Failed => "failed",
                ToolRunStatus::Abandoned => "abandoned",
            }
        }

        pub fn from_str(value: &str) -> Option<Self> {
            match value.trim() {
                "running" => Some(ToolRunStatus::Running),
                "succeeded" => Some(ToolRunStatus::Succeeded),
                "failed" => Some(ToolRunStatus::Failed),
                "abandoned" => Some(ToolRunStatus::Abandoned),
                _ => None,
            }
        }

        /// Terminal runs are immutable; only a running run may be completed or
        /// abandoned.
        pub fn is_terminal(self) -> bool {
            !matches!(self, ToolRunStatus::Running)
        }
    }

    /// Role of an evidence reference relative to the move that cites it.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum EvidenceRole {
        ReliedOn,
        Contradicted,
        Considered,
    }

    impl EvidenceRole {
        pub fn as_str(self) -> &'static str {
            match self {
                EvidenceRole::ReliedOn => "relied_on",
                EvidenceRole::Contradicted => "contradicted",
                EvidenceRole::Considered => "considered",
            }
        }

        pub fn from_str(value: &str) -> Option<Self> {
            match value.trim() {
                "relied_on" => Some(EvidenceRole::ReliedOn),
                "contradicted" => Some(EvidenceRole::Contradicted),
                "considered" => Some(EvidenceRole::Considered),
                _ => None,
            }
        }
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum ActorType {
        User,
        Agent,
        System,
    }

    impl ActorType {
        pub fn as_str(self) -> &'static str {
            match self {
                ActorType::User => "user",
                ActorType::Agent => "agent",
                ActorType::System => "system",
            }
        }

        pub fn from_str(value: &str) -> Option<Self> {
            match value.trim() {
                "user" => Some(ActorType::User),
                "agent" => Some(ActorType::Agent),
                "system" => Some(ActorType::System),
                _ => None,
            }
        }
    }

    /// Entity kinds that share the generic supersession pattern. The store
    /// treats the kind as part of the scope, never as behavior.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub enum VersionedKind {
        Document,
        Policy,
        PlanCycle,
        SiteFingerprint,
        RetrievalFrame,
        ScenarioTab,
    }

    impl VersionedKind {
        pub const ALL: [VersionedKind; 6] = [
            VersionedKind::Document,
            VersionedKind::Policy,
            VersionedKind::PlanCycle,
            VersionedKind::SiteFingerprint,
            VersionedKind::RetrievalFrame,
            VersionedKind::ScenarioTab,
        ];

        pub fn as_str(self) -> &'static str {
            match self {
                VersionedKind::Document => "document",
                VersionedKind::Policy => "policy",
                VersionedKind::PlanCycle => "plan_cycle",
                VersionedKind::SiteFingerprint => "site_fingerprint",
                VersionedKind::RetrievalFrame => "retrieval_frame",
                VersionedKind::ScenarioTab => "scenario_tab",
            }
        }

        pub fn from_str(value: &str) -> Option<Self> {
            let value = value.trim();
            Self::ALL.into_iter().find(|kind| kind.as_str() == value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ids::{IdentifierErrorReason, WorkspaceId, canonical_identifier};
    use super::model::{EvidenceRole, MoveType, ToolRunStatus, VersionedKind};

    #[test]
    fn workspace_id_validation() {
        assert_eq!(
            WorkspaceId::try_new("").unwrap_err().reason,
            IdentifierErrorReason::Empty
        );
        assert_eq!(
            WorkspaceId::try_new("  ").unwrap_err().reason,
            IdentifierErrorReason::Empty
        );
        assert_eq!(
            WorkspaceId::try_new("-leading").unwrap_err().reason,
            IdentifierErrorReason::InvalidFirstChar
        );
        assert_eq!(
            WorkspaceId::try_new("bad ws").unwrap_err().reason,
            IdentifierErrorReason::InvalidChar
        );
        assert!(WorkspaceId::try_new("planning/authority-a").is_ok());
    }

    #[test]
    fn canonical_identifier_trims() {
        let out = canonical_identifier("run_id", "  RUN-001  ".to_string()).expect("valid id");
        assert_eq!(out, "RUN-001");
    }

    #[test]
    fn move_type_round_trip_is_total() {
        for kind in MoveType::ALL {
            assert_eq!(MoveType::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(MoveType::from_str("brainstorming"), None);
    }

    #[test]
    fn tool_run_terminal_states() {
        assert!(!ToolRunStatus::Running.is_terminal());
        assert!(ToolRunStatus::Succeeded.is_terminal());
        assert!(ToolRunStatus::Failed.is_terminal());
        assert!(ToolRunStatus::Abandoned.is_terminal());
    }

    #[test]
    fn versioned_kind_labels_are_unique() {
        let mut labels = VersionedKind::ALL
            .into_iter()
            .map(|kind| kind.as_str())
            .collect::<Vec<_>>();
        labels.sort_unstable();
        labels.dedup();
        assert_eq!(labels.len(), VersionedKind::ALL.len());
    }

    #[test]
    fn evidence_role_parse() {
        assert_eq!(
            EvidenceRole::from_str(" relied_on "),
            Some(EvidenceRole::ReliedOn)
        );
        assert_eq!(EvidenceRole::from_str("supports"), None);
    }
}
