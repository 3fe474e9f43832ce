use crate::protos::ServerId;

/// Errors surfaced by the core outside of the regular protocol response path.
///
/// Protocol rejections (stale term, failed log continuity, vote denied) are
/// never represented here -- they are ordinary response messages. This type
/// only covers the two remaining error kinds from the design: invariant
/// violations (bugs, fatal) and persistence/transport faults (external,
/// fatal for persistence, silently tolerated for transport).
#[derive(Debug, thiserror::Error)]
pub enum RaftError {
    #[error("persistence failed: {0}")]
    Persistence(String),

    #[error("internal invariant violated: {0}")]
    Invariant(String),

    #[error("not the leader{}", .leader_hint.map(|id| format!(" (try {})", id)).unwrap_or_default())]
    NotLeader { leader_hint: Option<ServerId> },
}

pub type Result<T> = std::result::Result<T, RaftError>;
