//! Wire types: identifiers, log entries, and the four RPC message shapes.
//!
//! Indices and terms use a signed sentinel convention directly (`-1` means
//! "none" / "before the log begins") rather than remapping to 1-based
//! indices, so the wire format matches the in-memory representation
//! exactly with no off-by-one translation at the boundary.

use serde::{Deserialize, Serialize};

/// Type used to uniquely identify each server in the cluster.
pub type ServerId = u64;

pub type Term = i64;

/// A log position. `-1` is the sentinel for "before the log begins".
pub type Index = i64;

pub const NO_TERM: Term = -1;
pub const NO_INDEX: Index = -1;

/// A single entry in the replicated log. Immutable once appended past the
/// tail of any server's log and observed by a later `AppendEntries`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub term: Term,
    pub command: bytes::Bytes,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVote {
    pub term: Term,
    pub candidate_id: ServerId,
    pub last_log_index: Index,
    pub last_log_term: Term,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteResponse {
    pub term: Term,
    pub voter_id: ServerId,
    pub granted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntries {
    pub term: Term,
    pub leader_id: ServerId,
    pub prev_index: Index,
    pub prev_term: Term,
    pub entries: Vec<LogEntry>,
    pub leader_commit: Index,
    /// The heartbeat round this request was sent under. Echoed back on the
    /// response so a leader can tell which round a reply actually
    /// acknowledges, even if it arrives late or out of order.
    pub round: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    pub term: Term,
    pub from: ServerId,
    pub success: bool,
    /// Highest index now known to be present in the replying server's log
    /// that matches the leader's log, when `success`.
    pub match_index: Index,
    /// Optional back-off hint used to speed up log repair on failure: the
    /// first index in the conflicting term on the follower's log. Purely an
    /// optimization -- see the Open Questions entry in the design notes.
    pub conflict_index: Option<Index>,
    /// Copied from the triggering `AppendEntries::round`.
    pub round: u64,
}

/// A tagged union of every message the core can send or receive. This is
/// what actually crosses the `Transport` boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    RequestVote(RequestVote),
    RequestVoteResponse(RequestVoteResponse),
    AppendEntries(AppendEntries),
    AppendEntriesResponse(AppendEntriesResponse),
}

impl Message {
    pub fn term(&self) -> Term {
        match self {
            Message::RequestVote(m) => m.term,
            Message::RequestVoteResponse(m) => m.term,
            Message::AppendEntries(m) => m.term,
            Message::AppendEntriesResponse(m) => m.term,
        }
    }
}

/// An outgoing message paired with its destination, as produced by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub to: ServerId,
    pub message: Message,
}
