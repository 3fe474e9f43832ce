//! Persistent metadata and the follower/candidate/leader role state machine.
//!
//! Timers are entirely external to the core: the core never measures
//! elapsed wall-clock time itself. A follower tracks only whether it has
//! heard from the leader *since the last election-timeout tick*, via the
//! `heard_from_leader` flag -- the randomized timeout duration itself is
//! the driver's concern, not state the core needs to remember.

use std::collections::{HashMap, HashSet};

use crate::protos::{Index, ServerId, Term, NO_INDEX};

/// Persistent server state: must be durable before any RPC response that
/// depends on it is sent. The log itself lives alongside this in
/// `ConsensusModule`, not here, since it has its own append/truncate API.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    pub current_term: Term,
    pub voted_for: Option<ServerId>,
}

impl Metadata {
    pub fn new() -> Self {
        Metadata { current_term: 0, voted_for: None }
    }
}

#[derive(Debug, Clone)]
pub struct FollowerState {
    pub heard_from_leader: bool,
    pub last_leader_id: Option<ServerId>,
}

impl FollowerState {
    pub fn new() -> Self {
        FollowerState { heard_from_leader: false, last_leader_id: None }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CandidateState {
    pub votes_received: HashSet<ServerId>,
}

/// Leader's view of one follower's replication progress.
#[derive(Debug, Clone)]
pub struct ServerProgress {
    pub next_index: Index,
    pub match_index: Index,
    /// Whether an `AppendEntries` sent to this follower is still
    /// outstanding. Gates opportunistic replication sends so a slow
    /// follower never receives overlapping duplicate requests; a
    /// heartbeat tick resends regardless, since that is also this
    /// follower's retry mechanism for a request that was lost.
    pub request_pending: bool,
    /// The round stamped on the outstanding request, if any. A response
    /// only clears `request_pending` when its round matches this one, so
    /// a stale, late-arriving response can't be mistaken for an
    /// acknowledgment of a request sent after it.
    pub pending_round: Option<u64>,
}

impl ServerProgress {
    pub fn new(leader_last_index: Index) -> Self {
        ServerProgress {
            next_index: leader_last_index + 1,
            match_index: NO_INDEX,
            request_pending: false,
            pending_round: None,
        }
    }
}

#[derive(Debug)]
pub struct LeaderState {
    pub progress: HashMap<ServerId, ServerProgress>,
    /// Heartbeat round counter, bumped every time a heartbeat tick fires.
    /// Used to implement the `is_leader` read barrier: a pending read is
    /// satisfied once a majority has acked at or beyond the round it was
    /// registered at.
    pub heartbeat_round: u64,
    /// Highest acked heartbeat round per follower, used to evaluate pending
    /// read barriers.
    pub acked_round: HashMap<ServerId, u64>,
    pub pending_reads: Vec<PendingRead>,
}

impl LeaderState {
    pub fn new() -> Self {
        LeaderState {
            progress: HashMap::new(),
            heartbeat_round: 0,
            acked_round: HashMap::new(),
            pending_reads: Vec::new(),
        }
    }
}

pub struct PendingRead {
    pub barrier_round: u64,
    pub callback: Box<dyn FnOnce(bool) + Send>,
}

impl std::fmt::Debug for PendingRead {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRead").field("barrier_round", &self.barrier_round).finish()
    }
}

#[derive(Debug)]
pub enum Role {
    Follower(FollowerState),
    Candidate(CandidateState),
    Leader(LeaderState),
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Role::Follower(_) => "follower",
            Role::Candidate(_) => "candidate",
            Role::Leader(_) => "leader",
        }
    }

    pub fn is_leader(&self) -> bool {
        matches!(self, Role::Leader(_))
    }
}
