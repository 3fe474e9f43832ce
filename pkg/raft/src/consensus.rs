//! The consensus core: the Raft event-step function recast here as a set
//! of entry points on `ConsensusModule` that each take a `&mut Tick`
//! outbox accumulator instead of returning `(state', outbox)` as a pair,
//! adapted to a signed 0-based index space and an external, flag-based
//! timer model.
//!
//! Every mutation to server state happens inside one of these entry
//! points, which run to completion without suspending. That determinism is
//! what makes the module directly usable from a deterministic simulator, a
//! `proptest` explorer, or a real socket-and-timer runtime, unchanged.

use std::collections::HashSet;

use log::{debug, info, warn};

use crate::config::ClusterConfig;
use crate::errors::{RaftError, Result};
use crate::log::Log;
use crate::persistence::Persistence;
use crate::protos::{
    AppendEntries, AppendEntriesResponse, Envelope, Index, LogEntry, Message, RequestVote,
    RequestVoteResponse, ServerId, Term, NO_INDEX,
};
use crate::state::{CandidateState, FollowerState, LeaderState, Metadata, PendingRead, Role, ServerProgress};

/// Everything an event step produced: outgoing messages, accumulated so a
/// single call can fan out to many peers (a broadcast vote request, a
/// round of heartbeats) before the driver hands them to a `Transport`.
#[derive(Debug, Default)]
pub struct Tick {
    pub messages: Vec<Envelope>,
}

impl Tick {
    pub fn empty() -> Self {
        Tick { messages: Vec::new() }
    }

    pub fn send(&mut self, to: ServerId, message: Message) {
        self.messages.push(Envelope { to, message });
    }
}

/// Where a proposed command landed, returned to the caller of `client_append`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Proposal {
    pub term: Term,
    pub index: Index,
}

pub struct ConsensusModule<P> {
    id: ServerId,
    config: ClusterConfig,
    meta: Metadata,
    log: Log,
    commit_index: Index,
    role: Role,
    persistence: P,
}

impl<P: Persistence> ConsensusModule<P> {
    /// Restores from whatever `persistence` has on disk, or starts clean.
    pub fn new(config: ClusterConfig, mut persistence: P) -> Self {
        let (meta, log) = persistence.load().unwrap_or_else(|| (Metadata::new(), Log::new()));
        let id = config.self_id;
        ConsensusModule {
            id,
            config,
            meta,
            log,
            commit_index: NO_INDEX,
            role: Role::Follower(FollowerState::new()),
            persistence,
        }
    }

    pub fn id(&self) -> ServerId {
        self.id
    }

    pub fn current_term(&self) -> Term {
        self.meta.current_term
    }

    pub fn role_name(&self) -> &'static str {
        self.role.name()
    }

    pub fn is_leader(&self) -> bool {
        self.role.is_leader()
    }

    pub fn commit_index(&self) -> Index {
        self.commit_index
    }

    pub fn log(&self) -> &Log {
        &self.log
    }

    /// Best-known leader, used to give clients a redirect hint. A follower
    /// that hasn't heard an `AppendEntries` this term falls back to whoever
    /// it most recently voted for -- a plausible leader-to-be even before
    /// that candidate's own heartbeats arrive.
    pub fn leader_hint(&self) -> Option<ServerId> {
        match &self.role {
            Role::Leader(_) => Some(self.id),
            Role::Follower(s) => s.last_leader_id.or(self.meta.voted_for),
            Role::Candidate(_) => None,
        }
    }

    fn persist(&mut self) -> Result<()> {
        self.persistence.save(&self.meta, &self.log)
    }

    // ---- universal rule -----------------------------------------------------

    /// Run on every received message before role-specific dispatch. If the
    /// observed term is newer, steps down to follower in that term.
    fn observe_term(&mut self, term: Term) -> Result<()> {
        if term > self.meta.current_term {
            info!("[{}] observed higher term {} (was {}); stepping down", self.id, term, self.meta.current_term);
            self.meta.current_term = term;
            self.meta.voted_for = None;
            self.persist()?;
            self.become_follower(None);
        }
        Ok(())
    }

    /// Steps down to follower, optionally recording who the new leader is.
    /// Any client reads the outgoing leader had promised are failed rather
    /// than silently dropped.
    fn become_follower(&mut self, leader: Option<ServerId>) {
        if let Role::Leader(mut state) = std::mem::replace(&mut self.role, Role::Follower(FollowerState::new())) {
            for pending in state.pending_reads.drain(..) {
                (pending.callback)(false);
            }
        }
        self.role = Role::Follower(FollowerState { heard_from_leader: leader.is_some(), last_leader_id: leader });
    }

    // ---- timers ---------------------------------------------------------

    /// Invoked by the driver when the randomized election interval expires.
    pub fn on_election_timeout(&mut self, tick: &mut Tick) -> Result<()> {
        match &mut self.role {
            Role::Follower(s) => {
                if s.heard_from_leader {
                    s.heard_from_leader = false;
                } else {
                    self.start_election(tick)?;
                }
            }
            Role::Candidate(_) => {
                self.start_election(tick)?;
            }
            Role::Leader(_) => {
                // Leaders don't run elections; a driver that never arms
                // this timer for a leader never calls this branch, but
                // treating it as a no-op keeps the step total regardless.
            }
        }
        Ok(())
    }

    /// Invoked by the driver at the fixed heartbeat interval. A no-op
    /// unless this server is currently the leader.
    pub fn on_heartbeat_timeout(&mut self, tick: &mut Tick) -> Result<()> {
        if let Role::Leader(s) = &mut self.role {
            s.heartbeat_round += 1;
            self.replicate_to_all(tick, true);
        }
        Ok(())
    }

    // ---- elections --------------------------------------------------------

    fn start_election(&mut self, tick: &mut Tick) -> Result<()> {
        self.meta.current_term += 1;
        self.meta.voted_for = Some(self.id);
        self.persist()?;

        let mut votes = HashSet::new();
        votes.insert(self.id);
        self.role = Role::Candidate(CandidateState { votes_received: votes });

        info!("[{}] starting election for term {}", self.id, self.meta.current_term);

        let req = RequestVote {
            term: self.meta.current_term,
            candidate_id: self.id,
            last_log_index: self.log.last_index(),
            last_log_term: self.log.last_term(),
        };

        for peer in self.config.peers() {
            tick.send(peer, Message::RequestVote(req.clone()));
        }

        // A single-node cluster wins its own election immediately: the
        // candidate already counted its own vote above, with no peers left
        // to hear from.
        if self.config.majority() <= 1 {
            self.become_leader(tick)?;
        }

        Ok(())
    }

    fn handle_request_vote(&mut self, req: RequestVote) -> Result<RequestVoteResponse> {
        let granted = self.try_grant_vote(&req);

        if granted {
            self.meta.voted_for = Some(req.candidate_id);
            self.persist()?;

            if let Role::Follower(s) = &mut self.role {
                s.heard_from_leader = true;
            }

            debug!("[{}] granted vote to {} for term {}", self.id, req.candidate_id, req.term);
        }

        Ok(RequestVoteResponse { term: self.meta.current_term, voter_id: self.id, granted })
    }

    fn try_grant_vote(&self, req: &RequestVote) -> bool {
        if req.term != self.meta.current_term {
            return false;
        }
        if let Some(voted_for) = self.meta.voted_for {
            if voted_for != req.candidate_id {
                return false;
            }
        }

        (req.last_log_term, req.last_log_index) >= (self.log.last_term(), self.log.last_index())
    }

    fn handle_request_vote_response(&mut self, resp: RequestVoteResponse, tick: &mut Tick) -> Result<()> {
        if resp.term != self.meta.current_term {
            return Ok(());
        }

        let should_become_leader = match &mut self.role {
            Role::Candidate(s) => {
                if resp.granted {
                    s.votes_received.insert(resp.voter_id);
                }
                s.votes_received.len() >= self.config.majority()
            }
            _ => false,
        };

        if should_become_leader {
            self.become_leader(tick)?;
        }

        Ok(())
    }

    fn become_leader(&mut self, tick: &mut Tick) -> Result<()> {
        let last_index = self.log.last_index();
        let mut state = LeaderState::new();
        for peer in self.config.peers() {
            state.progress.insert(peer, ServerProgress::new(last_index));
        }
        self.role = Role::Leader(state);

        info!("[{}] became leader for term {}", self.id, self.meta.current_term);

        // Assert authority immediately so followers and other candidates
        // stop their own elections without waiting a full heartbeat
        // interval.
        self.replicate_to_all(tick, true);
        Ok(())
    }

    // ---- replication ----------------------------------------------------

    /// Leader send policy: for every peer, send everything from
    /// `next_index[peer]` onward (possibly empty, i.e. a pure heartbeat).
    ///
    /// `force` bypasses the per-follower in-flight gate: a heartbeat tick
    /// always resends, since that is the mechanism that retries a request
    /// the follower never answered. An opportunistic send triggered by a
    /// fresh `client_append` passes `force = false` and skips any peer
    /// with a request already outstanding, so a slow follower never gets
    /// overlapping duplicate `AppendEntries`; the next heartbeat tick
    /// catches it up regardless.
    fn replicate_to_all(&mut self, tick: &mut Tick, force: bool) {
        let current_term = self.meta.current_term;
        let leader_commit = self.commit_index;
        let leader_id = self.id;
        let round = match &self.role {
            Role::Leader(s) => s.heartbeat_round,
            _ => return,
        };

        let peers: Vec<ServerId> = match &self.role {
            Role::Leader(s) => s.progress.keys().copied().collect(),
            _ => return,
        };

        for peer in peers {
            let progress = match &self.role {
                Role::Leader(s) => s.progress.get(&peer).expect("progress entry missing for configured peer").clone(),
                _ => return,
            };

            if !force && progress.request_pending {
                continue;
            }

            let prev_index = progress.next_index - 1;
            let prev_term = self.log.term_at(prev_index);
            let entries: Vec<LogEntry> = self.log.entries_after(prev_index).to_vec();

            let req = AppendEntries {
                term: current_term,
                leader_id,
                prev_index,
                prev_term,
                entries,
                leader_commit,
                round,
            };
            tick.send(peer, Message::AppendEntries(req));

            if let Role::Leader(s) = &mut self.role {
                if let Some(p) = s.progress.get_mut(&peer) {
                    p.request_pending = true;
                    p.pending_round = Some(round);
                }
            }
        }
    }

    fn handle_append_entries(&mut self, from: ServerId, req: AppendEntries) -> Result<AppendEntriesResponse> {
        let current_term = self.meta.current_term;

        if req.term < current_term {
            return Ok(AppendEntriesResponse {
                term: current_term,
                from: self.id,
                success: false,
                match_index: NO_INDEX,
                conflict_index: None,
                round: req.round,
            });
        }

        // Two leaders in the same term would be an invariant violation, not
        // a protocol case to handle -- `observe_term` plus the stale-term
        // rejection above guarantee this can't happen for a correct peer.
        if let Role::Leader(_) = &self.role {
            return Err(RaftError::Invariant(format!(
                "server {} saw AppendEntries from {} in its own leadership term {}",
                self.id, from, req.term
            )));
        }
        self.become_follower(Some(from));

        let ok = self.log.append_entries(req.prev_index, req.prev_term, &req.entries);
        if !ok {
            let conflict_index = self.log.last_index().min(req.prev_index - 1).max(NO_INDEX);
            return Ok(AppendEntriesResponse {
                term: current_term,
                from: self.id,
                success: false,
                match_index: NO_INDEX,
                conflict_index: Some(conflict_index),
                round: req.round,
            });
        }

        self.persist()?;

        let match_index = req.prev_index + req.entries.len() as Index;
        if req.leader_commit > self.commit_index {
            self.commit_index = req.leader_commit.min(match_index);
        }

        Ok(AppendEntriesResponse {
            term: current_term,
            from: self.id,
            success: true,
            match_index,
            conflict_index: None,
            round: req.round,
        })
    }

    fn handle_append_entries_response(&mut self, resp: AppendEntriesResponse) -> Result<()> {
        if resp.term != self.meta.current_term {
            return Ok(());
        }

        let Role::Leader(state) = &mut self.role else { return Ok(()) };

        // Only a successful round-trip counts toward the read-barrier
        // majority, and it's credited to the round the request actually
        // carried, not whatever round the leader happens to be on when
        // the (possibly late) response arrives.
        if resp.success {
            state.acked_round.insert(resp.from, resp.round);
        }

        if let Some(progress) = state.progress.get_mut(&resp.from) {
            if progress.pending_round == Some(resp.round) {
                progress.request_pending = false;
                progress.pending_round = None;
            }

            if resp.success {
                progress.match_index = progress.match_index.max(resp.match_index);
                progress.next_index = progress.match_index + 1;
            } else {
                progress.next_index = match resp.conflict_index {
                    Some(ci) => (ci + 1).max(0),
                    None => (progress.next_index - 1).max(0),
                };
            }
        }

        self.advance_commit_index();
        self.evaluate_pending_reads();
        Ok(())
    }

    /// Figure-8 safety: a leader may only advance `commit_index` to an
    /// index `N` when a majority (including itself) has replicated it
    /// *and* `log[N].term == current_term`.
    fn advance_commit_index(&mut self) {
        let current_term = self.meta.current_term;
        let last_index = self.log.last_index();
        let majority = self.config.majority();

        let Role::Leader(state) = &self.role else { return };

        let mut candidate = last_index;
        while candidate > self.commit_index {
            let term_at_candidate = self.log.term_at(candidate);
            if term_at_candidate < current_term {
                break; // terms only decrease walking backward; give up.
            }
            if term_at_candidate == current_term {
                let mut count = 1; // the leader itself.
                for progress in state.progress.values() {
                    if progress.match_index >= candidate {
                        count += 1;
                    }
                }
                if count >= majority {
                    self.commit_index = candidate;
                    return;
                }
            }
            candidate -= 1;
        }
    }

    // ---- client interaction -----------------------------------------------

    /// Appends `command` to the leader's log and immediately attempts
    /// replication. Returns `NotLeader` (with a redirect hint) otherwise.
    pub fn client_append(&mut self, command: bytes::Bytes, tick: &mut Tick) -> Result<Proposal> {
        if !self.role.is_leader() {
            return Err(RaftError::NotLeader { leader_hint: self.leader_hint() });
        }

        let term = self.meta.current_term;
        let prev_index = self.log.last_index();
        let prev_term = self.log.last_term();
        let entry = LogEntry { term, command };

        let appended = self.log.append_entries(prev_index, prev_term, &[entry]);
        debug_assert!(appended, "append to own log at its own tail must always succeed");

        let index = self.log.last_index();
        self.persist()?;

        self.replicate_to_all(tick, false);

        Ok(Proposal { term, index })
    }

    /// Registers `callback` to be invoked with `true` once a majority of
    /// peers have acknowledged a heartbeat round started at or after this
    /// call, or `false` immediately if not currently leader, or as soon as
    /// leadership is lost before that happens.
    pub fn confirm_leadership(&mut self, callback: Box<dyn FnOnce(bool) + Send>) {
        match &mut self.role {
            Role::Leader(state) => {
                let barrier_round = state.heartbeat_round + 1;
                state.pending_reads.push(PendingRead { barrier_round, callback });
            }
            _ => callback(false),
        }
    }

    fn evaluate_pending_reads(&mut self) {
        let majority = self.config.majority();
        let id = self.id;
        let Role::Leader(state) = &mut self.role else { return };

        let acked_round = state.acked_round.clone();
        let mut fired = Vec::new();
        let mut remaining = Vec::new();
        for pending in state.pending_reads.drain(..) {
            let acked = 1 + acked_round.iter().filter(|(peer, round)| **peer != id && **round >= pending.barrier_round).count();
            if acked >= majority {
                fired.push(pending.callback);
            } else {
                remaining.push(pending);
            }
        }
        state.pending_reads = remaining;

        for callback in fired {
            callback(true);
        }
    }

    // ---- message dispatch ---------------------------------------------------

    /// The single entry point for everything arriving over the transport.
    pub fn handle_message(&mut self, from: ServerId, message: Message, tick: &mut Tick) -> Result<()> {
        self.observe_term(message.term())?;

        if message.term() < self.meta.current_term {
            match message {
                Message::RequestVote(_) => {
                    tick.send(
                        from,
                        Message::RequestVoteResponse(RequestVoteResponse {
                            term: self.meta.current_term,
                            voter_id: self.id,
                            granted: false,
                        }),
                    );
                }
                Message::AppendEntries(req) => {
                    tick.send(
                        from,
                        Message::AppendEntriesResponse(AppendEntriesResponse {
                            term: self.meta.current_term,
                            from: self.id,
                            success: false,
                            match_index: NO_INDEX,
                            conflict_index: None,
                            round: req.round,
                        }),
                    );
                }
                // Stale responses carry no information; ignored silently.
                Message::RequestVoteResponse(_) | Message::AppendEntriesResponse(_) => {}
            }
            return Ok(());
        }

        match message {
            Message::RequestVote(req) => {
                let resp = self.handle_request_vote(req)?;
                tick.send(from, Message::RequestVoteResponse(resp));
            }
            Message::RequestVoteResponse(resp) => {
                warn_if_self_vote(self.id, from, "vote response");
                self.handle_request_vote_response(resp, tick)?;
            }
            Message::AppendEntries(req) => {
                let resp = self.handle_append_entries(from, req)?;
                tick.send(from, Message::AppendEntriesResponse(resp));
            }
            Message::AppendEntriesResponse(resp) => {
                self.handle_append_entries_response(resp)?;
            }
        }

        self.check_invariants()?;
        Ok(())
    }

    fn check_invariants(&self) -> Result<()> {
        if self.commit_index > self.log.last_index() {
            return Err(RaftError::Invariant(format!(
                "commit_index {} exceeds last log index {}",
                self.commit_index,
                self.log.last_index()
            )));
        }
        Ok(())
    }
}

fn warn_if_self_vote(id: ServerId, from: ServerId, what: &str) {
    if id == from {
        warn!("[{}] received a {} from itself; ignoring", id, what);
    }
}
