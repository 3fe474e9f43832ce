//! A deterministic, single-threaded simulation harness for exercising the
//! consensus core under controlled message loss, delay, duplication and
//! partitions, with universal invariants asserted after every step.
//!
//! Unlike [`crate::transport::InMemoryNetwork`], which models a
//! best-effort but otherwise well-behaved network for ordinary
//! integration tests, `Simulator` is built for adversarial exploration: it
//! owns logical time, lets a test or a `proptest` strategy pick exactly
//! which queued event fires next, and can drop, duplicate or reorder any
//! message in flight.

use std::collections::{HashMap, VecDeque};

use crate::config::ClusterConfig;
use crate::consensus::{ConsensusModule, Tick};
use crate::errors::Result;
use crate::persistence::InMemoryPersistence;
use crate::protos::{Envelope, Index, Message, ServerId, Term};

/// One event waiting to fire. Carries enough information for a test to log
/// or filter the schedule without reaching into `Simulator` internals.
#[derive(Debug, Clone)]
pub enum Event {
    Deliver { from: ServerId, to: ServerId, message: Message },
    ElectionTimeout { server: ServerId },
    HeartbeatTimeout { server: ServerId },
}

/// Drives a fixed set of [`ConsensusModule`]s sharing no real clock or
/// network. Every public method either advances logical time by one step
/// or asserts something about the resulting state; there is no hidden
/// concurrency to race against.
pub struct Simulator {
    nodes: HashMap<ServerId, ConsensusModule<InMemoryPersistence>>,
    partitioned: std::collections::HashSet<ServerId>,
    queue: VecDeque<Event>,
    logical_time: u64,
}

impl Simulator {
    /// Builds a fresh cluster of `ids.len()` servers, all starting as
    /// followers with empty logs, sharing the same `heartbeat`/election
    /// timing configuration.
    pub fn new(ids: &[ServerId]) -> Self {
        let servers: HashMap<ServerId, String> = ids.iter().map(|&id| (id, format!("node-{id}"))).collect();

        let mut nodes = HashMap::new();
        for &id in ids {
            let config = ClusterConfig::new(id, servers.clone());
            nodes.insert(id, ConsensusModule::new(config, InMemoryPersistence::new()));
        }

        Simulator { nodes, partitioned: std::collections::HashSet::new(), queue: VecDeque::new(), logical_time: 0 }
    }

    pub fn logical_time(&self) -> u64 {
        self.logical_time
    }

    pub fn node(&self, id: ServerId) -> &ConsensusModule<InMemoryPersistence> {
        self.nodes.get(&id).expect("unknown server id")
    }

    pub fn ids(&self) -> Vec<ServerId> {
        let mut ids: Vec<_> = self.nodes.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Cuts `id` off from the network: in-flight and future sends to or
    /// from it are dropped until [`Self::heal`].
    pub fn partition(&mut self, id: ServerId) {
        self.partitioned.insert(id);
    }

    pub fn heal(&mut self, id: ServerId) {
        self.partitioned.remove(&id);
    }

    fn deliverable(&self, from: ServerId, to: ServerId) -> bool {
        !self.partitioned.contains(&from) && !self.partitioned.contains(&to)
    }

    /// Queues every envelope a `Tick` accumulated, subject to the current
    /// partition set, as `Deliver` events to be drained later.
    fn enqueue_tick(&mut self, from: ServerId, tick: Tick) {
        for Envelope { to, message } in tick.messages {
            if self.deliverable(from, to) {
                self.queue.push_back(Event::Deliver { from, to, message });
            }
        }
    }

    /// Fires an election timeout on `id`, queuing whatever it sends.
    pub fn election_timeout(&mut self, id: ServerId) -> Result<()> {
        self.logical_time += 1;
        let mut tick = Tick::empty();
        self.nodes.get_mut(&id).expect("unknown server id").on_election_timeout(&mut tick)?;
        self.enqueue_tick(id, tick);
        self.check_invariants();
        Ok(())
    }

    pub fn heartbeat_timeout(&mut self, id: ServerId) -> Result<()> {
        self.logical_time += 1;
        let mut tick = Tick::empty();
        self.nodes.get_mut(&id).expect("unknown server id").on_heartbeat_timeout(&mut tick)?;
        self.enqueue_tick(id, tick);
        self.check_invariants();
        Ok(())
    }

    /// Submits a client command to whichever server the caller believes is
    /// the leader; returns its `NotLeader` rejection untouched on failure.
    pub fn client_append(&mut self, id: ServerId, command: &'static [u8]) -> Result<(Term, Index)> {
        self.logical_time += 1;
        let mut tick = Tick::empty();
        let proposal = self
            .nodes
            .get_mut(&id)
            .expect("unknown server id")
            .client_append(bytes::Bytes::from_static(command), &mut tick)?;
        self.enqueue_tick(id, tick);
        self.check_invariants();
        Ok((proposal.term, proposal.index))
    }

    /// Pops and delivers the oldest queued event (FIFO). Returns `false`
    /// once the queue is empty.
    pub fn step(&mut self) -> Result<bool> {
        let Some(event) = self.queue.pop_front() else { return Ok(false) };
        self.apply_event(event)?;
        Ok(true)
    }

    /// Pops and delivers events in whatever order `pick` selects, given
    /// the current queue length -- the hook a `proptest` strategy uses to
    /// explore reorderings instead of always draining FIFO.
    pub fn step_with<F: FnOnce(usize) -> usize>(&mut self, pick: F) -> Result<bool> {
        if self.queue.is_empty() {
            return Ok(false);
        }
        let idx = pick(self.queue.len()).min(self.queue.len() - 1);
        let event = self.queue.remove(idx).expect("index was clamped to queue length");
        self.apply_event(event)?;
        Ok(true)
    }

    /// Re-queues a copy of the next message without removing the
    /// original, modeling a network that duplicates packets.
    pub fn duplicate_next(&mut self) {
        if let Some(event) = self.queue.front().cloned() {
            self.queue.push_back(event);
        }
    }

    fn apply_event(&mut self, event: Event) -> Result<()> {
        self.logical_time += 1;
        match event {
            Event::Deliver { from, to, message } => {
                if !self.deliverable(from, to) {
                    return Ok(());
                }
                let mut tick = Tick::empty();
                self.nodes.get_mut(&to).expect("unknown server id").handle_message(from, message, &mut tick)?;
                self.enqueue_tick(to, tick);
            }
            Event::ElectionTimeout { server } => {
                let mut tick = Tick::empty();
                self.nodes.get_mut(&server).expect("unknown server id").on_election_timeout(&mut tick)?;
                self.enqueue_tick(server, tick);
            }
            Event::HeartbeatTimeout { server } => {
                let mut tick = Tick::empty();
                self.nodes.get_mut(&server).expect("unknown server id").on_heartbeat_timeout(&mut tick)?;
                self.enqueue_tick(server, tick);
            }
        }
        self.check_invariants();
        Ok(())
    }

    /// Drains the queue completely, running every follow-on message to a
    /// fixpoint. Convenient in tests that just want a cluster to settle.
    pub fn run_to_quiescence(&mut self, max_steps: usize) -> Result<()> {
        for _ in 0..max_steps {
            if !self.step()? {
                return Ok(());
            }
        }
        Ok(())
    }

    /// At most one leader per term, checked across the whole cluster.
    /// Panics (rather than returning `Result`) because this is a test-only
    /// sanity check on the harness itself, not a condition the core can
    /// recover from.
    fn check_invariants(&self) {
        let mut leaders_by_term: HashMap<Term, Vec<ServerId>> = HashMap::new();
        for node in self.nodes.values() {
            if node.is_leader() {
                leaders_by_term.entry(node.current_term()).or_default().push(node.id());
            }
        }
        for (term, leaders) in &leaders_by_term {
            assert!(leaders.len() <= 1, "election safety violated: {} leaders in term {}: {:?}", leaders.len(), term, leaders);
        }

        // Log matching: any two logs that agree on the term at some index
        // agree on every entry up to and including it.
        let ids = self.ids();
        for i in 0..ids.len() {
            for j in (i + 1)..ids.len() {
                let a = self.nodes.get(&ids[i]).unwrap().log();
                let b = self.nodes.get(&ids[j]).unwrap().log();
                let upper = a.last_index().min(b.last_index());
                let mut k = upper;
                while k >= 0 {
                    if a.term_at(k) == b.term_at(k) {
                        for m in 0..=k {
                            assert_eq!(
                                a.get(m).map(|e| &e.command),
                                b.get(m).map(|e| &e.command),
                                "log matching property violated between servers {} and {} at index {}",
                                ids[i],
                                ids[j],
                                m
                            );
                        }
                        break;
                    }
                    k -= 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_candidate_wins_with_majority_of_three() {
        let mut sim = Simulator::new(&[1, 2, 3]);
        sim.election_timeout(1).unwrap();
        sim.run_to_quiescence(100).unwrap();

        assert!(sim.node(1).is_leader());
        assert_eq!(sim.node(2).role_name(), "follower");
        assert_eq!(sim.node(3).role_name(), "follower");
    }

    #[test]
    fn committed_entry_replicates_to_every_reachable_follower() {
        let mut sim = Simulator::new(&[1, 2, 3]);
        sim.election_timeout(1).unwrap();
        sim.run_to_quiescence(100).unwrap();

        let (_, index) = sim.client_append(1, b"set x=1").unwrap();
        sim.run_to_quiescence(100).unwrap();

        assert_eq!(sim.node(1).commit_index(), index);
    }

    #[test]
    fn partitioned_minority_cannot_elect_a_leader() {
        let mut sim = Simulator::new(&[1, 2, 3, 4, 5]);
        sim.election_timeout(1).unwrap();
        sim.run_to_quiescence(100).unwrap();
        assert!(sim.node(1).is_leader());

        sim.partition(4);
        sim.partition(5);
        sim.election_timeout(4).unwrap();
        sim.run_to_quiescence(100).unwrap();

        assert_eq!(sim.node(4).role_name(), "candidate");
        assert!(!sim.node(4).is_leader());
        assert!(sim.node(1).is_leader());
    }

    #[test]
    fn stale_leader_steps_down_after_partition_heals() {
        let mut sim = Simulator::new(&[1, 2, 3]);
        sim.election_timeout(1).unwrap();
        sim.run_to_quiescence(100).unwrap();
        assert!(sim.node(1).is_leader());

        sim.partition(1);
        sim.election_timeout(2).unwrap();
        sim.run_to_quiescence(100).unwrap();
        assert!(sim.node(2).is_leader());

        sim.heal(1);
        sim.heartbeat_timeout(2).unwrap();
        sim.run_to_quiescence(100).unwrap();

        assert!(!sim.node(1).is_leader());
        assert_eq!(sim.node(1).current_term(), sim.node(2).current_term());
    }
}
