//! End-to-end cluster scenarios, driven through the public `Simulator`
//! rather than through `ConsensusModule` internals.

use raft::simulator::Simulator;

#[test]
fn figure_8_safety_never_commits_a_prior_term_entry_by_count_alone() {
    // Five-node cluster. Leader 1 replicates one entry to server 2 only,
    // then a new leader is elected without ever having seen that entry,
    // overwrites it, and only then does the old entry's replica count
    // reach a majority via further replication of *new* entries -- the
    // leader must still never commit purely on the strength of an
    // out-of-date term's replica count.
    let mut sim = Simulator::new(&[1, 2, 3, 4, 5]);

    sim.election_timeout(1).unwrap();
    sim.run_to_quiescence(100).unwrap();
    assert!(sim.node(1).is_leader());

    sim.partition(3);
    sim.partition(4);
    sim.partition(5);
    let (term_a, index_a) = sim.client_append(1, b"a").unwrap();
    sim.run_to_quiescence(100).unwrap();
    assert_eq!(sim.node(1).commit_index(), -1, "a two-of-five replica count must not commit");

    sim.partition(1);
    sim.partition(2);
    sim.heal(3);
    sim.heal(4);
    sim.heal(5);

    sim.election_timeout(3).unwrap();
    sim.run_to_quiescence(100).unwrap();
    assert!(sim.node(3).is_leader());
    assert_ne!(sim.node(3).current_term(), term_a);

    let (_, index_b) = sim.client_append(3, b"b").unwrap();
    sim.run_to_quiescence(100).unwrap();

    assert_eq!(sim.node(3).commit_index(), index_b);
    assert_eq!(index_a, index_b, "the new leader's entry overwrote the old one at the same slot");
    assert_eq!(sim.node(3).log().get(index_b).unwrap().command.as_ref(), b"b");
}

#[test]
fn election_with_fresher_log_wins_even_against_a_higher_term_candidate() {
    let mut sim = Simulator::new(&[1, 2, 3]);
    sim.election_timeout(1).unwrap();
    sim.run_to_quiescence(100).unwrap();
    assert!(sim.node(1).is_leader());

    sim.client_append(1, b"x").unwrap();
    sim.run_to_quiescence(100).unwrap();
    assert_eq!(sim.node(1).commit_index(), 0);

    // Server 3 never saw the append (simulate by partitioning before the
    // append propagated -- here we just assert its log is behind and that
    // it cannot win an election against the up-to-date pair even once it
    // starts one at a higher term.
    sim.partition(3);
    sim.election_timeout(3).unwrap();
    sim.election_timeout(3).unwrap();
    sim.heal(3);
    sim.run_to_quiescence(100).unwrap();

    assert!(!sim.node(3).is_leader(), "a candidate with a stale log must not win an election");
}

#[test]
fn heartbeats_prevent_spurious_elections_in_a_stable_cluster() {
    let mut sim = Simulator::new(&[1, 2, 3]);
    sim.election_timeout(1).unwrap();
    sim.run_to_quiescence(100).unwrap();
    assert!(sim.node(1).is_leader());
    let term = sim.node(1).current_term();

    for _ in 0..5 {
        sim.heartbeat_timeout(1).unwrap();
        sim.run_to_quiescence(100).unwrap();
    }

    assert_eq!(sim.node(1).current_term(), term, "heartbeats must hold off followers' election timeouts");
    assert!(sim.node(1).is_leader());
}

#[test]
fn duplicated_append_entries_response_is_idempotent() {
    let mut sim = Simulator::new(&[1, 2, 3]);
    sim.election_timeout(1).unwrap();
    sim.run_to_quiescence(100).unwrap();

    sim.client_append(1, b"once").unwrap();
    // Deliver one message, then duplicate the next queued one before it's
    // drained -- models a network that delivers a packet twice.
    sim.step().unwrap();
    sim.duplicate_next();
    sim.run_to_quiescence(200).unwrap();

    assert_eq!(sim.node(1).commit_index(), 0);
    assert_eq!(sim.node(1).log().len(), 1);
}
