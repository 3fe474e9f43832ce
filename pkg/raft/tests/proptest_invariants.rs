//! Randomized exploration of event orderings, checking the universal
//! safety invariants hold no matter which queued event fires next.
//! `Simulator::check_invariants` (called on every step) does the actual
//! assertion; a panic inside a step surfaces as a proptest failure with a
//! shrunk, reproducible event-choice sequence.

use proptest::prelude::*;

use raft::simulator::Simulator;

fn run_with_choices(node_count: u64, timeouts: &[u8], picks: &[u8]) {
    let ids: Vec<u64> = (1..=node_count).collect();
    let mut sim = Simulator::new(&ids);

    for &t in timeouts {
        let id = ids[(t as usize) % ids.len()];
        sim.election_timeout(id).unwrap();
    }

    let mut pick_iter = picks.iter().cycle();
    for _ in 0..500 {
        let pick = *pick_iter.next().unwrap();
        let advanced = sim.step_with(|len| (pick as usize) % len).unwrap();
        if !advanced {
            break;
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn invariants_hold_under_arbitrary_delivery_order(
        timeouts in prop::collection::vec(0u8..5, 0..4),
        picks in prop::collection::vec(0u8..32, 1..64),
    ) {
        run_with_choices(5, &timeouts, &picks);
    }

    #[test]
    fn invariants_hold_with_partitions_interleaved(
        timeouts in prop::collection::vec(0u8..5, 1..4),
        picks in prop::collection::vec(0u8..32, 1..64),
        partition_at in 0u8..5,
    ) {
        let ids: Vec<u64> = (1..=5).collect();
        let mut sim = Simulator::new(&ids);

        for &t in &timeouts {
            sim.election_timeout(ids[(t as usize) % ids.len()]).unwrap();
        }

        sim.partition(ids[(partition_at as usize) % ids.len()]);

        let mut pick_iter = picks.iter().cycle();
        for _ in 0..300 {
            let pick = *pick_iter.next().unwrap();
            if !sim.step_with(|len| (pick as usize) % len).unwrap() {
                break;
            }
        }

        sim.heal(ids[(partition_at as usize) % ids.len()]);
        sim.run_to_quiescence(200).unwrap();
    }
}
