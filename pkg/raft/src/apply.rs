//! The application binding: advances `last_applied` whenever it trails
//! `commit_index`, applying the newly committed range in order, exactly
//! once per index.

use bytes::Bytes;

use crate::consensus::ConsensusModule;
use crate::persistence::Persistence;
use crate::protos::Index;

/// The state machine the replicated log drives. Entirely external to the
/// core: the core only ever hands it opaque committed command bytes.
pub trait Application {
    fn apply(&mut self, command: &[u8]) -> Bytes;
}

/// Drives `last_applied` forward behind `commit_index`. Owned by whatever
/// is running the core (simulator or real runtime), not by the core itself.
pub struct ApplyDriver {
    last_applied: Index,
}

impl ApplyDriver {
    pub fn new() -> Self {
        ApplyDriver { last_applied: crate::protos::NO_INDEX }
    }

    pub fn last_applied(&self) -> Index {
        self.last_applied
    }

    /// Applies every not-yet-applied committed entry, in order, returning
    /// the results in case a caller wants to resolve client-facing promises.
    pub fn poll_apply<P: Persistence>(
        &mut self,
        module: &ConsensusModule<P>,
        app: &mut dyn Application,
    ) -> Vec<(Index, Bytes)> {
        let mut results = Vec::new();
        let commit_index = module.commit_index();

        while self.last_applied < commit_index {
            let next = self.last_applied + 1;
            let entry = module
                .log()
                .get(next)
                .expect("commit_index must never exceed len(log) - 1");
            let result = app.apply(&entry.command);
            results.push((next, result));
            self.last_applied = next;
        }

        results
    }
}

impl Default for ApplyDriver {
    fn default() -> Self {
        Self::new()
    }
}
