//! Durable storage for a server's persistent state: `save` must complete
//! before any RPC response depending on the new value is sent. A failure
//! here is fatal, never a retryable protocol rejection.

use crate::errors::{RaftError, Result};
use crate::log::Log;
use crate::state::Metadata;

/// External collaborator responsible for durability of `current_term`,
/// `voted_for` and the log. The core calls this synchronously from inside
/// an event step and treats it as part of that step -- see the "Suspension
/// points" note in the concurrency model.
pub trait Persistence {
    fn save(&mut self, meta: &Metadata, log: &Log) -> Result<()>;

    fn load(&self) -> Option<(Metadata, Log)>;
}

/// A `Persistence` impl that keeps state only in memory. Used by the
/// simulator and by unit/integration tests; a restart in those contexts is
/// modeled by explicitly dropping and recreating the `ConsensusModule`
/// around the same `InMemoryPersistence`, so "survives restart" still means
/// something even without touching a filesystem.
#[derive(Default)]
pub struct InMemoryPersistence {
    saved: Option<(Metadata, Log)>,
    /// When set, the next `save` call fails -- used to exercise the fatal
    /// persistence-fault path in tests.
    pub fail_next: bool,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        InMemoryPersistence { saved: None, fail_next: false }
    }
}

impl Persistence for InMemoryPersistence {
    fn save(&mut self, meta: &Metadata, log: &Log) -> Result<()> {
        if self.fail_next {
            self.fail_next = false;
            return Err(RaftError::Persistence("simulated write failure".to_string()));
        }
        self.saved = Some((meta.clone(), log.clone()));
        Ok(())
    }

    fn load(&self) -> Option<(Metadata, Log)> {
        self.saved.clone()
    }
}
