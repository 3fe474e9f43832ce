//! Static, load-time cluster configuration.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protos::ServerId;

/// Cluster membership and timing knobs. Static for the lifetime of a
/// `ConsensusModule` -- dynamic membership changes are an explicit
/// non-goal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub self_id: ServerId,

    /// Every server in the cluster, including `self_id`, mapped to its
    /// network address. The core only reads the key set (for cluster size
    /// and majority math); the address is consumed by the transport layer.
    pub servers: HashMap<ServerId, String>,

    #[serde(with = "duration_millis")]
    pub heartbeat_interval: Duration,

    #[serde(with = "duration_millis")]
    pub election_timeout_min: Duration,

    #[serde(with = "duration_millis")]
    pub election_timeout_max: Duration,
}

impl ClusterConfig {
    /// Raft's own commonly-cited defaults: 50ms heartbeats, elections
    /// randomized in [150, 300)ms.
    pub fn new(self_id: ServerId, servers: HashMap<ServerId, String>) -> Self {
        ClusterConfig {
            self_id,
            servers,
            heartbeat_interval: Duration::from_millis(50),
            election_timeout_min: Duration::from_millis(150),
            election_timeout_max: Duration::from_millis(300),
        }
    }

    pub fn peers(&self) -> impl Iterator<Item = ServerId> + '_ {
        self.servers.keys().copied().filter(move |id| *id != self.self_id)
    }

    pub fn cluster_size(&self) -> usize {
        self.servers.len()
    }

    pub fn majority(&self) -> usize {
        self.cluster_size() / 2 + 1
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}
