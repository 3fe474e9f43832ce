//! Loads a [`raft::config::ClusterConfig`] from a TOML file. TOML tables
//! require string keys, so the on-disk shape maps id-as-string to address
//! and is translated into the core's `ServerId`-keyed map on load.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use raft::config::ClusterConfig;
use raft::protos::ServerId;

#[derive(Debug, Deserialize)]
struct FileConfig {
    servers: HashMap<String, String>,
    heartbeat_interval_ms: Option<u64>,
    election_timeout_min_ms: Option<u64>,
    election_timeout_max_ms: Option<u64>,
}

/// Per-field command-line overrides for the timing knobs, applied on top
/// of whatever the TOML file says. `None` leaves the file's value (or its
/// default) untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct CliOverrides {
    pub heartbeat_interval_ms: Option<u64>,
    pub election_timeout_min_ms: Option<u64>,
    pub election_timeout_max_ms: Option<u64>,
}

pub fn load(path: impl AsRef<Path>, self_id: ServerId, overrides: CliOverrides) -> Result<ClusterConfig> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path).with_context(|| format!("reading config file {}", path.display()))?;
    let file: FileConfig = toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))?;

    let servers: HashMap<ServerId, String> = file
        .servers
        .into_iter()
        .map(|(id, addr)| -> Result<(ServerId, String)> { Ok((id.parse().with_context(|| format!("server id {id:?} is not a valid u64"))?, addr)) })
        .collect::<Result<_>>()?;

    anyhow::ensure!(servers.contains_key(&self_id), "config has no entry for self_id {self_id}");

    let mut config = ClusterConfig::new(self_id, servers);
    if let Some(ms) = file.heartbeat_interval_ms {
        config.heartbeat_interval = Duration::from_millis(ms);
    }
    if let Some(ms) = file.election_timeout_min_ms {
        config.election_timeout_min = Duration::from_millis(ms);
    }
    if let Some(ms) = file.election_timeout_max_ms {
        config.election_timeout_max = Duration::from_millis(ms);
    }

    if let Some(ms) = overrides.heartbeat_interval_ms {
        config.heartbeat_interval = Duration::from_millis(ms);
    }
    if let Some(ms) = overrides.election_timeout_min_ms {
        config.election_timeout_min = Duration::from_millis(ms);
    }
    if let Some(ms) = overrides.election_timeout_max_ms {
        config.election_timeout_max = Duration::from_millis(ms);
    }

    Ok(config)
}
