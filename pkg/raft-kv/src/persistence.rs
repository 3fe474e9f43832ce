//! File-based `Persistence`: one file per node, rewritten wholesale and
//! atomically (temp file + rename) on every save. Simpler to reason about
//! than an append-only log at this scale, per the design notes.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use raft::errors::{RaftError, Result};
use raft::log::Log;
use raft::persistence::Persistence;
use raft::state::Metadata;

#[derive(Serialize, Deserialize)]
struct OnDisk {
    current_term: i64,
    voted_for: Option<u64>,
    entries: Vec<raft::protos::LogEntry>,
}

pub struct FilePersistence {
    path: PathBuf,
}

impl FilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FilePersistence { path: path.into() }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut tmp = self.path.clone();
        tmp.set_extension("tmp");
        tmp
    }
}

impl Persistence for FilePersistence {
    fn save(&mut self, meta: &Metadata, log: &Log) -> Result<()> {
        let on_disk = OnDisk {
            current_term: meta.current_term,
            voted_for: meta.voted_for,
            entries: log.entries().to_vec(),
        };

        let tmp = self.tmp_path();
        write_atomically(&tmp, &self.path, &on_disk).map_err(|err| RaftError::Persistence(err.to_string()))
    }

    fn load(&self) -> Option<(Metadata, Log)> {
        let bytes = fs::read(&self.path).ok()?;
        let on_disk: OnDisk = serde_json::from_slice(&bytes).ok()?;
        let meta = Metadata { current_term: on_disk.current_term, voted_for: on_disk.voted_for };
        let log = Log::from_entries(on_disk.entries);
        Some((meta, log))
    }
}

fn write_atomically(tmp: &Path, dst: &Path, value: &OnDisk) -> anyhow::Result<()> {
    let mut file = fs::File::create(tmp)?;
    let bytes = serde_json::to_vec(value)?;
    file.write_all(&bytes)?;
    file.sync_all()?;
    fs::rename(tmp, dst)?;
    Ok(())
}
