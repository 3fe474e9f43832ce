//! Exercises `FilePersistence` against a real filesystem, standing in for
//! a server process restart.

use bytes::Bytes;

use raft::log::Log;
use raft::persistence::Persistence;
use raft::protos::LogEntry;
use raft::state::Metadata;

use raft_kv::persistence::FilePersistence;

#[test]
fn state_survives_a_simulated_restart() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("node.state.json");

    let mut log = Log::new();
    assert!(log.append_entries(-1, -1, &[LogEntry { term: 1, command: Bytes::from_static(b"set a 1") }]));
    assert!(log.append_entries(0, 1, &[LogEntry { term: 2, command: Bytes::from_static(b"set b 2") }]));
    let meta = Metadata { current_term: 2, voted_for: Some(7) };

    let mut writer = FilePersistence::new(path.clone());
    writer.save(&meta, &log).expect("save succeeds");

    // A fresh handle over the same path models the process restarting.
    let reader = FilePersistence::new(path);
    let (loaded_meta, loaded_log) = reader.load().expect("state was persisted");

    assert_eq!(loaded_meta.current_term, meta.current_term);
    assert_eq!(loaded_meta.voted_for, meta.voted_for);
    assert_eq!(loaded_log.entries(), log.entries());
}

#[test]
fn load_with_no_file_on_disk_returns_none() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("never-written.state.json");

    let persistence = FilePersistence::new(path);
    assert!(persistence.load().is_none());
}
