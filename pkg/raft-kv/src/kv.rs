//! The demo state machine: an in-memory key-value store driven by
//! committed log entries, plus the `Command`/`Response` wire types shared
//! with the client binary. Purely a worked example of the `Application`
//! contract -- its durability and consistency semantics are not part of
//! the core.

use std::collections::HashMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use raft::apply::Application;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Command {
    Set { key: String, value: String },
    Get { key: String },
    Delete { key: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CommandResult {
    Ok,
    Value(Option<String>),
}

impl Command {
    pub fn encode(&self) -> Bytes {
        Bytes::from(serde_json::to_vec(self).expect("Command serialization never fails"))
    }

    pub fn decode(bytes: &[u8]) -> anyhow::Result<Command> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl CommandResult {
    pub fn encode(&self) -> Bytes {
        Bytes::from(serde_json::to_vec(self).expect("CommandResult serialization never fails"))
    }

    pub fn decode(bytes: &[u8]) -> anyhow::Result<CommandResult> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[derive(Default)]
pub struct KvStore {
    table: HashMap<String, String>,
}

impl KvStore {
    pub fn new() -> Self {
        KvStore::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.table.get(key).cloned()
    }
}

impl Application for KvStore {
    fn apply(&mut self, command: &[u8]) -> Bytes {
        let result = match Command::decode(command) {
            Ok(Command::Set { key, value }) => {
                self.table.insert(key, value);
                CommandResult::Ok
            }
            Ok(Command::Get { key }) => CommandResult::Value(self.table.get(&key).cloned()),
            Ok(Command::Delete { key }) => {
                self.table.remove(&key);
                CommandResult::Ok
            }
            Err(_) => CommandResult::Value(None),
        };
        result.encode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        let mut store = KvStore::new();
        store.apply(&Command::Set { key: "a".into(), value: "1".into() }.encode());
        let result = store.apply(&Command::Get { key: "a".into() }.encode());
        match CommandResult::decode(&result).unwrap() {
            CommandResult::Value(Some(v)) => assert_eq!(v, "1"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn delete_removes_the_key() {
        let mut store = KvStore::new();
        store.apply(&Command::Set { key: "a".into(), value: "1".into() }.encode());
        store.apply(&Command::Delete { key: "a".into() }.encode());
        let result = store.apply(&Command::Get { key: "a".into() }.encode());
        match CommandResult::decode(&result).unwrap() {
            CommandResult::Value(None) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
