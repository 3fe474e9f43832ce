//! Shared types between the `raft-server` and `raft-client` binaries, and
//! the parts of the server worth driving directly from an integration
//! test: the demo key-value command set, the wire framing helper, the
//! client-facing request/response envelope, cluster config loading, and
//! the `FilePersistence`/`TcpTransport` implementations.

pub mod config;
pub mod kv;
pub mod persistence;
pub mod protocol;
pub mod transport;
pub mod wire;
