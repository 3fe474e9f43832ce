//! The client-facing envelope exchanged over the length-prefixed JSON
//! protocol: a `Command` in, a `ClientResponse` out, with `Redirect`
//! carrying the client address of whichever node the server currently
//! believes is leader.

use serde::{Deserialize, Serialize};

use crate::kv::CommandResult;

#[derive(Debug, Serialize, Deserialize)]
pub enum ClientResponse {
    Applied(CommandResult),
    /// Not the leader; `Some(addr)` if a leader hint is known.
    Redirect(Option<String>),
}
