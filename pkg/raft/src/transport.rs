//! The transport abstraction: a best-effort, non-blocking, unordered
//! datagram layer. The core never calls this directly -- every event-step
//! entry point returns its outbox as plain data (`Vec<Envelope>`) and
//! whatever driver is running the core (simulator or real runtime) is
//! responsible for handing those envelopes to a `Transport` impl.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use crate::protos::{Message, ServerId};

/// External collaborator: delivery, framing and retries are someone else's
/// problem. `send` never blocks and never reports failure; `poll` never
/// blocks either.
pub trait Transport {
    fn send(&mut self, dst: ServerId, msg: Message);

    /// Returns the next available `(from, message)` pair, if any.
    fn poll(&mut self) -> Option<(ServerId, Message)>;

    fn enable(&mut self, id: ServerId);
    fn disable(&mut self, id: ServerId);
}

struct Inbox {
    queue: VecDeque<(ServerId, Message)>,
    disabled: HashSet<ServerId>,
}

/// A loopback, in-process `Transport` shared by every node in a single test
/// or demo process. Useful directly in integration tests that don't need
/// the fault-injecting `Simulator` driver -- e.g. spinning up a handful of
/// `ConsensusModule`s on real threads and letting them talk over channels.
#[derive(Clone)]
pub struct InMemoryNetwork {
    self_id: ServerId,
    inboxes: Arc<Mutex<HashMap<ServerId, Inbox>>>,
}

impl InMemoryNetwork {
    /// Builds one `InMemoryNetwork` handle per id in `ids`, all sharing the
    /// same underlying set of inboxes.
    pub fn cluster(ids: &[ServerId]) -> HashMap<ServerId, InMemoryNetwork> {
        let inboxes = Arc::new(Mutex::new(
            ids.iter()
                .map(|&id| (id, Inbox { queue: VecDeque::new(), disabled: HashSet::new() }))
                .collect::<HashMap<_, _>>(),
        ));

        ids.iter()
            .map(|&id| (id, InMemoryNetwork { self_id: id, inboxes: inboxes.clone() }))
            .collect()
    }
}

impl Transport for InMemoryNetwork {
    fn send(&mut self, dst: ServerId, msg: Message) {
        let mut inboxes = self.inboxes.lock().unwrap();
        let sender_disabled = inboxes.get(&self.self_id).map(|i| i.disabled.contains(&self.self_id)).unwrap_or(false);
        if sender_disabled {
            return;
        }
        if let Some(inbox) = inboxes.get_mut(&dst) {
            if inbox.disabled.contains(&dst) {
                return; // partitioned: silently dropped, per the transport contract.
            }
            inbox.queue.push_back((self.self_id, msg));
        }
    }

    fn poll(&mut self) -> Option<(ServerId, Message)> {
        let mut inboxes = self.inboxes.lock().unwrap();
        inboxes.get_mut(&self.self_id).and_then(|inbox| inbox.queue.pop_front())
    }

    fn enable(&mut self, id: ServerId) {
        let mut inboxes = self.inboxes.lock().unwrap();
        if let Some(inbox) = inboxes.get_mut(&id) {
            inbox.disabled.remove(&id);
        }
    }

    fn disable(&mut self, id: ServerId) {
        let mut inboxes = self.inboxes.lock().unwrap();
        if let Some(inbox) = inboxes.get_mut(&id) {
            inbox.disabled.insert(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protos::{RequestVote, NO_INDEX, NO_TERM};

    fn vote(term: i64, from: ServerId) -> Message {
        Message::RequestVote(RequestVote {
            term,
            candidate_id: from,
            last_log_index: NO_INDEX,
            last_log_term: NO_TERM,
        })
    }

    #[test]
    fn delivers_in_fifo_order_per_sender() {
        let mut net = InMemoryNetwork::cluster(&[1, 2]);
        let mut a = net.remove(&1).unwrap();
        let b = net.remove(&2).unwrap();

        a.send(2, vote(1, 1));
        a.send(2, vote(2, 1));

        let mut b = b;
        assert_eq!(b.poll().map(|(_, m)| m.term()), Some(1));
        assert_eq!(b.poll().map(|(_, m)| m.term()), Some(2));
        assert!(b.poll().is_none());
    }

    #[test]
    fn disabled_destination_drops_silently() {
        let mut net = InMemoryNetwork::cluster(&[1, 2]);
        let mut a = net.remove(&1).unwrap();
        let mut b = net.remove(&2).unwrap();

        b.disable(2);
        a.send(2, vote(1, 1));
        assert!(b.poll().is_none());

        b.enable(2);
        a.send(2, vote(1, 1));
        assert!(b.poll().is_some());
    }
}
