use std::{fmt, net::SocketAddr, sync::Arc};

use tokio::sync::mpsc;

/// A rendered, newline-terminated line waiting in a peer's outbound queue.
///
/// Shared so one broadcast is formatted once and cloned cheaply per peer.
pub type Line = Arc<str>;

/// Write side of a peer's outbound queue. Only the hub holds it once the peer
/// has joined, so dropping it is what closes the queue.
pub type Outbound = mpsc::Sender<Line>;

/// Read side of a peer's outbound queue, drained by the connection's sender.
pub type Inbox = mpsc::Receiver<Line>;

/// Creates a bounded outbound queue. A zero capacity is raised to one.
pub fn outbound_queue(capacity: usize) -> (Outbound, Inbox) {
    mpsc::channel(capacity.max(1))
}

/// Identifier of a connected peer, stable for the lifetime of its connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(Arc<str>);

impl PeerId {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<SocketAddr> for PeerId {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.to_string())
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

/// One connected client as handed to the hub on join.
#[derive(Debug)]
pub struct Peer {
    id: PeerId,
    outbound: Outbound,
}

impl Peer {
    pub fn new(id: PeerId, outbound: Outbound) -> Self {
        Self { id, outbound }
    }

    pub fn id(&self) -> &PeerId {
        &self.id
    }

    pub(crate) fn into_parts(self) -> (PeerId, Outbound) {
        (self.id, self.outbound)
    }
}
