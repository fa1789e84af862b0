//! The broadcast hub: one task that owns the peer registry.
//!
//! Every join, departure, and broadcast is an event on a single channel. The
//! hub task handles one event to completion before looking at the next, so
//! the registry is never shared and needs no lock. Callers talk to the task
//! through a cloneable [`HubHandle`].
//!
//! Delivery never waits on a peer: each line is offered to the peer's bounded
//! outbound queue with `try_send`, and a full queue is resolved by the
//! configured [`OverflowPolicy`].

use std::collections::{HashMap, hash_map::Entry};

use thiserror::Error;
use tokio::{
    sync::{
        mpsc::{self, error::TrySendError},
        oneshot,
    },
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    message::{Envelope, greeting},
    peer::{Line, Outbound, Peer, PeerId},
};

/// What the hub does when a peer's outbound queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OverflowPolicy {
    /// Drop the line for that peer only.
    #[default]
    Drop,
    /// Deregister the peer, closing its queue.
    Disconnect,
}

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Enqueue `"Hello, <id>\n"` for each peer as it joins.
    pub greeting: bool,
    pub overflow: OverflowPolicy,
    /// Capacity of the hub's own event queue. Submitters wait when it is full.
    pub event_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            greeting: true,
            overflow: OverflowPolicy::Drop,
            event_capacity: 1024,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    #[error("peer {0} is already registered")]
    AlreadyRegistered(PeerId),
    #[error("peer {0} is not registered")]
    NotRegistered(PeerId),
    #[error("hub is closed")]
    Closed,
}

enum HubEvent {
    Join {
        peer: Peer,
        respond_to: oneshot::Sender<Result<(), HubError>>,
    },
    Depart {
        id: PeerId,
        respond_to: oneshot::Sender<Result<(), HubError>>,
    },
    Message(Envelope),
    Peers {
        respond_to: oneshot::Sender<Vec<PeerId>>,
    },
    Shutdown {
        respond_to: oneshot::Sender<()>,
    },
}

/// Cloneable handle for sending events to a running hub.
#[derive(Clone)]
pub struct HubHandle {
    events: mpsc::Sender<HubEvent>,
}

impl HubHandle {
    /// Registers a peer. Resolves once the peer is eligible for broadcasts.
    pub async fn join(&self, peer: Peer) -> Result<(), HubError> {
        let (respond_to, response) = oneshot::channel();
        self.send(HubEvent::Join { peer, respond_to }).await?;
        response.await.map_err(|_| HubError::Closed)?
    }

    /// Deregisters a peer and closes its outbound queue.
    pub async fn depart(&self, id: &PeerId) -> Result<(), HubError> {
        let (respond_to, response) = oneshot::channel();
        self.send(HubEvent::Depart {
            id: id.clone(),
            respond_to,
        })
        .await?;
        response.await.map_err(|_| HubError::Closed)?
    }

    /// Queues `text` for broadcast as `"<from>: <text>\n"`.
    ///
    /// Returns once the event is queued; the broadcast happens in submission
    /// order. An unregistered `from` is broadcast all the same.
    pub async fn submit(&self, from: &PeerId, text: impl Into<String>) -> Result<(), HubError> {
        self.send(HubEvent::Message(Envelope::new(from.clone(), text)))
            .await
    }

    /// Snapshot of the registered peer ids, sorted.
    pub async fn peers(&self) -> Result<Vec<PeerId>, HubError> {
        let (respond_to, response) = oneshot::channel();
        self.send(HubEvent::Peers { respond_to }).await?;
        response.await.map_err(|_| HubError::Closed)
    }

    /// Closes every outbound queue, empties the registry, and stops the hub.
    pub async fn shutdown(&self) -> Result<(), HubError> {
        let (respond_to, response) = oneshot::channel();
        self.send(HubEvent::Shutdown { respond_to }).await?;
        response.await.map_err(|_| HubError::Closed)
    }

    async fn send(&self, event: HubEvent) -> Result<(), HubError> {
        self.events.send(event).await.map_err(|_| HubError::Closed)
    }
}

struct PeerSlot {
    outbound: Outbound,
    dropped: u64,
}

pub struct Hub {
    config: HubConfig,
    registry: HashMap<PeerId, PeerSlot>,
    events: mpsc::Receiver<HubEvent>,
}

impl Hub {
    /// Starts the hub task. It runs until [`HubHandle::shutdown`] or until
    /// every handle is dropped.
    pub fn spawn(config: HubConfig) -> (HubHandle, JoinHandle<()>) {
        let (hub, handle) = Self::new(config);
        let task = tokio::spawn(hub.run());
        (handle, task)
    }

    fn new(config: HubConfig) -> (Self, HubHandle) {
        let (events_tx, events_rx) = mpsc::channel(config.event_capacity.max(1));
        let hub = Self {
            config,
            registry: HashMap::new(),
            events: events_rx,
        };
        (hub, HubHandle { events: events_tx })
    }

    async fn run(mut self) {
        while let Some(event) = self.events.recv().await {
            if !self.handle_event(event) {
                break;
            }
        }
        self.close_all();
    }

    /// Returns `false` once shutdown was requested.
    fn handle_event(&mut self, event: HubEvent) -> bool {
        match event {
            HubEvent::Join { peer, respond_to } => {
                let _ = respond_to.send(self.join(peer));
            }
            HubEvent::Depart { id, respond_to } => {
                let _ = respond_to.send(self.depart(id));
            }
            HubEvent::Message(envelope) => self.broadcast(&envelope),
            HubEvent::Peers { respond_to } => {
                let _ = respond_to.send(self.peer_ids());
            }
            HubEvent::Shutdown { respond_to } => {
                self.events.close();
                self.close_all();
                let _ = respond_to.send(());
                return false;
            }
        }
        true
    }

    fn join(&mut self, peer: Peer) -> Result<(), HubError> {
        let (id, outbound) = peer.into_parts();
        match self.registry.entry(id) {
            Entry::Occupied(entry) => {
                warn!(peer = %entry.key(), "ignoring duplicate join");
                Err(HubError::AlreadyRegistered(entry.key().clone()))
            }
            Entry::Vacant(entry) => {
                let id = entry.key().clone();
                let slot = entry.insert(PeerSlot {
                    outbound,
                    dropped: 0,
                });
                if self.config.greeting {
                    if let Err(err) = slot.outbound.try_send(greeting(&id)) {
                        debug!(peer = %id, error = %err, "could not queue greeting");
                    }
                }
                info!(peer = %id, peers = self.registry.len(), "peer joined");
                Ok(())
            }
        }
    }

    fn depart(&mut self, id: PeerId) -> Result<(), HubError> {
        match self.registry.remove(&id) {
            Some(slot) => {
                info!(
                    peer = %id,
                    dropped = slot.dropped,
                    peers = self.registry.len(),
                    "peer departed"
                );
                Ok(())
            }
            None => {
                debug!(peer = %id, "departure for unregistered peer");
                Err(HubError::NotRegistered(id))
            }
        }
    }

    fn broadcast(&mut self, envelope: &Envelope) {
        if !self.registry.contains_key(envelope.from()) {
            debug!(peer = %envelope.from(), "broadcasting for unregistered peer");
        }

        let line = envelope.render();
        let overflow = self.config.overflow;
        let mut evicted = Vec::new();

        for (id, slot) in &mut self.registry {
            match slot.outbound.try_send(Line::clone(&line)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => match overflow {
                    OverflowPolicy::Drop => {
                        slot.dropped += 1;
                        warn!(
                            peer = %id,
                            dropped = slot.dropped,
                            "outbound queue full; dropping line"
                        );
                    }
                    OverflowPolicy::Disconnect => evicted.push(id.clone()),
                },
                // The peer's sender stopped after a write error; its receiver
                // still owns deregistration.
                Err(TrySendError::Closed(_)) => {
                    debug!(peer = %id, "outbound queue closed; discarding line");
                }
            }
        }

        for id in evicted {
            if self.registry.remove(&id).is_some() {
                warn!(
                    peer = %id,
                    peers = self.registry.len(),
                    "outbound queue full; disconnecting slow peer"
                );
            }
        }
    }

    fn peer_ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.registry.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn close_all(&mut self) {
        if self.registry.is_empty() {
            return;
        }
        info!(peers = self.registry.len(), "closing all outbound queues");
        self.registry.clear();
    }
}
