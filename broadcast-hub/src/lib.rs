//! Line-oriented TCP broadcast hub.
//!
//! Every line a connected peer sends is delivered to every connected peer,
//! the sender included, as `"<sender_id>: <text>\n"`. Each module focuses on
//! one concern:
//!
//! - [`peer`] defines peer identifiers and the bounded outbound queue each
//!   peer is served from.
//! - [`hub`] is the single task that owns the peer registry. Joins,
//!   departures, and broadcasts are events processed strictly one at a time,
//!   so the registry needs no lock.
//! - [`connection`] bridges one byte stream to the hub with a receiver that
//!   submits lines and a sender that drains the peer's queue.
//! - [`server`] accepts TCP connections, hands each to [`connection`], and
//!   coordinates shutdown.
//! - [`message`] holds the envelope type, wire formatting, and line framing.
//! - [`cli`] and [`client`] back the `broadcast_hub` binary.

pub mod cli;
pub mod client;
pub mod connection;
pub mod hub;
pub mod message;
pub mod peer;
pub mod server;

pub use hub::{Hub, HubConfig, HubError, HubHandle, OverflowPolicy};
pub use peer::{Peer, PeerId};
pub use server::Server;
