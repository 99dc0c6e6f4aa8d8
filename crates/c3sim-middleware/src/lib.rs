//! `c3sim-middleware` – topics and the client bridge.
//!
//! Routes data between the simulated robot and a remote client without caring
//! about its meaning.
//!
//! # Modules
//!
//! - [`topic`] – name-keyed, latest-value publish/subscribe topics with
//!   ordered subscriber callbacks.
//! - [`outbox`] – per-client mailbox holding the newest undelivered frame of
//!   each topic.
//! - [`bridge`] – rosbridge-style WebSocket server that publishes client
//!   commands onto topics and frames topic updates back to the single bound
//!   client.

pub mod bridge;
pub mod outbox;
pub mod topic;

pub use bridge::{BridgeServer, ClientLink, Connection, Delivery, InboundOutcome};
pub use topic::{Message, Topic, TopicRegistry};
