//! Rooms shared across processes through a Redis pub/sub relay.
//!
//! Every process keeps its own room membership and relays broadcasts to the
//! others over `PUBLISH prefix#uid` / `PSUBSCRIBE prefix#*`. Each module
//! focuses on one responsibility:
//!
//! - [`connection`] defines what a room member must be able to do.
//! - [`registry`] tracks which local connections are in which room.
//! - [`codec`] is the JSON envelope sent between processes.
//! - [`transport`] abstracts the pub/sub server (Redis or an in-process bus).
//! - [`relay`] owns the publish channel and the pattern subscription.
//! - [`adaptor`] ties them together: join, leave, send, and the listener that
//!   delivers other processes' broadcasts locally.
//! - [`host`] exposes the adaptor in the shape a socket server expects.
//! - [`node`], [`message`], [`cli`] and [`client`] make up the runnable
//!   TCP node and its terminal client.

pub mod adaptor;
pub mod cli;
pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod host;
pub mod message;
pub mod node;
pub mod registry;
pub mod relay;
pub mod transport;

pub use adaptor::Adaptor;
pub use config::RelayOptions;
pub use connection::{ChannelConnection, Connection};
pub use host::BroadcastAdaptor;
