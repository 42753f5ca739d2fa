//! Tokio TCP transport for the broker.
//!
//! The broker itself is synchronous and transport-agnostic. This layer gives
//! it a task of its own ([`actor`]), a `PeerLink` that hands frames to a
//! per-connection writer ([`link`]), and a listening socket ([`server`]).

pub mod actor;
pub mod link;
pub mod server;

pub use actor::{spawn_broker, BrokerCommand, BrokerHandle};
pub use link::ChannelLink;
pub use server::RemotingServer;
