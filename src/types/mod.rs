//! Core types for the remoting broker.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: Strongly-typed identifiers (ObjectName, ConnectionId)
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Configuration structures for server, transport and logging

mod config;
mod errors;
mod ids;

pub use config::{
    Config, ObservabilityConfig, ServerConfig, TransportConfig, ENV_LISTEN_ADDR, ENV_LOG_FORMAT,
};
pub use errors::{Error, Result};
pub use ids::{ConnectionId, ObjectName};
