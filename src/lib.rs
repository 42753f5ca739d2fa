//! # Remoting Core - Source-side Remote Object Broker
//!
//! Rust implementation of the host side of a remote-objects protocol:
//! - Exposing local objects under stable names with a wire-level API map
//! - Peer attach/detach tracking per exposed object
//! - Method invocation and property writes with optional replies
//! - Property change fan-out to every listening peer
//! - Registry-change broadcasts and host events
//! - Tokio TCP transport with length-prefixed framing
//!
//! ## Architecture
//!
//! The broker follows a single-actor model where `SourceIoBroker` owns all
//! mutable state:
//! ```text
//!                    ┌─────────────────────────────────┐
//!   TCP peers    →   │       SourceIoBroker actor      │
//!   (bytes)          │  ┌─────────┐ ┌─────────┐        │
//!                    │  │ Packet  │ │ Source  │        │
//!   Host code    →   │  │  Codec  │ │Registry │        │
//!   (BrokerHandle)   │  └─────────┘ └─────────┘        │
//!                    │  ┌─────────┐ ┌─────────┐        │
//!                    │  │ Conn-   │ │ Cleanup │        │
//!                    │  │ ections │ │ Policy  │        │
//!                    │  └─────────┘ └─────────┘        │
//!                    └─────────────────────────────────┘
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

// Re-export public API
pub mod broker;
pub mod ipc;
pub mod object;
pub mod protocol;
pub mod source;
pub mod types;

// Internal utilities
pub mod observability;

pub use broker::{BrokerEvent, SourceIoBroker};
pub use types::{Config, Error, Result};
