//! Host-facing events and protocol diagnostics.
//!
//! `BrokerEvent`s tell the host what the registry and the peer set are doing.
//! `Diagnostic`s are the non-fatal conditions the broker records while it keeps
//! serving; they go to one injected [`DiagnosticSink`].

use serde::Serialize;
use std::fmt;

use crate::protocol::{CallKind, PacketType};
use crate::types::ConnectionId;

/// Registry and peer events emitted to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BrokerEvent {
    RemoteObjectAdded { name: String, address: String },
    RemoteObjectRemoved { name: String, address: String },
    /// A peer that had reported its own address through the Registry object
    /// disconnected.
    ServerRemoved { address: String },
}

/// Whether a request wanted to attach to or detach from an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Subscription {
    Attach,
    Detach,
}

/// How loudly a diagnostic should be reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Warning,
    Error,
}

/// A recorded non-fatal condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// AddObject/RemoveObject for a name nobody exposes.
    NonExistentObject {
        connection: ConnectionId,
        name: String,
        request: Subscription,
    },
    /// RemoveObject from a connection that was not listening.
    ListenerNotPresent {
        connection: ConnectionId,
        name: String,
    },
    /// Invoke with a wire index the API map does not resolve.
    InvalidIndex {
        connection: ConnectionId,
        name: String,
        call: CallKind,
        index: i32,
    },
    /// Unknown packet type code, or a broker → peer packet sent by a peer.
    InvalidPacketType { connection: ConnectionId, code: u16 },
    /// Known packet type whose body did not parse.
    MalformedPacket {
        connection: ConnectionId,
        packet_type: PacketType,
        reason: String,
    },
    /// Framing could not continue; the connection is being closed.
    FramingFailed {
        connection: ConnectionId,
        reason: String,
    },
    /// The exposed object returned an error.
    InvocationFailed {
        connection: ConnectionId,
        name: String,
        call: CallKind,
        index: i32,
        /// `Error::diagnostic_code` of the object's error.
        error_code: &'static str,
        reason: String,
    },
    /// A method returned a value its declared type cannot hold.
    ReturnTypeMismatch {
        name: String,
        index: i32,
        expected: String,
        actual: String,
    },
    /// First Registry invoke did not carry a `(name, address)` location.
    BadRegistryLocation { connection: ConnectionId },
    /// enable_remoting for a non-dynamic name that is already exposed.
    DuplicateRegistration { name: String },
    /// enable_remoting for an object already exposed under another name.
    ObjectAlreadyExposed { name: String, existing: String },
    /// enable_remoting with an unusable API map or object.
    RegistrationRejected {
        name: String,
        error_code: &'static str,
        reason: String,
    },
    /// disable_remoting for an object that is not exposed.
    UnknownObject,
    /// Writing a frame to a connection failed.
    WriteFailed {
        connection: ConnectionId,
        reason: String,
    },
    /// A frame could not be encoded.
    EncodeFailed { reason: String },
}

impl Diagnostic {
    pub fn severity(&self) -> Severity {
        match self {
            Diagnostic::ListenerNotPresent { .. } => Severity::Debug,
            Diagnostic::FramingFailed { .. }
            | Diagnostic::WriteFailed { .. }
            | Diagnostic::EncodeFailed { .. } => Severity::Error,
            _ => Severity::Warning,
        }
    }

    /// Code of the underlying crate error, when the diagnostic wraps one.
    pub fn error_code(&self) -> Option<&'static str> {
        match self {
            Diagnostic::InvocationFailed { error_code, .. }
            | Diagnostic::RegistrationRejected { error_code, .. } => Some(*error_code),
            _ => None,
        }
    }

    /// Stable short code for structured logs.
    pub fn code(&self) -> &'static str {
        match self {
            Diagnostic::NonExistentObject { .. } => "non_existent_object",
            Diagnostic::ListenerNotPresent { .. } => "listener_not_present",
            Diagnostic::InvalidIndex { .. } => "invalid_index",
            Diagnostic::InvalidPacketType { .. } => "invalid_packet_type",
            Diagnostic::MalformedPacket { .. } => "malformed_packet",
            Diagnostic::FramingFailed { .. } => "framing_failed",
            Diagnostic::InvocationFailed { .. } => "invocation_failed",
            Diagnostic::ReturnTypeMismatch { .. } => "return_type_mismatch",
            Diagnostic::BadRegistryLocation { .. } => "bad_registry_location",
            Diagnostic::DuplicateRegistration { .. } => "duplicate_registration",
            Diagnostic::ObjectAlreadyExposed { .. } => "object_already_exposed",
            Diagnostic::RegistrationRejected { .. } => "registration_rejected",
            Diagnostic::UnknownObject => "unknown_object",
            Diagnostic::WriteFailed { .. } => "write_failed",
            Diagnostic::EncodeFailed { .. } => "encode_failed",
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::NonExistentObject {
                connection,
                name,
                request,
            } => {
                let verb = match request {
                    Subscription::Attach => "attach to",
                    Subscription::Detach => "detach from",
                };
                write!(f, "{}: request to {} non-existent object '{}'", connection, verb, name)
            }
            Diagnostic::ListenerNotPresent { connection, name } => {
                write!(f, "{}: not listening to '{}'", connection, name)
            }
            Diagnostic::InvalidIndex {
                connection,
                name,
                call,
                index,
            } => write!(
                f,
                "{}: invalid {:?} index {} which is out of bounds for '{}'",
                connection, call, index, name
            ),
            Diagnostic::InvalidPacketType { connection, code } => {
                write!(f, "{}: invalid packet type {}", connection, code)
            }
            Diagnostic::MalformedPacket {
                connection,
                packet_type,
                reason,
            } => write!(f, "{}: malformed {:?} packet: {}", connection, packet_type, reason),
            Diagnostic::FramingFailed { connection, reason } => {
                write!(f, "{}: framing failed, closing: {}", connection, reason)
            }
            Diagnostic::InvocationFailed {
                connection,
                name,
                call,
                index,
                reason,
                ..
            } => write!(
                f,
                "{}: {:?} {} on '{}' failed: {}",
                connection, call, index, name, reason
            ),
            Diagnostic::ReturnTypeMismatch {
                name,
                index,
                expected,
                actual,
            } => write!(
                f,
                "'{}' method {} returned {}, declared {}",
                name, index, actual, expected
            ),
            Diagnostic::BadRegistryLocation { connection } => {
                write!(f, "{}: Registry invoke without a source location", connection)
            }
            Diagnostic::DuplicateRegistration { name } => {
                write!(f, "tried to register '{}' twice", name)
            }
            Diagnostic::ObjectAlreadyExposed { name, existing } => write!(
                f,
                "cannot expose object as '{}': already exposed as '{}'",
                name, existing
            ),
            Diagnostic::RegistrationRejected { name, reason, .. } => {
                write!(f, "cannot expose '{}': {}", name, reason)
            }
            Diagnostic::UnknownObject => f.write_str("disable requested for an object that is not exposed"),
            Diagnostic::WriteFailed { connection, reason } => {
                write!(f, "{}: write failed: {}", connection, reason)
            }
            Diagnostic::EncodeFailed { reason } => write!(f, "encode failed: {}", reason),
        }
    }
}

/// Where the broker records diagnostics.
pub trait DiagnosticSink: Send + Sync + fmt::Debug {
    fn record(&self, diagnostic: &Diagnostic);
}

/// Emits each diagnostic as a `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn record(&self, diagnostic: &Diagnostic) {
        let code = diagnostic.code();
        let error_code = diagnostic.error_code();
        match diagnostic.severity() {
            Severity::Debug => tracing::debug!(code, error_code, "{}", diagnostic),
            Severity::Warning => tracing::warn!(code, error_code, "{}", diagnostic),
            Severity::Error => tracing::error!(code, error_code, "{}", diagnostic),
        }
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl DiagnosticSink for NoopSink {
    fn record(&self, _diagnostic: &Diagnostic) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_tagged() {
        let event = BrokerEvent::ServerRemoved {
            address: "tcp://10.0.0.2:9".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "server_removed");
        assert_eq!(json["address"], "tcp://10.0.0.2:9");
    }

    #[test]
    fn test_diagnostic_display_and_severity() {
        let d = Diagnostic::NonExistentObject {
            connection: ConnectionId::new(2),
            name: "Ghost".to_string(),
            request: Subscription::Attach,
        };
        assert_eq!(d.to_string(), "conn-2: request to attach to non-existent object 'Ghost'");
        assert_eq!(d.severity(), Severity::Warning);
        assert_eq!(d.code(), "non_existent_object");

        let w = Diagnostic::WriteFailed {
            connection: ConnectionId::new(2),
            reason: "closed".to_string(),
        };
        assert_eq!(w.severity(), Severity::Error);
    }

    #[test]
    fn test_wrapped_errors_keep_their_code() {
        let err = crate::types::Error::invocation("jammed");
        let d = Diagnostic::InvocationFailed {
            connection: ConnectionId::new(1),
            name: "Switch".to_string(),
            call: CallKind::InvokeMethod,
            index: 2,
            error_code: err.diagnostic_code(),
            reason: err.to_string(),
        };
        assert_eq!(d.error_code(), Some("ABORTED"));
        assert_eq!(d.to_string(), "conn-1: InvokeMethod 2 on 'Switch' failed: invocation failed: jammed");
        assert_eq!(Diagnostic::UnknownObject.error_code(), None);
        TracingSink.record(&d);
    }

    #[test]
    fn test_sinks_accept_everything() {
        TracingSink.record(&Diagnostic::UnknownObject);
        NoopSink.record(&Diagnostic::UnknownObject);
    }
}
