//! Source I/O broker — the orchestrator.
//!
//! The broker owns the source registry and the open-connection set. It decodes
//! each connection's byte stream into packets, dispatches them to the right
//! Source, writes replies, and broadcasts registry changes to every peer.
//!
//! All methods take `&mut self` and never block: the broker expects a single
//! thread of control (see [`crate::ipc`] for the actor that provides one).
//!
//! ```text
//!   Transport ──bytes──► on_connection_readable ──► PacketCodec::decode
//!                                                        │
//!              ┌─────────────────────────────────────────┘
//!              ▼
//!   AddObject / RemoveObject ──► Source listener set
//!   Invoke ──► ApiMap resolve ──► RemoteObject ──► InvokeReply ──► PeerLink
//! ```

pub mod cleanup;
pub mod connection;
pub mod events;

pub use cleanup::{
    CleanupAction, CloseWhenUnsubscribed, ListenerCleanupPolicy, ListenerRemoved,
    RetainConnections,
};
pub use connection::{Connection, PeerLink};
pub use events::{BrokerEvent, Diagnostic, DiagnosticSink, NoopSink, Severity, Subscription, TracingSink};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::object::{ApiMap, ObjectHandle, ObjectKey, PropertyWrite};
use crate::protocol::{CallKind, Decoded, Packet, PacketCodec, SourceLocation, TypeDesc, Variant};
use crate::source::{InvokeOutcome, Source, SourceRegistry};
use crate::types::{ConnectionId, Error, ObjectName, Result};

/// Statistics about broker traffic.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerStats {
    pub connections_accepted: u64,
    pub connections_closed: u64,
    pub packets_decoded: u64,
    pub invokes_dispatched: u64,
    pub replies_sent: u64,
    pub notifications_sent: u64,
    pub broadcasts_written: u64,
    pub write_failures: u64,
    pub diagnostics_recorded: u64,
}

/// The source-side I/O broker.
pub struct SourceIoBroker {
    address: String,
    codec: PacketCodec,
    registry: SourceRegistry,
    /// Keyed by id; ids grow with accept order, so iteration is accept order.
    connections: BTreeMap<ConnectionId, Connection>,
    event_subscribers: Vec<mpsc::UnboundedSender<BrokerEvent>>,
    diagnostics: Arc<dyn DiagnosticSink>,
    cleanup: Box<dyn ListenerCleanupPolicy + Send>,
    stats: BrokerStats,
}

impl fmt::Debug for SourceIoBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceIoBroker")
            .field("address", &self.address)
            .field("exposed", &self.registry.names())
            .field("connections", &self.connections.len())
            .field("stats", &self.stats)
            .finish()
    }
}

impl SourceIoBroker {
    /// Create a broker advertising `address` in registry events.
    pub fn new(address: impl Into<String>, codec: PacketCodec) -> Self {
        Self {
            address: address.into(),
            codec,
            registry: SourceRegistry::new(),
            connections: BTreeMap::new(),
            event_subscribers: Vec::new(),
            diagnostics: Arc::new(TracingSink),
            cleanup: Box::new(RetainConnections),
            stats: BrokerStats::default(),
        }
    }

    pub fn with_diagnostics(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.diagnostics = sink;
        self
    }

    pub fn with_cleanup_policy(mut self, policy: Box<dyn ListenerCleanupPolicy + Send>) -> Self {
        self.cleanup = policy;
        self
    }

    pub fn server_address(&self) -> &str {
        &self.address
    }

    pub fn codec(&self) -> &PacketCodec {
        &self.codec
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Expose `object` through `api`, optionally with an adapter supplying
    /// extra members.
    ///
    /// Fails if a non-dynamic map's name is already exposed, or if the object
    /// is already exposed under a different name. On success every open
    /// connection receives a one-name ObjectList.
    pub fn enable_remoting(
        &mut self,
        object: ObjectHandle,
        api: ApiMap,
        adapter: Option<ObjectHandle>,
    ) -> bool {
        let name = api.name().clone();

        if !api.is_dynamic() && self.registry.contains(name.as_str()) {
            self.record(Diagnostic::DuplicateRegistration {
                name: name.to_string(),
            });
            return false;
        }
        if let Some(existing) = self.registry.name_of(ObjectKey::of(&object)) {
            if existing != &name {
                let existing = existing.to_string();
                self.record(Diagnostic::ObjectAlreadyExposed {
                    name: name.to_string(),
                    existing,
                });
                return false;
            }
        }

        let mut source = match Source::new(object, api, adapter) {
            Ok(source) => source,
            Err(e) => {
                self.record(Diagnostic::RegistrationRejected {
                    name: name.to_string(),
                    error_code: e.diagnostic_code(),
                    reason: e.to_string(),
                });
                return false;
            }
        };

        // Dynamic re-registration: peers already attached keep listening.
        if let Some(previous) = self.registry.get(name.as_str()) {
            for listener in previous.listeners() {
                source.add_listener(listener.connection, listener.dynamic);
            }
            tracing::debug!("Replacing dynamic registration {}", name);
        }
        self.registry.insert(source);
        tracing::debug!("Registering {}", name);
        self.emit(BrokerEvent::RemoteObjectAdded {
            name: name.to_string(),
            address: self.address.clone(),
        });

        let packet = Packet::ObjectList {
            names: vec![name.to_string()],
        };
        let written = self.broadcast(&packet);
        if written > 0 {
            tracing::debug!(
                "Wrote new ObjectList packet for {} to {} connections",
                name,
                written
            );
        }
        true
    }

    /// Expose `object` under `name` using the object's own description.
    pub fn enable_remoting_with_name(&mut self, object: ObjectHandle, name: &str) -> bool {
        if self.registry.contains(name) {
            self.record(Diagnostic::DuplicateRegistration {
                name: name.to_string(),
            });
            return false;
        }
        let Some(description) = object.describe() else {
            let e = Error::validation("object does not describe itself");
            self.record(Diagnostic::RegistrationRejected {
                name: name.to_string(),
                error_code: e.diagnostic_code(),
                reason: e.to_string(),
            });
            return false;
        };
        match ApiMap::from_description(name, &description) {
            Ok(api) => self.enable_remoting(object, api, None),
            Err(e) => {
                self.record(Diagnostic::RegistrationRejected {
                    name: name.to_string(),
                    error_code: e.diagnostic_code(),
                    reason: e.to_string(),
                });
                false
            }
        }
    }

    /// Stop exposing `object`. Returns `false` if it was not exposed.
    pub fn disable_remoting(&mut self, object: &ObjectHandle) -> bool {
        match self.registry.remove_by_object(ObjectKey::of(object)) {
            Some(source) => {
                self.destroy_source(source);
                true
            }
            None => {
                self.record(Diagnostic::UnknownObject);
                false
            }
        }
    }

    fn destroy_source(&mut self, mut source: Source) {
        let name = source.name().to_string();
        let released = source.release_listeners();
        tracing::debug!("Unregistering {} ({} listeners released)", name, released.len());
        drop(source);
        self.emit(BrokerEvent::RemoteObjectRemoved {
            name,
            address: self.address.clone(),
        });
    }

    // =========================================================================
    // Connection lifecycle
    // =========================================================================

    /// Adopt a newly accepted connection and send it the full object list.
    pub fn on_connection_accepted(&mut self, id: ConnectionId, link: Box<dyn PeerLink>) {
        if self.connections.contains_key(&id) {
            tracing::warn!("Connection id {} already in use, refusing", id);
            let mut link = link;
            link.close();
            return;
        }

        let mut connection = Connection::new(id, link);
        self.stats.connections_accepted += 1;

        let names = self.registry.names();
        match self.codec.encode(&Packet::ObjectList {
            names: names.clone(),
        }) {
            Ok(frame) => {
                if let Err(e) = connection.write(frame) {
                    self.stats.write_failures += 1;
                    self.record(Diagnostic::WriteFailed {
                        connection: id,
                        reason: e.to_string(),
                    });
                }
            }
            Err(e) => self.record(Diagnostic::EncodeFailed {
                reason: e.to_string(),
            }),
        }
        tracing::debug!(
            "Accepted {} from {}; wrote ObjectList {:?}",
            id,
            connection.peer_address().unwrap_or_else(|| "unknown".to_string()),
            names
        );
        self.connections.insert(id, connection);
    }

    /// Feed bytes received on `id` and process every complete packet.
    ///
    /// A trailing partial packet stays buffered for the next call.
    pub fn on_connection_readable(&mut self, id: ConnectionId, bytes: &[u8]) {
        match self.connections.get_mut(&id) {
            Some(connection) => connection.read_buf.extend_from_slice(bytes),
            None => {
                tracing::debug!("Dropping {} bytes for unknown {}", bytes.len(), id);
                return;
            }
        }

        loop {
            let decoded = {
                let Some(connection) = self.connections.get_mut(&id) else {
                    return;
                };
                match self.codec.decode(&mut connection.read_buf) {
                    Ok(Some(decoded)) => decoded,
                    Ok(None) => break,
                    Err(e) => {
                        self.record(Diagnostic::FramingFailed {
                            connection: id,
                            reason: e.to_string(),
                        });
                        self.on_connection_disconnected(id);
                        return;
                    }
                }
            };
            self.stats.packets_decoded += 1;
            self.dispatch(id, decoded);
        }
    }

    /// Forget `id`: drop it from every listener set and the connection set.
    ///
    /// Safe to call more than once; later calls are no-ops.
    pub fn on_connection_disconnected(&mut self, id: ConnectionId) {
        let Some(mut connection) = self.connections.remove(&id) else {
            return;
        };
        tracing::debug!("Disconnected {}", id);

        let detached = self.registry.remove_listener_everywhere(id);
        if !detached.is_empty() {
            tracing::debug!("{} detached from {} objects", id, detached.len());
        }

        if let Some(address) = connection.registry_location.take() {
            self.emit(BrokerEvent::ServerRemoved { address });
        }
        connection.close();
        self.stats.connections_closed += 1;
    }

    /// Drop every Source and close every connection.
    pub fn shutdown(&mut self) {
        for source in self.registry.drain() {
            self.destroy_source(source);
        }
        let ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        for id in ids {
            self.on_connection_disconnected(id);
        }
    }

    // =========================================================================
    // Packet dispatch
    // =========================================================================

    fn dispatch(&mut self, id: ConnectionId, decoded: Decoded) {
        let packet = match decoded {
            Decoded::Packet(packet) => packet,
            Decoded::UnknownType(code) => {
                self.record(Diagnostic::InvalidPacketType {
                    connection: id,
                    code,
                });
                return;
            }
            Decoded::Malformed {
                packet_type,
                reason,
            } => {
                self.record(Diagnostic::MalformedPacket {
                    connection: id,
                    packet_type,
                    reason,
                });
                return;
            }
        };

        match packet {
            Packet::AddObject { name, dynamic } => self.handle_add_object(id, name, dynamic),
            Packet::RemoveObject { name } => self.handle_remove_object(id, name),
            Packet::Invoke {
                name,
                call,
                index,
                args,
                reply_id,
            } => self.handle_invoke(id, name, call, index, args, reply_id),
            other @ (Packet::ObjectList { .. } | Packet::InvokeReply { .. }) => {
                self.record(Diagnostic::InvalidPacketType {
                    connection: id,
                    code: other.packet_type().wire(),
                });
            }
        }
    }

    fn handle_add_object(&mut self, id: ConnectionId, name: String, dynamic: bool) {
        tracing::debug!("AddObject {} {} dynamic={}", id, name, dynamic);
        match self.registry.get_mut(&name) {
            Some(source) => {
                source.add_listener(id, dynamic);
            }
            None => self.record(Diagnostic::NonExistentObject {
                connection: id,
                name,
                request: Subscription::Attach,
            }),
        }
    }

    fn handle_remove_object(&mut self, id: ConnectionId, name: String) {
        tracing::debug!("RemoveObject {} {}", id, name);
        let remaining = match self.registry.get_mut(&name) {
            Some(source) if source.has_listener(id) => source.remove_listener(id),
            Some(_) => {
                self.record(Diagnostic::ListenerNotPresent {
                    connection: id,
                    name,
                });
                return;
            }
            None => {
                self.record(Diagnostic::NonExistentObject {
                    connection: id,
                    name,
                    request: Subscription::Detach,
                });
                return;
            }
        };

        let Ok(object) = ObjectName::from_string(name) else {
            return;
        };
        let removed = ListenerRemoved {
            connection: id,
            object,
            remaining_listeners: remaining,
            connection_subscriptions: self.registry.subscriptions_of(id),
        };
        if self.cleanup.on_listener_removed(&removed) == CleanupAction::Close {
            tracing::debug!("Cleanup policy closing {}", id);
            self.on_connection_disconnected(id);
        }
    }

    fn handle_invoke(
        &mut self,
        id: ConnectionId,
        name: String,
        call: CallKind,
        index: i32,
        args: Vec<Variant>,
        reply_id: i32,
    ) {
        if name == ObjectName::REGISTRY {
            self.capture_registry_location(id, &args);
        }

        let Some(source) = self.registry.get(&name) else {
            tracing::debug!("Dropping invoke for unregistered object {}", name);
            return;
        };

        let api = source.api();
        let (resolved, adapter_member, member) = match call {
            CallKind::InvokeMethod => (
                api.source_method_index(index),
                api.is_adapter_method(index),
                api.method(index),
            ),
            CallKind::WriteProperty => (
                api.source_property_index(index),
                api.is_adapter_property(index),
                api.property(index),
            ),
        };
        let (Some(resolved), Some(member)) = (resolved, member) else {
            self.record(Diagnostic::InvalidIndex {
                connection: id,
                name,
                call,
                index,
            });
            return;
        };

        tracing::debug!(
            "{} ({:?}) Invoke--> {} {}",
            if adapter_member { "Adapter" } else { "Source" },
            call,
            name,
            member.signature()
        );
        let declared = member.ty;
        let outcome = source.invoke(call, adapter_member, resolved, &args);
        self.stats.invokes_dispatched += 1;

        match outcome {
            Ok(InvokeOutcome::Returned(value)) => {
                let value = self.typed_return(&name, index, declared, value);
                if reply_id >= 0 {
                    self.send_reply(id, name, reply_id, value);
                }
            }
            Ok(InvokeOutcome::Written(PropertyWrite::Changed(value))) => {
                if let Err(e) = self.notify_property_changed(&name, index, value) {
                    tracing::warn!(code = e.diagnostic_code(), "Change notification for {} failed: {}", name, e);
                }
            }
            Ok(InvokeOutcome::Written(PropertyWrite::Unchanged)) => {}
            Err(e) => {
                self.record(Diagnostic::InvocationFailed {
                    connection: id,
                    name: name.clone(),
                    call,
                    index,
                    error_code: e.diagnostic_code(),
                    reason: e.to_string(),
                });
                if call == CallKind::InvokeMethod && reply_id >= 0 {
                    self.send_reply(id, name, reply_id, Variant::Invalid);
                }
            }
        }
    }

    /// Keep the first well-formed location; a malformed one leaves the slot open.
    fn capture_registry_location(&mut self, id: ConnectionId, args: &[Variant]) {
        let Some(connection) = self.connections.get_mut(&id) else {
            return;
        };
        if connection.registry_location.is_some() {
            return;
        }
        match args.first().and_then(SourceLocation::from_variant) {
            Some(location) => {
                tracing::debug!("{} reports {} at {}", id, location.name, location.address);
                connection.registry_location = Some(location.address);
            }
            None => self.record(Diagnostic::BadRegistryLocation { connection: id }),
        }
    }

    /// Shape a method result to its declared return type.
    fn typed_return(
        &mut self,
        name: &str,
        index: i32,
        declared: TypeDesc,
        value: Variant,
    ) -> Variant {
        if declared.is_void() {
            return Variant::Invalid;
        }
        let actual = value.type_name();
        match declared.coerce(value) {
            Some(value) => value,
            None => {
                self.record(Diagnostic::ReturnTypeMismatch {
                    name: name.to_string(),
                    index,
                    expected: declared.to_string(),
                    actual: actual.to_string(),
                });
                Variant::Invalid
            }
        }
    }

    fn send_reply(&mut self, id: ConnectionId, name: String, reply_id: i32, value: Variant) {
        let packet = Packet::InvokeReply {
            name,
            reply_id,
            value,
        };
        if let Some(frame) = self.encode(&packet) {
            if self.write_to(id, frame) {
                self.stats.replies_sent += 1;
            }
        }
    }

    // =========================================================================
    // Host-side publishing
    // =========================================================================

    /// Send a property change to every listener of `name`.
    ///
    /// Returns the number of listeners the notification was written to.
    pub fn notify_property_changed(&mut self, name: &str, wire_index: i32, value: Variant) -> Result<usize> {
        let source = self
            .registry
            .get(name)
            .ok_or_else(|| Error::not_found(format!("Object not exposed: {}", name)))?;
        let notification = source.notify_changed(wire_index, value)?;
        let frame = self.codec.encode(&notification.packet)?;

        let mut delivered = 0;
        for listener in notification.listeners {
            if self.write_to(listener, frame.clone()) {
                delivered += 1;
            }
        }
        self.stats.notifications_sent += delivered as u64;
        tracing::debug!(
            "Property {} of {} published to {} listeners",
            wire_index,
            name,
            delivered
        );
        Ok(delivered)
    }

    /// Snapshot a property through the Source.
    pub fn read_property(&self, name: &str, wire_index: i32) -> Result<Variant> {
        self.registry
            .get(name)
            .ok_or_else(|| Error::not_found(format!("Object not exposed: {}", name)))?
            .read_property(wire_index)
    }

    // =========================================================================
    // Events, writes, introspection
    // =========================================================================

    /// Receive registry and peer events.
    pub fn subscribe_events(&mut self) -> mpsc::UnboundedReceiver<BrokerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.event_subscribers.push(tx);
        rx
    }

    fn emit(&mut self, event: BrokerEvent) {
        // Closed receivers are pruned as we go
        self.event_subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn record(&mut self, diagnostic: Diagnostic) {
        self.stats.diagnostics_recorded += 1;
        self.diagnostics.record(&diagnostic);
    }

    fn encode(&mut self, packet: &Packet) -> Option<Bytes> {
        match self.codec.encode(packet) {
            Ok(frame) => Some(frame),
            Err(e) => {
                self.record(Diagnostic::EncodeFailed {
                    reason: e.to_string(),
                });
                None
            }
        }
    }

    fn write_to(&mut self, id: ConnectionId, frame: Bytes) -> bool {
        let Some(connection) = self.connections.get_mut(&id) else {
            return false;
        };
        match connection.write(frame) {
            Ok(()) => true,
            Err(e) => {
                self.stats.write_failures += 1;
                self.record(Diagnostic::WriteFailed {
                    connection: id,
                    reason: e.to_string(),
                });
                false
            }
        }
    }

    /// Write `packet` to every open connection; a failed write does not stop
    /// the rest. Returns the number of successful writes.
    fn broadcast(&mut self, packet: &Packet) -> usize {
        let Some(frame) = self.encode(packet) else {
            return 0;
        };
        let ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        let mut written = 0;
        for id in ids {
            if self.write_to(id, frame.clone()) {
                written += 1;
            }
        }
        self.stats.broadcasts_written += written as u64;
        written
    }

    pub fn is_exposed(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    pub fn exposed_names(&self) -> Vec<String> {
        self.registry.names()
    }

    pub fn listener_count(&self, name: &str) -> Option<usize> {
        self.registry.get(name).map(|s| s.listener_count())
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.connections.keys().copied().collect()
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn stats(&self) -> &BrokerStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = BrokerStats::default();
    }
}

impl Drop for SourceIoBroker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
