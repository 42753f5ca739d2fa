//! Sources — broker-side bindings of exposed objects.
//!
//! A `Source` ties one local object (plus an optional adapter supplying extra
//! members) to its [`ApiMap`] and tracks which connections listen to it. It
//! never owns connections; listeners are connection ids the broker resolves.

pub mod registry;

pub use registry::SourceRegistry;

use crate::object::{ApiMap, ObjectHandle, ObjectKey, PropertyWrite};
use crate::protocol::{CallKind, Packet, Variant};
use crate::types::{ConnectionId, Error, ObjectName, Result};

/// A connection subscribed to one Source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Listener {
    pub connection: ConnectionId,
    /// Peer wants full introspection metadata rather than a fixed schema.
    pub dynamic: bool,
}

/// What an invocation produced.
#[derive(Debug, Clone, PartialEq)]
pub enum InvokeOutcome {
    /// Method return value (`Variant::Invalid` for void).
    Returned(Variant),
    /// Property write result.
    Written(PropertyWrite),
}

/// A property change ready to fan out.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub packet: Packet,
    pub listeners: Vec<ConnectionId>,
}

/// Broker-side binding of one exposed object.
#[derive(Debug)]
pub struct Source {
    object: ObjectHandle,
    adapter: Option<ObjectHandle>,
    api: ApiMap,
    listeners: Vec<Listener>,
}

impl Source {
    /// Bind `object` to `api`. Maps with adapter members need an adapter.
    pub fn new(object: ObjectHandle, api: ApiMap, adapter: Option<ObjectHandle>) -> Result<Self> {
        if adapter.is_none() && api.has_adapter_members() {
            return Err(Error::validation(format!(
                "{}: API map has adapter members but no adapter object",
                api.name()
            )));
        }
        Ok(Self {
            object,
            adapter,
            api,
            listeners: Vec::new(),
        })
    }

    pub fn name(&self) -> &ObjectName {
        self.api.name()
    }

    pub fn api(&self) -> &ApiMap {
        &self.api
    }

    pub fn object(&self) -> &ObjectHandle {
        &self.object
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::of(&self.object)
    }

    /// Subscribe `connection`. Returns `false` if it was already listening, in
    /// which case only the dynamic flag is refreshed.
    pub fn add_listener(&mut self, connection: ConnectionId, dynamic: bool) -> bool {
        if let Some(existing) = self.listeners.iter_mut().find(|l| l.connection == connection) {
            existing.dynamic = dynamic;
            return false;
        }
        self.listeners.push(Listener {
            connection,
            dynamic,
        });
        true
    }

    /// Unsubscribe `connection` (no-op if absent). Returns the remaining count.
    pub fn remove_listener(&mut self, connection: ConnectionId) -> usize {
        self.listeners.retain(|l| l.connection != connection);
        self.listeners.len()
    }

    pub fn has_listener(&self, connection: ConnectionId) -> bool {
        self.listeners.iter().any(|l| l.connection == connection)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn listeners(&self) -> &[Listener] {
        &self.listeners
    }

    /// Drop every listener reference, returning who was listening.
    pub fn release_listeners(&mut self) -> Vec<ConnectionId> {
        self.listeners.drain(..).map(|l| l.connection).collect()
    }

    /// Run a resolved call against the primary object or the adapter.
    pub fn invoke(
        &self,
        call: CallKind,
        adapter_member: bool,
        resolved_index: usize,
        args: &[Variant],
    ) -> Result<InvokeOutcome> {
        let target = if adapter_member {
            self.adapter
                .as_ref()
                .ok_or_else(|| Error::invocation(format!("{}: no adapter object", self.name())))?
        } else {
            &self.object
        };

        match call {
            CallKind::InvokeMethod => target.call(resolved_index, args).map(InvokeOutcome::Returned),
            CallKind::WriteProperty => {
                let value = args.first().cloned().ok_or_else(|| {
                    Error::invocation(format!("{}: property write without a value", self.name()))
                })?;
                target
                    .write_property(resolved_index, value)
                    .map(InvokeOutcome::Written)
            }
        }
    }

    /// Read a property by wire index.
    pub fn read_property(&self, wire_index: i32) -> Result<Variant> {
        let member = self.api.property(wire_index).ok_or_else(|| {
            Error::invalid_index(format!("property {} of {}", wire_index, self.name()))
        })?;
        let target = match (self.api.is_adapter_property(wire_index), &self.adapter) {
            (true, Some(adapter)) => adapter,
            (true, None) => {
                return Err(Error::invocation(format!("{}: no adapter object", self.name())))
            }
            (false, _) => &self.object,
        };
        target.read_property(member.impl_index)
    }

    /// Publish a property change to every listener.
    pub fn notify_changed(&self, wire_index: i32, value: Variant) -> Result<Notification> {
        let ty = self.api.property_type(wire_index).ok_or_else(|| {
            Error::invalid_index(format!("property {} of {}", wire_index, self.name()))
        })?;
        let label = value.type_name();
        let value = ty.coerce(value).ok_or_else(|| {
            Error::validation(format!(
                "{}: property {} is {}, got {}",
                self.name(),
                wire_index,
                ty,
                label
            ))
        })?;
        Ok(Notification {
            packet: Packet::property_notification(self.name().as_str(), wire_index, value),
            listeners: self.listeners.iter().map(|l| l.connection).collect(),
        })
    }
}
