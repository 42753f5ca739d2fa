//! Protocol packets.

use serde::{Deserialize, Serialize};

use super::value::Variant;

/// `reply_id` value meaning "no reply requested".
pub const NO_REPLY: i32 = -1;

/// Packet type codes carried in the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum PacketType {
    ObjectList = 1,
    AddObject = 2,
    RemoveObject = 3,
    Invoke = 4,
    InvokeReply = 5,
}

impl PacketType {
    pub fn from_wire(code: u16) -> Option<Self> {
        match code {
            1 => Some(PacketType::ObjectList),
            2 => Some(PacketType::AddObject),
            3 => Some(PacketType::RemoveObject),
            4 => Some(PacketType::Invoke),
            5 => Some(PacketType::InvokeReply),
            _ => None,
        }
    }

    pub fn wire(self) -> u16 {
        self as u16
    }
}

/// What an `Invoke` packet asks the object to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    /// Call a method (or slot) through the API map.
    InvokeMethod,
    /// Write a property through the API map.
    WriteProperty,
}

impl CallKind {
    const WIRE_INVOKE_METHOD: u8 = 0;
    const WIRE_WRITE_PROPERTY: u8 = 2;

    pub fn from_wire(code: u8) -> Option<Self> {
        match code {
            Self::WIRE_INVOKE_METHOD => Some(CallKind::InvokeMethod),
            Self::WIRE_WRITE_PROPERTY => Some(CallKind::WriteProperty),
            _ => None,
        }
    }

    pub fn wire(self) -> u8 {
        match self {
            CallKind::InvokeMethod => Self::WIRE_INVOKE_METHOD,
            CallKind::WriteProperty => Self::WIRE_WRITE_PROPERTY,
        }
    }
}

/// One protocol packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Catalog of exposed names (full list on connect, one-name delta on enable).
    ObjectList { names: Vec<String> },
    /// Peer subscribes to an object.
    AddObject { name: String, dynamic: bool },
    /// Peer unsubscribes from an object.
    RemoveObject { name: String },
    /// Method call or property write; also used broker → peer for property
    /// change notifications.
    Invoke {
        name: String,
        call: CallKind,
        index: i32,
        args: Vec<Variant>,
        reply_id: i32,
    },
    /// Return value for an `Invoke` with `reply_id >= 0`.
    InvokeReply {
        name: String,
        reply_id: i32,
        value: Variant,
    },
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::ObjectList { .. } => PacketType::ObjectList,
            Packet::AddObject { .. } => PacketType::AddObject,
            Packet::RemoveObject { .. } => PacketType::RemoveObject,
            Packet::Invoke { .. } => PacketType::Invoke,
            Packet::InvokeReply { .. } => PacketType::InvokeReply,
        }
    }

    /// Target object name, if the packet addresses one.
    pub fn name(&self) -> Option<&str> {
        match self {
            Packet::ObjectList { .. } => None,
            Packet::AddObject { name, .. }
            | Packet::RemoveObject { name }
            | Packet::Invoke { name, .. }
            | Packet::InvokeReply { name, .. } => Some(name),
        }
    }

    /// Property change notification sent to listeners (never answered).
    pub fn property_notification(name: &str, index: i32, value: Variant) -> Self {
        Packet::Invoke {
            name: name.to_string(),
            call: CallKind::WriteProperty,
            index,
            args: vec![value],
            reply_id: NO_REPLY,
        }
    }
}

/// A peer's self-reported location, carried as the first argument of an
/// `Invoke` on the `Registry` object. The first well-formed one a connection
/// sends is kept; malformed ones are recorded and skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub name: String,
    pub address: String,
}

impl SourceLocation {
    /// Read a `[name, address]` pair (or a map with those keys).
    pub fn from_variant(value: &Variant) -> Option<Self> {
        match value {
            Variant::List(items) => match items.as_slice() {
                [Variant::String(name), Variant::String(address)] => Some(Self {
                    name: name.clone(),
                    address: address.clone(),
                }),
                _ => None,
            },
            Variant::Map(fields) => {
                let name = fields.get("name")?.as_str()?.to_string();
                let address = fields.get("address")?.as_str()?.to_string();
                Some(Self { name, address })
            }
            _ => None,
        }
    }

    pub fn to_variant(&self) -> Variant {
        Variant::List(vec![
            Variant::String(self.name.clone()),
            Variant::String(self.address.clone()),
        ])
    }
}
