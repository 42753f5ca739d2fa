//! Wire values and the value codec.
//!
//! `Variant` is the self-describing value carried in argument lists, property
//! notifications and invoke replies. `TypeDesc` is the declared type from an
//! object's API map, used as the decode hint and to decide whether a method
//! returns anything at all.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::types::{Error, Result};

/// Largest integer magnitude an `f64` holds exactly.
const MAX_EXACT_F64_INT: u64 = 1 << 53;

/// A value on the wire.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Variant {
    /// No value (void returns, failed calls).
    #[default]
    Invalid,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<Variant>),
    Map(BTreeMap<String, Variant>),
}

impl Variant {
    pub fn is_valid(&self) -> bool {
        !matches!(self, Variant::Invalid)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Variant::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Variant::Int(i) => Some(*i),
            Variant::UInt(u) => i64::try_from(*u).ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Variant::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Variant]> {
        match self {
            Variant::List(items) => Some(items),
            _ => None,
        }
    }

    /// Short type label for logs.
    pub fn type_name(&self) -> &'static str {
        match self {
            Variant::Invalid => "invalid",
            Variant::Bool(_) => "bool",
            Variant::Int(_) => "int",
            Variant::UInt(_) => "uint",
            Variant::Double(_) => "double",
            Variant::String(_) => "string",
            Variant::Bytes(_) => "bytes",
            Variant::List(_) => "list",
            Variant::Map(_) => "map",
        }
    }
}

impl From<bool> for Variant {
    fn from(v: bool) -> Self {
        Variant::Bool(v)
    }
}

impl From<i64> for Variant {
    fn from(v: i64) -> Self {
        Variant::Int(v)
    }
}

impl From<f64> for Variant {
    fn from(v: f64) -> Self {
        Variant::Double(v)
    }
}

impl From<&str> for Variant {
    fn from(v: &str) -> Self {
        Variant::String(v.to_string())
    }
}

impl From<String> for Variant {
    fn from(v: String) -> Self {
        Variant::String(v)
    }
}

/// Declared type of a method return, parameter or property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeDesc {
    Void,
    Bool,
    Int,
    UInt,
    Double,
    String,
    Bytes,
    List,
    Map,
    /// Accepts any value unchanged.
    Any,
}

impl TypeDesc {
    /// Parse a signature type name such as `bool` or `string`.
    pub fn parse(name: &str) -> Option<Self> {
        let ty = match name.trim() {
            "" | "void" => TypeDesc::Void,
            "bool" => TypeDesc::Bool,
            "int" | "i32" | "i64" => TypeDesc::Int,
            "uint" | "u32" | "u64" => TypeDesc::UInt,
            "double" | "float" | "f32" | "f64" => TypeDesc::Double,
            "string" | "String" | "str" => TypeDesc::String,
            "bytes" | "Vec<u8>" => TypeDesc::Bytes,
            "list" => TypeDesc::List,
            "map" => TypeDesc::Map,
            "any" => TypeDesc::Any,
            _ => return None,
        };
        Some(ty)
    }

    /// In-memory size of a value of this type; zero means "no value".
    pub fn size_of(&self) -> usize {
        match self {
            TypeDesc::Void => 0,
            TypeDesc::Bool => std::mem::size_of::<bool>(),
            TypeDesc::Int => std::mem::size_of::<i64>(),
            TypeDesc::UInt => std::mem::size_of::<u64>(),
            TypeDesc::Double => std::mem::size_of::<f64>(),
            TypeDesc::String => std::mem::size_of::<String>(),
            TypeDesc::Bytes => std::mem::size_of::<Vec<u8>>(),
            TypeDesc::List => std::mem::size_of::<Vec<Variant>>(),
            TypeDesc::Map => std::mem::size_of::<BTreeMap<String, Variant>>(),
            TypeDesc::Any => std::mem::size_of::<Variant>(),
        }
    }

    pub fn is_void(&self) -> bool {
        self.size_of() == 0
    }

    /// Convert `value` to this type, widening numbers where lossless.
    ///
    /// Returns `None` when the value cannot represent this type.
    pub fn coerce(&self, value: Variant) -> Option<Variant> {
        match (self, value) {
            (TypeDesc::Void, _) => Some(Variant::Invalid),
            (TypeDesc::Any, v) => Some(v),
            (TypeDesc::Bool, v @ Variant::Bool(_)) => Some(v),
            (TypeDesc::Int, v @ Variant::Int(_)) => Some(v),
            (TypeDesc::Int, Variant::UInt(u)) => i64::try_from(u).ok().map(Variant::Int),
            (TypeDesc::UInt, v @ Variant::UInt(_)) => Some(v),
            (TypeDesc::UInt, Variant::Int(i)) => u64::try_from(i).ok().map(Variant::UInt),
            (TypeDesc::Double, v @ Variant::Double(_)) => Some(v),
            (TypeDesc::Double, Variant::Int(i)) if i.unsigned_abs() <= MAX_EXACT_F64_INT => {
                Some(Variant::Double(i as f64))
            }
            (TypeDesc::Double, Variant::UInt(u)) if u <= MAX_EXACT_F64_INT => Some(Variant::Double(u as f64)),
            (TypeDesc::String, v @ Variant::String(_)) => Some(v),
            (TypeDesc::Bytes, v @ Variant::Bytes(_)) => Some(v),
            (TypeDesc::List, v @ Variant::List(_)) => Some(v),
            (TypeDesc::Map, v @ Variant::Map(_)) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for TypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TypeDesc::Void => "void",
            TypeDesc::Bool => "bool",
            TypeDesc::Int => "int",
            TypeDesc::UInt => "uint",
            TypeDesc::Double => "double",
            TypeDesc::String => "string",
            TypeDesc::Bytes => "bytes",
            TypeDesc::List => "list",
            TypeDesc::Map => "map",
            TypeDesc::Any => "any",
        };
        f.write_str(name)
    }
}

/// Encodes values to and from their wire representation.
pub trait ValueCodec: Send + Sync + fmt::Debug {
    fn encode(&self, value: &Variant) -> Result<Vec<u8>>;

    fn decode(&self, bytes: &[u8], hint: TypeDesc) -> Result<Variant>;

    /// Encode an argument list as a single value blob.
    fn encode_args(&self, args: &[Variant]) -> Result<Vec<u8>> {
        self.encode(&Variant::List(args.to_vec()))
    }

    /// Decode an argument list blob.
    fn decode_args(&self, bytes: &[u8]) -> Result<Vec<Variant>> {
        match self.decode(bytes, TypeDesc::List)? {
            Variant::List(items) => Ok(items),
            other => Err(Error::codec(format!(
                "argument blob is {}, expected list",
                other.type_name()
            ))),
        }
    }
}

/// Default value codec: MessagePack via `rmp-serde`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MsgpackCodec;

impl ValueCodec for MsgpackCodec {
    fn encode(&self, value: &Variant) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(value)?)
    }

    fn decode(&self, bytes: &[u8], hint: TypeDesc) -> Result<Variant> {
        let value: Variant = rmp_serde::from_slice(bytes)?;
        let label = value.type_name();
        hint.coerce(value)
            .ok_or_else(|| Error::codec(format!("decoded {}, expected {}", label, hint)))
    }
}
