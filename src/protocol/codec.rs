//! Frame codec for the remoting wire protocol.
//!
//! Frame format:
//! ```text
//! ┌──────────┬──────────┬────────────────────────┐
//! │ len (4B) │ type(2B) │   packet body          │
//! │ u32 BE   │ u16 BE   │                        │
//! └──────────┴──────────┴────────────────────────┘
//! ```
//! Length = sizeof(type field) + sizeof(body), NOT including the 4-byte prefix.
//!
//! Body fields: strings are `u32 BE length + UTF-8`, flags one byte, integers
//! `i32 BE`, value blobs `u32 BE length + ValueCodec bytes`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::sync::Arc;

use super::packet::{CallKind, Packet, PacketType};
use super::value::{MsgpackCodec, TypeDesc, ValueCodec};
use crate::types::{Error, Result};

/// Size of the length prefix.
pub const LEN_PREFIX_BYTES: usize = 4;
/// Size of the packet type field.
pub const TYPE_BYTES: usize = 2;

/// Outcome of decoding one complete frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Packet(Packet),
    /// Well-framed, but the type code is not one we know.
    UnknownType(u16),
    /// Known type whose body failed to parse. The frame has been consumed.
    Malformed {
        packet_type: PacketType,
        reason: String,
    },
}

/// Stateless packet encoder/decoder.
#[derive(Debug, Clone)]
pub struct PacketCodec {
    max_frame_bytes: u32,
    values: Arc<dyn ValueCodec>,
}

impl PacketCodec {
    pub fn new(max_frame_bytes: u32, values: Arc<dyn ValueCodec>) -> Self {
        Self {
            max_frame_bytes,
            values,
        }
    }

    /// Codec using MessagePack for value blobs.
    pub fn msgpack(max_frame_bytes: u32) -> Self {
        Self::new(max_frame_bytes, Arc::new(MsgpackCodec))
    }

    pub fn values(&self) -> &Arc<dyn ValueCodec> {
        &self.values
    }

    /// Encode one packet as a single self-contained frame.
    pub fn encode(&self, packet: &Packet) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_u32(0); // patched below
        buf.put_u16(packet.packet_type().wire());

        match packet {
            Packet::ObjectList { names } => {
                put_len(&mut buf, names.len())?;
                for name in names {
                    put_string(&mut buf, name)?;
                }
            }
            Packet::AddObject { name, dynamic } => {
                put_string(&mut buf, name)?;
                buf.put_u8(u8::from(*dynamic));
            }
            Packet::RemoveObject { name } => {
                put_string(&mut buf, name)?;
            }
            Packet::Invoke {
                name,
                call,
                index,
                args,
                reply_id,
            } => {
                put_string(&mut buf, name)?;
                buf.put_u8(call.wire());
                buf.put_i32(*index);
                let blob = self.values.encode_args(args)?;
                put_blob(&mut buf, &blob)?;
                buf.put_i32(*reply_id);
            }
            Packet::InvokeReply {
                name,
                reply_id,
                value,
            } => {
                put_string(&mut buf, name)?;
                buf.put_i32(*reply_id);
                let blob = self.values.encode(value)?;
                put_blob(&mut buf, &blob)?;
            }
        }

        let frame_len = buf.len() - LEN_PREFIX_BYTES;
        if frame_len > self.max_frame_bytes as usize {
            return Err(Error::protocol(format!(
                "Frame too large: {} bytes (max {})",
                frame_len, self.max_frame_bytes
            )));
        }
        let len_field = u32::try_from(frame_len)
            .map_err(|_| Error::protocol(format!("Frame too large: {} bytes", frame_len)))?;
        buf[..LEN_PREFIX_BYTES].copy_from_slice(&len_field.to_be_bytes());
        Ok(buf.freeze())
    }

    /// Try to take one frame off the front of `buf`.
    ///
    /// Returns `Ok(None)` when `buf` does not yet hold a complete frame; the
    /// bytes stay buffered. Returns `Err` only when the length prefix itself is
    /// unusable, after which the stream cannot be resynchronised.
    pub fn decode(&self, buf: &mut BytesMut) -> Result<Option<Decoded>> {
        if buf.len() < LEN_PREFIX_BYTES {
            return Ok(None);
        }

        let mut len_buf = [0u8; LEN_PREFIX_BYTES];
        len_buf.copy_from_slice(&buf[..LEN_PREFIX_BYTES]);
        let frame_len = u32::from_be_bytes(len_buf);
        if frame_len > self.max_frame_bytes {
            return Err(Error::protocol(format!(
                "Frame too large: {} bytes",
                frame_len
            )));
        }
        if (frame_len as usize) < TYPE_BYTES {
            return Err(Error::protocol("Frame too short: missing type field"));
        }

        let total = LEN_PREFIX_BYTES + frame_len as usize;
        if buf.len() < total {
            buf.reserve(total - buf.len());
            return Ok(None);
        }

        buf.advance(LEN_PREFIX_BYTES);
        let mut frame = buf.split_to(frame_len as usize).freeze();
        let code = frame.get_u16();

        let Some(packet_type) = PacketType::from_wire(code) else {
            return Ok(Some(Decoded::UnknownType(code)));
        };

        let decoded = match self.decode_body(packet_type, &mut frame) {
            Ok(_) if frame.has_remaining() => Decoded::Malformed {
                packet_type,
                reason: format!("{} trailing bytes", frame.remaining()),
            },
            Ok(packet) => Decoded::Packet(packet),
            Err(e) => Decoded::Malformed {
                packet_type,
                reason: e.to_string(),
            },
        };
        Ok(Some(decoded))
    }

    fn decode_body(&self, packet_type: PacketType, body: &mut Bytes) -> Result<Packet> {
        let packet = match packet_type {
            PacketType::ObjectList => {
                let count = get_u32(body)? as usize;
                let mut names = Vec::with_capacity(count.min(body.remaining()));
                for _ in 0..count {
                    names.push(get_string(body)?);
                }
                Packet::ObjectList { names }
            }
            PacketType::AddObject => {
                let name = get_string(body)?;
                let dynamic = get_flag(body)?;
                Packet::AddObject { name, dynamic }
            }
            PacketType::RemoveObject => Packet::RemoveObject {
                name: get_string(body)?,
            },
            PacketType::Invoke => {
                let name = get_string(body)?;
                let code = get_u8(body)?;
                let call = CallKind::from_wire(code)
                    .ok_or_else(|| Error::protocol(format!("Unknown call kind: {}", code)))?;
                let index = get_i32(body)?;
                let blob = get_blob(body)?;
                let args = self.values.decode_args(&blob)?;
                let reply_id = get_i32(body)?;
                Packet::Invoke {
                    name,
                    call,
                    index,
                    args,
                    reply_id,
                }
            }
            PacketType::InvokeReply => {
                let name = get_string(body)?;
                let reply_id = get_i32(body)?;
                let blob = get_blob(body)?;
                let value = self.values.decode(&blob, TypeDesc::Any)?;
                Packet::InvokeReply {
                    name,
                    reply_id,
                    value,
                }
            }
        };
        Ok(packet)
    }
}

fn put_len(buf: &mut BytesMut, len: usize) -> Result<()> {
    let len = u32::try_from(len)
        .map_err(|_| Error::protocol(format!("Field too long: {} bytes", len)))?;
    buf.put_u32(len);
    Ok(())
}

fn put_string(buf: &mut BytesMut, s: &str) -> Result<()> {
    put_blob(buf, s.as_bytes())
}

fn put_blob(buf: &mut BytesMut, blob: &[u8]) -> Result<()> {
    put_len(buf, blob.len())?;
    buf.put_slice(blob);
    Ok(())
}

fn need(body: &Bytes, n: usize, what: &str) -> Result<()> {
    if body.remaining() < n {
        return Err(Error::protocol(format!(
            "Truncated {}: need {} bytes, have {}",
            what,
            n,
            body.remaining()
        )));
    }
    Ok(())
}

fn get_u8(body: &mut Bytes) -> Result<u8> {
    need(body, 1, "u8")?;
    Ok(body.get_u8())
}

fn get_flag(body: &mut Bytes) -> Result<bool> {
    match get_u8(body)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(Error::protocol(format!("Invalid flag byte: {}", other))),
    }
}

fn get_u32(body: &mut Bytes) -> Result<u32> {
    need(body, 4, "u32")?;
    Ok(body.get_u32())
}

fn get_i32(body: &mut Bytes) -> Result<i32> {
    need(body, 4, "i32")?;
    Ok(body.get_i32())
}

fn get_blob(body: &mut Bytes) -> Result<Bytes> {
    let len = get_u32(body)? as usize;
    need(body, len, "blob")?;
    Ok(body.split_to(len))
}

fn get_string(body: &mut Bytes) -> Result<String> {
    let raw = get_blob(body)?;
    String::from_utf8(raw.to_vec()).map_err(|e| Error::protocol(format!("Invalid UTF-8: {}", e)))
}
