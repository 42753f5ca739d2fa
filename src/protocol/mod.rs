//! Wire protocol: values, packets and framing.

pub mod codec;
pub mod packet;
pub mod value;

pub use codec::{Decoded, PacketCodec};
pub use packet::{CallKind, Packet, PacketType, SourceLocation, NO_REPLY};
pub use value::{MsgpackCodec, TypeDesc, ValueCodec, Variant};
