//! Packet framing
//!
//! Encoding and decoding of whole messages for the wire.
//!
//! ## Wire Format
//! ```text
//! ┌──────────┬─────────────────────────────────────┐
//! │  Id (2)  │  codec encoding of the message      │
//! └──────────┴─────────────────────────────────────┘
//! ```
//!
//! The id selects the message type on the receiving side; the rest is a
//! regular composite encoding (length prefix plus members).

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use parking_lot::RwLock;

use crate::codec::{Codec, CodecOptions, TypeSchema};
use crate::error::{Result, WireError};

/// Packet id size in bytes
pub const PACKET_ID_SIZE: usize = 2;

/// A decoded message shared between subscribers
pub type PacketRef = Arc<dyn Any + Send + Sync>;

/// An application message that can travel over a connection
pub trait Packet: Any + Send + Sync {
    /// Wire id, unique within a [`Protocol`]
    const ID: u16;

    /// Member table used to encode the message
    fn schema() -> TypeSchema;
}

#[derive(Debug, Clone, Copy)]
struct PacketEntry {
    type_id: TypeId,
    name: &'static str,
}

/// Bidirectional mapping between packet ids and message types
#[derive(Default)]
pub struct PacketTable {
    by_id: RwLock<HashMap<u16, PacketEntry>>,
    by_type: RwLock<HashMap<TypeId, u16>>,
}

impl PacketTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: u16, type_id: TypeId, name: &'static str) -> Result<()> {
        self.register_with(id, type_id, name, || Ok(()))
    }

    /// Insert the mapping only if `commit` succeeds. Both run under the
    /// table's write locks.
    fn register_with(
        &self,
        id: u16,
        type_id: TypeId,
        name: &'static str,
        commit: impl FnOnce() -> Result<()>,
    ) -> Result<()> {
        let mut by_id = self.by_id.write();
        let mut by_type = self.by_type.write();
        if let Some(existing) = by_id.get(&id) {
            return Err(WireError::Protocol(format!(
                "packet id {} already used by {}",
                id, existing.name
            )));
        }
        if by_type.contains_key(&type_id) {
            return Err(WireError::Protocol(format!("{} is already registered", name)));
        }
        commit()?;
        by_id.insert(id, PacketEntry { type_id, name });
        by_type.insert(type_id, id);
        Ok(())
    }

    pub fn id_of(&self, type_id: TypeId) -> Option<u16> {
        self.by_type.read().get(&type_id).copied()
    }

    pub fn type_of(&self, id: u16) -> Option<TypeId> {
        self.by_id.read().get(&id).map(|e| e.type_id)
    }

    pub fn name_of(&self, id: u16) -> Option<&'static str> {
        self.by_id.read().get(&id).map(|e| e.name)
    }

    pub fn len(&self) -> usize {
        self.by_id.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.read().is_empty()
    }
}

/// Codec plus packet table: everything needed to frame messages
pub struct Protocol {
    codec: Codec,
    packets: PacketTable,
}

impl Protocol {
    pub fn new(codec: Codec) -> Self {
        Self {
            codec,
            packets: PacketTable::new(),
        }
    }

    /// Register a message type and its schema. Nothing is recorded if
    /// either the id or the schema is already taken.
    pub fn register<P: Packet>(&self) -> Result<()> {
        let schema = P::schema();
        let name = schema.name();
        self.packets.register_with(P::ID, TypeId::of::<P>(), name, || {
            self.codec.register_schema(schema)
        })?;
        tracing::debug!("Registered packet {} as id {}", name, P::ID);
        Ok(())
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    pub fn packets(&self) -> &PacketTable {
        &self.packets
    }

    /// Append the framed encoding of `message` to `out`
    pub fn encode_packet(&self, message: &dyn Any, out: &mut BytesMut) -> Result<()> {
        let id = self.packets.id_of(message.type_id()).ok_or_else(|| {
            WireError::Protocol(format!("unregistered message type {:?}", message.type_id()))
        })?;
        out.put_u16(id);
        self.codec
            .serialize_into(Some(message), CodecOptions::default(), out)
    }

    /// Decode one framed message at `cursor`, returning its id and value
    pub fn decode_packet(&self, buf: &[u8], cursor: &mut usize) -> Result<(u16, PacketRef)> {
        let header = buf
            .get(*cursor..*cursor + PACKET_ID_SIZE)
            .ok_or(WireError::Truncated {
                needed: PACKET_ID_SIZE,
                available: buf.len().saturating_sub(*cursor),
            })?;
        let id = u16::from_be_bytes([header[0], header[1]]);
        let type_id = self
            .packets
            .type_of(id)
            .ok_or_else(|| WireError::Protocol(format!("unknown packet id {}", id)))?;
        *cursor += PACKET_ID_SIZE;

        let value = self
            .codec
            .deserialize(buf, Some(type_id), cursor, CodecOptions::default(), true)?
            .ok_or_else(|| WireError::Decode(format!("packet {} decoded as null", id)))?;
        Ok((id, PacketRef::from(value)))
    }

    /// Encode a single message into a fresh buffer
    pub fn to_bytes<P: Packet>(&self, message: &P) -> Result<Vec<u8>> {
        let mut out = BytesMut::new();
        self.encode_packet(message, &mut out)?;
        Ok(out.to_vec())
    }
}
