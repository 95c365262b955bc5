//! Protocol Module
//!
//! Message framing on top of the codec.
//!
//! ## Packet Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │  Id (2)  │ Len (2)  │       Member encodings      │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! ### Built-in Packets
//! - 0x0001: PING  - nonce (u64)
//! - 0x0002: PONG  - nonce (u64)
//! - 0x0003: CHAT  - body, room (nullable), sender, sent_at
//!
//! Several packets may be concatenated in one write; the receiver decodes
//! them back to back.

mod packet;
pub mod messages;

pub use packet::{Packet, PacketRef, PacketTable, Protocol, PACKET_ID_SIZE};
pub use messages::{register_builtin, Chat, Ping, Pong};
