//! Built-in messages
//!
//! Small message set used by the bundled server and CLI.

use crate::codec::{Member, TypeSchema};
use crate::error::Result;

use super::{Packet, Protocol};

/// Liveness check; answered with a [`Pong`] carrying the same nonce
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ping {
    pub nonce: u64,
}

impl Packet for Ping {
    const ID: u16 = 0x0001;

    fn schema() -> TypeSchema {
        TypeSchema::builder::<Ping>("Ping")
            .member(Member::field("nonce", |p: &Ping| &p.nonce, |p, v| p.nonce = v))
            .default_ctor()
            .build()
    }
}

/// Reply to [`Ping`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pong {
    pub nonce: u64,
}

impl Packet for Pong {
    const ID: u16 = 0x0002;

    fn schema() -> TypeSchema {
        TypeSchema::builder::<Pong>("Pong")
            .member(Member::field("nonce", |p: &Pong| &p.nonce, |p, v| p.nonce = v))
            .default_ctor()
            .build()
    }
}

/// A line of text from one peer to another
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Chat {
    pub sender: String,
    pub body: String,
    pub room: Option<String>,
    pub sent_at: u64,
}

impl Packet for Chat {
    const ID: u16 = 0x0003;

    fn schema() -> TypeSchema {
        TypeSchema::builder::<Chat>("Chat")
            .member(Member::field("sender", |c: &Chat| &c.sender, |c, v| c.sender = v))
            .member(Member::field("body", |c: &Chat| &c.body, |c, v| c.body = v))
            .member(Member::optional_field(
                "room",
                |c: &Chat| c.room.as_ref(),
                |c, v| c.room = v,
            ))
            .member(Member::field("sent_at", |c: &Chat| &c.sent_at, |c, v| c.sent_at = v))
            .default_ctor()
            .build()
    }
}

/// Register every built-in message with `protocol`
pub fn register_builtin(protocol: &Protocol) -> Result<()> {
    protocol.register::<Ping>()?;
    protocol.register::<Pong>()?;
    protocol.register::<Chat>()?;
    Ok(())
}
