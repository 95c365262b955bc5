//! # wirepack
//!
//! A binary wire protocol stack for exchanging discrete messages:
//! - Type-driven binary codec (converters for leaves, schemas for composites)
//! - Deterministic member selection with switch groups and guards
//! - Per-connection packet scheduling over non-blocking sockets
//! - Best-effort request/response correlation by message type
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Application                             │
//! │              send_packet / request / received                │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                 Packeter (per connection)                    │
//! │                outbound queue + notifications                │
//! └──────────┬──────────────────────────────────┬───────────────┘
//!            │                                  │
//!            ▼                                  ▼
//!   ┌─────────────────┐                ┌─────────────────┐
//!   │   Sender Loop   │                │   Worker Pool   │
//!   │ (batch + write) │                │ (poll + decode) │
//!   └────────┬────────┘                └────────┬────────┘
//!            │                                  │
//!            ▼                                  ▼
//!   ┌─────────────────────────────────────────────────────┐
//!   │            Protocol (packet id + Codec)             │
//!   │     Converter Registry  ·  Member Selector          │
//!   └─────────────────────────────────────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod codec;
pub mod protocol;
pub mod network;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{WireError, Result};
pub use config::Config;
pub use codec::{Codec, CodecOptions, RecursionMode};
pub use protocol::{Packet, Protocol};
pub use network::{Packeter, Scheduler, Server};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of wirepack
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
