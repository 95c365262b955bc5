//! Codec Module
//!
//! Type-driven binary encoding without a schema compiler.
//!
//! ## Wire Format
//!
//! All multi-byte integers are big-endian.
//!
//! ```text
//! null                 ┌──────────────────────────────┐
//!                      │ FF FE 00 4E 55 4C  (6 bytes) │
//!                      └──────────────────────────────┘
//! fixed-length leaf    ┌──────────────────────────────┐
//!                      │ raw bytes (converter width)  │
//!                      └──────────────────────────────┘
//! prefixed leaf        ┌─────────┬────────────────────┐
//!                      │ Len (2) │ payload            │
//!                      └─────────┴────────────────────┘
//! composite            ┌─────────┬────────┬─────┬────────┐
//!                      │ Len (2) │ member │ ... │ member │
//!                      └─────────┴────────┴─────┴────────┘
//! ```
//!
//! Decoding treats a position as null when its first three bytes match the
//! sentinel prefix (all six with strict checking). A prefixed leaf or a
//! composite whose bytes happen to start with `FF FE 00` is therefore
//! misread as null under the default check.

mod binary;
mod converter;
mod schema;
mod selector;

use std::any::Any;

pub use binary::{Codec, CodecOptions, RecursionMode};
pub use converter::{
    Converter, ConverterRegistry, FixedConverter, FixedWire, FnConverter, PrefixedConverter,
    PrefixedWire,
};
pub use schema::{
    Member, MemberCategories, MemberDescriptor, MemberKind, SchemaBuilder, TypeSchema,
};
pub use selector::{MemberSelector, SelectedMember};

/// A decoded value of erased type
pub type DynValue = Box<dyn Any + Send + Sync>;

/// Encoding of an absent value
pub const NULL_SENTINEL: [u8; 6] = [0xFF, 0xFE, 0x00, 0x4E, 0x55, 0x4C];

/// Sentinel bytes compared by the default null check
pub const NULL_CHECK_LEN: usize = 3;

/// Width of every length prefix
pub const LENGTH_PREFIX_SIZE: usize = 2;

/// Largest payload a single length prefix can describe
pub const MAX_PREFIXED_LEN: usize = u16::MAX as usize;
