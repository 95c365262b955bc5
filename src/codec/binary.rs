//! Binary Codec
//!
//! Recursive encode/decode engine. Leaf types go through the
//! [`ConverterRegistry`]; everything else is decomposed member by member
//! using the [`MemberSelector`].

use std::any::{Any, TypeId};
use std::sync::Arc;

use bytes::{BufMut, BytesMut};

use crate::error::{Result, WireError};

use super::converter::{Converter, ConverterRegistry};
use super::schema::TypeSchema;
use super::selector::MemberSelector;
use super::{DynValue, LENGTH_PREFIX_SIZE, NULL_CHECK_LEN, NULL_SENTINEL};

/// Scoping control for converter use, consumed once per level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecursionMode {
    /// Use a converter whenever one matches
    #[default]
    All,
    /// Decompose this level, converters allowed below
    ExcludeCurrent,
    /// Decompose this level and every level below
    ExcludeAll,
    /// Converter allowed here, decompose everything below
    OnlyCurrent,
}

impl RecursionMode {
    pub fn allows_converter(self) -> bool {
        matches!(self, RecursionMode::All | RecursionMode::OnlyCurrent)
    }

    /// Mode handed to the next recursion level
    pub fn next(self) -> Self {
        match self {
            RecursionMode::All | RecursionMode::ExcludeCurrent => RecursionMode::All,
            RecursionMode::ExcludeAll | RecursionMode::OnlyCurrent => RecursionMode::ExcludeAll,
        }
    }
}

/// Per-call codec options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CodecOptions {
    /// Only members in this switch group (and untagged ones, unless
    /// `exclude_untagged`) participate
    pub switch_id: Option<u32>,
    pub exclude_untagged: bool,
    pub recursion: RecursionMode,
}

impl CodecOptions {
    pub fn switched(switch_id: u32, exclude_untagged: bool) -> Self {
        Self {
            switch_id: Some(switch_id),
            exclude_untagged,
            recursion: RecursionMode::All,
        }
    }

    pub fn with_recursion(mut self, recursion: RecursionMode) -> Self {
        self.recursion = recursion;
        self
    }

    fn for_children(self) -> Self {
        Self {
            recursion: self.recursion.next(),
            ..self
        }
    }

    fn includes(&self, group: Option<u32>) -> bool {
        match (self.switch_id, group) {
            (None, _) => true,
            (Some(id), Some(group)) => id == group,
            (Some(_), None) => !self.exclude_untagged,
        }
    }
}

/// How a type is encoded at a given level
enum Plan {
    Leaf(Arc<dyn Converter>),
    Composite(Arc<TypeSchema>),
}

/// The binary codec
pub struct Codec {
    converters: ConverterRegistry,
    selector: MemberSelector,
    strict_null_check: bool,
}

impl Default for Codec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec {
    /// Codec with no converters registered
    pub fn new() -> Self {
        Self {
            converters: ConverterRegistry::new(),
            selector: MemberSelector::new(),
            strict_null_check: false,
        }
    }

    /// Codec preloaded with the built-in primitive converters
    pub fn with_primitives() -> Self {
        Self {
            converters: ConverterRegistry::with_primitives(),
            ..Self::new()
        }
    }

    /// Compare all sentinel bytes when detecting nulls
    pub fn strict_null_check(mut self, strict: bool) -> Self {
        self.strict_null_check = strict;
        self
    }

    pub fn register_converter(&self, converter: Arc<dyn Converter>) -> Result<()> {
        self.converters.register(converter)
    }

    pub fn register_schema(&self, schema: TypeSchema) -> Result<()> {
        self.selector.register(schema)
    }

    pub fn converters(&self) -> &ConverterRegistry {
        &self.converters
    }

    pub fn selector(&self) -> &MemberSelector {
        &self.selector
    }

    fn plan(&self, ty: TypeId, mode: RecursionMode) -> Result<Plan> {
        let converter = self.converters.find(ty);
        let schema = self.selector.schema(ty);
        match (converter, schema) {
            (Some(converter), Some(_)) if mode.allows_converter() => Ok(Plan::Leaf(converter)),
            // Leaf types without members always use their converter
            (Some(converter), None) => Ok(Plan::Leaf(converter)),
            (_, Some(schema)) => Ok(Plan::Composite(schema)),
            (None, None) => Err(WireError::UnsupportedType(format!(
                "no converter or schema registered for {:?}",
                ty
            ))),
        }
    }

    // =========================================================================
    // Encoding
    // =========================================================================

    /// Encode `value` (`None` encodes the null sentinel)
    pub fn serialize(&self, value: Option<&dyn Any>, options: CodecOptions) -> Result<Vec<u8>> {
        let mut out = BytesMut::new();
        self.serialize_into(value, options, &mut out)?;
        Ok(out.to_vec())
    }

    /// Encode `value`, appending to `out`
    pub fn serialize_into(
        &self,
        value: Option<&dyn Any>,
        options: CodecOptions,
        out: &mut BytesMut,
    ) -> Result<()> {
        let Some(value) = value else {
            out.put_slice(&NULL_SENTINEL);
            return Ok(());
        };

        match self.plan(value.type_id(), options.recursion)? {
            Plan::Leaf(converter) => match converter.fixed_len() {
                Some(_) => converter.encode(value, out),
                None => {
                    let at = Self::reserve_prefix(out);
                    converter.encode(value, out)?;
                    Self::fill_prefix(out, at, converter.type_name())
                }
            },
            Plan::Composite(schema) => {
                let at = Self::reserve_prefix(out);
                self.serialize_members(value, options, out)?;
                Self::fill_prefix(out, at, schema.name)
            }
        }
    }

    fn serialize_members(
        &self,
        value: &dyn Any,
        options: CodecOptions,
        out: &mut BytesMut,
    ) -> Result<()> {
        let members = self.selector.select(value.type_id())?;
        let child_options = options.for_children();

        for member in members.iter() {
            let descriptor = member.descriptor();
            if !options.includes(descriptor.switch_group) {
                continue;
            }
            let owner = member.owner(value)?;
            if let Some(guard) = &descriptor.serialize_guard {
                if !guard(owner)? {
                    continue;
                }
            }
            let member_value = (descriptor.get)(owner)?;
            self.serialize_into(member_value, child_options, out)?;
        }
        Ok(())
    }

    fn reserve_prefix(out: &mut BytesMut) -> usize {
        let at = out.len();
        out.put_u16(0);
        at
    }

    fn fill_prefix(out: &mut BytesMut, at: usize, type_name: &str) -> Result<()> {
        let len = out.len() - at - LENGTH_PREFIX_SIZE;
        let len = u16::try_from(len).map_err(|_| {
            WireError::Encode(format!(
                "{} payload of {} bytes exceeds the 16-bit length prefix",
                type_name, len
            ))
        })?;
        out[at..at + LENGTH_PREFIX_SIZE].copy_from_slice(&len.to_be_bytes());
        Ok(())
    }

    // =========================================================================
    // Decoding
    // =========================================================================

    /// True if the bytes at `cursor` read as the null sentinel
    pub fn is_null_at(&self, buf: &[u8], cursor: usize) -> bool {
        let check = if self.strict_null_check {
            NULL_SENTINEL.len()
        } else {
            NULL_CHECK_LEN
        };
        buf.get(cursor..cursor + check)
            .is_some_and(|bytes| bytes == &NULL_SENTINEL[..check])
    }

    /// Decode one value of type `target` starting at `cursor`.
    ///
    /// `use_ctor = false` skips the constructors and takes the raw
    /// allocation path.
    pub fn deserialize(
        &self,
        buf: &[u8],
        target: Option<TypeId>,
        cursor: &mut usize,
        options: CodecOptions,
        use_ctor: bool,
    ) -> Result<Option<DynValue>> {
        let target = match target {
            Some(ty) if !self.is_null_at(buf, *cursor) => ty,
            _ => {
                *cursor += NULL_SENTINEL.len();
                return Ok(None);
            }
        };

        match self.plan(target, options.recursion)? {
            Plan::Leaf(converter) => {
                let len = match converter.fixed_len() {
                    Some(len) => len,
                    None => Self::read_prefix(buf, cursor)?,
                };
                let bytes = Self::take(buf, cursor, len)?;
                converter.decode(bytes).map(Some)
            }
            Plan::Composite(schema) => {
                if schema.is_abstract() {
                    return Err(WireError::UnsupportedType(format!(
                        "{} is abstract and cannot be instantiated",
                        schema.name()
                    )));
                }
                let mut instance = if use_ctor {
                    schema.construct()?
                } else {
                    schema.construct_raw()?
                };
                self.deserialize_into(buf, cursor, instance.as_mut(), options)?;
                Ok(Some(instance))
            }
        }
    }

    /// Decode a composite encoding into an existing instance
    pub fn deserialize_into(
        &self,
        buf: &[u8],
        cursor: &mut usize,
        instance: &mut dyn Any,
        options: CodecOptions,
    ) -> Result<()> {
        // Total length is informational only; members drive consumption
        let _total = Self::read_prefix(buf, cursor)?;

        let members = self.selector.select((*instance).type_id())?;
        let child_options = options.for_children();

        for member in members.iter() {
            let descriptor = member.descriptor();
            if !options.includes(descriptor.switch_group) {
                continue;
            }
            if let Some(guard) = &descriptor.deserialize_guard {
                if !guard(member.owner(&*instance)?)? {
                    continue;
                }
            }
            let value = self.deserialize(
                buf,
                Some(descriptor.value_type),
                cursor,
                child_options,
                true,
            )?;
            (descriptor.set)(member.owner_mut(instance)?, value)?;
        }
        Ok(())
    }

    fn read_prefix(buf: &[u8], cursor: &mut usize) -> Result<usize> {
        let bytes = Self::take(buf, cursor, LENGTH_PREFIX_SIZE)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]) as usize)
    }

    fn take<'a>(buf: &'a [u8], cursor: &mut usize, len: usize) -> Result<&'a [u8]> {
        let end = cursor.checked_add(len).filter(|&end| end <= buf.len()).ok_or(
            WireError::Truncated {
                needed: len,
                available: buf.len().saturating_sub(*cursor),
            },
        )?;
        let bytes = &buf[*cursor..end];
        *cursor = end;
        Ok(bytes)
    }

    // =========================================================================
    // Typed convenience API
    // =========================================================================

    /// Encode with default options
    pub fn encode<T: Any>(&self, value: &T) -> Result<Vec<u8>> {
        self.serialize(Some(value), CodecOptions::default())
    }

    /// Encode a possibly absent value with default options
    pub fn encode_option<T: Any>(&self, value: Option<&T>) -> Result<Vec<u8>> {
        self.serialize(value.map(|v| v as &dyn Any), CodecOptions::default())
    }

    /// Decode a whole buffer as `T` with default options
    pub fn decode<T: Any>(&self, buf: &[u8]) -> Result<Option<T>> {
        self.decode_with(buf, CodecOptions::default())
    }

    pub fn decode_with<T: Any>(&self, buf: &[u8], options: CodecOptions) -> Result<Option<T>> {
        let mut cursor = 0;
        let value = self.deserialize(buf, Some(TypeId::of::<T>()), &mut cursor, options, true)?;
        value
            .map(|v| {
                v.downcast::<T>().map(|b| *b).map_err(|_| {
                    WireError::Decode(format!(
                        "decoded value is not a {}",
                        std::any::type_name::<T>()
                    ))
                })
            })
            .transpose()
    }
}
