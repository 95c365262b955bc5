//! Converters and the converter registry
//!
//! A converter owns the leaf encoding of exactly one type. Fixed-length
//! converters emit raw bytes; length-prefixed converters have their output
//! wrapped in a `u16` length by the codec.
//!
//! All multi-byte integers are big-endian.

use std::any::{Any, TypeId};
use std::marker::PhantomData;
use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use parking_lot::RwLock;

use crate::error::{Result, WireError};

use super::DynValue;

/// Leaf encode/decode logic for one type
pub trait Converter: Send + Sync {
    /// The type this converter was built for
    fn target(&self) -> TypeId;

    /// Human readable name of the target type (for errors and logs)
    fn type_name(&self) -> &'static str;

    /// Structural match predicate
    fn matches(&self, ty: TypeId) -> bool {
        ty == self.target()
    }

    /// Constant encoded width, or `None` for length-prefixed output
    fn fixed_len(&self) -> Option<usize>;

    /// Append the encoding of `value` to `out` (without any length prefix)
    fn encode(&self, value: &dyn Any, out: &mut BytesMut) -> Result<()>;

    /// Decode exactly `bytes` into a value
    fn decode(&self, bytes: &[u8]) -> Result<DynValue>;
}

fn mismatch(expected: &'static str) -> WireError {
    WireError::Encode(format!("converter for {} received a value of another type", expected))
}

// =============================================================================
// Fixed-length primitives
// =============================================================================

/// A type with a constant-width big-endian encoding
pub trait FixedWire: Any + Send + Sync + Sized {
    const LEN: usize;

    fn put(&self, out: &mut BytesMut);

    /// `bytes` is guaranteed to be exactly `LEN` long
    fn get(bytes: &[u8]) -> Result<Self>;
}

macro_rules! fixed_wire_num {
    ($($ty:ty => $put:ident),* $(,)?) => {
        $(
            impl FixedWire for $ty {
                const LEN: usize = std::mem::size_of::<$ty>();

                fn put(&self, out: &mut BytesMut) {
                    out.$put(*self);
                }

                fn get(bytes: &[u8]) -> Result<Self> {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(bytes);
                    Ok(<$ty>::from_be_bytes(raw))
                }
            }
        )*
    };
}

fixed_wire_num! {
    u8 => put_u8,
    i8 => put_i8,
    u16 => put_u16,
    i16 => put_i16,
    u32 => put_u32,
    i32 => put_i32,
    u64 => put_u64,
    i64 => put_i64,
    f32 => put_f32,
    f64 => put_f64,
}

impl FixedWire for bool {
    const LEN: usize = 1;

    fn put(&self, out: &mut BytesMut) {
        out.put_u8(u8::from(*self));
    }

    fn get(bytes: &[u8]) -> Result<Self> {
        match bytes[0] {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(WireError::Decode(format!("invalid bool byte 0x{:02x}", other))),
        }
    }
}

/// Converter for any [`FixedWire`] type
pub struct FixedConverter<T>(PhantomData<fn() -> T>);

impl<T: FixedWire> FixedConverter<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T: FixedWire> Default for FixedConverter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: FixedWire> Converter for FixedConverter<T> {
    fn target(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn fixed_len(&self) -> Option<usize> {
        Some(T::LEN)
    }

    fn encode(&self, value: &dyn Any, out: &mut BytesMut) -> Result<()> {
        let value = value
            .downcast_ref::<T>()
            .ok_or_else(|| mismatch(self.type_name()))?;
        value.put(out);
        Ok(())
    }

    fn decode(&self, bytes: &[u8]) -> Result<DynValue> {
        Ok(Box::new(T::get(bytes)?))
    }
}

// =============================================================================
// Length-prefixed primitives
// =============================================================================

/// A type with a variable-width encoding
pub trait PrefixedWire: Any + Send + Sync + Sized {
    fn put(&self, out: &mut BytesMut);

    fn get(bytes: &[u8]) -> Result<Self>;
}

impl PrefixedWire for String {
    fn put(&self, out: &mut BytesMut) {
        out.put_slice(self.as_bytes());
    }

    fn get(bytes: &[u8]) -> Result<Self> {
        String::from_utf8(bytes.to_vec())
            .map_err(|e| WireError::Decode(format!("invalid UTF-8 string: {}", e)))
    }
}

impl PrefixedWire for Vec<u8> {
    fn put(&self, out: &mut BytesMut) {
        out.put_slice(self);
    }

    fn get(bytes: &[u8]) -> Result<Self> {
        Ok(bytes.to_vec())
    }
}

/// Converter for any [`PrefixedWire`] type
pub struct PrefixedConverter<T>(PhantomData<fn() -> T>);

impl<T: PrefixedWire> PrefixedConverter<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T: PrefixedWire> Default for PrefixedConverter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: PrefixedWire> Converter for PrefixedConverter<T> {
    fn target(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn fixed_len(&self) -> Option<usize> {
        None
    }

    fn encode(&self, value: &dyn Any, out: &mut BytesMut) -> Result<()> {
        let value = value
            .downcast_ref::<T>()
            .ok_or_else(|| mismatch(self.type_name()))?;
        value.put(out);
        Ok(())
    }

    fn decode(&self, bytes: &[u8]) -> Result<DynValue> {
        Ok(Box::new(T::get(bytes)?))
    }
}

// =============================================================================
// Closure-backed converters
// =============================================================================

type EncodeFn<T> = Box<dyn Fn(&T, &mut BytesMut) -> Result<()> + Send + Sync>;
type DecodeFn<T> = Box<dyn Fn(&[u8]) -> Result<T> + Send + Sync>;

/// Converter assembled from a pair of closures.
///
/// Handy for giving a composite type a shortcut encoding without writing a
/// dedicated converter type.
pub struct FnConverter<T> {
    fixed_len: Option<usize>,
    encode: EncodeFn<T>,
    decode: DecodeFn<T>,
}

impl<T: Any + Send + Sync> FnConverter<T> {
    /// A converter producing exactly `len` bytes
    pub fn fixed(
        len: usize,
        encode: impl Fn(&T, &mut BytesMut) -> Result<()> + Send + Sync + 'static,
        decode: impl Fn(&[u8]) -> Result<T> + Send + Sync + 'static,
    ) -> Self {
        Self {
            fixed_len: Some(len),
            encode: Box::new(encode),
            decode: Box::new(decode),
        }
    }

    /// A converter whose output the codec wraps in a length prefix
    pub fn prefixed(
        encode: impl Fn(&T, &mut BytesMut) -> Result<()> + Send + Sync + 'static,
        decode: impl Fn(&[u8]) -> Result<T> + Send + Sync + 'static,
    ) -> Self {
        Self {
            fixed_len: None,
            encode: Box::new(encode),
            decode: Box::new(decode),
        }
    }
}

impl<T: Any + Send + Sync> Converter for FnConverter<T> {
    fn target(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn fixed_len(&self) -> Option<usize> {
        self.fixed_len
    }

    fn encode(&self, value: &dyn Any, out: &mut BytesMut) -> Result<()> {
        let value = value
            .downcast_ref::<T>()
            .ok_or_else(|| mismatch(self.type_name()))?;
        let start = out.len();
        (self.encode)(value, out)?;
        if let Some(len) = self.fixed_len {
            let written = out.len() - start;
            if written != len {
                return Err(WireError::Encode(format!(
                    "fixed converter for {} wrote {} bytes, declared {}",
                    self.type_name(),
                    written,
                    len
                )));
            }
        }
        Ok(())
    }

    fn decode(&self, bytes: &[u8]) -> Result<DynValue> {
        Ok(Box::new((self.decode)(bytes)?))
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Ordered collection of converters; the first structural match wins.
#[derive(Default)]
pub struct ConverterRegistry {
    converters: RwLock<Vec<Arc<dyn Converter>>>,
}

impl ConverterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in primitive converters
    pub fn with_primitives() -> Self {
        let registry = Self::new();
        registry.register_primitives();
        registry
    }

    fn register_primitives(&self) {
        let builtins: Vec<Arc<dyn Converter>> = vec![
            Arc::new(FixedConverter::<bool>::new()),
            Arc::new(FixedConverter::<u8>::new()),
            Arc::new(FixedConverter::<i8>::new()),
            Arc::new(FixedConverter::<u16>::new()),
            Arc::new(FixedConverter::<i16>::new()),
            Arc::new(FixedConverter::<u32>::new()),
            Arc::new(FixedConverter::<i32>::new()),
            Arc::new(FixedConverter::<u64>::new()),
            Arc::new(FixedConverter::<i64>::new()),
            Arc::new(FixedConverter::<f32>::new()),
            Arc::new(FixedConverter::<f64>::new()),
            Arc::new(PrefixedConverter::<String>::new()),
            Arc::new(PrefixedConverter::<Vec<u8>>::new()),
        ];
        self.converters.write().extend(builtins);
    }

    /// Add a converter. Rejects converters that would overlap an existing one.
    pub fn register(&self, converter: Arc<dyn Converter>) -> Result<()> {
        let mut converters = self.converters.write();
        let clash = converters
            .iter()
            .any(|c| c.matches(converter.target()) || converter.matches(c.target()));
        if clash {
            return Err(WireError::ConverterConflict(format!(
                "a converter for {} is already registered",
                converter.type_name()
            )));
        }
        tracing::debug!("Registered converter for {}", converter.type_name());
        converters.push(converter);
        Ok(())
    }

    /// First converter structurally matching `ty`
    pub fn find(&self, ty: TypeId) -> Option<Arc<dyn Converter>> {
        self.converters
            .read()
            .iter()
            .find(|c| c.matches(ty))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.converters.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.converters.read().is_empty()
    }
}
