//! Codec Tests
//!
//! Tests for the binary codec:
//! - Primitive and composite round trips
//! - Null encoding and the prefix null check
//! - Switch groups, guards and recursion modes
//! - Instance construction and error cases

use std::any::{Any, TypeId};
use std::fmt::Debug;
use std::sync::Arc;

use bytes::BufMut;
use wirepack::codec::{
    Codec, CodecOptions, FnConverter, Member, RecursionMode, TypeSchema, NULL_SENTINEL,
};
use wirepack::WireError;

// =============================================================================
// Test Types
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
struct Point {
    x: i32,
    y: i32,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Line {
    start: Point,
    end: Option<Point>,
    label: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Switched {
    a: u8,
    b: u8,
    c: u8,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Guarded {
    has_extra: bool,
    payload: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Token {
    id: u32,
    name: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Holder {
    token: Token,
}

#[derive(Debug, Clone, PartialEq)]
struct Built {
    created_by: &'static str,
    value: u8,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Shape {
    sides: u8,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn point_schema() -> TypeSchema {
    TypeSchema::builder::<Point>("Point")
        .member(Member::field("x", |p: &Point| &p.x, |p, v| p.x = v))
        .member(Member::field("y", |p: &Point| &p.y, |p, v| p.y = v))
        .default_ctor()
        .build()
}

fn line_schema() -> TypeSchema {
    TypeSchema::builder::<Line>("Line")
        .member(Member::field("start", |l: &Line| &l.start, |l, v| l.start = v))
        .member(Member::optional_field("end", |l: &Line| l.end.as_ref(), |l, v| l.end = v))
        .member(Member::field("label", |l: &Line| &l.label, |l, v| l.label = v))
        .default_ctor()
        .build()
}

fn token_schema() -> TypeSchema {
    TypeSchema::builder::<Token>("Token")
        .member(Member::field("id", |t: &Token| &t.id, |t, v| t.id = v))
        .member(Member::field("name", |t: &Token| &t.name, |t, v| t.name = v))
        .default_ctor()
        .build()
}

/// Shortcut converter that only keeps the id
fn token_converter() -> FnConverter<Token> {
    FnConverter::fixed(
        4,
        |t: &Token, out| {
            out.put_u32(t.id);
            Ok(())
        },
        |b| {
            Ok(Token {
                id: u32::from_be_bytes([b[0], b[1], b[2], b[3]]),
                name: String::new(),
            })
        },
    )
}

fn setup_codec() -> Codec {
    let codec = Codec::with_primitives();
    codec.register_schema(point_schema()).unwrap();
    codec.register_schema(line_schema()).unwrap();
    codec
}

fn setup_token_codec() -> Codec {
    let codec = Codec::with_primitives();
    codec.register_schema(token_schema()).unwrap();
    codec
        .register_schema(
            TypeSchema::builder::<Holder>("Holder")
                .member(Member::field("token", |h: &Holder| &h.token, |h, v| h.token = v))
                .default_ctor()
                .build(),
        )
        .unwrap();
    codec.register_converter(Arc::new(token_converter())).unwrap();
    codec
}

fn roundtrip<T: Any + PartialEq + Debug>(codec: &Codec, value: T) {
    let encoded = codec.encode(&value).unwrap();
    let decoded: T = codec.decode(&encoded).unwrap().unwrap();
    assert_eq!(decoded, value);
}

// =============================================================================
// Primitive Round Trips
// =============================================================================

#[test]
fn test_roundtrip_integers() {
    let codec = Codec::with_primitives();
    roundtrip(&codec, 0u8);
    roundtrip(&codec, u8::MAX);
    roundtrip(&codec, i8::MIN);
    roundtrip(&codec, 0u16);
    roundtrip(&codec, u16::MAX);
    roundtrip(&codec, i16::MIN);
    roundtrip(&codec, 0u32);
    roundtrip(&codec, u32::MAX);
    roundtrip(&codec, i32::MIN);
    roundtrip(&codec, 0u64);
    roundtrip(&codec, u64::MAX);
    roundtrip(&codec, i64::MIN);
}

#[test]
fn test_roundtrip_floats_and_bool() {
    let codec = Codec::with_primitives();
    roundtrip(&codec, 0.0f32);
    roundtrip(&codec, -1.5f32);
    roundtrip(&codec, f64::MAX);
    roundtrip(&codec, true);
    roundtrip(&codec, false);
}

#[test]
fn test_fixed_length_has_no_prefix() {
    let codec = Codec::with_primitives();
    assert_eq!(codec.encode(&0x0102u16).unwrap(), vec![0x01, 0x02]);
    assert_eq!(codec.encode(&true).unwrap(), vec![0x01]);
}

#[test]
fn test_string_is_length_prefixed() {
    let codec = Codec::with_primitives();
    let encoded = codec.encode(&"hi".to_string()).unwrap();
    assert_eq!(encoded, vec![0x00, 0x02, b'h', b'i']);
}

#[test]
fn test_roundtrip_empty_and_max_length() {
    let codec = Codec::with_primitives();
    roundtrip(&codec, String::new());
    roundtrip(&codec, Vec::<u8>::new());
    roundtrip(&codec, "a".repeat(u16::MAX as usize));
    roundtrip(&codec, vec![0xABu8; u16::MAX as usize]);
}

#[test]
fn test_oversized_prefixed_value_rejected() {
    let codec = Codec::with_primitives();
    let result = codec.encode(&"a".repeat(u16::MAX as usize + 1));
    assert!(matches!(result, Err(WireError::Encode(_))));
}

// =============================================================================
// Composite Encoding
// =============================================================================

#[test]
fn test_composite_wire_layout() {
    let codec = setup_codec();
    let encoded = codec.encode(&Point { x: 1, y: 2 }).unwrap();
    assert_eq!(
        encoded,
        vec![0x00, 0x08, 0, 0, 0, 1, 0, 0, 0, 2]
    );
}

#[test]
fn test_nested_composite_member_order_and_null() {
    let codec = setup_codec();
    let line = Line {
        start: Point { x: 1, y: 2 },
        end: None,
        label: "abc".to_string(),
    };
    let encoded = codec.encode(&line).unwrap();

    // Members by name: end, label, start
    let mut expected = vec![0x00, 21];
    expected.extend_from_slice(&NULL_SENTINEL);
    expected.extend_from_slice(&[0x00, 0x03, b'a', b'b', b'c']);
    expected.extend_from_slice(&[0x00, 0x08, 0, 0, 0, 1, 0, 0, 0, 2]);
    assert_eq!(encoded, expected);

    roundtrip(&codec, line);
}

#[test]
fn test_roundtrip_nested_with_present_optional() {
    let codec = setup_codec();
    roundtrip(
        &codec,
        Line {
            start: Point { x: -5, y: i32::MAX },
            end: Some(Point { x: 0, y: 0 }),
            label: String::new(),
        },
    );
}

#[test]
fn test_encoding_is_deterministic() {
    let codec = setup_codec();
    let line = Line {
        start: Point { x: 3, y: 4 },
        end: Some(Point { x: 5, y: 6 }),
        label: "same".to_string(),
    };
    assert_eq!(codec.encode(&line).unwrap(), codec.encode(&line).unwrap());
}

#[test]
fn test_multiple_values_back_to_back() {
    let codec = setup_codec();
    let mut buf = codec.encode(&Point { x: 1, y: 1 }).unwrap();
    buf.extend(codec.encode(&Point { x: 2, y: 2 }).unwrap());

    let mut cursor = 0;
    for expected in [Point { x: 1, y: 1 }, Point { x: 2, y: 2 }] {
        let value = codec
            .deserialize(&buf, Some(TypeId::of::<Point>()), &mut cursor, CodecOptions::default(), true)
            .unwrap()
            .unwrap();
        assert_eq!(*value.downcast::<Point>().unwrap(), expected);
    }
    assert_eq!(cursor, buf.len());
}

// =============================================================================
// Null Handling
// =============================================================================

#[test]
fn test_null_roundtrip() {
    let codec = Codec::with_primitives();
    let encoded = codec.encode_option::<String>(None).unwrap();
    assert_eq!(encoded, NULL_SENTINEL.to_vec());
    assert_eq!(codec.decode::<String>(&encoded).unwrap(), None);
}

#[test]
fn test_absent_target_type_reads_as_null() {
    let codec = Codec::with_primitives();
    let buf = [0u8; 8];
    let mut cursor = 0;
    let value = codec
        .deserialize(&buf, None, &mut cursor, CodecOptions::default(), true)
        .unwrap();
    assert!(value.is_none());
    assert_eq!(cursor, NULL_SENTINEL.len());
}

#[test]
fn test_prefix_null_check_matches_three_bytes() {
    let codec = Codec::with_primitives();
    let buf = [NULL_SENTINEL[0], NULL_SENTINEL[1], NULL_SENTINEL[2], 0x99, 0x99, 0x99];
    assert_eq!(codec.decode::<String>(&buf).unwrap(), None);
}

#[test]
fn test_strict_null_check_compares_all_bytes() {
    let codec = Codec::with_primitives().strict_null_check(true);
    let buf = [NULL_SENTINEL[0], NULL_SENTINEL[1], NULL_SENTINEL[2], 0x99, 0x99, 0x99];
    let result = codec.decode::<String>(&buf);
    assert!(matches!(result, Err(WireError::Truncated { .. })));

    assert_eq!(codec.decode::<String>(&NULL_SENTINEL).unwrap(), None);
}

// =============================================================================
// Switch Groups
// =============================================================================

fn switched_codec() -> Codec {
    let codec = Codec::with_primitives();
    codec
        .register_schema(
            TypeSchema::builder::<Switched>("Switched")
                .member(Member::field("a", |s: &Switched| &s.a, |s, v| s.a = v).switch_group(1))
                .member(Member::field("b", |s: &Switched| &s.b, |s, v| s.b = v).switch_group(2))
                .member(Member::field("c", |s: &Switched| &s.c, |s, v| s.c = v))
                .default_ctor()
                .build(),
        )
        .unwrap();
    codec
}

#[test]
fn test_switch_includes_untagged_by_default() {
    let codec = switched_codec();
    let options = CodecOptions::switched(1, false);
    let encoded = codec
        .serialize(Some(&Switched { a: 1, b: 2, c: 3 }), options)
        .unwrap();
    assert_eq!(encoded, vec![0x00, 0x02, 1, 3]);

    let decoded: Switched = codec.decode_with(&encoded, options).unwrap().unwrap();
    assert_eq!(decoded, Switched { a: 1, b: 0, c: 3 });
}

#[test]
fn test_switch_excluding_untagged() {
    let codec = switched_codec();
    let options = CodecOptions::switched(1, true);
    let encoded = codec
        .serialize(Some(&Switched { a: 1, b: 2, c: 3 }), options)
        .unwrap();
    assert_eq!(encoded, vec![0x00, 0x01, 1]);

    let decoded: Switched = codec.decode_with(&encoded, options).unwrap().unwrap();
    assert_eq!(decoded, Switched { a: 1, b: 0, c: 0 });
}

#[test]
fn test_no_switch_includes_everything() {
    let codec = switched_codec();
    roundtrip(&codec, Switched { a: 1, b: 2, c: 3 });
    assert_eq!(codec.encode(&Switched { a: 1, b: 2, c: 3 }).unwrap().len(), 5);
}

// =============================================================================
// Guards
// =============================================================================

fn guarded_codec() -> Codec {
    let codec = Codec::with_primitives();
    codec
        .register_schema(
            TypeSchema::builder::<Guarded>("Guarded")
                .member(Member::field(
                    "has_extra",
                    |g: &Guarded| &g.has_extra,
                    |g, v| g.has_extra = v,
                ))
                .member(
                    Member::field("payload", |g: &Guarded| &g.payload, |g, v| g.payload = v)
                        .serialize_guard(|g| g.has_extra)
                        .deserialize_guard(|g| g.has_extra),
                )
                .default_ctor()
                .build(),
        )
        .unwrap();
    codec
}

#[test]
fn test_guard_false_skips_member_entirely() {
    let codec = guarded_codec();
    let encoded = codec
        .encode(&Guarded { has_extra: false, payload: 42 })
        .unwrap();
    assert_eq!(encoded, vec![0x00, 0x01, 0x00]);

    let decoded: Guarded = codec.decode(&encoded).unwrap().unwrap();
    assert_eq!(decoded, Guarded { has_extra: false, payload: 0 });
}

#[test]
fn test_guard_true_keeps_member() {
    let codec = guarded_codec();
    let value = Guarded { has_extra: true, payload: 42 };
    let encoded = codec.encode(&value).unwrap();
    assert_eq!(encoded, vec![0x00, 0x05, 0x01, 0, 0, 0, 42]);
    roundtrip(&codec, value);
}

// =============================================================================
// Recursion Modes
// =============================================================================

#[test]
fn test_all_prefers_converter() {
    let codec = setup_token_codec();
    let token = Token { id: 7, name: "seven".to_string() };
    assert_eq!(codec.encode(&token).unwrap(), vec![0, 0, 0, 7]);
}

#[test]
fn test_only_current_uses_converter_at_top_level() {
    let codec = setup_token_codec();
    let token = Token { id: 7, name: "seven".to_string() };
    let options = CodecOptions::default().with_recursion(RecursionMode::OnlyCurrent);

    let encoded = codec.serialize(Some(&token), options).unwrap();
    assert_eq!(encoded, vec![0, 0, 0, 7]);

    let decoded: Token = codec.decode_with(&encoded, options).unwrap().unwrap();
    assert_eq!(decoded, Token { id: 7, name: String::new() });
}

#[test]
fn test_only_current_decomposes_children() {
    let codec = setup_token_codec();
    let holder = Holder {
        token: Token { id: 7, name: "seven".to_string() },
    };
    let options = CodecOptions::default().with_recursion(RecursionMode::OnlyCurrent);

    let encoded = codec.serialize(Some(&holder), options).unwrap();
    let mut expected = vec![0x00, 13, 0x00, 11, 0, 0, 0, 7, 0x00, 5];
    expected.extend_from_slice(b"seven");
    assert_eq!(encoded, expected);

    let decoded: Holder = codec.decode_with(&encoded, options).unwrap().unwrap();
    assert_eq!(decoded, holder);
}

#[test]
fn test_exclude_current_decomposes_one_level() {
    let codec = setup_token_codec();
    let token = Token { id: 7, name: "seven".to_string() };
    let options = CodecOptions::default().with_recursion(RecursionMode::ExcludeCurrent);

    let encoded = codec.serialize(Some(&token), options).unwrap();
    let mut expected = vec![0x00, 11, 0, 0, 0, 7, 0x00, 5];
    expected.extend_from_slice(b"seven");
    assert_eq!(encoded, expected);

    let decoded: Token = codec.decode_with(&encoded, options).unwrap().unwrap();
    assert_eq!(decoded, token);

    // Below the excluded level converters apply again
    let holder = Holder { token };
    let encoded = codec.serialize(Some(&holder), options).unwrap();
    assert_eq!(encoded, vec![0x00, 0x04, 0, 0, 0, 7]);
}

#[test]
fn test_exclude_all_decomposes_every_level() {
    let codec = setup_token_codec();
    let holder = Holder {
        token: Token { id: 9, name: "n".to_string() },
    };
    let options = CodecOptions::default().with_recursion(RecursionMode::ExcludeAll);

    let encoded = codec.serialize(Some(&holder), options).unwrap();
    assert_eq!(encoded, vec![0x00, 9, 0x00, 7, 0, 0, 0, 9, 0x00, 1, b'n']);

    let decoded: Holder = codec.decode_with(&encoded, options).unwrap().unwrap();
    assert_eq!(decoded, holder);
}

#[test]
fn test_recursion_mode_propagation() {
    assert_eq!(RecursionMode::All.next(), RecursionMode::All);
    assert_eq!(RecursionMode::ExcludeCurrent.next(), RecursionMode::All);
    assert_eq!(RecursionMode::ExcludeAll.next(), RecursionMode::ExcludeAll);
    assert_eq!(RecursionMode::OnlyCurrent.next(), RecursionMode::ExcludeAll);
}

// =============================================================================
// Construction
// =============================================================================

fn built_codec(schema: TypeSchema) -> Codec {
    let codec = Codec::with_primitives();
    codec.register_schema(schema).unwrap();
    codec
}

fn built_schema() -> wirepack::codec::SchemaBuilder<Built> {
    TypeSchema::builder::<Built>("Built")
        .member(Member::field("value", |b: &Built| &b.value, |b, v| b.value = v))
        .raw_ctor(|| Built { created_by: "raw", value: 0 })
}

#[test]
fn test_conversion_ctor_takes_precedence() {
    let codec = built_codec(
        built_schema()
            .conversion_ctor(|placeholder| {
                assert!(placeholder.is_none());
                Built { created_by: "conversion", value: 0 }
            })
            .build(),
    );
    let decoded: Built = codec.decode(&[0x00, 0x01, 5]).unwrap().unwrap();
    assert_eq!(decoded, Built { created_by: "conversion", value: 5 });
}

#[test]
fn test_raw_allocation_fallback() {
    let codec = built_codec(built_schema().build());
    let decoded: Built = codec.decode(&[0x00, 0x01, 5]).unwrap().unwrap();
    assert_eq!(decoded, Built { created_by: "raw", value: 5 });
}

#[test]
fn test_use_ctor_false_forces_raw_allocation() {
    let codec = built_codec(
        built_schema()
            .conversion_ctor(|_| Built { created_by: "conversion", value: 0 })
            .build(),
    );
    let mut cursor = 0;
    let decoded = codec
        .deserialize(
            &[0x00, 0x01, 5],
            Some(TypeId::of::<Built>()),
            &mut cursor,
            CodecOptions::default(),
            false,
        )
        .unwrap()
        .unwrap();
    assert_eq!(
        *decoded.downcast::<Built>().unwrap(),
        Built { created_by: "raw", value: 5 }
    );
}

#[test]
fn test_no_factory_is_unsupported() {
    let codec = built_codec(
        TypeSchema::builder::<Built>("Built")
            .member(Member::field("value", |b: &Built| &b.value, |b, v| b.value = v))
            .build(),
    );
    let result = codec.decode::<Built>(&[0x00, 0x01, 5]);
    assert!(matches!(result, Err(WireError::UnsupportedType(_))));
}

#[test]
fn test_deserialize_into_existing_instance() {
    let codec = setup_codec();
    let mut point = Point { x: 100, y: 100 };
    let mut cursor = 0;
    codec
        .deserialize_into(
            &[0x00, 0x08, 0, 0, 0, 1, 0, 0, 0, 2],
            &mut cursor,
            &mut point,
            CodecOptions::default(),
        )
        .unwrap();
    assert_eq!(point, Point { x: 1, y: 2 });
    assert_eq!(cursor, 10);
}

// =============================================================================
// Error Handling Tests
// =============================================================================

#[test]
fn test_abstract_target_rejected() {
    let codec = built_codec(
        TypeSchema::builder::<Shape>("Shape")
            .member(Member::field("sides", |s: &Shape| &s.sides, |s, v| s.sides = v))
            .abstract_type()
            .default_ctor()
            .build(),
    );
    let result = codec.decode::<Shape>(&[0x00, 0x01, 3]);
    assert!(matches!(result, Err(WireError::UnsupportedType(_))));
}

#[test]
fn test_interface_target_rejected() {
    let codec = Codec::with_primitives();
    let mut cursor = 0;
    let result = codec.deserialize(
        &[0x00, 0x00],
        Some(TypeId::of::<dyn Debug>()),
        &mut cursor,
        CodecOptions::default(),
        true,
    );
    assert!(matches!(result, Err(WireError::UnsupportedType(_))));
}

#[test]
fn test_unregistered_type_cannot_be_encoded() {
    let codec = Codec::with_primitives();
    let result = codec.encode(&Point { x: 1, y: 2 });
    assert!(matches!(result, Err(WireError::UnsupportedType(_))));
}

#[test]
fn test_truncated_composite() {
    let codec = setup_codec();
    let result = codec.decode::<Point>(&[0x00, 0x08, 0, 0]);
    assert!(matches!(result, Err(WireError::Truncated { .. })));
}

#[test]
fn test_null_for_required_member_is_an_error() {
    let codec = setup_codec();
    let mut buf = vec![0x00, 0x0A];
    buf.extend_from_slice(&NULL_SENTINEL);
    buf.extend_from_slice(&[0, 0, 0, 2]);
    let result = codec.decode::<Point>(&buf);
    assert!(matches!(result, Err(WireError::Decode(_))));
}
