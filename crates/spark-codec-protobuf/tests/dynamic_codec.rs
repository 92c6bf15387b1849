//! 动态值编解码集成测试
//!
//! # 教案级注释概览
//!
//! - **测试目标 (Why)**：宿主平台没有预生成代码，绝大多数报文以 [`Value`] 动态形态往返；
//!   本文件验证每类字段（标量、嵌套、重复、packed、映射、枚举、Any）在动态形态下的线格式与还原结果。
//! - **结构安排 (How)**：
//!   - 共享一份手写 IDL（[`SHOP_IDL`]），通过 `ProtoMapperFactory::create_from_content` 加载；
//!   - `encode`/`decode` 辅助函数走与生产调用方相同的 `MessageHandle` 入口；
//!   - 错误路径断言稳定错误码，而不是错误文本。
//! - **合同 (What)**：除包装根外，解码结果只包含线上出现过的字段，编码时零值同样写出。

use std::sync::Arc;

use spark_codec_protobuf::{
    ErrorStage, PackedArray, ProtoCodecOptions, ProtoError, ProtoMapper, ProtoMapperConfig,
    ProtoMapperFactory, TypeDescriptor, Value,
};

const SHOP_IDL: &str = r#"syntax = "proto3";
import "google/protobuf/any.proto";
package demo.shop;

enum Color {
  RED = 0;
  GREEN = 1;
  BLUE = 2;
}

message Root {
  string name = 1;
  repeated string tags = 2;
}

message Item {
  string sku = 1;
  int32 quantity = 2;
  double price = 3;
  Color color = 4;
  repeated int64 samples = 5;
  map<string, int64> stock = 6;
  Root owner = 7;
  repeated Root history = 8;
  google.protobuf.Any extra = 9;
  sint64 delta = 10;
  bytes blob = 11;
  bool active = 12;
}

//@WrapProperty
message Samples {
  repeated int64 value = 1;
}

//@WrapProperty
message Title {
  string value = 1;
}
"#;

fn mapper() -> Arc<ProtoMapper> {
    ProtoMapperFactory::default()
        .create_from_content(SHOP_IDL)
        .expect("加载 IDL")
}

fn encode(mapper: &Arc<ProtoMapper>, message: &str, value: &Value) -> spark_codec_protobuf::Result<Vec<u8>> {
    let handle = mapper.message_handle(message)?;
    let bytes = handle.writer_for(&TypeDescriptor::Dynamic)?.serialize(value)?;
    Ok(bytes.to_vec())
}

fn decode_as(
    mapper: &Arc<ProtoMapper>,
    message: &str,
    ty: &TypeDescriptor,
    bytes: &[u8],
) -> spark_codec_protobuf::Result<Value> {
    mapper.message_handle(message)?.reader_for(ty)?.deserialize(bytes)
}

fn decode(mapper: &Arc<ProtoMapper>, message: &str, bytes: &[u8]) -> spark_codec_protobuf::Result<Value> {
    decode_as(mapper, message, &TypeDescriptor::Dynamic, bytes)
}

fn strings(items: &[&str]) -> Value {
    Value::List(items.iter().map(|item| Value::from(*item)).collect())
}

fn root(name: &str, tags: &[&str]) -> Value {
    Value::from_entries([("name", Value::from(name)), ("tags", strings(tags))])
}

#[test]
fn root_message_matches_reference_bytes() {
    let mapper = mapper();
    let value = root("n", &["a", "b"]);
    let bytes = encode(&mapper, "Root", &value).expect("编码");
    assert_eq!(bytes, [0x0a, 0x01, b'n', 0x12, 0x01, b'a', 0x12, 0x01, b'b']);
    assert_eq!(decode(&mapper, "Root", &bytes).expect("解码"), value);
}

#[test]
fn null_element_in_repeated_field_is_rejected() {
    let mapper = mapper();
    let value = Value::from_entries([
        ("name", Value::from("n")),
        ("tags", Value::List(vec![Value::from("a"), Value::Null])),
    ]);
    let err = encode(&mapper, "Root", &value).unwrap_err();
    assert_eq!(err, ProtoError::NullElement { field: "tags".into() });
    assert_eq!(err.code(), "protobuf.encode.null_element");
    assert_eq!(err.stage(), ErrorStage::Encode);
}

#[test]
fn null_and_absent_fields_are_not_written() {
    let mapper = mapper();
    let value = Value::from_entries([("name", Value::Null)]);
    assert!(encode(&mapper, "Root", &value).expect("编码").is_empty());
    assert!(encode(&mapper, "Root", &Value::Null).expect("编码").is_empty());
}

#[test]
fn empty_buffer_decodes_to_empty_message() {
    let mapper = mapper();
    assert_eq!(
        decode(&mapper, "Root", &[]).expect("解码"),
        Value::Map(Default::default())
    );
}

#[test]
fn unknown_trailing_field_is_skipped() {
    let mapper = mapper();
    let value = root("n", &["a"]);
    let mut bytes = encode(&mapper, "Root", &value).expect("编码");
    // 字段 15，varint 1；字段 16，长度前缀 "zz"。
    bytes.extend_from_slice(&[0x78, 0x01, 0x82, 0x01, 0x02, b'z', b'z']);
    assert_eq!(decode(&mapper, "Root", &bytes).expect("解码"), value);
}

#[test]
fn item_round_trips_every_field_kind() {
    let mapper = mapper();
    let value = Value::from_entries([
        ("sku", Value::from("SKU-1")),
        ("quantity", Value::Int32(3)),
        ("price", Value::Double(19.5)),
        ("color", Value::from("GREEN")),
        ("samples", Value::List(vec![Value::Int64(1), Value::Int64(-2), Value::Int64(300)])),
        (
            "stock",
            Value::from_entries([("north", Value::Int64(7)), ("south", Value::Int64(0))]),
        ),
        ("owner", root("alice", &["vip"])),
        (
            "history",
            Value::List(vec![root("bob", &[]), root("carol", &["x", "y"])]),
        ),
        ("delta", Value::Int64(-42)),
        ("blob", Value::Bytes(vec![0, 1, 2, 255])),
        ("active", Value::Bool(false)),
    ]);
    let bytes = encode(&mapper, "Item", &value).expect("编码");
    let decoded = decode(&mapper, "Item", &bytes).expect("解码");

    // 空列表不写出，因此 bob 的 tags 在解码后缺席。
    let expected = match value {
        Value::Map(mut map) => {
            map.insert(
                "history".into(),
                Value::List(vec![
                    Value::from_entries([("name", Value::from("bob"))]),
                    root("carol", &["x", "y"]),
                ]),
            );
            Value::Map(map)
        }
        other => other,
    };
    assert_eq!(decoded, expected);
}

#[test]
fn lenient_numeric_input_narrows_on_decode() {
    let mapper = mapper();
    let value = Value::from_entries([
        ("quantity", Value::Int64(5)),
        ("price", Value::Int32(2)),
        ("color", Value::Int32(2)),
    ]);
    let bytes = encode(&mapper, "Item", &value).expect("编码");
    let decoded = decode(&mapper, "Item", &bytes).expect("解码");
    assert_eq!(decoded.get("quantity"), Some(&Value::Int32(5)));
    assert_eq!(decoded.get("price"), Some(&Value::Double(2.0)));
    assert_eq!(decoded.get("color"), Some(&Value::from("BLUE")));
}

#[test]
fn numeric_repeated_fields_are_packed() {
    let mapper = mapper();
    let value = Value::from_entries([(
        "samples",
        Value::List(vec![Value::Int64(1), Value::Int64(2), Value::Int64(300)]),
    )]);
    let bytes = encode(&mapper, "Item", &value).expect("编码");
    assert_eq!(bytes, [0x2a, 0x04, 0x01, 0x02, 0xac, 0x02]);
}

#[test]
fn unpacked_numeric_elements_are_accepted() {
    let mapper = mapper();
    // 字段 5 以非 packed 形式出现两次。
    let bytes = [0x28, 0x07, 0x28, 0x09];
    let decoded = decode(&mapper, "Item", &bytes).expect("解码");
    assert_eq!(
        decoded.get("samples"),
        Some(&Value::List(vec![Value::Int64(7), Value::Int64(9)]))
    );
}

#[test]
fn wrapped_root_decodes_into_primitive_array() {
    let mapper = mapper();
    let packed = Value::Packed(PackedArray::Int64(vec![1, 2, 300]));
    let bytes = encode(&mapper, "Samples", &packed).expect("编码");
    assert_eq!(bytes, [0x0a, 0x04, 0x01, 0x02, 0xac, 0x02]);

    let as_array = decode_as(&mapper, "Samples", &TypeDescriptor::Array, &bytes).expect("解码");
    assert_eq!(as_array, packed);

    let as_list = decode(&mapper, "Samples", &bytes).expect("解码");
    assert_eq!(
        as_list,
        Value::List(vec![Value::Int64(1), Value::Int64(2), Value::Int64(300)])
    );
}

#[test]
fn primitive_array_concatenates_repeated_occurrences() {
    let mapper = mapper();
    // packed [1, 2]，随后一个非 packed 元素 7，再一个 packed [5]。
    let bytes = [0x0a, 0x02, 0x01, 0x02, 0x08, 0x07, 0x0a, 0x01, 0x05];
    let decoded = decode_as(&mapper, "Samples", &TypeDescriptor::Array, &bytes).expect("解码");
    assert_eq!(decoded, Value::Packed(PackedArray::Int64(vec![1, 2, 7, 5])));
}

#[test]
fn wrapped_root_handles_null_and_scalars() {
    let mapper = mapper();
    let handle = mapper.message_handle("Title").expect("消息存在");
    assert!(handle.is_wrapped());

    assert!(encode(&mapper, "Title", &Value::Null).expect("编码").is_empty());
    assert_eq!(decode(&mapper, "Title", &[]).expect("解码"), Value::Null);

    let bytes = encode(&mapper, "Title", &Value::from("hi")).expect("编码");
    assert_eq!(bytes, [0x0a, 0x02, b'h', b'i']);
    assert_eq!(decode(&mapper, "Title", &bytes).expect("解码"), Value::from("hi"));
}

#[test]
fn unknown_enum_name_fails_encoding() {
    let mapper = mapper();
    let value = Value::from_entries([("color", Value::from("PURPLE"))]);
    let err = encode(&mapper, "Item", &value).unwrap_err();
    assert_eq!(err.code(), "protobuf.encode.unknown_enum");
}

#[test]
fn unknown_enum_ordinal_survives_as_number() {
    let mapper = mapper();
    let decoded = decode(&mapper, "Item", &[0x20, 0x09]).expect("解码");
    assert_eq!(decoded.get("color"), Some(&Value::Int32(9)));
}

#[test]
fn type_mismatch_names_the_field() {
    let mapper = mapper();
    let value = Value::from_entries([("quantity", Value::from("many"))]);
    let err = encode(&mapper, "Item", &value).unwrap_err();
    assert!(matches!(
        &err,
        ProtoError::TypeMismatch { field, .. } if field == "quantity"
    ));
}

#[test]
fn any_packs_known_messages_by_type_key() {
    let mapper = mapper();
    let packed = Value::from_entries([
        ("@type", Value::from("Root")),
        ("name", Value::from("inner")),
        ("tags", strings(&["t"])),
    ]);
    let value = Value::from_entries([("extra", packed.clone())]);
    let bytes = encode(&mapper, "Item", &value).expect("编码");

    let type_url = b"type.googleapis.com/demo.shop.Root";
    assert!(
        bytes.windows(type_url.len()).any(|window| window == type_url),
        "Any 应写入规范类型地址"
    );
    let decoded = decode(&mapper, "Item", &bytes).expect("解码");
    assert_eq!(decoded.get("extra"), Some(&packed));
}

#[test]
fn any_falls_back_to_json_for_plain_values() {
    let mapper = mapper();
    let payload = Value::from_entries([
        ("count", Value::Int64(2)),
        ("labels", strings(&["a", "b"])),
    ]);
    let value = Value::from_entries([("extra", payload.clone())]);
    let bytes = encode(&mapper, "Item", &value).expect("编码");
    let decoded = decode(&mapper, "Item", &bytes).expect("解码");
    assert_eq!(decoded.get("extra"), Some(&payload));

    let scalar = Value::from_entries([("extra", Value::Int32(-7))]);
    let bytes = encode(&mapper, "Item", &scalar).expect("编码");
    let decoded = decode(&mapper, "Item", &bytes).expect("解码");
    assert_eq!(decoded.get("extra"), Some(&Value::Int32(-7)));
}

#[test]
fn json_fallback_restores_nested_scalar_variants() {
    let mapper = mapper();
    let payload = Value::from_entries([(
        "v",
        Value::from_entries([
            ("n", Value::Int32(1)),
            ("u", Value::UInt32(4)),
            ("ratio", Value::Float(0.5)),
            ("blob", Value::Bytes(vec![0xde, 0xad])),
        ]),
    )]);
    let value = Value::from_entries([("extra", payload.clone())]);
    let bytes = encode(&mapper, "Item", &value).expect("编码");
    let decoded = decode(&mapper, "Item", &bytes).expect("解码");
    assert_eq!(decoded.get("extra"), Some(&payload));
}

#[test]
fn disabled_fallback_rejects_plain_values() {
    let config = ProtoMapperConfig::new(ProtoCodecOptions {
        json_fallback: false,
        ..ProtoCodecOptions::default()
    });
    let mapper = ProtoMapperFactory::new(config)
        .create_from_content(SHOP_IDL)
        .expect("加载 IDL");
    let value = Value::from_entries([("extra", Value::from("free text"))]);
    let err = encode(&mapper, "Item", &value).unwrap_err();
    assert_eq!(err.code(), "protobuf.any.fallback");
}

#[test]
fn any_with_unknown_type_url_fails_decoding() {
    let mapper = mapper();
    let type_url = b"type.googleapis.com/demo.shop.Ghost";
    let mut any = vec![0x0a, type_url.len() as u8];
    any.extend_from_slice(type_url);
    let mut bytes = vec![0x4a, any.len() as u8];
    bytes.extend_from_slice(&any);
    let err = decode(&mapper, "Item", &bytes).unwrap_err();
    assert_eq!(err.code(), "protobuf.decode.unknown_any");
}

#[test]
fn malformed_input_reports_decode_errors() {
    let mapper = mapper();

    let truncated = decode(&mapper, "Root", &[0x0a, 0x05, b'n']).unwrap_err();
    assert_eq!(truncated.code(), "protobuf.decode.truncated");

    let wire_type = decode(&mapper, "Root", &[0x08, 0x01]).unwrap_err();
    assert_eq!(wire_type.code(), "protobuf.decode.wire_type");

    let utf8 = decode(&mapper, "Root", &[0x0a, 0x02, 0xff, 0xfe]).unwrap_err();
    assert_eq!(utf8.code(), "protobuf.decode.utf8");
    assert_eq!(utf8.stage(), ErrorStage::Decode);
}

#[test]
fn nesting_beyond_the_limit_is_rejected() {
    let config = ProtoMapperConfig::new(ProtoCodecOptions {
        max_depth: 1,
        ..ProtoCodecOptions::default()
    });
    let mapper = ProtoMapperFactory::new(config)
        .create_from_content(SHOP_IDL)
        .expect("加载 IDL");
    // Any 信封占一层，信封内的消息体是第二层。
    let value = Value::from_entries([(
        "extra",
        Value::from_entries([("@type", Value::from("Root")), ("name", Value::from("deep"))]),
    )]);
    let bytes = encode(&mapper, "Item", &value).expect("编码不受深度限制");
    let err = decode(&mapper, "Item", &bytes).unwrap_err();
    assert_eq!(err.code(), "protobuf.decode.depth");
}

#[test]
fn missing_message_is_reported() {
    let mapper = mapper();
    let err = mapper.message_handle("Ghost").unwrap_err();
    assert_eq!(err.code(), "protobuf.compile.message_missing");
    assert!(mapper.message_handle("demo.shop.Root").is_ok());
}
