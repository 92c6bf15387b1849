//! 编解码性质测试
//!
//! # 教案级注释概览
//!
//! - **测试目标 (Why)**：示例驱动的测试只覆盖手选的值；这里用 Proptest 在整个取值域上验证两条性质：
//!   1. 任意合法动态值编码后再解码得到原值（含 zigzag、定长与 packed 编码的边界值）；
//!   2. 任意字节输入只会得到 `Ok` 或结构化错误，解码器绝不 panic。
//! - **结构安排 (How)**：`scalars()` 生成覆盖全部标量字段的消息值，`bytes()` 生成任意输入；
//!   映射器在每个用例中按需构建，不依赖共享可变状态。

use std::sync::Arc;

use proptest::collection::{btree_map, vec};
use proptest::prelude::*;
use spark_codec_protobuf::{ProtoMapper, ProtoMapperFactory, TypeDescriptor, Value};

const SCALARS_IDL: &str = r#"syntax = "proto3";

message Scalars {
  int32 a_int32 = 1;
  int64 a_int64 = 2;
  uint32 a_uint32 = 3;
  uint64 a_uint64 = 4;
  sint32 a_sint32 = 5;
  sint64 a_sint64 = 6;
  fixed32 a_fixed32 = 7;
  fixed64 a_fixed64 = 8;
  sfixed32 a_sfixed32 = 9;
  sfixed64 a_sfixed64 = 10;
  bool a_bool = 11;
  string a_string = 12;
  bytes a_bytes = 13;
  repeated sint64 packed = 14;
  map<int32, string> by_id = 15;
  repeated Scalars children = 16;
  double a_double = 17;
}
"#;

fn mapper() -> Arc<ProtoMapper> {
    ProtoMapperFactory::default()
        .create_from_content(SCALARS_IDL)
        .expect("加载 IDL")
}

fn leaf() -> impl Strategy<Value = Vec<(&'static str, Value)>> {
    (
        (any::<i32>(), any::<i64>(), any::<u32>(), any::<u64>()),
        (any::<i32>(), any::<i64>(), any::<u32>(), any::<u64>()),
        (any::<i32>(), any::<i64>(), any::<bool>(), ".{0,16}"),
        (vec(any::<u8>(), 0..16), vec(any::<i64>(), 1..8)),
        (
            btree_map(any::<i32>(), "[a-z]{0,8}", 0..4),
            any::<f64>().prop_filter("NaN 无法参与相等比较", |v| !v.is_nan()),
        ),
    )
        .prop_map(|(unsigned, signed, mixed, blobs, extra)| {
            let (a, b, c, d) = unsigned;
            let (e, f, g, h) = signed;
            let (i, j, flag, text) = mixed;
            let (bytes, packed) = blobs;
            let (by_id, double) = extra;
            vec![
                ("a_int32", Value::Int32(a)),
                ("a_int64", Value::Int64(b)),
                ("a_uint32", Value::UInt32(c)),
                ("a_uint64", Value::UInt64(d)),
                ("a_sint32", Value::Int32(e)),
                ("a_sint64", Value::Int64(f)),
                ("a_fixed32", Value::UInt32(g)),
                ("a_fixed64", Value::UInt64(h)),
                ("a_sfixed32", Value::Int32(i)),
                ("a_sfixed64", Value::Int64(j)),
                ("a_bool", Value::Bool(flag)),
                ("a_string", Value::String(text)),
                ("a_bytes", Value::Bytes(bytes)),
                (
                    "packed",
                    Value::List(packed.into_iter().map(Value::Int64).collect()),
                ),
                (
                    "by_id",
                    Value::from_entries(
                        by_id
                            .into_iter()
                            .map(|(key, name)| (key.to_string(), Value::String(name))),
                    ),
                ),
                ("a_double", Value::Double(double)),
            ]
        })
}

fn scalars() -> impl Strategy<Value = Value> {
    (leaf(), vec(leaf(), 0..3)).prop_map(|(mut fields, children)| {
        if !children.is_empty() {
            fields.push((
                "children",
                Value::List(children.into_iter().map(Value::from_entries).collect()),
            ));
        }
        Value::from_entries(fields)
    })
}

/// 空映射不会写出任何条目，解码后该键缺席。
fn drop_empty_maps(value: Value) -> Value {
    match value {
        Value::Map(map) => Value::Map(
            map.into_iter()
                .filter(|(_, item)| !matches!(item, Value::Map(inner) if inner.is_empty()))
                .map(|(key, item)| (key, drop_empty_maps(item)))
                .collect(),
        ),
        Value::List(items) => Value::List(items.into_iter().map(drop_empty_maps).collect()),
        other => other,
    }
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 128, .. ProptestConfig::default() })]

    #[test]
    fn prop_dynamic_values_round_trip(value in scalars()) {
        let mapper = mapper();
        let handle = mapper.message_handle("Scalars").expect("消息存在");
        let bytes = handle
            .writer_for(&TypeDescriptor::Dynamic)
            .and_then(|writer| writer.serialize(&value))
            .expect("编码");
        let decoded = handle
            .reader_for(&TypeDescriptor::Dynamic)
            .and_then(|reader| reader.deserialize(&bytes))
            .expect("解码");
        prop_assert_eq!(decoded, drop_empty_maps(value));
    }

    #[test]
    fn prop_arbitrary_bytes_never_panic(bytes in vec(any::<u8>(), 0..256)) {
        let mapper = mapper();
        let reader = mapper
            .message_handle("Scalars")
            .and_then(|handle| handle.reader_for(&TypeDescriptor::Dynamic))
            .expect("解码器");
        if let Err(err) = reader.deserialize(&bytes) {
            prop_assert!(err.code().starts_with("protobuf.decode."), "意外错误码: {}", err.code());
        }
    }
}
