//! # any 模块说明
//!
//! ## 核心意图（Why）
//! - `google.protobuf.Any` 字段承载运行时才确定类型的值：类型在当前 Proto 中已知时打包为标准
//!   `type.googleapis.com/<全限定名>` 负载，其余值交给可替换的 [`AnyFallback`] 转成不透明字节；
//! - 回退委托通过 [`crate::config::ProtoMapperConfig`] 注入，默认实现 [`JsonAnyFallback`] 使用 JSON。
//!
//! ## 契约说明（What）
//! - 已知类型的判定：对象的 `BEAN_NAME`，或动态映射中 `@type` 键的值，与 Proto 中的消息同名；
//! - 回退负载的类型 URL 为 `json/<值标签>`；默认委托的 JSON 逐层携带变体标签，
//!   标签收窄只对丢失变体信息的自定义委托生效；
//! - 解码已知类型得到附带 `@type` 的动态映射（字段期望同名对象时直接得到对象）；
//!   标准前缀下的未知类型返回 [`ProtoError::UnknownAnyType`]。
//!
//! ## 风险提示（Trade-offs）
//! - 带标签的 JSON 比裸 JSON 冗长，换来嵌套值的变体在往返后保持不变；
//! - 未知对象先展开为快照再回退，解码侧得到的是动态映射而不是原对象。

use crate::bean::TypeDescriptor;
use crate::error::{ProtoError, Result};
use crate::mapper::ProtoMapper;
use crate::value::Value;
use crate::wire::{ProtoInput, ProtoOutput, WireType};

use super::expect_wire_type;

/// 标准 Any 类型 URL 前缀。
pub const TYPE_URL_PREFIX: &str = "type.googleapis.com/";
/// 回退负载的类型 URL 前缀。
pub const FALLBACK_URL_PREFIX: &str = "json/";
/// 动态映射中声明消息类型的键。
pub const TYPE_KEY: &str = "@type";

const TYPE_URL_FIELD: u32 = 1;
const VALUE_FIELD: u32 = 2;

/// Any 字段的通用回退委托。
///
/// 实现必须满足 `decode(encode(v)) == v`（在值标签收窄之后）。
pub trait AnyFallback: Send + Sync {
    /// 委托名称，用于日志与调试输出。
    fn name(&self) -> &'static str;

    fn encode(&self, value: &Value) -> Result<Vec<u8>>;

    fn decode(&self, bytes: &[u8]) -> Result<Value>;
}

/// 基于 `serde_json` 的默认回退。
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonAnyFallback;

impl AnyFallback for JsonAnyFallback {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        let json = value.to_json()?;
        serde_json::to_vec(&json).map_err(|err| ProtoError::Fallback {
            type_url: format!("{FALLBACK_URL_PREFIX}{}", value.kind()),
            detail: err.to_string(),
        })
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        serde_json::from_slice(bytes)
            .map_err(|err| ProtoError::Fallback {
                type_url: FALLBACK_URL_PREFIX.to_owned(),
                detail: err.to_string(),
            })
            .and_then(Value::from_json)
    }
}

/// 写出 Any 消息体 `{1: type_url, 2: value}`。
pub(crate) fn write_any(
    out: &mut ProtoOutput,
    value: &Value,
    field: &str,
    mapper: &ProtoMapper,
) -> Result<()> {
    let (type_url, payload) = match known_message(value, mapper) {
        Some(index) => {
            let writer = mapper.writer(index);
            let mut body = ProtoOutput::new();
            writer.write(&mut body, value, mapper)?;
            (
                format!("{TYPE_URL_PREFIX}{}", mapper.proto().canonical_name(writer.name())),
                body,
            )
        }
        None => fallback_payload(value, field, mapper)?,
    };
    out.write_tag(TYPE_URL_FIELD, WireType::LengthDelimited);
    out.write_str(&type_url);
    out.write_tag(VALUE_FIELD, WireType::LengthDelimited);
    out.write_bytes(payload.as_slice());
    Ok(())
}

fn known_message(value: &Value, mapper: &ProtoMapper) -> Option<usize> {
    let name = match value {
        Value::Bean(bean) => bean.bean_type().name(),
        Value::Map(map) => map.get(TYPE_KEY)?.as_str()?,
        _ => return None,
    };
    mapper.message_index(mapper.proto().short_name(name))
}

fn fallback_payload(
    value: &Value,
    field: &str,
    mapper: &ProtoMapper,
) -> Result<(String, ProtoOutput)> {
    let label = match value {
        Value::Bean(bean) => bean.bean_type().name(),
        other => other.kind(),
    };
    let type_url = format!("{FALLBACK_URL_PREFIX}{label}");
    if !mapper.config().options().json_fallback {
        return Err(ProtoError::Fallback {
            type_url,
            detail: format!("field `{field}`: generic fallback is disabled"),
        });
    }
    let snapshot;
    let value = if matches!(value, Value::Bean(_)) || contains_bean(value) {
        snapshot = mapper.beans().snapshot_value(value);
        &snapshot
    } else {
        value
    };
    let bytes = mapper.config().fallback().encode(value)?;
    let mut body = ProtoOutput::with_capacity(bytes.len());
    body.write_raw(&bytes);
    Ok((type_url, body))
}

fn contains_bean(value: &Value) -> bool {
    match value {
        Value::Bean(_) => true,
        Value::List(items) => items.iter().any(contains_bean),
        Value::Map(map) => map.values().any(contains_bean),
        _ => false,
    }
}

/// 读取 Any 消息体。
pub(crate) fn read_any(
    input: &mut ProtoInput<'_>,
    target: &TypeDescriptor,
    field: &str,
    mapper: &ProtoMapper,
) -> Result<Value> {
    let mut type_url = String::new();
    let mut payload: &[u8] = &[];
    while let Some((number, wire_type)) = input.read_tag()? {
        match number {
            TYPE_URL_FIELD => {
                expect_wire_type(field, WireType::LengthDelimited, wire_type)?;
                type_url = input.read_str(field)?.to_owned();
            }
            VALUE_FIELD => {
                expect_wire_type(field, WireType::LengthDelimited, wire_type)?;
                payload = input.read_length_delimited()?;
            }
            other => input.skip_field(other, wire_type)?,
        }
    }

    if let Some(label) = type_url.strip_prefix(FALLBACK_URL_PREFIX) {
        let decoded = mapper.config().fallback().decode(payload)?;
        return narrow(decoded, label, &type_url);
    }
    let canonical = type_url.strip_prefix(TYPE_URL_PREFIX).unwrap_or(&type_url);
    let short = mapper.proto().short_name(canonical);
    let Some(index) = mapper.message_index(short) else {
        return Err(ProtoError::UnknownAnyType { type_url });
    };

    let wants_bean = matches!(target, TypeDescriptor::Bean(bean) if bean.name() == short);
    let descriptor = if wants_bean {
        target.clone()
    } else {
        TypeDescriptor::Dynamic
    };
    let plan = mapper.reader_plan(index, &descriptor)?;
    let mut body = input.nested(payload)?;
    let mut value = plan.read(&mut body, mapper)?;
    if let Value::Map(map) = &mut value {
        map.insert(TYPE_KEY.to_owned(), Value::String(short.to_owned()));
    }
    Ok(value)
}

/// 按回退标签把 JSON 还原值收窄为编码前的变体。
fn narrow(value: Value, label: &str, type_url: &str) -> Result<Value> {
    if value.kind() == label {
        return Ok(value);
    }
    let invalid = |value: &Value| ProtoError::Fallback {
        type_url: type_url.to_owned(),
        detail: format!("{} does not fit label `{label}`", value.kind()),
    };
    let narrowed = match label {
        "int32" => Value::Int32(
            value
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .ok_or_else(|| invalid(&value))?,
        ),
        "uint32" => Value::UInt32(
            value
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| invalid(&value))?,
        ),
        "int64" => Value::Int64(value.as_i64().ok_or_else(|| invalid(&value))?),
        "uint64" => Value::UInt64(value.as_u64().ok_or_else(|| invalid(&value))?),
        "float" => Value::Float(value.as_f64().ok_or_else(|| invalid(&value))? as f32),
        "double" => Value::Double(value.as_f64().ok_or_else(|| invalid(&value))?),
        "bytes" => {
            let text = value.as_str().ok_or_else(|| invalid(&value))?;
            Value::Bytes(hex::decode(text).map_err(|_| invalid(&value))?)
        }
        _ => value,
    };
    Ok(narrowed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_fallback_round_trips_structures() {
        let fallback = JsonAnyFallback;
        let value = Value::from_entries([
            ("name", Value::from("ada")),
            ("scores", Value::List(vec![Value::Int64(1), Value::Int64(2)])),
        ]);
        let bytes = fallback.encode(&value).expect("编码");
        assert_eq!(fallback.decode(&bytes).expect("解码"), value);
    }

    #[test]
    fn json_fallback_keeps_nested_variants() {
        let fallback = JsonAnyFallback;
        let value = Value::from_entries([(
            "v",
            Value::from_entries([
                ("n", Value::Int32(1)),
                ("ratio", Value::Float(0.25)),
                ("blob", Value::Bytes(vec![1, 2, 3])),
            ]),
        )]);
        let bytes = fallback.encode(&value).expect("编码");
        let decoded = fallback.decode(&bytes).expect("解码");
        assert_eq!(narrow(decoded, "map", "json/map").expect("收窄"), value);
    }

    #[test]
    fn labels_restore_exact_scalars() {
        let url = "json/int32";
        assert_eq!(narrow(Value::Int64(7), "int32", url).expect("收窄"), Value::Int32(7));
        assert_eq!(
            narrow(Value::from("0a0b"), "bytes", url).expect("收窄"),
            Value::Bytes(vec![10, 11])
        );
        assert_eq!(narrow(Value::Int64(3), "float", url).expect("收窄"), Value::Float(3.0));
        assert!(narrow(Value::Int64(i64::MAX), "int32", url).is_err());
        assert_eq!(narrow(Value::from("x"), "string", url).expect("原样"), Value::from("x"));
    }
}
