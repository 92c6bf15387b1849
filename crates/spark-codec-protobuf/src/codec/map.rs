//! `map<K, V>` 字段编解码。
//!
//! 每个条目写作一个长度前缀的子消息 `{1: key, 2: value}`。运行时映射以字符串为键，
//! 写出时按声明的键类型解析，读取时再格式化回字符串。值为 `Null` 的条目在编码时跳过。

use std::collections::BTreeMap;

use crate::error::{ProtoError, Result};
use crate::mapper::ProtoMapper;
use crate::schema::ScalarType;
use crate::value::Value;
use crate::wire::{ProtoInput, ProtoOutput, WireType};

use super::scalar::{default_value, format_map_key, parse_map_key, read_scalar, write_scalar};
use super::{ElementCodec, ReadContext, ReadElement, expect_wire_type};

const KEY_FIELD: u32 = 1;
const VALUE_FIELD: u32 = 2;

pub(crate) fn write_map(
    out: &mut ProtoOutput,
    number: u32,
    key: ScalarType,
    element: &ElementCodec,
    value: &Value,
    field: &str,
    mapper: &ProtoMapper,
) -> Result<()> {
    let Value::Map(entries) = value else {
        return Err(ProtoError::mismatch(field, "map", value.kind()));
    };
    for (raw_key, item) in entries {
        if item.is_null() {
            continue;
        }
        let key_value = parse_map_key(key, raw_key, field)?;
        let mut entry = ProtoOutput::new();
        entry.write_tag(KEY_FIELD, key.wire_type());
        write_scalar(&mut entry, key, &key_value, field)?;
        element.write_field(&mut entry, VALUE_FIELD, item, field, mapper)?;
        out.write_tag(number, WireType::LengthDelimited);
        out.write_bytes(entry.as_slice());
    }
    Ok(())
}

/// 读取一个条目并合并进 `slot`；重复的键以后到者为准。
pub(crate) fn read_map_entry(
    input: &mut ProtoInput<'_>,
    wire_type: WireType,
    key: ScalarType,
    element: &ReadElement,
    slot: &mut Option<Value>,
    field: &str,
    cx: &ReadContext<'_>,
) -> Result<()> {
    expect_wire_type(field, WireType::LengthDelimited, wire_type)?;
    let payload = input.read_length_delimited()?;
    let mut entry = input.nested(payload)?;

    let mut entry_key = None;
    let mut entry_value = None;
    while let Some((number, actual)) = entry.read_tag()? {
        match number {
            KEY_FIELD => {
                expect_wire_type(field, key.wire_type(), actual)?;
                entry_key = Some(read_scalar(&mut entry, key, field)?);
            }
            VALUE_FIELD => {
                expect_wire_type(field, element.wire_type(), actual)?;
                entry_value = Some(element.read_value(&mut entry, field, cx)?);
            }
            other => entry.skip_field(other, actual)?,
        }
    }

    let entry_key = entry_key.unwrap_or_else(|| default_value(key));
    let entry_value = match entry_value {
        Some(value) => value,
        None => missing_value(&entry, element, cx)?,
    };
    let container = slot.get_or_insert_with(|| Value::Map(BTreeMap::new()));
    match container {
        Value::Map(map) => {
            map.insert(format_map_key(&entry_key), entry_value);
            Ok(())
        }
        other => Err(ProtoError::mismatch(field, "map", other.kind())),
    }
}

/// 条目缺少值时的默认值：消息取空消息，枚举取首个值，Any 取 `Null`。
fn missing_value(
    entry: &ProtoInput<'_>,
    element: &ReadElement,
    cx: &ReadContext<'_>,
) -> Result<Value> {
    match element {
        ReadElement::Scalar(scalar) => Ok(default_value(*scalar)),
        ReadElement::Enum(table) => Ok(table.value_of(0)),
        ReadElement::Message(reader) => {
            let mut empty = entry.nested(&[])?;
            cx.plan.read_with(*reader, &mut empty, cx.mapper)
        }
        ReadElement::Any(_) => Ok(Value::Null),
    }
}
