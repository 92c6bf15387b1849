//! 重复字段编解码。
//!
//! 可 packed 的元素（数值、布尔、枚举）写出为单个长度前缀块；其余元素逐个带标签写出。
//! 读取时两种形式都接受，同一字段多次出现的元素按到达顺序追加到同一个容器。

use std::borrow::Cow;

use crate::error::{ProtoError, Result};
use crate::mapper::ProtoMapper;
use crate::schema::ScalarType;
use crate::value::Value;
use crate::wire::{ProtoInput, ProtoOutput, WireType};

use super::scalar::empty_packed;
use super::{ElementCodec, ReadContext, ReadElement, expect_wire_type};

/// 写出集合或原始数组；空集合不产生任何字节。
pub(crate) fn write_repeated(
    out: &mut ProtoOutput,
    number: u32,
    element: &ElementCodec,
    value: &Value,
    field: &str,
    mapper: &ProtoMapper,
) -> Result<()> {
    let items: Cow<'_, [Value]> = match value {
        Value::List(items) => Cow::Borrowed(items),
        Value::Packed(array) => Cow::Owned(array.to_values()),
        other => return Err(ProtoError::mismatch(field, "repeated", other.kind())),
    };
    if items.is_empty() {
        return Ok(());
    }
    if items.iter().any(Value::is_null) {
        return Err(ProtoError::NullElement {
            field: field.to_owned(),
        });
    }

    if element.is_packable() {
        let mut packed = ProtoOutput::new();
        for item in items.iter() {
            element.write_value(&mut packed, item, field, mapper)?;
        }
        out.write_tag(number, WireType::LengthDelimited);
        out.write_bytes(packed.as_slice());
    } else {
        for item in items.iter() {
            element.write_field(out, number, item, field, mapper)?;
        }
    }
    Ok(())
}

/// 读取一次出现（packed 块或单个元素）并追加到 `slot`。
///
/// `packed` 为 `Some` 时容器使用原始数组，否则使用集合。
pub(crate) fn read_repeated(
    input: &mut ProtoInput<'_>,
    wire_type: WireType,
    element: &ReadElement,
    packed: Option<ScalarType>,
    slot: &mut Option<Value>,
    field: &str,
    cx: &ReadContext<'_>,
) -> Result<()> {
    if element.is_packable() && wire_type == WireType::LengthDelimited {
        let payload = input.read_length_delimited()?;
        let mut block = input.nested(payload)?;
        while !block.is_empty() {
            let item = element.read_value(&mut block, field, cx)?;
            append(slot, item, packed, field)?;
        }
        return Ok(());
    }
    expect_wire_type(field, element.wire_type(), wire_type)?;
    let item = element.read_value(input, field, cx)?;
    append(slot, item, packed, field)
}

fn append(
    slot: &mut Option<Value>,
    item: Value,
    packed: Option<ScalarType>,
    field: &str,
) -> Result<()> {
    let container = slot.get_or_insert_with(|| {
        packed
            .and_then(empty_packed)
            .map_or_else(|| Value::List(Vec::new()), Value::Packed)
    });
    match container {
        Value::List(items) => {
            items.push(item);
            Ok(())
        }
        Value::Packed(array) => {
            let kind = item.kind();
            if array.push(item) {
                Ok(())
            } else {
                Err(ProtoError::malformed(format!(
                    "field `{field}`: {kind} element does not fit primitive array"
                )))
            }
        }
        other => Err(ProtoError::mismatch(field, "repeated", other.kind())),
    }
}
