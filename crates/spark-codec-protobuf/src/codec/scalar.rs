//! 标量字段编解码。
//!
//! 写入时按声明类型接受能无损表示的数值变体；浮点类型额外接受任意数值并做精度转换。
//! 读取时产出与声明类型对应的确定变体，例如 `sint32` 总是得到 [`Value::Int32`]。

use crate::error::{ProtoError, Result};
use crate::schema::ScalarType;
use crate::value::{PackedArray, Value};
use crate::wire::{ProtoInput, ProtoOutput};

/// 写出不带标签的标量值。
pub fn write_scalar(
    out: &mut ProtoOutput,
    scalar: ScalarType,
    value: &Value,
    field: &str,
) -> Result<()> {
    let mismatch = || ProtoError::mismatch(field, scalar.name(), value.kind());
    match scalar {
        ScalarType::Bool => match value {
            Value::Bool(v) => out.write_bool(*v),
            _ => return Err(mismatch()),
        },
        ScalarType::Int32 => out.write_int32(as_i32(value).ok_or_else(mismatch)?),
        ScalarType::SInt32 => out.write_sint32(as_i32(value).ok_or_else(mismatch)?),
        ScalarType::SFixed32 => out.write_sfixed32(as_i32(value).ok_or_else(mismatch)?),
        ScalarType::Int64 => out.write_int64(value.as_i64().ok_or_else(mismatch)?),
        ScalarType::SInt64 => out.write_sint64(value.as_i64().ok_or_else(mismatch)?),
        ScalarType::SFixed64 => out.write_sfixed64(value.as_i64().ok_or_else(mismatch)?),
        ScalarType::UInt32 => out.write_uint32(as_u32(value).ok_or_else(mismatch)?),
        ScalarType::Fixed32 => out.write_fixed32(as_u32(value).ok_or_else(mismatch)?),
        ScalarType::UInt64 => out.write_uint64(value.as_u64().ok_or_else(mismatch)?),
        ScalarType::Fixed64 => out.write_fixed64(value.as_u64().ok_or_else(mismatch)?),
        ScalarType::Float => out.write_float(value.as_f64().ok_or_else(mismatch)? as f32),
        ScalarType::Double => out.write_double(value.as_f64().ok_or_else(mismatch)?),
        ScalarType::String => match value {
            Value::String(text) => out.write_str(text),
            _ => return Err(mismatch()),
        },
        ScalarType::Bytes => match value {
            Value::Bytes(bytes) => out.write_bytes(bytes),
            _ => return Err(mismatch()),
        },
    }
    Ok(())
}

/// 读取不带标签的标量值。
pub fn read_scalar(input: &mut ProtoInput<'_>, scalar: ScalarType, field: &str) -> Result<Value> {
    let value = match scalar {
        ScalarType::Bool => Value::Bool(input.read_bool()?),
        ScalarType::Int32 => Value::Int32(input.read_int32()?),
        ScalarType::SInt32 => Value::Int32(input.read_sint32()?),
        ScalarType::SFixed32 => Value::Int32(input.read_sfixed32()?),
        ScalarType::Int64 => Value::Int64(input.read_int64()?),
        ScalarType::SInt64 => Value::Int64(input.read_sint64()?),
        ScalarType::SFixed64 => Value::Int64(input.read_sfixed64()?),
        ScalarType::UInt32 => Value::UInt32(input.read_uint32()?),
        ScalarType::Fixed32 => Value::UInt32(input.read_fixed32()?),
        ScalarType::UInt64 => Value::UInt64(input.read_uint64()?),
        ScalarType::Fixed64 => Value::UInt64(input.read_fixed64()?),
        ScalarType::Float => Value::Float(input.read_float()?),
        ScalarType::Double => Value::Double(input.read_double()?),
        ScalarType::String => Value::String(input.read_str(field)?.to_owned()),
        ScalarType::Bytes => Value::Bytes(input.read_length_delimited()?.to_vec()),
    };
    Ok(value)
}

/// 映射条目缺少键或值时使用的默认值。
pub fn default_value(scalar: ScalarType) -> Value {
    match scalar {
        ScalarType::Bool => Value::Bool(false),
        ScalarType::Int32 | ScalarType::SInt32 | ScalarType::SFixed32 => Value::Int32(0),
        ScalarType::Int64 | ScalarType::SInt64 | ScalarType::SFixed64 => Value::Int64(0),
        ScalarType::UInt32 | ScalarType::Fixed32 => Value::UInt32(0),
        ScalarType::UInt64 | ScalarType::Fixed64 => Value::UInt64(0),
        ScalarType::Float => Value::Float(0.0),
        ScalarType::Double => Value::Double(0.0),
        ScalarType::String => Value::String(String::new()),
        ScalarType::Bytes => Value::Bytes(Vec::new()),
    }
}

/// 为可 packed 的标量创建空的原始数组。
pub fn empty_packed(scalar: ScalarType) -> Option<PackedArray> {
    let array = match scalar {
        ScalarType::Bool => PackedArray::Bool(Vec::new()),
        ScalarType::Int32 | ScalarType::SInt32 | ScalarType::SFixed32 => {
            PackedArray::Int32(Vec::new())
        }
        ScalarType::Int64 | ScalarType::SInt64 | ScalarType::SFixed64 => {
            PackedArray::Int64(Vec::new())
        }
        ScalarType::UInt32 | ScalarType::Fixed32 => PackedArray::UInt32(Vec::new()),
        ScalarType::UInt64 | ScalarType::Fixed64 => PackedArray::UInt64(Vec::new()),
        ScalarType::Float => PackedArray::Float(Vec::new()),
        ScalarType::Double => PackedArray::Double(Vec::new()),
        ScalarType::String | ScalarType::Bytes => return None,
    };
    Some(array)
}

/// 映射键以字符串保存，写出时按声明类型解析。
pub fn parse_map_key(scalar: ScalarType, key: &str, field: &str) -> Result<Value> {
    let invalid = || ProtoError::mismatch(field, format!("{} map key", scalar.name()), key);
    let value = match scalar {
        ScalarType::String => Value::String(key.to_owned()),
        ScalarType::Bool => Value::Bool(key.parse().map_err(|_| invalid())?),
        ScalarType::Int32 | ScalarType::SInt32 | ScalarType::SFixed32 => {
            Value::Int32(key.parse().map_err(|_| invalid())?)
        }
        ScalarType::Int64 | ScalarType::SInt64 | ScalarType::SFixed64 => {
            Value::Int64(key.parse().map_err(|_| invalid())?)
        }
        ScalarType::UInt32 | ScalarType::Fixed32 => {
            Value::UInt32(key.parse().map_err(|_| invalid())?)
        }
        ScalarType::UInt64 | ScalarType::Fixed64 => {
            Value::UInt64(key.parse().map_err(|_| invalid())?)
        }
        ScalarType::Float | ScalarType::Double | ScalarType::Bytes => return Err(invalid()),
    };
    Ok(value)
}

/// 解码得到的映射键转回字符串。
pub fn format_map_key(key: &Value) -> String {
    match key {
        Value::String(text) => text.clone(),
        Value::Bool(v) => v.to_string(),
        Value::Int32(v) => v.to_string(),
        Value::Int64(v) => v.to_string(),
        Value::UInt32(v) => v.to_string(),
        Value::UInt64(v) => v.to_string(),
        other => other.kind().to_owned(),
    }
}

fn as_i32(value: &Value) -> Option<i32> {
    value.as_i64().and_then(|v| i32::try_from(v).ok())
}

fn as_u32(value: &Value) -> Option<u32> {
    value.as_u64().and_then(|v| u32::try_from(v).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(scalar: ScalarType, value: Value) -> Value {
        let mut out = ProtoOutput::new();
        write_scalar(&mut out, scalar, &value, "f").expect("写出标量");
        let bytes = out.freeze();
        let mut input = ProtoInput::new(&bytes, 4);
        let decoded = read_scalar(&mut input, scalar, "f").expect("读取标量");
        assert!(input.is_empty());
        decoded
    }

    #[test]
    fn narrows_to_declared_variant() {
        assert_eq!(round_trip(ScalarType::SInt32, Value::Int64(-3)), Value::Int32(-3));
        assert_eq!(round_trip(ScalarType::Fixed64, Value::Int32(7)), Value::UInt64(7));
        assert_eq!(round_trip(ScalarType::Double, Value::Int32(2)), Value::Double(2.0));
        assert_eq!(
            round_trip(ScalarType::Bytes, Value::Bytes(vec![0, 1, 2])),
            Value::Bytes(vec![0, 1, 2])
        );
    }

    #[test]
    fn rejects_lossy_or_foreign_values() {
        let mut out = ProtoOutput::new();
        let err = write_scalar(&mut out, ScalarType::Int32, &Value::Int64(i64::MAX), "age")
            .unwrap_err();
        assert_eq!(err.code(), "protobuf.encode.type_mismatch");
        let err = write_scalar(&mut out, ScalarType::UInt64, &Value::Int32(-1), "count")
            .unwrap_err();
        assert!(matches!(err, ProtoError::TypeMismatch { ref field, .. } if field == "count"));
        assert!(write_scalar(&mut out, ScalarType::String, &Value::Int32(1), "name").is_err());
    }

    #[test]
    fn map_keys_parse_and_format() {
        let key = parse_map_key(ScalarType::Int64, "-12", "m").expect("解析键");
        assert_eq!(key, Value::Int64(-12));
        assert_eq!(format_map_key(&key), "-12");
        assert!(parse_map_key(ScalarType::Int32, "x", "m").is_err());
    }
}
