//! 枚举字段编解码。
//!
//! 枚举以序号写出：运行时值可以是枚举名字符串，也可以直接是序号。
//! 解码时已知序号还原为名称，未知序号保留为 [`Value::Int32`]，与 proto3 开放枚举的语义一致。

use std::collections::HashMap;

use crate::error::{ProtoError, Result};
use crate::schema::EnumDef;
use crate::value::Value;

/// 编译后的枚举表。
#[derive(Debug)]
pub struct EnumTable {
    name: String,
    values: Vec<String>,
    ordinals: HashMap<String, i32>,
}

impl EnumTable {
    pub fn new(name: impl Into<String>, values: Vec<String>) -> Self {
        let ordinals = values
            .iter()
            .enumerate()
            .filter_map(|(index, value)| Some((value.clone(), i32::try_from(index).ok()?)))
            .collect();
        Self {
            name: name.into(),
            values,
            ordinals,
        }
    }

    pub fn from_def(def: &EnumDef) -> Self {
        Self::new(def.name.clone(), def.values.clone())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// 运行时值对应的序号。
    pub fn ordinal_of(&self, value: &Value, field: &str) -> Result<i32> {
        match value {
            Value::String(text) => {
                self.ordinals
                    .get(text)
                    .copied()
                    .ok_or_else(|| ProtoError::UnknownEnumValue {
                        field: field.to_owned(),
                        enum_name: self.name.clone(),
                        value: text.clone(),
                    })
            }
            other => other
                .as_i64()
                .and_then(|ordinal| i32::try_from(ordinal).ok())
                .ok_or_else(|| ProtoError::mismatch(field, self.name.as_str(), other.kind())),
        }
    }

    /// 序号对应的运行时值。
    pub fn value_of(&self, ordinal: i32) -> Value {
        usize::try_from(ordinal)
            .ok()
            .and_then(|index| self.values.get(index))
            .map_or(Value::Int32(ordinal), |name| Value::String(name.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> EnumTable {
        EnumTable::new("Color", vec!["RED".to_owned(), "GREEN".to_owned()])
    }

    #[test]
    fn names_map_to_ordinals() {
        let table = table();
        assert_eq!(table.ordinal_of(&Value::from("GREEN"), "color").expect("序号"), 1);
        assert_eq!(table.ordinal_of(&Value::Int64(0), "color").expect("序号"), 0);
        assert_eq!(table.value_of(1), Value::from("GREEN"));
    }

    #[test]
    fn unknown_names_fail_and_unknown_ordinals_survive() {
        let table = table();
        let err = table.ordinal_of(&Value::from("BLUE"), "color").unwrap_err();
        assert_eq!(err.code(), "protobuf.encode.unknown_enum");
        assert_eq!(table.value_of(9), Value::Int32(9));
        assert_eq!(table.value_of(-1), Value::Int32(-1));
    }
}
