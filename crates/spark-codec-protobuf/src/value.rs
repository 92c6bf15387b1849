//! # value 模块说明
//!
//! ## 核心意图（Why）
//! - 为“动态键值映射”这一运行时表示提供统一货币：解码到 `TypeDescriptor::Dynamic` 时产出 [`Value::Map`]，
//!   Bean 访问器的 getter/setter 也以 [`Value`] 交换字段值；
//! - 原始数组（[`PackedArray`]）与可增长集合（[`Value::List`]）区分表示，对应两种不同的重复字段策略。
//!
//! ## 契约说明（What）
//! - `Value` 可克隆、可比较，`Value::Bean` 通过 [`Bean`] 的对象安全方法实现克隆与比较；
//! - `Value::Map` 使用 `BTreeMap`，相等性与字段顺序无关，便于往返测试；
//! - JSON 桥接（`to_json`/`from_json`）供 Any 字段的通用回退使用，逐层携带变体标签，`Bean` 必须先展开为快照。

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::bean::{Bean, Describe};
use crate::error::{ProtoError, Result};

/// 运行时值。
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    UInt32(u32),
    UInt64(u64),
    Float(f32),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    /// 可增长的有序集合。
    List(Vec<Value>),
    /// 定长原始数组，对应 packed 重复字段。
    Packed(PackedArray),
    /// 动态消息或 `map<string, V>` 字段。
    Map(BTreeMap<String, Value>),
    /// 强类型对象。
    Bean(BeanValue),
}

impl Value {
    /// 值的类型标签，用于错误信息与 Any 回退的类型标识。
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int32(_) => "int32",
            Value::Int64(_) => "int64",
            Value::UInt32(_) => "uint32",
            Value::UInt64(_) => "uint64",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Packed(_) => "packed",
            Value::Map(_) => "map",
            Value::Bean(_) => "bean",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// 由键值对构造 [`Value::Map`]。
    pub fn from_entries<K, I>(entries: I) -> Value
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Map(
            entries
                .into_iter()
                .map(|(key, value)| (key.into(), value))
                .collect(),
        )
    }

    /// 将强类型对象包装为值。
    pub fn bean<T: Describe>(bean: T) -> Value {
        Value::Bean(BeanValue::new(bean))
    }

    /// 还原强类型对象；`Null` 视为该类型的默认值。
    pub fn into_bean<T: Describe>(self) -> Result<T> {
        match self {
            Value::Null => Ok(T::default()),
            Value::Bean(bean) => bean.downcast::<T>(),
            other => Err(ProtoError::mismatch("<value>", T::BEAN_NAME, other.kind())),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// 在 [`Value::Map`] 中按键查找。
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|map| map.get(key))
    }

    /// 无损转换为 `i64`。
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Int32(v) => Some(i64::from(v)),
            Value::Int64(v) => Some(v),
            Value::UInt32(v) => Some(i64::from(v)),
            Value::UInt64(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    /// 无损转换为 `u64`。
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Value::Int32(v) => u64::try_from(v).ok(),
            Value::Int64(v) => u64::try_from(v).ok(),
            Value::UInt32(v) => Some(u64::from(v)),
            Value::UInt64(v) => Some(v),
            _ => None,
        }
    }

    /// 转换为 `f64`，整数按数值提升。
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Float(v) => Some(f64::from(v)),
            Value::Double(v) => Some(v),
            Value::Int32(v) => Some(f64::from(v)),
            Value::UInt32(v) => Some(f64::from(v)),
            Value::Int64(v) => Some(v as f64),
            Value::UInt64(v) => Some(v as f64),
            _ => None,
        }
    }

    /// 展开为元素列表，`Packed` 会被逐个转换，`Null` 视为空列表。
    pub fn into_list(self) -> Result<Vec<Value>> {
        match self {
            Value::Null => Ok(Vec::new()),
            Value::List(items) => Ok(items),
            Value::Packed(array) => Ok(array.to_values()),
            other => Err(ProtoError::mismatch("<value>", "list", other.kind())),
        }
    }

    /// 展开为强类型元素列表。
    pub fn into_vec<T>(self) -> Result<Vec<T>>
    where
        T: TryFrom<Value, Error = ProtoError>,
    {
        self.into_list()?.into_iter().map(T::try_from).collect()
    }

    /// 展开为强类型对象列表。
    pub fn into_beans<T: Describe>(self) -> Result<Vec<T>> {
        self.into_list()?
            .into_iter()
            .map(Value::into_bean::<T>)
            .collect()
    }

    /// 展开为字符串键映射，值通过 `convert` 转换。
    pub fn into_map_with<T, F>(self, mut convert: F) -> Result<BTreeMap<String, T>>
    where
        F: FnMut(Value) -> Result<T>,
    {
        match self {
            Value::Null => Ok(BTreeMap::new()),
            Value::Map(map) => map
                .into_iter()
                .map(|(key, value)| Ok((key, convert(value)?)))
                .collect(),
            other => Err(ProtoError::mismatch("<value>", "map", other.kind())),
        }
    }

    /// 转换为带变体标签的 JSON 结构；`Bean` 需先展开为快照，否则返回错误。
    ///
    /// 每个值写成 `{"<变体>": 内容}`，嵌套的 `Int32`、`Float`、`Bytes` 等变体因此都能原样还原。
    pub fn to_json(&self) -> Result<serde_json::Value> {
        let tagged = TaggedJson::try_from(self)?;
        serde_json::to_value(tagged).map_err(|err| json_error(self.kind(), err))
    }

    /// 由 [`Value::to_json`] 的输出还原。
    pub fn from_json(json: serde_json::Value) -> Result<Value> {
        let tagged: TaggedJson =
            serde_json::from_value(json).map_err(|err| json_error("value", err))?;
        Value::try_from(tagged)
    }
}

fn json_error(label: &str, err: serde_json::Error) -> ProtoError {
    ProtoError::Fallback {
        type_url: format!("json/{label}"),
        detail: err.to_string(),
    }
}

fn finite(v: f64, label: &str) -> Result<()> {
    if v.is_finite() {
        Ok(())
    } else {
        Err(ProtoError::Fallback {
            type_url: format!("json/{label}"),
            detail: format!("{v} cannot be represented in JSON"),
        })
    }
}

/// JSON 桥接的带标签形式，变体名即 [`Value::kind`]。
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
enum TaggedJson {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    UInt32(u32),
    UInt64(u64),
    Float(f32),
    Double(f64),
    String(String),
    /// 十六进制文本。
    Bytes(String),
    List(Vec<TaggedJson>),
    Packed(PackedArray),
    Map(BTreeMap<String, TaggedJson>),
}

impl TryFrom<&Value> for TaggedJson {
    type Error = ProtoError;

    fn try_from(value: &Value) -> Result<Self> {
        let tagged = match value {
            Value::Null => TaggedJson::Null,
            Value::Bool(v) => TaggedJson::Bool(*v),
            Value::Int32(v) => TaggedJson::Int32(*v),
            Value::Int64(v) => TaggedJson::Int64(*v),
            Value::UInt32(v) => TaggedJson::UInt32(*v),
            Value::UInt64(v) => TaggedJson::UInt64(*v),
            Value::Float(v) => {
                finite(f64::from(*v), "float")?;
                TaggedJson::Float(*v)
            }
            Value::Double(v) => {
                finite(*v, "double")?;
                TaggedJson::Double(*v)
            }
            Value::String(text) => TaggedJson::String(text.clone()),
            Value::Bytes(bytes) => TaggedJson::Bytes(hex::encode(bytes)),
            Value::List(items) => TaggedJson::List(
                items
                    .iter()
                    .map(TaggedJson::try_from)
                    .collect::<Result<Vec<_>>>()?,
            ),
            Value::Packed(array) => {
                for item in array.to_values() {
                    if let Some(v) = item.as_f64() {
                        finite(v, "packed")?;
                    }
                }
                TaggedJson::Packed(array.clone())
            }
            Value::Map(map) => TaggedJson::Map(
                map.iter()
                    .map(|(key, value)| Ok((key.clone(), TaggedJson::try_from(value)?)))
                    .collect::<Result<BTreeMap<_, _>>>()?,
            ),
            Value::Bean(bean) => {
                return Err(ProtoError::Fallback {
                    type_url: format!("json/{}", bean.bean_type().name()),
                    detail: "typed object must be snapshotted before JSON conversion".to_owned(),
                });
            }
        };
        Ok(tagged)
    }
}

impl TryFrom<TaggedJson> for Value {
    type Error = ProtoError;

    fn try_from(tagged: TaggedJson) -> Result<Self> {
        let value = match tagged {
            TaggedJson::Null => Value::Null,
            TaggedJson::Bool(v) => Value::Bool(v),
            TaggedJson::Int32(v) => Value::Int32(v),
            TaggedJson::Int64(v) => Value::Int64(v),
            TaggedJson::UInt32(v) => Value::UInt32(v),
            TaggedJson::UInt64(v) => Value::UInt64(v),
            TaggedJson::Float(v) => Value::Float(v),
            TaggedJson::Double(v) => Value::Double(v),
            TaggedJson::String(text) => Value::String(text),
            TaggedJson::Bytes(text) => {
                Value::Bytes(hex::decode(&text).map_err(|err| ProtoError::Fallback {
                    type_url: "json/bytes".to_owned(),
                    detail: err.to_string(),
                })?)
            }
            TaggedJson::List(items) => Value::List(
                items
                    .into_iter()
                    .map(Value::try_from)
                    .collect::<Result<Vec<_>>>()?,
            ),
            TaggedJson::Packed(array) => Value::Packed(array),
            TaggedJson::Map(map) => Value::Map(
                map.into_iter()
                    .map(|(key, value)| Ok((key, Value::try_from(value)?)))
                    .collect::<Result<BTreeMap<_, _>>>()?,
            ),
        };
        Ok(value)
    }
}

/// 定长原始数组。
///
/// 对应 packed 编码的数值/布尔重复字段；同一字段在线上多次出现时按到达顺序拼接。
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PackedArray {
    Bool(Vec<bool>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    UInt32(Vec<u32>),
    UInt64(Vec<u64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
}

impl PackedArray {
    pub fn len(&self) -> usize {
        match self {
            PackedArray::Bool(v) => v.len(),
            PackedArray::Int32(v) => v.len(),
            PackedArray::Int64(v) => v.len(),
            PackedArray::UInt32(v) => v.len(),
            PackedArray::UInt64(v) => v.len(),
            PackedArray::Float(v) => v.len(),
            PackedArray::Double(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 逐元素转换为 [`Value`]。
    pub fn to_values(&self) -> Vec<Value> {
        match self {
            PackedArray::Bool(v) => v.iter().copied().map(Value::Bool).collect(),
            PackedArray::Int32(v) => v.iter().copied().map(Value::Int32).collect(),
            PackedArray::Int64(v) => v.iter().copied().map(Value::Int64).collect(),
            PackedArray::UInt32(v) => v.iter().copied().map(Value::UInt32).collect(),
            PackedArray::UInt64(v) => v.iter().copied().map(Value::UInt64).collect(),
            PackedArray::Float(v) => v.iter().copied().map(Value::Float).collect(),
            PackedArray::Double(v) => v.iter().copied().map(Value::Double).collect(),
        }
    }

    /// 追加一个解码得到的元素；元素类型与数组不一致时返回 `false`。
    pub(crate) fn push(&mut self, value: Value) -> bool {
        match (self, value) {
            (PackedArray::Bool(v), Value::Bool(x)) => v.push(x),
            (PackedArray::Int32(v), Value::Int32(x)) => v.push(x),
            (PackedArray::Int64(v), Value::Int64(x)) => v.push(x),
            (PackedArray::UInt32(v), Value::UInt32(x)) => v.push(x),
            (PackedArray::UInt64(v), Value::UInt64(x)) => v.push(x),
            (PackedArray::Float(v), Value::Float(x)) => v.push(x),
            (PackedArray::Double(v), Value::Double(x)) => v.push(x),
            _ => return false,
        }
        true
    }
}

/// 类型擦除后的强类型对象。
pub struct BeanValue(Box<dyn Bean>);

impl BeanValue {
    pub fn new<T: Describe>(bean: T) -> Self {
        BeanValue(Box::new(bean))
    }

    pub(crate) fn from_boxed(bean: Box<dyn Bean>) -> Self {
        BeanValue(bean)
    }

    pub fn as_bean(&self) -> &dyn Bean {
        self.0.as_ref()
    }

    pub fn bean_type(&self) -> crate::bean::BeanType {
        self.0.bean_type()
    }

    /// 还原为具体类型。
    pub fn downcast<T: Describe>(self) -> Result<T> {
        let found = self.0.bean_type().name();
        self.0
            .into_any()
            .downcast::<T>()
            .map(|bean| *bean)
            .map_err(|_| ProtoError::mismatch("<value>", T::BEAN_NAME, found))
    }
}

impl Clone for BeanValue {
    fn clone(&self) -> Self {
        BeanValue(self.0.clone_bean())
    }
}

impl PartialEq for BeanValue {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_bean(other.0.as_ref())
    }
}

impl fmt::Debug for BeanValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

macro_rules! impl_value_conversions {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::$variant(value)
                }
            }
        )*
    };
}

impl_value_conversions! {
    bool => Bool,
    i32 => Int32,
    i64 => Int64,
    u32 => UInt32,
    u64 => UInt64,
    f32 => Float,
    f64 => Double,
    String => String,
    Vec<u8> => Bytes,
    Vec<Value> => List,
    PackedArray => Packed,
    BTreeMap<String, Value> => Map,
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl TryFrom<Value> for bool {
    type Error = ProtoError;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Bool(v) => Ok(v),
            other => Err(ProtoError::mismatch("<value>", "bool", other.kind())),
        }
    }
}

impl TryFrom<Value> for i32 {
    type Error = ProtoError;

    fn try_from(value: Value) -> Result<Self> {
        value
            .as_i64()
            .and_then(|v| i32::try_from(v).ok())
            .ok_or_else(|| ProtoError::mismatch("<value>", "int32", value.kind()))
    }
}

impl TryFrom<Value> for i64 {
    type Error = ProtoError;

    fn try_from(value: Value) -> Result<Self> {
        value
            .as_i64()
            .ok_or_else(|| ProtoError::mismatch("<value>", "int64", value.kind()))
    }
}

impl TryFrom<Value> for u32 {
    type Error = ProtoError;

    fn try_from(value: Value) -> Result<Self> {
        value
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| ProtoError::mismatch("<value>", "uint32", value.kind()))
    }
}

impl TryFrom<Value> for u64 {
    type Error = ProtoError;

    fn try_from(value: Value) -> Result<Self> {
        value
            .as_u64()
            .ok_or_else(|| ProtoError::mismatch("<value>", "uint64", value.kind()))
    }
}

impl TryFrom<Value> for f32 {
    type Error = ProtoError;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Float(v) => Ok(v),
            other => other
                .as_f64()
                .map(|v| v as f32)
                .ok_or_else(|| ProtoError::mismatch("<value>", "float", other.kind())),
        }
    }
}

impl TryFrom<Value> for f64 {
    type Error = ProtoError;

    fn try_from(value: Value) -> Result<Self> {
        value
            .as_f64()
            .ok_or_else(|| ProtoError::mismatch("<value>", "double", value.kind()))
    }
}

impl TryFrom<Value> for String {
    type Error = ProtoError;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::String(v) => Ok(v),
            other => Err(ProtoError::mismatch("<value>", "string", other.kind())),
        }
    }
}

impl TryFrom<Value> for Vec<u8> {
    type Error = ProtoError;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Bytes(v) => Ok(v),
            other => Err(ProtoError::mismatch("<value>", "bytes", other.kind())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_bridge_keeps_structure() {
        let value = Value::from_entries([
            ("name", Value::from("a")),
            ("tags", Value::List(vec![Value::from("x"), Value::from("y")])),
            ("count", Value::Int64(3)),
        ]);
        let json = value.to_json().expect("转换 JSON");
        assert_eq!(json["map"]["name"]["string"], "a");
        assert_eq!(Value::from_json(json).expect("还原"), value);
    }

    #[test]
    fn json_bridge_restores_nested_variants() {
        let value = Value::from_entries([
            (
                "inner",
                Value::from_entries([
                    ("n", Value::Int32(1)),
                    ("u", Value::UInt32(2)),
                    ("f", Value::Float(1.5)),
                    ("raw", Value::Bytes(vec![0, 255])),
                ]),
            ),
            ("samples", Value::Packed(PackedArray::Int32(vec![3, -4]))),
            ("items", Value::List(vec![Value::Null, Value::UInt64(u64::MAX)])),
        ]);
        let json = value.to_json().expect("转换 JSON");
        assert_eq!(Value::from_json(json).expect("还原"), value);
        assert!(Value::Double(f64::NAN).to_json().is_err());
    }

    #[test]
    fn numeric_conversions_reject_overflow() {
        assert_eq!(i32::try_from(Value::Int64(7)), Ok(7));
        assert!(i32::try_from(Value::Int64(i64::MAX)).is_err());
        assert!(u64::try_from(Value::Int32(-1)).is_err());
        assert_eq!(f64::try_from(Value::Int32(2)), Ok(2.0));
    }

    #[test]
    fn packed_push_checks_element_kind() {
        let mut array = PackedArray::Int32(vec![1]);
        assert!(array.push(Value::Int32(2)));
        assert!(!array.push(Value::Int64(3)));
        assert_eq!(array.to_values(), vec![Value::Int32(1), Value::Int32(2)]);
    }
}
