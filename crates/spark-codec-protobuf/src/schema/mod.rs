//! # schema 模块说明
//!
//! ## 核心意图（Why）
//! - 以内存结构承载推导出的线格式 Schema：消息、字段（名称/标签/类型/重复标记）、枚举与服务；
//! - 文本 IDL 往返是对外契约：[`Proto::to_idl`] 打印的文本经 [`Proto::parse`] 解析后必须得到相同结构，
//!   其他组件会独立加载这段文本。
//!
//! ## 契约说明（What）
//! - 类型引用在解析后统一解析为 [`FieldType`]：同包消息/枚举使用短名称，`google.protobuf.Any`
//!   与 `google.protobuf.Empty` 作为内建类型；
//! - 注解以 `//@` 注释形式附着在下一个消息、枚举或 rpc 上，内容保存为去掉 `//` 后的字符串；
//! - 推导完成后 `Proto` 不再修改，由编译产物独占或以 `Arc` 共享。

pub mod parser;
pub mod printer;

use std::fmt;

use crate::error::{ProtoError, Result};
use crate::wire::WireType;

/// 标注单字段包装消息。
pub const ANNOTATION_WRAP_PROPERTY: &str = "@WrapProperty";
/// 标注参数包装消息。
pub const ANNOTATION_WRAP_ARGUMENTS: &str = "@WrapArguments";
/// rpc 注解前缀，后接 JSON。
pub const ANNOTATION_RPC: &str = "@Rpc";

pub const ANY_TYPE: &str = "google.protobuf.Any";
pub const ANY_IMPORT: &str = "google/protobuf/any.proto";
pub const EMPTY_TYPE: &str = "google.protobuf.Empty";
pub const EMPTY_IMPORT: &str = "google/protobuf/empty.proto";

/// 包装消息中唯一字段的名称。
pub const WRAP_FIELD: &str = "value";

/// 线格式标量类型。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Double,
    Float,
    Int32,
    Int64,
    UInt32,
    UInt64,
    SInt32,
    SInt64,
    Fixed32,
    Fixed64,
    SFixed32,
    SFixed64,
    Bool,
    String,
    Bytes,
}

impl ScalarType {
    pub const ALL: [ScalarType; 15] = [
        ScalarType::Double,
        ScalarType::Float,
        ScalarType::Int32,
        ScalarType::Int64,
        ScalarType::UInt32,
        ScalarType::UInt64,
        ScalarType::SInt32,
        ScalarType::SInt64,
        ScalarType::Fixed32,
        ScalarType::Fixed64,
        ScalarType::SFixed32,
        ScalarType::SFixed64,
        ScalarType::Bool,
        ScalarType::String,
        ScalarType::Bytes,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            ScalarType::Double => "double",
            ScalarType::Float => "float",
            ScalarType::Int32 => "int32",
            ScalarType::Int64 => "int64",
            ScalarType::UInt32 => "uint32",
            ScalarType::UInt64 => "uint64",
            ScalarType::SInt32 => "sint32",
            ScalarType::SInt64 => "sint64",
            ScalarType::Fixed32 => "fixed32",
            ScalarType::Fixed64 => "fixed64",
            ScalarType::SFixed32 => "sfixed32",
            ScalarType::SFixed64 => "sfixed64",
            ScalarType::Bool => "bool",
            ScalarType::String => "string",
            ScalarType::Bytes => "bytes",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|scalar| scalar.name() == name)
    }

    /// 单值编码时使用的线类型。
    #[must_use]
    pub const fn wire_type(self) -> WireType {
        match self {
            ScalarType::Double | ScalarType::Fixed64 | ScalarType::SFixed64 => WireType::Fixed64,
            ScalarType::Float | ScalarType::Fixed32 | ScalarType::SFixed32 => WireType::Fixed32,
            ScalarType::String | ScalarType::Bytes => WireType::LengthDelimited,
            _ => WireType::Varint,
        }
    }

    /// 数值与布尔类型的重复字段以 packed 形式编码。
    #[must_use]
    pub const fn is_packable(self) -> bool {
        !matches!(self, ScalarType::String | ScalarType::Bytes)
    }

    /// 可作为 `map` 键的类型。
    #[must_use]
    pub const fn is_valid_map_key(self) -> bool {
        !matches!(
            self,
            ScalarType::Double | ScalarType::Float | ScalarType::Bytes
        )
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 字段类型。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FieldType {
    Scalar(ScalarType),
    /// 同一 Proto 内的消息（短名称），或内建的 `google.protobuf.Empty`。
    Message(String),
    Enum(String),
    Map {
        key: ScalarType,
        value: Box<FieldType>,
    },
    /// `google.protobuf.Any`。
    Any,
}

impl FieldType {
    /// IDL 中的类型书写形式。
    pub fn type_name(&self) -> String {
        match self {
            FieldType::Scalar(scalar) => scalar.name().to_owned(),
            FieldType::Message(name) | FieldType::Enum(name) => name.clone(),
            FieldType::Map { key, value } => format!("map<{}, {}>", key.name(), value.type_name()),
            FieldType::Any => ANY_TYPE.to_owned(),
        }
    }
}

/// 消息字段。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub tag: u32,
    pub repeated: bool,
    pub ty: FieldType,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, tag: u32, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            tag,
            repeated: false,
            ty,
        }
    }

    pub fn repeated(mut self) -> Self {
        self.repeated = true;
        self
    }

    pub fn is_map(&self) -> bool {
        matches!(self.ty, FieldType::Map { .. })
    }
}

/// 消息定义。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageDef {
    pub name: String,
    pub annotations: Vec<String>,
    pub fields: Vec<FieldDef>,
}

impl MessageDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn has_annotation(&self, annotation: &str) -> bool {
        self.annotations.iter().any(|item| item == annotation)
    }

    /// 是否为单字段 `value` 的包装消息。
    pub fn is_wrap_property(&self) -> bool {
        self.has_annotation(ANNOTATION_WRAP_PROPERTY)
    }

    pub fn max_tag(&self) -> u32 {
        self.fields.iter().map(|field| field.tag).max().unwrap_or(0)
    }
}

/// 枚举定义，序号即值在列表中的下标。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EnumDef {
    pub name: String,
    pub annotations: Vec<String>,
    pub values: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Definition {
    Message(MessageDef),
    Enum(EnumDef),
}

impl Definition {
    pub fn name(&self) -> &str {
        match self {
            Definition::Message(message) => &message.name,
            Definition::Enum(enumeration) => &enumeration.name,
        }
    }
}

/// rpc 定义；`arg`/`ret` 为 IDL 中书写的类型名。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RpcDef {
    pub name: String,
    pub annotations: Vec<String>,
    pub arg: String,
    pub ret: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceDef {
    pub name: String,
    pub rpcs: Vec<RpcDef>,
}

/// 完整的线格式 Schema。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Proto {
    pub syntax: String,
    pub package: Option<String>,
    pub imports: Vec<String>,
    pub definitions: Vec<Definition>,
    pub services: Vec<ServiceDef>,
}

impl Default for Proto {
    fn default() -> Self {
        Self {
            syntax: "proto3".to_owned(),
            package: None,
            imports: Vec::new(),
            definitions: Vec::new(),
            services: Vec::new(),
        }
    }
}

impl Proto {
    /// 解析 IDL 文本。
    pub fn parse(text: &str) -> Result<Proto> {
        parser::parse(text)
    }

    /// 打印为 IDL 文本。
    pub fn to_idl(&self) -> String {
        printer::print(self)
    }

    pub fn messages(&self) -> impl Iterator<Item = &MessageDef> {
        self.definitions.iter().filter_map(|definition| match definition {
            Definition::Message(message) => Some(message),
            Definition::Enum(_) => None,
        })
    }

    pub fn enums(&self) -> impl Iterator<Item = &EnumDef> {
        self.definitions.iter().filter_map(|definition| match definition {
            Definition::Enum(enumeration) => Some(enumeration),
            Definition::Message(_) => None,
        })
    }

    pub fn message(&self, name: &str) -> Option<&MessageDef> {
        self.messages().find(|message| message.name == name)
    }

    pub fn enum_def(&self, name: &str) -> Option<&EnumDef> {
        self.enums().find(|enumeration| enumeration.name == name)
    }

    pub fn service(&self, name: &str) -> Option<&ServiceDef> {
        self.services.iter().find(|service| service.name == name)
    }

    /// 带包名的全限定名称。
    pub fn canonical_name(&self, name: &str) -> String {
        match &self.package {
            Some(package) => format!("{package}.{name}"),
            None => name.to_owned(),
        }
    }

    /// 将 `pkg.Name`、`.pkg.Name` 形式的引用还原为短名称。
    pub fn short_name<'n>(&self, name: &'n str) -> &'n str {
        let name = name.strip_prefix('.').unwrap_or(name);
        if let Some(package) = &self.package
            && let Some(rest) = name.strip_prefix(package.as_str())
            && let Some(short) = rest.strip_prefix('.')
        {
            return short;
        }
        name
    }

    /// 校验所有类型引用、标签与名称唯一性。
    pub fn validate(&self) -> Result<()> {
        let mut names = std::collections::HashSet::new();
        for definition in &self.definitions {
            if !names.insert(definition.name()) {
                return Err(ProtoError::InvalidSchema {
                    context: definition.name().to_owned(),
                    detail: "duplicate definition".to_owned(),
                });
            }
        }
        for message in self.messages() {
            let mut tags = std::collections::HashSet::new();
            let mut fields = std::collections::HashSet::new();
            for field in &message.fields {
                let context = format!("{}.{}", message.name, field.name);
                if field.tag == 0 || field.tag > crate::wire::MAX_FIELD_NUMBER {
                    return Err(ProtoError::InvalidSchema {
                        context,
                        detail: format!("tag {} out of range", field.tag),
                    });
                }
                if !tags.insert(field.tag) || !fields.insert(field.name.as_str()) {
                    return Err(ProtoError::InvalidSchema {
                        context,
                        detail: "duplicate field name or tag".to_owned(),
                    });
                }
                self.validate_type(&field.ty, &context)?;
                if field.repeated && field.is_map() {
                    return Err(ProtoError::InvalidSchema {
                        context,
                        detail: "map fields cannot be repeated".to_owned(),
                    });
                }
            }
        }
        for definition in self.enums() {
            let mut values = std::collections::HashSet::new();
            if let Some(value) = definition.values.iter().find(|value| !values.insert(value.as_str())) {
                return Err(ProtoError::InvalidSchema {
                    context: format!("{}.{value}", definition.name),
                    detail: "duplicate enum value".to_owned(),
                });
            }
        }
        Ok(())
    }

    fn validate_type(&self, ty: &FieldType, context: &str) -> Result<()> {
        match ty {
            FieldType::Message(name) if name == EMPTY_TYPE => Ok(()),
            FieldType::Message(name) if self.message(name).is_none() => {
                Err(ProtoError::UnknownType {
                    type_name: name.clone(),
                    context: context.to_owned(),
                })
            }
            FieldType::Enum(name) if self.enum_def(name).is_none() => {
                Err(ProtoError::UnknownType {
                    type_name: name.clone(),
                    context: context.to_owned(),
                })
            }
            FieldType::Map { key, value } => {
                if !key.is_valid_map_key() {
                    return Err(ProtoError::InvalidSchema {
                        context: context.to_owned(),
                        detail: format!("`{key}` cannot be a map key"),
                    });
                }
                if matches!(value.as_ref(), FieldType::Map { .. }) {
                    return Err(ProtoError::InvalidSchema {
                        context: context.to_owned(),
                        detail: "map values cannot be maps".to_owned(),
                    });
                }
                self.validate_type(value, context)
            }
            _ => Ok(()),
        }
    }
}

/// 是否为合法标识符：`[A-Za-z_][A-Za-z0-9_]*`。
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(first) if first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
