//! # contract 模块说明
//!
//! ## 核心意图（Why）
//! - 表达宿主平台加载的 OpenAPI 风格契约：对象/数组/映射/标量/枚举/引用组成的类型树，以及按操作声明的参数与响应；
//! - 契约在解析后不可变，推导器只读遍历，不会回写名称等信息。
//!
//! ## 契约说明（What）
//! - [`SchemaNode::Object`] 的属性顺序即字段标签顺序，因此使用 `Vec` 保存而不是无序映射；
//! - 引用统一写作 `#/components/schemas/<Name>`，也接受裸名称；
//! - [`SchemaResolver`] 是推导器解析引用的唯一入口，调用方可自行实现以接入其他来源。

pub mod derive;
pub mod service;

use std::collections::BTreeMap;

pub use derive::{DerivedSchema, SchemaDeriver};
pub use service::ContractDeriver;

/// 组件引用前缀。
pub const COMPONENTS_SCHEMAS_REF: &str = "#/components/schemas/";

/// 标量种类。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Boolean,
    Integer,
    Number,
    String,
    /// 文件上传/下载，无法由线格式承载。
    File,
}

impl ScalarKind {
    pub const fn name(self) -> &'static str {
        match self {
            ScalarKind::Boolean => "boolean",
            ScalarKind::Integer => "integer",
            ScalarKind::Number => "number",
            ScalarKind::String => "string",
            ScalarKind::File => "file",
        }
    }
}

/// 对象类型：可选名称 + 有序属性表。
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObjectSchema {
    pub name: Option<String>,
    pub properties: Vec<(String, SchemaNode)>,
}

impl ObjectSchema {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            properties: Vec::new(),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn property(mut self, name: impl Into<String>, node: SchemaNode) -> Self {
        self.properties.push((name.into(), node));
        self
    }
}

/// 契约类型树节点。
#[derive(Clone, Debug, PartialEq)]
pub enum SchemaNode {
    Scalar {
        kind: ScalarKind,
        format: Option<String>,
    },
    Object(ObjectSchema),
    Array(Box<SchemaNode>),
    /// 字符串键映射，值类型为内层节点。
    Map(Box<SchemaNode>),
    Enum(Vec<String>),
    Reference(String),
}

impl SchemaNode {
    pub fn scalar(kind: ScalarKind) -> Self {
        SchemaNode::Scalar { kind, format: None }
    }

    pub fn formatted(kind: ScalarKind, format: impl Into<String>) -> Self {
        SchemaNode::Scalar {
            kind,
            format: Some(format.into()),
        }
    }

    pub fn boolean() -> Self {
        Self::scalar(ScalarKind::Boolean)
    }

    pub fn string() -> Self {
        Self::scalar(ScalarKind::String)
    }

    pub fn integer() -> Self {
        Self::scalar(ScalarKind::Integer)
    }

    pub fn int32() -> Self {
        Self::formatted(ScalarKind::Integer, "int32")
    }

    pub fn int64() -> Self {
        Self::formatted(ScalarKind::Integer, "int64")
    }

    pub fn number() -> Self {
        Self::scalar(ScalarKind::Number)
    }

    pub fn array(item: SchemaNode) -> Self {
        SchemaNode::Array(Box::new(item))
    }

    pub fn map(value: SchemaNode) -> Self {
        SchemaNode::Map(Box::new(value))
    }

    pub fn enumeration<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        SchemaNode::Enum(values.into_iter().map(Into::into).collect())
    }

    /// 指向组件表的引用。
    pub fn reference(name: &str) -> Self {
        if name.starts_with(COMPONENTS_SCHEMAS_REF) {
            SchemaNode::Reference(name.to_owned())
        } else {
            SchemaNode::Reference(format!("{COMPONENTS_SCHEMAS_REF}{name}"))
        }
    }

    pub fn object(object: ObjectSchema) -> Self {
        SchemaNode::Object(object)
    }

    /// 是否为上传/下载使用的二进制文件类型（沿数组/映射向内查找，不跟随引用）。
    pub fn is_file_like(&self) -> bool {
        match self {
            SchemaNode::Scalar { kind, format } => {
                *kind == ScalarKind::File
                    || (*kind == ScalarKind::String && format.as_deref() == Some("binary"))
            }
            SchemaNode::Array(inner) | SchemaNode::Map(inner) => inner.is_file_like(),
            _ => false,
        }
    }
}

/// 引用解析器。
pub trait SchemaResolver {
    /// 以组件名解析引用；返回组件名与目标节点。
    fn resolve<'a>(&'a self, reference: &'a str) -> Option<(&'a str, &'a SchemaNode)>;
}

/// 契约中的组件表。
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Components {
    schemas: BTreeMap<String, SchemaNode>,
}

impl Components {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, node: SchemaNode) -> &mut Self {
        self.schemas.insert(name.into(), node);
        self
    }

    pub fn with(mut self, name: impl Into<String>, node: SchemaNode) -> Self {
        self.insert(name, node);
        self
    }

    pub fn get(&self, name: &str) -> Option<&SchemaNode> {
        self.schemas.get(name)
    }

    /// 按名称顺序遍历组件。
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SchemaNode)> {
        self.schemas.iter().map(|(name, node)| (name.as_str(), node))
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

impl SchemaResolver for Components {
    fn resolve<'a>(&'a self, reference: &'a str) -> Option<(&'a str, &'a SchemaNode)> {
        let name = reference
            .strip_prefix(COMPONENTS_SCHEMAS_REF)
            .unwrap_or(reference);
        self.schemas
            .get_key_value(name)
            .map(|(name, node)| (name.as_str(), node))
    }
}

/// 操作参数。
#[derive(Clone, Debug, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub schema: SchemaNode,
}

impl Parameter {
    pub fn new(name: impl Into<String>, schema: SchemaNode) -> Self {
        Self {
            name: name.into(),
            schema,
        }
    }
}

/// 操作响应；`schema` 为 `None` 表示无响应体（void）。
#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    pub status: String,
    pub schema: Option<SchemaNode>,
}

impl Response {
    pub fn new(status: impl Into<String>, schema: Option<SchemaNode>) -> Self {
        Self {
            status: status.into(),
            schema,
        }
    }
}

/// 契约中的单个操作。
#[derive(Clone, Debug, PartialEq)]
pub struct Operation {
    pub operation_id: String,
    pub parameters: Vec<Parameter>,
    pub responses: Vec<Response>,
    /// 是否以 multipart/form-data 接收请求（文件上传）。
    pub consumes_multipart: bool,
}

impl Operation {
    pub fn new(operation_id: impl Into<String>) -> Self {
        Self {
            operation_id: operation_id.into(),
            parameters: Vec::new(),
            responses: Vec::new(),
            consumes_multipart: false,
        }
    }

    pub fn parameter(mut self, name: impl Into<String>, schema: SchemaNode) -> Self {
        self.parameters.push(Parameter::new(name, schema));
        self
    }

    pub fn response(mut self, status: impl Into<String>, schema: Option<SchemaNode>) -> Self {
        self.responses.push(Response::new(status, schema));
        self
    }

    pub fn multipart(mut self) -> Self {
        self.consumes_multipart = true;
        self
    }
}

/// 完整契约。
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Contract {
    pub package: Option<String>,
    pub components: Components,
    pub operations: Vec<Operation>,
}

impl Contract {
    pub fn new(package: impl Into<String>) -> Self {
        Self {
            package: Some(package.into()),
            ..Self::default()
        }
    }

    pub fn components(mut self, components: Components) -> Self {
        self.components = components;
        self
    }

    pub fn operation(mut self, operation: Operation) -> Self {
        self.operations.push(operation);
        self
    }
}
