//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 为契约推导、编解码器编译、编码与解码四个阶段提供统一的错误语义；
//! - 每个变体都携带出错的消息、字段、枚举值或引用名称，保证排障时无需回溯调用栈。
//!
//! ## 设计要求（What）
//! - 所有错误类型派生 `thiserror::Error`，兼容 `std::error::Error`；
//! - [`ProtoError::code`] 返回稳定的点分错误码，便于指标与日志聚合；
//! - [`ProtoError::stage`] 标识错误所属阶段：推导/编译错误为致命错误，编码/解码错误仅影响单次调用。

use thiserror::Error;

/// 错误所处的处理阶段。
///
/// - **Derivation**：契约 → 线格式 Schema 推导、IDL 解析阶段，失败即放弃整个契约；
/// - **Compilation**：Schema 与运行时类型绑定阶段，首次使用 (契约, 类型) 组合时触发；
/// - **Encode**/**Decode**：单次调用级别，可由调用方自行处理，本引擎从不内部重试。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorStage {
    Derivation,
    Compilation,
    Encode,
    Decode,
}

/// `spark-codec-protobuf` 的统一错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：把“契约无法承载于线格式”“运行时类型与 Schema 不匹配”“输入字节损坏”等
///   不同性质的失败区分开，调用方据此决定是整体失败还是仅拒绝当前请求；
/// - **契约 (What)**：变体均为 `Send + Sync + 'static`，可安全跨线程传播；
/// - **设计权衡 (Trade-offs)**：上下文统一使用 `String`，牺牲少量分配换取可读性。
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ProtoError {
    /// `$ref` 无法在组件表中解析。
    #[error("schema reference `{reference}` used by `{context}` cannot be resolved")]
    UnresolvedReference { reference: String, context: String },

    /// 标量 `(kind, format)` 组合无法映射到线格式原始类型。
    #[error("`{context}`: scalar `{kind}:{format}` is not supported by protobuf ({detail})")]
    UnsupportedScalar {
        context: String,
        kind: String,
        format: String,
        detail: String,
    },

    /// 枚举值不是合法标识符（包含 `.`、`-` 等字符）。
    #[error("`{context}`: enum `{enum_name}` value `{value}` is not a valid protobuf identifier")]
    InvalidEnumValue {
        context: String,
        enum_name: String,
        value: String,
    },

    /// 两个结构不同的源类型生成了同名消息。
    #[error("generated message name `{name}` collides between structurally different schemas")]
    NameConflict { name: String },

    /// 契约结构本身不合法（例如重复的属性名、空名称）。
    #[error("invalid schema `{context}`: {detail}")]
    InvalidSchema { context: String, detail: String },

    /// IDL 文本解析失败。
    #[error("proto parse error at line {line}: {detail}")]
    Parse { line: usize, detail: String },

    /// IDL 中引用了未定义的类型。
    #[error("type `{type_name}` referenced by `{context}` is not defined")]
    UnknownType { type_name: String, context: String },

    /// 指定名称的消息不存在。
    #[error("message `{name}` is not defined in the proto")]
    MessageNotFound { name: String },

    /// 指定的操作不存在于契约中。
    #[error("operation `{operation}` is not defined in contract `{contract}`")]
    OperationNotFound { contract: String, operation: String },

    /// 运行时类型无法与线格式字段正确绑定。
    #[error("cannot bind `{message}.{field}` to runtime type `{target}`: {detail}")]
    Binding {
        message: String,
        field: String,
        target: String,
        detail: String,
    },

    /// 重复字段中出现空元素。
    #[error("field `{field}`: repeated field cannot contain a null element")]
    NullElement { field: String },

    /// 运行时值与字段声明类型不兼容。
    #[error("field `{field}`: expected {expected}, found {found}")]
    TypeMismatch {
        field: String,
        expected: String,
        found: String,
    },

    /// 枚举字段收到未定义的名称。
    #[error("field `{field}`: `{value}` is not a member of enum `{enum_name}`")]
    UnknownEnumValue {
        field: String,
        enum_name: String,
        value: String,
    },

    /// Any 字段的通用回退编解码失败。
    #[error("any fallback failed for `{type_url}`: {detail}")]
    Fallback { type_url: String, detail: String },

    /// 输入在读取完成前耗尽。
    #[error("truncated input: {detail}")]
    Truncated { detail: String },

    /// 输入结构非法（varint 过长、字段号为 0、未知线类型等）。
    #[error("malformed input: {detail}")]
    Malformed { detail: String },

    /// 已知字段收到了不符合其声明的线类型。
    #[error("field `{field}`: wire type {actual} does not match declared wire type {expected}")]
    WireTypeMismatch {
        field: String,
        expected: u8,
        actual: u8,
    },

    /// 字符串字段不是合法 UTF-8。
    #[error("field `{field}`: string payload is not valid UTF-8")]
    InvalidUtf8 { field: String },

    /// 嵌套层级超过配置上限。
    #[error("message nesting exceeds the configured limit of {limit}")]
    DepthExceeded { limit: usize },

    /// 打包的 Any 指向未知消息。
    #[error("any payload refers to unknown message `{type_url}`")]
    UnknownAnyType { type_url: String },
}

impl ProtoError {
    /// 返回稳定的点分错误码。
    pub fn code(&self) -> &'static str {
        match self {
            ProtoError::UnresolvedReference { .. } => "protobuf.derive.unresolved_ref",
            ProtoError::UnsupportedScalar { .. } => "protobuf.derive.unsupported_scalar",
            ProtoError::InvalidEnumValue { .. } => "protobuf.derive.invalid_enum",
            ProtoError::NameConflict { .. } => "protobuf.derive.name_conflict",
            ProtoError::InvalidSchema { .. } => "protobuf.derive.invalid_schema",
            ProtoError::Parse { .. } => "protobuf.idl.parse",
            ProtoError::UnknownType { .. } => "protobuf.idl.unknown_type",
            ProtoError::MessageNotFound { .. } => "protobuf.compile.message_missing",
            ProtoError::OperationNotFound { .. } => "protobuf.compile.operation_missing",
            ProtoError::Binding { .. } => "protobuf.compile.binding",
            ProtoError::NullElement { .. } => "protobuf.encode.null_element",
            ProtoError::TypeMismatch { .. } => "protobuf.encode.type_mismatch",
            ProtoError::UnknownEnumValue { .. } => "protobuf.encode.unknown_enum",
            ProtoError::Fallback { .. } => "protobuf.any.fallback",
            ProtoError::Truncated { .. } => "protobuf.decode.truncated",
            ProtoError::Malformed { .. } => "protobuf.decode.malformed",
            ProtoError::WireTypeMismatch { .. } => "protobuf.decode.wire_type",
            ProtoError::InvalidUtf8 { .. } => "protobuf.decode.utf8",
            ProtoError::DepthExceeded { .. } => "protobuf.decode.depth",
            ProtoError::UnknownAnyType { .. } => "protobuf.decode.unknown_any",
        }
    }

    /// 返回错误所属阶段。
    ///
    /// `Fallback` 视为编码错误：解码方向的回退失败同样是单次调用级别的问题。
    pub fn stage(&self) -> ErrorStage {
        match self {
            ProtoError::UnresolvedReference { .. }
            | ProtoError::UnsupportedScalar { .. }
            | ProtoError::InvalidEnumValue { .. }
            | ProtoError::NameConflict { .. }
            | ProtoError::InvalidSchema { .. }
            | ProtoError::Parse { .. }
            | ProtoError::UnknownType { .. } => ErrorStage::Derivation,
            ProtoError::MessageNotFound { .. }
            | ProtoError::OperationNotFound { .. }
            | ProtoError::Binding { .. } => ErrorStage::Compilation,
            ProtoError::NullElement { .. }
            | ProtoError::TypeMismatch { .. }
            | ProtoError::UnknownEnumValue { .. }
            | ProtoError::Fallback { .. } => ErrorStage::Encode,
            ProtoError::Truncated { .. }
            | ProtoError::Malformed { .. }
            | ProtoError::WireTypeMismatch { .. }
            | ProtoError::InvalidUtf8 { .. }
            | ProtoError::DepthExceeded { .. }
            | ProtoError::UnknownAnyType { .. } => ErrorStage::Decode,
        }
    }

    pub(crate) fn truncated(detail: impl Into<String>) -> Self {
        ProtoError::Truncated {
            detail: detail.into(),
        }
    }

    pub(crate) fn malformed(detail: impl Into<String>) -> Self {
        ProtoError::Malformed {
            detail: detail.into(),
        }
    }

    pub(crate) fn mismatch(
        field: &str,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        ProtoError::TypeMismatch {
            field: field.to_owned(),
            expected: expected.into(),
            found: found.into(),
        }
    }
}

/// crate 内统一的结果别名。
pub type Result<T, E = ProtoError> = core::result::Result<T, E>;
