//! # codec 模块说明
//!
//! ## 核心意图（Why）
//! - 提供字段级编解码策略：标量、枚举、嵌套消息、Any，以及在其上叠加的重复（集合/原始数组）与映射策略；
//! - 每个线格式字段编译为一个 [`FieldCodec`]，嵌套消息只记录消息下标，由调用时的上下文解析，
//!   因此自引用消息图无需递归构造。
//!
//! ## 契约说明（What）
//! - 编码：单值字段的 `Null` 被跳过；重复字段中的 `Null` 元素返回 [`ProtoError::NullElement`]；
//!   映射中值为 `Null` 的条目被跳过；数值与布尔重复字段以 packed 形式写出；
//! - 解码：重复字段同时接受 packed 与逐个出现两种形式，多次出现按到达顺序拼接；
//!   已知字段的线类型不符返回 [`ProtoError::WireTypeMismatch`]。
//!
//! ## 风险提示（Trade-offs）
//! - 编码对数值变体宽松：只要能无损表示即可写入声明类型，否则返回类型不匹配错误；
//! - 浮点字段接受任意数值变体并做精度转换，这是唯一允许有损的路径。

pub mod any;
pub mod enums;
pub mod map;
pub mod message;
pub mod repeated;
pub mod scalar;

use std::sync::Arc;

use tracing::error;

use crate::bean::TypeDescriptor;
use crate::error::{ProtoError, Result};
use crate::mapper::ProtoMapper;
use crate::schema::ScalarType;
use crate::value::Value;
use crate::wire::{ProtoInput, ProtoOutput, WireType};

use self::enums::EnumTable;

/// 单个值（单值字段、集合元素或映射值）的编码策略。
#[derive(Clone, Debug)]
pub enum ElementCodec {
    Scalar(ScalarType),
    Enum(Arc<EnumTable>),
    /// 引用映射器中第 N 个消息。
    Message(usize),
    Any,
}

impl ElementCodec {
    pub fn wire_type(&self) -> WireType {
        match self {
            ElementCodec::Scalar(scalar) => scalar.wire_type(),
            ElementCodec::Enum(_) => WireType::Varint,
            ElementCodec::Message(_) | ElementCodec::Any => WireType::LengthDelimited,
        }
    }

    /// 是否可以 packed 编码。
    pub fn is_packable(&self) -> bool {
        match self {
            ElementCodec::Scalar(scalar) => scalar.is_packable(),
            ElementCodec::Enum(_) => true,
            _ => false,
        }
    }

    pub fn type_name(&self, mapper: &ProtoMapper) -> String {
        match self {
            ElementCodec::Scalar(scalar) => scalar.name().to_owned(),
            ElementCodec::Enum(table) => table.name().to_owned(),
            ElementCodec::Message(index) => mapper.writer(*index).name().to_owned(),
            ElementCodec::Any => crate::schema::ANY_TYPE.to_owned(),
        }
    }

    /// 写出不带标签的值；消息与 Any 写出长度前缀。
    pub(crate) fn write_value(
        &self,
        out: &mut ProtoOutput,
        value: &Value,
        field: &str,
        mapper: &ProtoMapper,
    ) -> Result<()> {
        match self {
            ElementCodec::Scalar(scalar) => scalar::write_scalar(out, *scalar, value, field),
            ElementCodec::Enum(table) => {
                out.write_int32(table.ordinal_of(value, field)?);
                Ok(())
            }
            ElementCodec::Message(index) => {
                let writer = mapper.writer(*index);
                out.write_nested(|nested| writer.write(nested, value, mapper))
            }
            ElementCodec::Any => out.write_nested(|nested| any::write_any(nested, value, field, mapper)),
        }
    }

    /// 写出带标签的完整字段。
    pub(crate) fn write_field(
        &self,
        out: &mut ProtoOutput,
        number: u32,
        value: &Value,
        field: &str,
        mapper: &ProtoMapper,
    ) -> Result<()> {
        // 先写入临时缓冲，失败时不污染外层。
        let mut staged = ProtoOutput::new();
        staged.write_tag(number, self.wire_type());
        self.write_value(&mut staged, value, field, mapper)?;
        out.write_raw(staged.as_slice());
        Ok(())
    }
}

/// 字段的重复形态。
#[derive(Clone, Debug)]
pub enum Repetition {
    Single(ElementCodec),
    Repeated(ElementCodec),
    Map {
        key: ScalarType,
        value: ElementCodec,
    },
}

/// 编译后的字段编码器。
#[derive(Clone, Debug)]
pub struct FieldCodec {
    name: String,
    number: u32,
    repetition: Repetition,
}

impl FieldCodec {
    pub fn new(name: impl Into<String>, number: u32, repetition: Repetition) -> Self {
        Self {
            name: name.into(),
            number,
            repetition,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn repetition(&self) -> &Repetition {
        &self.repetition
    }

    /// 写出字段；`Null` 视为缺省而跳过。
    pub(crate) fn write(
        &self,
        out: &mut ProtoOutput,
        value: &Value,
        message: &str,
        mapper: &ProtoMapper,
    ) -> Result<()> {
        if value.is_null() {
            return Ok(());
        }
        let result = match &self.repetition {
            Repetition::Single(element) => {
                element.write_field(out, self.number, value, &self.name, mapper)
            }
            Repetition::Repeated(element) => {
                repeated::write_repeated(out, self.number, element, value, &self.name, mapper)
            }
            Repetition::Map { key, value: element } => {
                map::write_map(out, self.number, *key, element, value, &self.name, mapper)
            }
        };
        result.inspect_err(|err| self.trace_failure(message, mapper, err, "encode"))
    }

    /// 嵌套消息的失败由内层字段记录，这里只记录叶子字段。
    pub(crate) fn trace_failure(
        &self,
        message: &str,
        mapper: &ProtoMapper,
        err: &ProtoError,
        direction: &str,
    ) {
        let nested = matches!(
            &self.repetition,
            Repetition::Single(ElementCodec::Message(_))
                | Repetition::Repeated(ElementCodec::Message(_))
                | Repetition::Map {
                    value: ElementCodec::Message(_),
                    ..
                }
        );
        if nested && !matches!(err, ProtoError::NullElement { .. }) {
            return;
        }
        let field_type = match &self.repetition {
            Repetition::Single(element) => element.type_name(mapper),
            Repetition::Repeated(element) => format!("repeated {}", element.type_name(mapper)),
            Repetition::Map { key, value } => format!("map<{key}, {}>", value.type_name(mapper)),
        };
        error!(
            proto_message = message,
            field = self.name.as_str(),
            field_type = field_type.as_str(),
            direction,
            code = err.code(),
            "failed to {direction} protobuf field: {err}"
        );
    }
}

/// 解码侧的值策略：与 [`ElementCodec`] 相同，但嵌套消息指向读取计划中的读取器。
#[derive(Clone, Debug)]
pub enum ReadElement {
    Scalar(ScalarType),
    Enum(Arc<EnumTable>),
    /// 读取计划中的读取器下标。
    Message(usize),
    /// Any 字段；携带期望的运行时描述符，用于已知类型的还原。
    Any(TypeDescriptor),
}

impl ReadElement {
    pub fn wire_type(&self) -> WireType {
        match self {
            ReadElement::Scalar(scalar) => scalar.wire_type(),
            ReadElement::Enum(_) => WireType::Varint,
            ReadElement::Message(_) | ReadElement::Any(_) => WireType::LengthDelimited,
        }
    }

    pub fn is_packable(&self) -> bool {
        match self {
            ReadElement::Scalar(scalar) => scalar.is_packable(),
            ReadElement::Enum(_) => true,
            _ => false,
        }
    }

    /// 读取不带标签的值。
    pub(crate) fn read_value(
        &self,
        input: &mut ProtoInput<'_>,
        field: &str,
        cx: &ReadContext<'_>,
    ) -> Result<Value> {
        match self {
            ReadElement::Scalar(scalar) => scalar::read_scalar(input, *scalar, field),
            ReadElement::Enum(table) => Ok(table.value_of(input.read_int32()?)),
            ReadElement::Message(reader) => {
                let payload = input.read_length_delimited()?;
                let mut nested = input.nested(payload)?;
                cx.plan.read_with(*reader, &mut nested, cx.mapper)
            }
            ReadElement::Any(target) => {
                let payload = input.read_length_delimited()?;
                let mut nested = input.nested(payload)?;
                any::read_any(&mut nested, target, field, cx.mapper)
            }
        }
    }
}

/// 解码上下文：当前读取计划与所属映射器。
#[derive(Clone, Copy)]
pub(crate) struct ReadContext<'a> {
    pub(crate) plan: &'a crate::compiler::ReaderPlan,
    pub(crate) mapper: &'a ProtoMapper,
}

/// 已知字段的线类型必须与声明一致。
pub(crate) fn expect_wire_type(field: &str, expected: WireType, actual: WireType) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(ProtoError::WireTypeMismatch {
            field: field.to_owned(),
            expected: expected.as_u8(),
            actual: actual.as_u8(),
        })
    }
}

/// 校验字段形态与运行时属性描述符是否可以绑定。
///
/// 标量/枚举单值字段只能绑定动态属性；消息字段可绑定对象或动态属性；
/// 重复字段需要集合、原始数组或动态属性；映射字段需要映射或动态属性；Any 字段不做限制。
pub(crate) fn check_binding(
    message: &str,
    field: &FieldCodec,
    ty: &TypeDescriptor,
    target: &str,
) -> Result<()> {
    let compatible = match (&field.repetition, ty) {
        (_, TypeDescriptor::Dynamic) => true,
        (Repetition::Single(ElementCodec::Any), _) => true,
        (Repetition::Single(ElementCodec::Message(_)), TypeDescriptor::Bean(_)) => true,
        (Repetition::Repeated(element), TypeDescriptor::List(inner)) => {
            element_accepts(element, inner)
        }
        (Repetition::Repeated(ElementCodec::Scalar(scalar)), TypeDescriptor::Array) => {
            scalar.is_packable()
        }
        (Repetition::Map { value, .. }, TypeDescriptor::Map(inner)) => element_accepts(value, inner),
        _ => false,
    };
    if compatible {
        Ok(())
    } else {
        Err(ProtoError::Binding {
            message: message.to_owned(),
            field: field.name.clone(),
            target: target.to_owned(),
            detail: format!("property type {ty:?} cannot hold {:?}", field.repetition),
        })
    }
}

fn element_accepts(element: &ElementCodec, ty: &TypeDescriptor) -> bool {
    match (element, ty) {
        (_, TypeDescriptor::Dynamic) | (ElementCodec::Any, _) => true,
        (ElementCodec::Message(_), TypeDescriptor::Bean(_)) => true,
        _ => false,
    }
}
