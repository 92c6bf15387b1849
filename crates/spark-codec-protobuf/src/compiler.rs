//! # compiler 模块说明
//!
//! ## 核心意图（Why）
//! - 把 [`Proto`] 编译为消息写出器数组：每个消息一项，字段引用其他消息时只记录下标，
//!   因此自引用与相互引用的消息无需递归构造；
//! - 解码侧按 (消息, 目标形状) 生成 [`ReaderPlan`]：以广度优先遍历消息图，
//!   同一 (消息, 形状) 只生成一个读取器，环形引用回指已登记的下标。
//!
//! ## 契约说明（What）
//! - `google.protobuf.Empty` 在 Proto 未定义同名消息时自动补充为无字段消息；
//! - 对象形状下，字段与属性的形态不兼容时返回 [`ProtoError::Binding`]，
//!   该错误在首次请求 (契约, 类型) 组合时抛出，而不是在单次解码中。
//!
//! ## 风险提示（Trade-offs）
//! - 读取计划按目标形状缓存，调用方使用的不同对象类型越多，缓存条目越多。

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tracing::debug;

use crate::bean::TypeDescriptor;
use crate::codec::enums::EnumTable;
use crate::codec::message::{MessageReader, MessageWriter, ReadCodec, ReadField, ReadTarget, Sink};
use crate::codec::{ElementCodec, FieldCodec, ReadContext, ReadElement, Repetition, check_binding};
use crate::error::{ProtoError, Result};
use crate::mapper::ProtoMapper;
use crate::schema::{EMPTY_TYPE, FieldDef, FieldType, MessageDef, Proto};
use crate::value::Value;
use crate::wire::ProtoInput;

/// 编译产物：写出器数组与名称索引。
#[derive(Debug)]
pub(crate) struct CompiledSchema {
    pub(crate) writers: Vec<MessageWriter>,
    pub(crate) index: HashMap<String, usize>,
}

/// Schema 编译器。
pub(crate) struct SchemaCompiler;

impl SchemaCompiler {
    pub(crate) fn compile(proto: &Proto) -> Result<CompiledSchema> {
        let empty = MessageDef::new(EMPTY_TYPE);
        let mut messages: Vec<&MessageDef> = proto.messages().collect();
        if proto.message(EMPTY_TYPE).is_none() {
            messages.push(&empty);
        }
        let index: HashMap<String, usize> = messages
            .iter()
            .enumerate()
            .map(|(position, message)| (message.name.clone(), position))
            .collect();
        let enums: HashMap<&str, Arc<EnumTable>> = proto
            .enums()
            .map(|def| (def.name.as_str(), Arc::new(EnumTable::from_def(def))))
            .collect();

        let writers = messages
            .iter()
            .map(|message| {
                let fields = message
                    .fields
                    .iter()
                    .map(|field| compile_field(message, field, &index, &enums))
                    .collect::<Result<Vec<_>>>()?;
                Ok(MessageWriter::new(message.name.clone(), fields))
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(
            package = proto.package.as_deref().unwrap_or_default(),
            messages = writers.len(),
            enums = enums.len(),
            "compiled protobuf schema"
        );
        Ok(CompiledSchema { writers, index })
    }
}

fn compile_field(
    message: &MessageDef,
    field: &FieldDef,
    index: &HashMap<String, usize>,
    enums: &HashMap<&str, Arc<EnumTable>>,
) -> Result<FieldCodec> {
    let element = |ty: &FieldType| -> Result<ElementCodec> {
        let unknown = |type_name: &str| ProtoError::UnknownType {
            type_name: type_name.to_owned(),
            context: format!("{}.{}", message.name, field.name),
        };
        match ty {
            FieldType::Scalar(scalar) => Ok(ElementCodec::Scalar(*scalar)),
            FieldType::Message(name) => index
                .get(name)
                .map(|&position| ElementCodec::Message(position))
                .ok_or_else(|| unknown(name)),
            FieldType::Enum(name) => enums
                .get(name.as_str())
                .map(|table| ElementCodec::Enum(Arc::clone(table)))
                .ok_or_else(|| unknown(name)),
            FieldType::Any => Ok(ElementCodec::Any),
            FieldType::Map { .. } => Err(ProtoError::InvalidSchema {
                context: format!("{}.{}", message.name, field.name),
                detail: "map value cannot be another map".to_owned(),
            }),
        }
    };
    let repetition = match &field.ty {
        FieldType::Map { key, value } => Repetition::Map {
            key: *key,
            value: element(value)?,
        },
        ty if field.repeated => Repetition::Repeated(element(ty)?),
        ty => Repetition::Single(element(ty)?),
    };
    Ok(FieldCodec::new(field.name.clone(), field.tag, repetition))
}

/// 绑定到某个目标形状的读取计划。
#[derive(Debug)]
pub struct ReaderPlan {
    readers: Vec<MessageReader>,
    root: usize,
}

impl ReaderPlan {
    /// 为消息构建读取计划；`wrapped` 为真时目标形状描述的是唯一字段而不是消息本身。
    pub(crate) fn build(
        mapper: &ProtoMapper,
        message: usize,
        target: &TypeDescriptor,
        wrapped: bool,
    ) -> Result<Self> {
        let mut builder = PlanBuilder {
            mapper,
            index: HashMap::new(),
            readers: Vec::new(),
            queue: VecDeque::new(),
        };
        let root = if wrapped {
            let slot = builder.readers.len();
            builder.readers.push(None);
            let reader = builder.reader(message, &TypeDescriptor::Dynamic, Some(target))?;
            builder.readers[slot] = Some(reader);
            slot
        } else {
            builder.intern(message, target)
        };
        while let Some((message, target, slot)) = builder.queue.pop_front() {
            let reader = builder.reader(message, &target, None)?;
            builder.readers[slot] = Some(reader);
        }
        let readers = builder
            .readers
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| ProtoError::InvalidSchema {
                context: mapper.writer(message).name().to_owned(),
                detail: "reader plan left an unresolved message".to_owned(),
            })?;
        debug!(
            proto_message = readers[root].name(),
            readers = readers.len(),
            target = ?target,
            "built protobuf reader plan"
        );
        Ok(Self { readers, root })
    }

    /// 从根读取器开始读取。
    pub(crate) fn read(&self, input: &mut ProtoInput<'_>, mapper: &ProtoMapper) -> Result<Value> {
        self.read_with(self.root, input, mapper)
    }

    pub(crate) fn read_with(
        &self,
        reader: usize,
        input: &mut ProtoInput<'_>,
        mapper: &ProtoMapper,
    ) -> Result<Value> {
        let cx = ReadContext { plan: self, mapper };
        self.readers[reader].read(input, &cx)
    }

    /// 计划中的读取器数量（每个可达的 (消息, 形状) 一个）。
    pub fn len(&self) -> usize {
        self.readers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readers.is_empty()
    }
}

type ReaderKey = (usize, TypeDescriptor);

struct PlanBuilder<'m> {
    mapper: &'m ProtoMapper,
    index: HashMap<ReaderKey, usize>,
    readers: Vec<Option<MessageReader>>,
    queue: VecDeque<(usize, TypeDescriptor, usize)>,
}

impl PlanBuilder<'_> {
    /// 登记 (消息, 形状)，返回读取器下标；首次登记时排入队列。
    fn intern(&mut self, message: usize, target: &TypeDescriptor) -> usize {
        let target = match target {
            TypeDescriptor::Bean(_) => target.clone(),
            _ => TypeDescriptor::Dynamic,
        };
        let key = (message, target);
        if let Some(&slot) = self.index.get(&key) {
            return slot;
        }
        let slot = self.readers.len();
        self.readers.push(None);
        self.queue.push_back((message, key.1.clone(), slot));
        self.index.insert(key, slot);
        slot
    }

    fn reader(
        &mut self,
        message: usize,
        target: &TypeDescriptor,
        wrapped_value: Option<&TypeDescriptor>,
    ) -> Result<MessageReader> {
        let mapper = self.mapper;
        let writer = mapper.writer(message);
        let descriptor = match target {
            TypeDescriptor::Bean(bean_type) => Some(mapper.beans().get_or_create(*bean_type)),
            _ => None,
        };

        let mut fields = Vec::with_capacity(writer.fields().len());
        for (slot, field) in writer.fields().iter().enumerate() {
            let (sink, ty) = match &descriptor {
                None => match wrapped_value {
                    Some(value_ty) => {
                        check_binding(writer.name(), field, value_ty, "<root>")?;
                        (Sink::MapKey, value_ty.clone())
                    }
                    None => (Sink::MapKey, TypeDescriptor::Dynamic),
                },
                Some(descriptor) => match descriptor.property(field.name()) {
                    Some(property) => match property.setter() {
                        Some(setter) => {
                            check_binding(writer.name(), field, property.ty(), descriptor.name())?;
                            (Sink::Setter(Arc::clone(setter)), property.ty().clone())
                        }
                        None => (Sink::Discard, TypeDescriptor::Dynamic),
                    },
                    None if descriptor.has_extras() => (Sink::Extras, TypeDescriptor::Dynamic),
                    None => {
                        debug!(
                            proto_message = writer.name(),
                            field = field.name(),
                            bean = descriptor.name(),
                            "wire field has no property, skipped on decode"
                        );
                        (Sink::Discard, TypeDescriptor::Dynamic)
                    }
                },
            };
            let codec = self.read_codec(field, &ty);
            fields.push((
                field.number(),
                ReadField {
                    name: field.name().to_owned(),
                    codec,
                    sink,
                    slot,
                },
            ));
        }

        let target = descriptor.map_or(ReadTarget::Map, ReadTarget::Bean);
        Ok(MessageReader::new(
            writer.name(),
            target,
            fields,
            mapper.config().options().hash_field_map_min_tag,
        ))
    }

    fn read_codec(&mut self, field: &FieldCodec, ty: &TypeDescriptor) -> ReadCodec {
        match field.repetition() {
            Repetition::Single(element) => ReadCodec::Single(self.read_element(element, ty)),
            Repetition::Repeated(element) => {
                let packed = match (ty, element) {
                    (TypeDescriptor::Array, ElementCodec::Scalar(scalar))
                        if scalar.is_packable() =>
                    {
                        Some(*scalar)
                    }
                    _ => None,
                };
                ReadCodec::Repeated {
                    element: self.read_element(element, ty.element()),
                    packed,
                }
            }
            Repetition::Map { key, value } => ReadCodec::Map {
                key: *key,
                value: self.read_element(value, ty.element()),
            },
        }
    }

    fn read_element(&mut self, element: &ElementCodec, ty: &TypeDescriptor) -> ReadElement {
        match element {
            ElementCodec::Scalar(scalar) => ReadElement::Scalar(*scalar),
            ElementCodec::Enum(table) => ReadElement::Enum(Arc::clone(table)),
            ElementCodec::Message(message) => ReadElement::Message(self.intern(*message, ty)),
            ElementCodec::Any => ReadElement::Any(ty.clone()),
        }
    }
}
