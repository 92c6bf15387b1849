//! # message 模块说明
//!
//! ## 核心意图（Why）
//! - [`MessageWriter`] 按线格式字段顺序写出消息：动态映射按字段名取值，强类型对象按属性绑定取值；
//! - [`MessageReader`] 逐个读取标签并分派到字段读取器，未知字段跳过，最后一次性构建目标值。
//!
//! ## 契约说明（What）
//! - 对象绑定按运行时类型缓存（`DashMap<TypeId, _>`），同一 (消息, 类型) 只校验一次；
//! - 线格式字段没有对应属性时：写出侧从额外属性槽取值，读取侧写入额外属性槽，都没有则忽略；
//! - 单值消息字段多次出现时以最后一次为准，重复字段与映射字段按到达顺序合并。
//!
//! ## 风险提示（Trade-offs）
//! - 读取侧先把字段值暂存到槽位再统一赋值，多一次移动，换来 setter 只被调用一次；
//! - [`FieldMap`] 在字段号稀疏且较大时改用哈希表，避免按最大字段号分配数组。

use std::any::TypeId;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, error};

use crate::bean::{Bean, BeanDescriptor, BeanDescriptorManager, BeanType, PropertyDescriptor, Setter};
use crate::error::{ProtoError, Result};
use crate::mapper::ProtoMapper;
use crate::schema::ScalarType;
use crate::value::{BeanValue, Value};
use crate::wire::{ProtoInput, ProtoOutput};

use super::{FieldCodec, ReadContext, ReadElement, check_binding, expect_wire_type, map, repeated};

/// 消息写出器。
#[derive(Debug)]
pub struct MessageWriter {
    name: String,
    fields: Vec<FieldCodec>,
    by_name: HashMap<String, usize>,
    bindings: DashMap<TypeId, Arc<WriteBinding>>,
}

impl MessageWriter {
    pub fn new(name: impl Into<String>, fields: Vec<FieldCodec>) -> Self {
        let by_name = fields
            .iter()
            .enumerate()
            .map(|(index, field)| (field.name().to_owned(), index))
            .collect();
        Self {
            name: name.into(),
            fields,
            by_name,
            bindings: DashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldCodec] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldCodec> {
        self.by_name.get(name).map(|&index| &self.fields[index])
    }

    /// 写出消息体（不含外层长度前缀）。
    pub(crate) fn write(
        &self,
        out: &mut ProtoOutput,
        value: &Value,
        mapper: &ProtoMapper,
    ) -> Result<()> {
        match value {
            Value::Null => Ok(()),
            Value::Map(entries) => {
                for field in &self.fields {
                    if let Some(item) = entries.get(field.name()) {
                        field.write(out, item, &self.name, mapper)?;
                    }
                }
                Ok(())
            }
            Value::Bean(bean) => self.write_bean(out, bean.as_bean(), mapper),
            other => Err(ProtoError::mismatch(&self.name, "message", other.kind())),
        }
    }

    /// 按属性绑定写出强类型对象。
    pub(crate) fn write_bean(
        &self,
        out: &mut ProtoOutput,
        bean: &dyn Bean,
        mapper: &ProtoMapper,
    ) -> Result<()> {
        let binding = self.binding(bean.bean_type(), mapper.beans())?;
        for (index, source) in &binding.sources {
            let field = &self.fields[*index];
            let item = match source {
                WriteSource::Property(property) => property.get(bean),
                WriteSource::Extras => binding
                    .descriptor
                    .extras(bean)
                    .and_then(|extras| extras.get(field.name()))
                    .cloned(),
            };
            if let Some(item) = item {
                field.write(out, &item, &self.name, mapper)?;
            }
        }
        Ok(())
    }

    /// 获取或构建 (消息, 运行时类型) 的绑定。
    pub(crate) fn binding(
        &self,
        bean_type: BeanType,
        beans: &BeanDescriptorManager,
    ) -> Result<Arc<WriteBinding>> {
        if let Some(binding) = self.bindings.get(&bean_type.id()) {
            return Ok(Arc::clone(binding.value()));
        }
        let binding = Arc::new(WriteBinding::build(self, beans.get_or_create(bean_type))?);
        Ok(Arc::clone(
            self.bindings.entry(bean_type.id()).or_insert(binding).value(),
        ))
    }
}

/// 写出侧字段取值来源。
#[derive(Debug)]
enum WriteSource {
    Property(PropertyDescriptor),
    Extras,
}

/// 消息字段到对象属性的绑定，按字段顺序排列。
#[derive(Debug)]
pub(crate) struct WriteBinding {
    descriptor: Arc<BeanDescriptor>,
    sources: Vec<(usize, WriteSource)>,
}

impl WriteBinding {
    fn build(writer: &MessageWriter, descriptor: Arc<BeanDescriptor>) -> Result<Self> {
        let mut sources = Vec::with_capacity(writer.fields.len());
        for (index, field) in writer.fields.iter().enumerate() {
            match descriptor.property(field.name()) {
                Some(property) if property.is_readable() => {
                    check_binding(&writer.name, field, property.ty(), descriptor.name())?;
                    sources.push((index, WriteSource::Property(property.clone())));
                }
                Some(_) => {}
                None if descriptor.has_extras() => sources.push((index, WriteSource::Extras)),
                None => debug!(
                    proto_message = writer.name.as_str(),
                    field = field.name(),
                    bean = descriptor.name(),
                    "wire field has no property, skipped on encode"
                ),
            }
        }
        for property in descriptor.properties() {
            if writer.field(property.name()).is_none() {
                debug!(
                    proto_message = writer.name.as_str(),
                    property = property.name(),
                    bean = descriptor.name(),
                    "property has no wire field, ignored"
                );
            }
        }
        Ok(Self {
            descriptor,
            sources,
        })
    }
}

/// 字段号到字段的查找表。
#[derive(Debug)]
pub enum FieldMap<T> {
    /// 以字段号为下标的稠密数组。
    Array(Vec<Option<T>>),
    /// 字段号稀疏时的哈希表。
    Hash(HashMap<u32, T>),
}

impl<T> FieldMap<T> {
    /// 最大字段号大于 `min_tag` 且不小于字段数的两倍时使用哈希表。
    pub fn new(entries: Vec<(u32, T)>, min_tag: u32) -> Self {
        let max_tag = entries.iter().map(|(number, _)| *number).max().unwrap_or(0);
        let count = u32::try_from(entries.len()).unwrap_or(u32::MAX);
        if max_tag > min_tag && max_tag >= count.saturating_mul(2) {
            return FieldMap::Hash(entries.into_iter().collect());
        }
        let mut slots = Vec::new();
        slots.resize_with(max_tag as usize + 1, || None);
        for (number, entry) in entries {
            slots[number as usize] = Some(entry);
        }
        FieldMap::Array(slots)
    }

    pub fn get(&self, number: u32) -> Option<&T> {
        match self {
            FieldMap::Array(slots) => slots.get(number as usize).and_then(Option::as_ref),
            FieldMap::Hash(entries) => entries.get(&number),
        }
    }

    pub fn is_hashed(&self) -> bool {
        matches!(self, FieldMap::Hash(_))
    }
}

/// 读取器产出的目标形状。
#[derive(Clone, Debug)]
pub(crate) enum ReadTarget {
    Map,
    Bean(Arc<BeanDescriptor>),
}

/// 字段值的去向。
#[derive(Clone)]
pub(crate) enum Sink {
    /// 写入动态映射的同名键。
    MapKey,
    Setter(Setter),
    /// 写入对象的额外属性槽。
    Extras,
    /// 对象没有可写的对应属性。
    Discard,
}

impl std::fmt::Debug for Sink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Sink::MapKey => "MapKey",
            Sink::Setter(_) => "Setter",
            Sink::Extras => "Extras",
            Sink::Discard => "Discard",
        })
    }
}

/// 字段的读取形态。
#[derive(Clone, Debug)]
pub(crate) enum ReadCodec {
    Single(ReadElement),
    /// `packed` 为 `Some` 时解码为原始数组。
    Repeated {
        element: ReadElement,
        packed: Option<ScalarType>,
    },
    Map {
        key: ScalarType,
        value: ReadElement,
    },
}

#[derive(Clone, Debug)]
pub(crate) struct ReadField {
    pub(crate) name: String,
    pub(crate) codec: ReadCodec,
    pub(crate) sink: Sink,
    pub(crate) slot: usize,
}

impl ReadField {
    fn read(
        &self,
        input: &mut ProtoInput<'_>,
        wire_type: crate::wire::WireType,
        slot: &mut Option<Value>,
        cx: &ReadContext<'_>,
    ) -> Result<()> {
        match &self.codec {
            ReadCodec::Single(element) => {
                expect_wire_type(&self.name, element.wire_type(), wire_type)?;
                *slot = Some(element.read_value(input, &self.name, cx)?);
                Ok(())
            }
            ReadCodec::Repeated { element, packed } => repeated::read_repeated(
                input, wire_type, element, *packed, slot, &self.name, cx,
            ),
            ReadCodec::Map { key, value } => {
                map::read_map_entry(input, wire_type, *key, value, slot, &self.name, cx)
            }
        }
    }
}

/// 消息读取器：绑定到某个目标形状。
#[derive(Debug)]
pub(crate) struct MessageReader {
    name: String,
    target: ReadTarget,
    fields: FieldMap<ReadField>,
    slot_count: usize,
}

impl MessageReader {
    pub(crate) fn new(
        name: impl Into<String>,
        target: ReadTarget,
        fields: Vec<(u32, ReadField)>,
        min_tag: u32,
    ) -> Self {
        let slot_count = fields.len();
        Self {
            name: name.into(),
            target,
            fields: FieldMap::new(fields, min_tag),
            slot_count,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// 读取整个消息体直到输入耗尽。
    pub(crate) fn read(&self, input: &mut ProtoInput<'_>, cx: &ReadContext<'_>) -> Result<Value> {
        let mut slots: Vec<Option<Value>> = vec![None; self.slot_count];
        let mut decoded: Vec<&ReadField> = Vec::with_capacity(self.slot_count);
        while let Some((number, wire_type)) = input.read_tag()? {
            let Some(field) = self.fields.get(number) else {
                input.skip_field(number, wire_type)?;
                continue;
            };
            let slot = &mut slots[field.slot];
            if slot.is_none() {
                decoded.push(field);
            }
            field.read(input, wire_type, slot, cx).inspect_err(|err| {
                if !matches!(err, ProtoError::DepthExceeded { .. }) {
                    error!(
                        proto_message = self.name.as_str(),
                        field = field.name.as_str(),
                        code = err.code(),
                        "failed to decode protobuf field: {err}"
                    );
                }
            })?;
        }
        self.build(decoded, slots)
    }

    fn build(&self, decoded: Vec<&ReadField>, mut slots: Vec<Option<Value>>) -> Result<Value> {
        match &self.target {
            ReadTarget::Map => {
                let mut map = BTreeMap::new();
                for field in decoded {
                    if let Some(value) = slots[field.slot].take() {
                        map.insert(field.name.clone(), value);
                    }
                }
                Ok(Value::Map(map))
            }
            ReadTarget::Bean(descriptor) => {
                let mut instance = descriptor.instantiate();
                for field in decoded {
                    let Some(value) = slots[field.slot].take() else {
                        continue;
                    };
                    match &field.sink {
                        Sink::Setter(setter) => setter(instance.as_any_mut(), value)?,
                        Sink::Extras => {
                            if let Some(extras) = descriptor.extras_mut(&mut *instance) {
                                extras.insert(field.name.clone(), value);
                            }
                        }
                        Sink::MapKey | Sink::Discard => {}
                    }
                }
                Ok(Value::Bean(BeanValue::from_boxed(instance)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dense_tags_use_array_lookup() {
        let map = FieldMap::new(vec![(1, "a"), (2, "b"), (150, "c")], 100);
        // 最大字段号 150 >= 3 * 2，且超过门限，因此改用哈希表。
        assert!(map.is_hashed());
        assert_eq!(map.get(150), Some(&"c"));

        let map = FieldMap::new(vec![(1, "a"), (3, "b")], 100);
        assert!(!map.is_hashed());
        assert_eq!(map.get(3), Some(&"b"));
        assert_eq!(map.get(2), None);
        assert_eq!(map.get(4000), None);
    }

    #[test]
    fn empty_field_map_finds_nothing() {
        let map: FieldMap<&str> = FieldMap::new(Vec::new(), 100);
        assert_eq!(map.get(1), None);
    }
}
