//! # root 模块说明
//!
//! ## 核心意图（Why）
//! - 把“消息”与“包装消息的唯一字段”两种根形态统一成字节与运行时值之间的一对入口，
//!   调用方无需关心某个类型在线格式上是否被包装；
//! - 每次调用使用独立的输出缓冲与输入游标，共享的只有不可变的编译产物，因此可跨线程并发调用。
//!
//! ## 契约说明（What）
//! - 包装根：编码 `Null` 得到空字节，非空值写作字段 1；解码空字节得到 `Null`；
//! - 消息根：解码空字节得到空映射或默认对象；`google.protobuf.Empty` 解码恒为 `Null`；
//! - 编码失败时不返回任何部分结果。

use std::sync::Arc;

use bytes::Bytes;

use crate::bean::{Bean, Describe};
use crate::compiler::ReaderPlan;
use crate::error::Result;
use crate::mapper::ProtoMapper;
use crate::value::{BeanValue, Value};
use crate::wire::{ProtoInput, ProtoOutput};

/// 根编码器。
#[derive(Clone, Debug)]
pub struct RootSerializer {
    mapper: Arc<ProtoMapper>,
    message: usize,
    wrapped: bool,
}

impl RootSerializer {
    pub(crate) fn new(mapper: Arc<ProtoMapper>, message: usize, wrapped: bool) -> Self {
        Self {
            mapper,
            message,
            wrapped,
        }
    }

    pub fn serialize(&self, value: &Value) -> Result<Bytes> {
        let writer = self.mapper.writer(self.message);
        let mut out = ProtoOutput::new();
        if self.wrapped {
            if let Some(field) = writer.fields().first() {
                field.write(&mut out, value, writer.name(), &self.mapper)?;
            }
        } else {
            writer.write(&mut out, value, &self.mapper)?;
        }
        Ok(out.freeze())
    }

    /// 直接编码对象，消息根无需先包装为 [`Value`]。
    pub fn serialize_bean(&self, bean: &dyn Bean) -> Result<Bytes> {
        if self.wrapped {
            return self.serialize(&Value::Bean(BeanValue::from_boxed(bean.clone_bean())));
        }
        let mut out = ProtoOutput::new();
        self.mapper
            .writer(self.message)
            .write_bean(&mut out, bean, &self.mapper)?;
        Ok(out.freeze())
    }
}

/// 根解码器。
#[derive(Clone, Debug)]
pub struct RootDeserializer {
    mapper: Arc<ProtoMapper>,
    plan: Arc<ReaderPlan>,
    /// 包装根的字段名。
    value_field: Option<String>,
    empty: bool,
}

impl RootDeserializer {
    pub(crate) fn new(
        mapper: Arc<ProtoMapper>,
        plan: Arc<ReaderPlan>,
        value_field: Option<String>,
        empty: bool,
    ) -> Self {
        Self {
            mapper,
            plan,
            value_field,
            empty,
        }
    }

    pub fn deserialize(&self, bytes: &[u8]) -> Result<Value> {
        if self.empty || (self.value_field.is_some() && bytes.is_empty()) {
            return Ok(Value::Null);
        }
        let mut input = ProtoInput::new(bytes, self.mapper.config().options().max_depth);
        let value = self.plan.read(&mut input, &self.mapper)?;
        match (&self.value_field, value) {
            (Some(field), Value::Map(mut map)) => Ok(map.remove(field).unwrap_or_default()),
            (_, value) => Ok(value),
        }
    }

    /// 解码为强类型对象；`Null` 还原为默认值。
    pub fn deserialize_bean<T: Describe>(&self, bytes: &[u8]) -> Result<T> {
        self.deserialize(bytes)?.into_bean::<T>()
    }
}
