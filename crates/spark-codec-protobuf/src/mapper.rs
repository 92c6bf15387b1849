//! # mapper 模块说明
//!
//! ## 核心意图（Why）
//! - [`ProtoMapper`] 持有一份 Proto 的全部编译产物：消息写出器、名称索引与按目标形状缓存的读取计划；
//! - [`ProtoMapperFactory`] 把对象描述符缓存与编解码配置显式传给每个映射器，替代进程级全局状态；
//! - [`ContractMapper`] 在映射器之上按操作名组织请求/响应编解码器，操作表来自 IDL 中的 rpc 注解。
//!
//! ## 契约说明（What）
//! - 映射器构造完成后不可变（读取计划缓存除外），可在线程间以 `Arc` 共享；
//! - 读取计划以 `(消息下标, 目标形状, 是否包装)` 为键，并发首次请求时以先写入者为准；
//! - `@WrapProperty` 消息作为根时直接编解码其唯一字段的值，`google.protobuf.Empty` 的解码结果恒为 `Null`。

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::bean::{BeanDescriptorManager, TypeDescriptor};
use crate::codec::message::MessageWriter;
use crate::codec::{ElementCodec, Repetition, check_binding};
use crate::compiler::{ReaderPlan, SchemaCompiler};
use crate::config::ProtoMapperConfig;
use crate::contract::service::{MAIN_SERVICE, ResponseSignature, RpcSignature};
use crate::error::{ProtoError, Result};
use crate::root::{RootDeserializer, RootSerializer};
use crate::schema::{EMPTY_TYPE, Proto};

type PlanKey = (usize, TypeDescriptor, bool);

/// 一份 Proto 的编译产物。
pub struct ProtoMapper {
    proto: Proto,
    writers: Vec<MessageWriter>,
    index: HashMap<String, usize>,
    plans: DashMap<PlanKey, Arc<ReaderPlan>>,
    beans: Arc<BeanDescriptorManager>,
    config: Arc<ProtoMapperConfig>,
}

impl ProtoMapper {
    pub fn new(
        proto: Proto,
        beans: Arc<BeanDescriptorManager>,
        config: Arc<ProtoMapperConfig>,
    ) -> Result<Self> {
        proto.validate()?;
        let compiled = SchemaCompiler::compile(&proto)?;
        Ok(Self {
            proto,
            writers: compiled.writers,
            index: compiled.index,
            plans: DashMap::new(),
            beans,
            config,
        })
    }

    pub fn proto(&self) -> &Proto {
        &self.proto
    }

    pub fn beans(&self) -> &BeanDescriptorManager {
        &self.beans
    }

    pub fn config(&self) -> &ProtoMapperConfig {
        &self.config
    }

    /// 按短名称查找消息下标。
    pub fn message_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn message_writer(&self, name: &str) -> Option<&MessageWriter> {
        self.message_index(name).map(|index| self.writer(index))
    }

    pub(crate) fn writer(&self, index: usize) -> &MessageWriter {
        &self.writers[index]
    }

    /// 获取消息的根编解码入口。
    pub fn message_handle(self: &Arc<Self>, name: &str) -> Result<MessageHandle> {
        let short = self.proto.short_name(name);
        let message = self
            .message_index(short)
            .ok_or_else(|| ProtoError::MessageNotFound {
                name: name.to_owned(),
            })?;
        let wrapped = self
            .proto
            .message(short)
            .is_some_and(|definition| definition.is_wrap_property());
        Ok(MessageHandle {
            mapper: Arc::clone(self),
            message,
            wrapped,
        })
    }

    /// 非包装形态的读取计划。
    pub(crate) fn reader_plan(
        &self,
        message: usize,
        target: &TypeDescriptor,
    ) -> Result<Arc<ReaderPlan>> {
        self.plan_for(message, target, false)
    }

    pub(crate) fn plan_for(
        &self,
        message: usize,
        target: &TypeDescriptor,
        wrapped: bool,
    ) -> Result<Arc<ReaderPlan>> {
        let key = (message, target.clone(), wrapped);
        if let Some(plan) = self.plans.get(&key) {
            return Ok(Arc::clone(plan.value()));
        }
        let plan = Arc::new(ReaderPlan::build(self, message, target, wrapped)?);
        Ok(Arc::clone(self.plans.entry(key).or_insert(plan).value()))
    }
}

impl fmt::Debug for ProtoMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtoMapper")
            .field("package", &self.proto.package)
            .field("messages", &self.writers.len())
            .field("plans", &self.plans.len())
            .field("config", &self.config)
            .finish()
    }
}

/// 映射器工厂：共享对象描述符缓存与配置。
#[derive(Clone, Debug, Default)]
pub struct ProtoMapperFactory {
    beans: Arc<BeanDescriptorManager>,
    config: Arc<ProtoMapperConfig>,
}

impl ProtoMapperFactory {
    pub fn new(config: ProtoMapperConfig) -> Self {
        Self {
            beans: Arc::new(BeanDescriptorManager::new()),
            config: Arc::new(config),
        }
    }

    /// 替换对象描述符缓存，便于多个工厂共享。
    pub fn with_beans(mut self, beans: Arc<BeanDescriptorManager>) -> Self {
        self.beans = beans;
        self
    }

    pub fn beans(&self) -> &Arc<BeanDescriptorManager> {
        &self.beans
    }

    pub fn config(&self) -> &ProtoMapperConfig {
        &self.config
    }

    /// 由 IDL 文本创建映射器。
    pub fn create_from_content(&self, content: &str) -> Result<Arc<ProtoMapper>> {
        self.create_from_proto(Proto::parse(content)?)
    }

    pub fn create_from_proto(&self, proto: Proto) -> Result<Arc<ProtoMapper>> {
        ProtoMapper::new(proto, Arc::clone(&self.beans), Arc::clone(&self.config)).map(Arc::new)
    }
}

/// 单个消息的根编解码入口。
#[derive(Clone, Debug)]
pub struct MessageHandle {
    mapper: Arc<ProtoMapper>,
    message: usize,
    wrapped: bool,
}

impl MessageHandle {
    pub fn name(&self) -> &str {
        self.mapper.writer(self.message).name()
    }

    /// 是否为 `@WrapProperty` 包装消息。
    pub fn is_wrapped(&self) -> bool {
        self.wrapped
    }

    pub fn mapper(&self) -> &Arc<ProtoMapper> {
        &self.mapper
    }

    /// 为给定运行时形状准备编码器；对象形状在此处完成绑定校验。
    pub fn writer_for(&self, ty: &TypeDescriptor) -> Result<RootSerializer> {
        let writer = self.mapper.writer(self.message);
        if self.wrapped {
            if let Some(field) = writer.fields().first() {
                check_binding(writer.name(), field, ty, "<root>")?;
                let nested = match field.repetition() {
                    Repetition::Single(ElementCodec::Message(index))
                    | Repetition::Repeated(ElementCodec::Message(index)) => Some(*index),
                    _ => None,
                };
                if let (Some(index), TypeDescriptor::Bean(bean_type)) = (nested, ty.element()) {
                    self.mapper
                        .writer(index)
                        .binding(*bean_type, self.mapper.beans())?;
                }
            }
        } else if let TypeDescriptor::Bean(bean_type) = ty {
            writer.binding(*bean_type, self.mapper.beans())?;
        }
        Ok(RootSerializer::new(
            Arc::clone(&self.mapper),
            self.message,
            self.wrapped,
        ))
    }

    /// 为给定运行时形状准备解码器；读取计划在此处构建并缓存。
    pub fn reader_for(&self, ty: &TypeDescriptor) -> Result<RootDeserializer> {
        let plan = self.mapper.plan_for(self.message, ty, self.wrapped)?;
        let writer = self.mapper.writer(self.message);
        let value_field = self
            .wrapped
            .then(|| writer.fields().first().map(|field| field.name().to_owned()))
            .flatten();
        Ok(RootDeserializer::new(
            Arc::clone(&self.mapper),
            plan,
            value_field,
            writer.name() == EMPTY_TYPE,
        ))
    }
}

/// 单个操作的请求与响应编解码入口。
#[derive(Clone, Debug)]
pub struct OperationMapper {
    name: String,
    request: MessageHandle,
    responses: BTreeMap<String, MessageHandle>,
}

impl OperationMapper {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn request(&self) -> &MessageHandle {
        &self.request
    }

    /// 按状态码查找响应。
    pub fn response(&self, status: &str) -> Option<&MessageHandle> {
        self.responses.get(status)
    }

    /// 成功响应：优先 `200`，否则取第一个状态码。
    pub fn ok_response(&self) -> Option<&MessageHandle> {
        self.responses
            .get("200")
            .or_else(|| self.responses.values().next())
    }

    pub fn statuses(&self) -> impl Iterator<Item = &str> {
        self.responses.keys().map(String::as_str)
    }
}

/// 一份契约的完整编解码器集合。
#[derive(Clone, Debug)]
pub struct ContractMapper {
    id: Arc<str>,
    proto_text: String,
    mapper: Arc<ProtoMapper>,
    operations: BTreeMap<String, OperationMapper>,
}

impl ContractMapper {
    /// 由推导或解析得到的 Proto 构建。
    pub fn from_proto(id: &str, proto: Proto, factory: &ProtoMapperFactory) -> Result<Self> {
        let proto_text = proto.to_idl();
        let mapper = factory.create_from_proto(proto)?;
        let operations = collect_operations(&mapper)?;
        debug!(
            contract = id,
            operations = operations.len(),
            "built contract mapper"
        );
        Ok(Self {
            id: Arc::from(id),
            proto_text,
            mapper,
            operations,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// 打印后的 IDL 文本，可被其他组件独立加载。
    pub fn proto_text(&self) -> &str {
        &self.proto_text
    }

    pub fn mapper(&self) -> &Arc<ProtoMapper> {
        &self.mapper
    }

    pub fn operation(&self, name: &str) -> Result<&OperationMapper> {
        self.operations
            .get(name)
            .ok_or_else(|| ProtoError::OperationNotFound {
                contract: self.id.to_string(),
                operation: name.to_owned(),
            })
    }

    pub fn operations(&self) -> impl Iterator<Item = &OperationMapper> {
        self.operations.values()
    }
}

fn collect_operations(mapper: &Arc<ProtoMapper>) -> Result<BTreeMap<String, OperationMapper>> {
    let mut operations = BTreeMap::new();
    let Some(service) = mapper.proto().service(MAIN_SERVICE) else {
        return Ok(operations);
    };
    for rpc in &service.rpcs {
        let signature = RpcSignature::from_annotations(&rpc.name, &rpc.annotations)?
            .unwrap_or_else(|| RpcSignature {
                arg_type_name: rpc.arg.clone(),
                responses: BTreeMap::from([(
                    "200".to_owned(),
                    ResponseSignature {
                        type_name: rpc.ret.clone(),
                    },
                )]),
            });
        let request = mapper.message_handle(&signature.arg_type_name)?;
        let responses = signature
            .responses
            .iter()
            .map(|(status, response)| {
                Ok((status.clone(), mapper.message_handle(&response.type_name)?))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;
        operations.insert(
            rpc.name.clone(),
            OperationMapper {
                name: rpc.name.clone(),
                request,
                responses,
            },
        );
    }
    Ok(operations)
}
