//! # spark-codec-protobuf
//!
//! ## 教案目的（Why）
//! - **定位**：契约驱动的 Protobuf 二进制编解码引擎。宿主平台只持有 OpenAPI 风格的契约，
//!   没有预生成的消息代码，本 crate 在运行时从契约推导线格式 Schema 并直接编解码业务值；
//! - **架构角色**：位于 RPC 网关的报文编解码层，上游是契约加载，下游是传输层的字节缓冲；
//! - **设计策略**：推导、IDL、编译、编解码、缓存五段流水线，各段之间只传递不可变产物。
//!
//! ## 交互契约（What）
//! 1. [`contract`]：契约类型树与 [`ContractDeriver`]，输出带服务块的 [`Proto`]；
//! 2. [`schema`]：Schema 模型与文本 IDL，打印与解析互为逆运算；
//! 3. [`compiler`] 与 [`codec`]：把 Schema 编译为字段编解码器，并按运行时形状绑定对象访问器；
//! 4. [`root`]：根编解码入口，统一包装消息与普通消息；
//! 5. [`cache`]：按契约标识缓存 [`ContractMapper`]，并发首次访问只构建一次。
//!
//! ## 实现策略（How）
//! - 运行时值以 [`Value`] 表示，强类型对象通过 [`Describe`] 声明属性访问器；
//! - 线格式原语位于 [`wire`]，编码写入 `bytes::BytesMut`，解码在借用切片上零拷贝前进；
//! - 错误统一为 [`ProtoError`]，携带稳定错误码与所属阶段。
//!
//! ## 风险提示（Trade-offs）
//! - 不支持 oneof、嵌套定义、proto2 语义与字段选项；解析器遇到这些结构直接报错；
//! - 同一契约标识的首次访问会阻塞在推导与编译上，之后的访问只有一次哈希查找。

pub mod bean;
pub mod cache;
pub mod codec;
pub mod compiler;
pub mod config;
pub mod contract;
pub mod error;
pub mod mapper;
pub mod root;
pub mod schema;
pub mod value;
pub mod wire;

pub use bean::{
    Bean, BeanDescriptor, BeanDescriptorBuilder, BeanDescriptorManager, BeanType, Describe,
    PropertyDescriptor, TypeDescriptor,
};
pub use cache::ScopedMapperCache;
pub use codec::any::{AnyFallback, JsonAnyFallback};
pub use compiler::ReaderPlan;
pub use config::{ProtoCodecOptions, ProtoMapperConfig};
pub use contract::{
    Components, Contract, ContractDeriver, DerivedSchema, ObjectSchema, Operation, ScalarKind,
    SchemaDeriver, SchemaNode,
};
pub use error::{ErrorStage, ProtoError, Result};
pub use mapper::{
    ContractMapper, MessageHandle, OperationMapper, ProtoMapper, ProtoMapperFactory,
};
pub use root::{RootDeserializer, RootSerializer};
pub use schema::{Proto, ScalarType};
pub use value::{BeanValue, PackedArray, Value};
