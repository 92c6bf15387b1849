//! # cache 模块说明
//!
//! ## 核心意图（Why）
//! - 以契约标识为键缓存 [`ContractMapper`]，推导与编译只在首次访问时发生一次；
//! - 同一标识的并发首次访问必须得到同一个实例（单飞），不同标识之间互不阻塞。
//!
//! ## 实现策略（How）
//! - 外层 `DashMap` 只负责为每个标识分配一个槽位，持有分片锁的时间仅限于插入槽位；
//! - 槽位是 `parking_lot::Mutex<Option<_>>`：第一个拿到锁的调用者构建并发布，其余调用者在锁上排队，
//!   拿到锁后直接读取已发布的实例；
//! - 构建失败时槽位保持为空，错误返回给当前调用者，下一个调用者会重新尝试构建。
//!
//! ## 风险提示（Trade-offs）
//! - 失败的标识会留下一个空槽位；删除它需要与排队者竞争，可能导致同一标识发布两个实例，因此保留空槽位。

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::contract::{Contract, ContractDeriver};
use crate::error::Result;
use crate::mapper::{ContractMapper, ProtoMapperFactory};
use crate::schema::Proto;

type Slot = Arc<Mutex<Option<Arc<ContractMapper>>>>;

/// 按契约标识缓存编解码器集合。
#[derive(Debug, Default)]
pub struct ScopedMapperCache {
    factory: ProtoMapperFactory,
    entries: DashMap<Arc<str>, Slot>,
}

impl ScopedMapperCache {
    pub fn new(factory: ProtoMapperFactory) -> Self {
        Self {
            factory,
            entries: DashMap::new(),
        }
    }

    pub fn factory(&self) -> &ProtoMapperFactory {
        &self.factory
    }

    /// 获取或由契约推导构建。
    pub fn get_or_create(&self, id: &str, contract: &Contract) -> Result<Arc<ContractMapper>> {
        self.get_or_init(id, || ContractDeriver::derive(contract))
    }

    /// 获取或由 IDL 文本构建，供只拿到打印结果的组件使用。
    pub fn get_or_create_from_idl(&self, id: &str, content: &str) -> Result<Arc<ContractMapper>> {
        self.get_or_init(id, || Proto::parse(content))
    }

    /// 单飞构建：同一标识只有一个调用者执行 `build`。
    pub fn get_or_init<F>(&self, id: &str, build: F) -> Result<Arc<ContractMapper>>
    where
        F: FnOnce() -> Result<Proto>,
    {
        let slot = self.slot(id);
        let mut guard = slot.lock();
        if let Some(mapper) = guard.as_ref() {
            return Ok(Arc::clone(mapper));
        }
        let mapper = build()
            .and_then(|proto| ContractMapper::from_proto(id, proto, &self.factory))
            .map(Arc::new)
            .inspect_err(|err| {
                warn!(
                    contract = id,
                    code = err.code(),
                    "failed to build contract mapper: {err}"
                );
            })?;
        *guard = Some(Arc::clone(&mapper));
        debug!(contract = id, "published contract mapper");
        Ok(mapper)
    }

    /// 查询已发布的实例；构建中或构建失败的标识返回 `None`。
    pub fn get(&self, id: &str) -> Option<Arc<ContractMapper>> {
        let slot = self.entries.get(id).map(|entry| Arc::clone(entry.value()))?;
        let guard = slot.lock();
        guard.clone()
    }

    /// 丢弃标识对应的全部缓存，返回此前发布的实例。
    pub fn unregister(&self, id: &str) -> Option<Arc<ContractMapper>> {
        let (_, slot) = self.entries.remove(id)?;
        let guard = slot.lock();
        guard.clone()
    }

    /// 已发布的实例数量；构建失败留下的空槽位不计入，构建中的槽位会等待其结束。
    pub fn len(&self) -> usize {
        let slots: Vec<Slot> = self
            .entries
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        slots.iter().filter(|slot| slot.lock().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, id: &str) -> Slot {
        if let Some(slot) = self.entries.get(id) {
            return Arc::clone(slot.value());
        }
        Arc::clone(self.entries.entry(Arc::from(id)).or_default().value())
    }
}
