//! # config 模块说明
//!
//! ## 核心意图（Why）
//! - Any 字段的通用回退委托以构造参数的形式注入编译器，而不是进程级全局注册表；
//! - 解码安全相关的阈值（嵌套深度、哈希字段表门限）集中为可序列化的选项，宿主平台可直接嵌入自身配置文件。
//!
//! ## 契约说明（What）
//! - [`ProtoCodecOptions`] 支持 `serde` 反序列化，缺省字段取默认值；
//! - [`ProtoMapperConfig`] 构造后不可变，由同一工厂创建的映射器共享。

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;

use crate::codec::any::{AnyFallback, JsonAnyFallback};

const DEFAULT_HASH_FIELD_MAP_MIN_TAG: u32 = 100;
const DEFAULT_MAX_DEPTH: usize = 100;

/// 编解码选项。
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "snake_case")]
pub struct ProtoCodecOptions {
    /// 最大字段号超过该值且稀疏时改用哈希字段表。
    pub hash_field_map_min_tag: u32,
    /// 解码时允许的消息嵌套层数。
    pub max_depth: usize,
    /// 未知类型的 Any 值是否回退为 JSON 字节。
    pub json_fallback: bool,
}

impl Default for ProtoCodecOptions {
    fn default() -> Self {
        Self {
            hash_field_map_min_tag: DEFAULT_HASH_FIELD_MAP_MIN_TAG,
            max_depth: DEFAULT_MAX_DEPTH,
            json_fallback: true,
        }
    }
}

/// 传入编译器的显式配置。
#[derive(Clone)]
pub struct ProtoMapperConfig {
    options: ProtoCodecOptions,
    fallback: Arc<dyn AnyFallback>,
}

impl ProtoMapperConfig {
    pub fn new(options: ProtoCodecOptions) -> Self {
        Self {
            options,
            fallback: Arc::new(JsonAnyFallback),
        }
    }

    /// 替换 Any 回退委托。
    pub fn with_fallback(mut self, fallback: Arc<dyn AnyFallback>) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn options(&self) -> &ProtoCodecOptions {
        &self.options
    }

    pub fn fallback(&self) -> &dyn AnyFallback {
        self.fallback.as_ref()
    }
}

impl Default for ProtoMapperConfig {
    fn default() -> Self {
        Self::new(ProtoCodecOptions::default())
    }
}

impl fmt::Debug for ProtoMapperConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtoMapperConfig")
            .field("options", &self.options)
            .field("fallback", &self.fallback.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_fill_missing_fields_with_defaults() {
        let options: ProtoCodecOptions =
            serde_json::from_str(r#"{"max_depth": 8}"#).expect("解析选项");
        assert_eq!(options.max_depth, 8);
        assert_eq!(options.hash_field_map_min_tag, 100);
        assert!(options.json_fallback);
    }
}
