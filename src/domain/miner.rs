//! 哈希搜索相关领域模型

use serde::{Deserialize, Serialize};

/// 哈希搜索请求
///
/// 缺失的字段取默认值，交给搜索本身的校验返回 400。
#[derive(Debug, Clone, Deserialize)]
pub struct MineRequest {
    #[serde(default)]
    pub query: String,
    /// 前导 0 的个数；兼容旧字段名 `dificulty`
    #[serde(default, alias = "dificulty")]
    pub difficulty: u32,
}

/// 哈希搜索结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MineResult {
    pub hash: String,
    pub nonce: u64,
}
