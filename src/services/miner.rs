//! 哈希搜索
//!
//! 从 0 开始递增 nonce，计算 sha256(query + nonce)，直到十六进制摘要
//! 以 `difficulty` 个 '0' 开头。与工作负载编排完全独立。

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

use crate::domain::MineResult;

/// 每尝试这么多次让出一次调度
const YIELD_EVERY: u64 = 1024;

/// SHA-256 十六进制摘要长度
const MAX_HEX_DIGITS: u32 = 64;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum MinerError {
    #[error("invalid request: {0}")]
    Validation(String),
}

pub struct Miner {
    max_difficulty: u32,
}

impl Miner {
    pub fn new(max_difficulty: u32) -> Self {
        Self {
            max_difficulty: max_difficulty.min(MAX_HEX_DIGITS),
        }
    }

    pub fn max_difficulty(&self) -> u32 {
        self.max_difficulty
    }

    pub async fn search(&self, query: &str, difficulty: u32) -> Result<MineResult, MinerError> {
        if query.is_empty() {
            return Err(MinerError::Validation("query is required".to_string()));
        }
        if difficulty == 0 || difficulty > self.max_difficulty {
            return Err(MinerError::Validation(format!(
                "difficulty must be between 1 and {}",
                self.max_difficulty
            )));
        }

        let prefix = "0".repeat(difficulty as usize);
        let mut nonce: u64 = 0;
        loop {
            let hash = digest(query, nonce);
            if hash.starts_with(&prefix) {
                info!(difficulty, nonce, hash = %hash, "Hash found");
                return Ok(MineResult { hash, nonce });
            }
            nonce += 1;
            if nonce % YIELD_EVERY == 0 {
                tokio::task::yield_now().await;
            }
        }
    }
}

/// sha256(query + nonce) 的小写十六进制
pub fn digest(query: &str, nonce: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(query.as_bytes());
    hasher.update(nonce.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}
