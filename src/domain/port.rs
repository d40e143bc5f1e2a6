//! 端口范围

use serde::Serialize;

/// 可分配端口范围（闭区间）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PortRange {
    low: u16,
    high: u16,
}

impl PortRange {
    /// 创建端口范围，要求 1 <= low <= high
    pub fn new(low: u16, high: u16) -> Result<Self, String> {
        if low == 0 {
            return Err("port range must start at 1 or above".to_string());
        }
        if low > high {
            return Err(format!("invalid port range: {} > {}", low, high));
        }
        Ok(Self { low, high })
    }

    pub fn low(&self) -> u16 {
        self.low
    }

    pub fn high(&self) -> u16 {
        self.high
    }

    /// 升序遍历
    pub fn iter(&self) -> impl Iterator<Item = u16> {
        self.low..=self.high
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            low: 3000,
            high: 3010,
        }
    }
}

impl std::fmt::Display for PortRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.low, self.high)
    }
}
