//! 环境变量配置加载

use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::domain::PortRange;
use crate::services::OrchestratorSettings;

/// 环境配置
#[derive(Clone, Debug)]
pub struct EnvConfig {
    /// 服务监听端口
    pub port: u16,
    /// 工作负载配置
    pub workload: WorkloadConfig,
    /// 隧道进程配置
    pub tunnel: TunnelConfig,
    /// 单次 Docker API 请求超时（秒）
    pub docker_timeout_secs: u64,
    /// 哈希搜索允许的最大难度
    pub miner_max_difficulty: u32,
}

/// 工作负载配置
#[derive(Clone, Debug)]
pub struct WorkloadConfig {
    /// 可分配的宿主机端口范围
    pub port_range: PortRange,
    /// 容器内服务端口
    pub container_port: u16,
    /// hibernate 是否停止所有匹配的容器
    pub hibernate_all: bool,
    /// 单次端口探测超时（秒）
    pub probe_timeout_secs: u64,
}

/// 隧道进程配置
#[derive(Clone, Debug)]
pub struct TunnelConfig {
    /// 可执行文件
    pub command: String,
    /// 参数，`{port}` 会被替换为本地端口
    pub args: Vec<String>,
    /// 等待 URL 的超时（秒）
    pub timeout_secs: u64,
}

impl EnvConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// 从任意 key-value 来源加载，格式错误的值回退到默认值
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        // Port
        let port = parse_or(&lookup, "PORT", constants::DEFAULT_PORT);

        let workload = WorkloadConfig::from_lookup(&lookup);
        let tunnel = TunnelConfig::from_lookup(&lookup);

        let docker_timeout_secs = parse_or(&lookup, "DOCKER_TIMEOUT_SECS", 120);
        let miner_max_difficulty = parse_or(&lookup, "MINER_MAX_DIFFICULTY", 6);

        Self {
            port,
            workload,
            tunnel,
            docker_timeout_secs,
            miner_max_difficulty,
        }
    }

    pub fn docker_timeout(&self) -> Duration {
        Duration::from_secs(self.docker_timeout_secs)
    }
}

impl WorkloadConfig {
    fn from_lookup<F>(lookup: &F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let default_range = PortRange::default();
        let low = parse_or(lookup, "WORKLOAD_PORT_LOW", default_range.low());
        let high = parse_or(lookup, "WORKLOAD_PORT_HIGH", default_range.high());
        let port_range = PortRange::new(low, high).unwrap_or_else(|e| {
            warn!(low, high, error = %e, "Invalid workload port range, using default {}", default_range);
            default_range
        });

        let container_port = parse_or(lookup, "WORKLOAD_CONTAINER_PORT", 3000);

        let hibernate_all = lookup("HIBERNATE_ALL_MATCHES")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let probe_timeout_secs = parse_or(lookup, "PORT_PROBE_TIMEOUT_SECS", 5);

        Self {
            port_range,
            container_port,
            hibernate_all,
            probe_timeout_secs,
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            port_range: self.port_range,
            container_port: self.container_port,
            hibernate_all: self.hibernate_all,
        }
    }
}

impl TunnelConfig {
    fn from_lookup<F>(lookup: &F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let command = lookup("TUNNEL_COMMAND")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "npx".to_string());

        let args = lookup("TUNNEL_ARGS")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "lt --port {port}".to_string())
            .split_whitespace()
            .map(String::from)
            .collect();

        let timeout_secs = parse_or(lookup, "TUNNEL_TIMEOUT_SECS", 30);

        Self {
            command,
            args,
            timeout_secs,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// 解析数值变量，缺失时静默使用默认值，格式错误时告警
fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Copy + std::fmt::Display,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, default = %default, "Invalid environment value, using default");
            default
        }),
    }
}

/// 常量
pub mod constants {
    /// 服务名
    pub const SERVICE_NAME: &str = "xjp-expose-agent";

    /// 默认监听端口
    pub const DEFAULT_PORT: u16 = 9876;

    /// 版本号
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}
