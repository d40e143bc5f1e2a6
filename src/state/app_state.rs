//! 应用状态

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// 全局 shutdown token，用于优雅关闭 HTTP 服务
static GLOBAL_SHUTDOWN: std::sync::OnceLock<CancellationToken> = std::sync::OnceLock::new();

/// 获取全局 shutdown token
pub fn get_shutdown_token() -> CancellationToken {
    GLOBAL_SHUTDOWN
        .get_or_init(CancellationToken::new)
        .clone()
}

/// 触发全局 shutdown
pub fn trigger_shutdown() {
    if let Some(token) = GLOBAL_SHUTDOWN.get() {
        token.cancel();
    }
}

use crate::config::env::EnvConfig;
use crate::infra::{ContainerEngine, PortProbe, SystemPortProbe};
use crate::services::tunnel::{LocalTunnelProvider, TunnelProvider};
use crate::services::{LifecycleOrchestrator, Miner};

/// 应用状态
pub struct AppState {
    /// 环境配置
    pub config: EnvConfig,
    /// 服务启动时间
    pub started_at: DateTime<Utc>,
    /// 工作负载编排器
    pub orchestrator: Arc<LifecycleOrchestrator>,
    /// 哈希搜索
    pub miner: Miner,
}

impl AppState {
    /// 用真实的端口探测和隧道进程组装状态
    pub fn new(config: EnvConfig, engine: Arc<dyn ContainerEngine>) -> Self {
        let probe: Arc<dyn PortProbe> =
            Arc::new(SystemPortProbe::new(config.workload.probe_timeout()));
        let tunnels: Arc<dyn TunnelProvider> = Arc::new(LocalTunnelProvider::new(
            config.tunnel.command.clone(),
            config.tunnel.args.clone(),
            config.tunnel.timeout(),
        ));
        Self::with_components(config, engine, probe, tunnels)
    }

    pub fn with_components(
        config: EnvConfig,
        engine: Arc<dyn ContainerEngine>,
        probe: Arc<dyn PortProbe>,
        tunnels: Arc<dyn TunnelProvider>,
    ) -> Self {
        let orchestrator = Arc::new(LifecycleOrchestrator::new(
            engine,
            probe,
            tunnels,
            config.workload.orchestrator_settings(),
        ));
        let miner = Miner::new(config.miner_max_difficulty);

        Self {
            config,
            started_at: Utc::now(),
            orchestrator,
            miner,
        }
    }

    /// 运行时长（秒）
    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}
