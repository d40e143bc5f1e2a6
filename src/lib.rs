//! XJP Expose Agent - 容器工作负载公网暴露代理
//!
//! 按需拉取镜像、分配端口、启动容器并打开公网隧道；
//! 支持按镜像 ID 休眠 (hibernate) 与唤醒 (activate)。

pub mod error;
pub mod infra;
pub mod domain;
pub mod config;
pub mod state;
pub mod api;
pub mod services;

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::EnvConfig;
use crate::infra::{BollardEngine, EngineError};
use crate::state::{get_shutdown_token, trigger_shutdown, AppState};

/// 命令行覆盖项
#[derive(Clone, Debug, Default)]
pub struct RuntimeConfig {
    /// 覆盖 PORT 环境变量
    pub port_override: Option<u16>,
}

/// 启动失败
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("failed to connect to container engine: {0}")]
    Engine(#[from] EngineError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// 初始化日志并运行代理，直到收到 ctrl-c
pub async fn init_and_run_agent_with_config(runtime: RuntimeConfig) {
    init_tracing();

    if let Err(e) = run_agent(runtime).await {
        error!(error = %e, "Agent stopped with error");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("xjp_expose_agent=info,tower_http=info"));

    // 重复初始化（例如嵌入到其他程序中）时保留已有的 subscriber
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init();
}

pub async fn run_agent(runtime: RuntimeConfig) -> Result<(), AgentError> {
    let mut config = EnvConfig::from_env();
    if let Some(port) = runtime.port_override {
        config.port = port;
    }

    info!(
        version = crate::config::env::constants::VERSION,
        port = config.port,
        port_range = %config.workload.port_range,
        tunnel_command = %config.tunnel.command,
        "Starting xjp-expose-agent"
    );

    let engine = BollardEngine::connect(config.docker_timeout())?;
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let state = Arc::new(AppState::new(config, Arc::new(engine)));
    let orchestrator = state.orchestrator.clone();

    let app = api::router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| AgentError::Bind { addr, source })?;
    info!(addr = %addr, "Listening");

    tokio::spawn(async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
        }
        trigger_shutdown();
    });

    let shutdown = get_shutdown_token();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await;

    orchestrator.shutdown().await;
    info!("Agent stopped");
    served.map_err(AgentError::Serve)
}
