//! 端口占用探测
//!
//! 枚举监听中的 socket（lsof），再尝试绑定一次；两者都空闲才算空闲。

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tracing::{debug, warn};

use super::command::{CommandError, CommandRunner};

/// 端口占用探测接口
#[async_trait]
pub trait PortProbe: Send + Sync {
    /// 是否有进程正在使用该端口
    async fn is_in_use(&self, port: u16) -> bool;
}

/// 基于操作系统的探测器
pub struct SystemPortProbe {
    timeout: Duration,
}

impl SystemPortProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// 通过 lsof 枚举监听 socket
    ///
    /// 返回 None 表示 lsof 不可用或执行失败
    async fn listening_via_lsof(&self, port: u16) -> Option<bool> {
        let filter = format!("-iTCP:{}", port);
        let result = CommandRunner::run_simple(
            "lsof",
            &["-nP", &filter, "-sTCP:LISTEN", "-t"],
            self.timeout,
        )
        .await;

        match result {
            // lsof 没有匹配时退出码为 1 且无输出
            Ok(output) => Some(!output.stdout.iter().all(|b| b.is_ascii_whitespace())),
            Err(CommandError::SpawnFailed(e)) => {
                warn!(port, error = %e, "lsof unavailable, falling back to bind check");
                None
            }
            Err(e) => {
                warn!(port, error = %e, "lsof probe failed, falling back to bind check");
                None
            }
        }
    }

    async fn bindable(port: u16) -> bool {
        match TcpListener::bind(("0.0.0.0", port)).await {
            Ok(listener) => {
                drop(listener);
                true
            }
            Err(e) => {
                debug!(port, error = %e, "Port not bindable");
                false
            }
        }
    }
}

impl Default for SystemPortProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl PortProbe for SystemPortProbe {
    async fn is_in_use(&self, port: u16) -> bool {
        if self.listening_via_lsof(port).await == Some(true) {
            return true;
        }
        !Self::bindable(port).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bound_port_is_in_use() {
        let listener = TcpListener::bind(("0.0.0.0", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let probe = SystemPortProbe::default();
        assert!(probe.is_in_use(port).await);
    }

    #[tokio::test]
    async fn test_released_port_is_free() {
        let port = {
            let listener = TcpListener::bind(("0.0.0.0", 0)).await.unwrap();
            listener.local_addr().unwrap().port()
        };

        assert!(SystemPortProbe::bindable(port).await);
    }
}
