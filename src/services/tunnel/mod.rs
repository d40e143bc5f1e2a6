//! 隧道服务模块
//!
//! 为本地端口打开公网隧道。`TunnelProvider` 是编排层依赖的接口，
//! `LocalTunnelProvider` 托管外部隧道进程并从其输出中解析 URL。

mod local;

pub use local::LocalTunnelProvider;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::process::Child;
use tracing::{debug, info};

use super::error::WorkloadResult;

/// 隧道进程输出中 URL 前的标记
const URL_MARKER: &str = "your url is:";

/// 隧道提供者
#[async_trait]
pub trait TunnelProvider: Send + Sync {
    /// 打开隧道，直到拿到公网 URL 或确认失败才返回
    async fn open(&self, port: u16) -> WorkloadResult<TunnelSession>;
}

/// 一条活跃隧道
///
/// URL 只在会话存活期间有效。会话被丢弃时进程随之被杀死（kill_on_drop）。
#[derive(Debug)]
pub struct TunnelSession {
    port: u16,
    url: String,
    opened_at: DateTime<Utc>,
    child: Option<Child>,
}

impl TunnelSession {
    pub fn new(port: u16, url: String, child: Child) -> Self {
        Self {
            port,
            url,
            opened_at: Utc::now(),
            child: Some(child),
        }
    }

    /// 不绑定进程的会话
    pub fn detached(port: u16, url: String) -> Self {
        Self {
            port,
            url,
            opened_at: Utc::now(),
            child: None,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }

    /// 隧道进程是否仍在运行
    pub fn is_alive(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => true,
        }
    }

    /// 终止隧道进程并回收
    pub async fn close(mut self) {
        let pid = self.pid();
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                debug!(port = self.port, error = %e, "Tunnel process already gone");
            }
        }
        info!(port = self.port, pid = ?pid, url = %self.url, "Tunnel closed");
    }
}

/// 从一行输出中提取隧道 URL
pub fn parse_tunnel_url(line: &str) -> Option<String> {
    let (_, rest) = line.split_once(URL_MARKER)?;
    let url = rest.trim();
    if url.is_empty() {
        None
    } else {
        Some(url.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tunnel_url() {
        assert_eq!(
            parse_tunnel_url("...your url is: https://foo.loca.lt\n"),
            Some("https://foo.loca.lt".to_string())
        );
        assert_eq!(
            parse_tunnel_url("your url is:   https://bar.loca.lt  "),
            Some("https://bar.loca.lt".to_string())
        );
    }

    #[test]
    fn test_parse_tunnel_url_ignores_other_lines() {
        assert_eq!(parse_tunnel_url("npx: installed 22 in 3.1s"), None);
        assert_eq!(parse_tunnel_url("your url is:"), None);
        assert_eq!(parse_tunnel_url(""), None);
    }

    #[tokio::test]
    async fn test_detached_session() {
        let mut session = TunnelSession::detached(3001, "https://w1.loca.lt".to_string());
        assert_eq!(session.port(), 3001);
        assert_eq!(session.url(), "https://w1.loca.lt");
        assert!(session.pid().is_none());
        assert!(session.is_alive());
        session.close().await;
    }
}
