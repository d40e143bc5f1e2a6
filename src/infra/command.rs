//! 命令执行器
//!
//! 提供统一的短命令执行接口，支持超时控制

use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// 命令执行器
pub struct CommandRunner;

/// 命令执行错误
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// 命令启动失败
    #[error("Failed to spawn command: {0}")]
    SpawnFailed(#[source] std::io::Error),
    /// 命令超时
    #[error("Command timed out after {0:?}")]
    Timeout(Duration),
}

impl CommandRunner {
    /// 执行简单命令（无流式输出）
    ///
    /// 超时后子进程随 future 一起被丢弃并终止
    pub async fn run_simple(
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<std::process::Output, CommandError> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(timeout, child).await {
            Ok(result) => result.map_err(CommandError::SpawnFailed),
            Err(_) => Err(CommandError::Timeout(timeout)),
        }
    }
}
