//! 外部隧道进程（localtunnel 等）

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::{debug, info, warn};

use super::{parse_tunnel_url, TunnelProvider, TunnelSession};
use crate::services::error::{WorkloadError, WorkloadResult};

/// 参数中的端口占位符
const PORT_PLACEHOLDER: &str = "{port}";

/// 托管外部隧道可执行文件
///
/// 进程写到 stdout 的 `your url is: <url>` 即为结果；stderr 上的任何输出、
/// 未给出 URL 就非零退出、或超时都视为失败，失败时进程会被终止。
pub struct LocalTunnelProvider {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl LocalTunnelProvider {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    fn command_args(&self, port: u16) -> Vec<String> {
        let port = port.to_string();
        self.args
            .iter()
            .map(|arg| arg.replace(PORT_PLACEHOLDER, &port))
            .collect()
    }
}

#[async_trait]
impl TunnelProvider for LocalTunnelProvider {
    async fn open(&self, port: u16) -> WorkloadResult<TunnelSession> {
        let args = self.command_args(port);
        info!(port, program = %self.program, args = ?args, "Starting tunnel process");

        // 调用方取消时 kill_on_drop 负责清理进程
        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                WorkloadError::Tunnel(format!("failed to start {}: {}", self.program, e))
            })?;

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            terminate(&mut child, port).await;
            return Err(WorkloadError::Tunnel(
                "tunnel process output is not captured".to_string(),
            ));
        };
        let mut stdout = BufReader::new(stdout).lines();
        let mut stderr = BufReader::new(stderr).lines();

        let waited = tokio::time::timeout(
            self.timeout,
            await_url(&mut child, &mut stdout, &mut stderr),
        )
        .await;

        match waited {
            Ok(Ok(url)) => {
                info!(port, url = %url, pid = ?child.id(), "Tunnel established");
                drain(port, stdout, "stdout");
                drain(port, stderr, "stderr");
                Ok(TunnelSession::new(port, url, child))
            }
            Ok(Err(e)) => {
                warn!(port, error = %e, "Tunnel process failed");
                terminate(&mut child, port).await;
                Err(e)
            }
            Err(_) => {
                warn!(port, timeout_secs = self.timeout.as_secs(), "Tunnel URL wait timed out");
                terminate(&mut child, port).await;
                Err(WorkloadError::TunnelTimeout {
                    port,
                    timeout_secs: self.timeout.as_secs(),
                })
            }
        }
    }
}

/// 读取输出直到出现 URL 标记
async fn await_url(
    child: &mut Child,
    stdout: &mut Lines<BufReader<ChildStdout>>,
    stderr: &mut Lines<BufReader<ChildStderr>>,
) -> WorkloadResult<String> {
    let mut stderr_open = true;

    loop {
        tokio::select! {
            line = stdout.next_line() => match line {
                Ok(Some(line)) => {
                    debug!(line = %line, "[tunnel stdout]");
                    if let Some(url) = parse_tunnel_url(&line) {
                        return Ok(url);
                    }
                }
                Ok(None) => {
                    let status = child.wait().await.map_err(|e| {
                        WorkloadError::Tunnel(format!("failed to wait for tunnel process: {}", e))
                    })?;
                    return Err(WorkloadError::Tunnel(if status.success() {
                        "tunnel process exited without reporting a URL".to_string()
                    } else {
                        format!("tunnel process exited with {}", status)
                    }));
                }
                Err(e) => {
                    return Err(WorkloadError::Tunnel(format!(
                        "failed to read tunnel output: {}",
                        e
                    )));
                }
            },
            line = stderr.next_line(), if stderr_open => match line {
                Ok(Some(line)) => {
                    return Err(WorkloadError::Tunnel(format!(
                        "tunnel process reported an error: {}",
                        line.trim()
                    )));
                }
                Ok(None) | Err(_) => stderr_open = false,
            },
        }
    }
}

/// URL 解析完成后继续消费输出，避免管道写满阻塞进程
fn drain<R>(port: u16, mut lines: Lines<BufReader<R>>, stream: &'static str)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(port, stream, line = %line, "[tunnel]");
        }
    });
}

async fn terminate(child: &mut Child, port: u16) {
    if let Err(e) = child.kill().await {
        debug!(port, error = %e, "Tunnel process already exited");
    }
}
