use crate::{DashError, Result};
use std::ffi::OsStr;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// 外部命令的输出
#[derive(Debug, Clone)]
pub(crate) struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    /// 合并后的标准输出与标准错误
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (true, _) => self.stderr.clone(),
            (false, true) => self.stdout.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }
}

/// 以参数数组执行外部命令（不经过 shell）
///
/// 超时或取消时子进程会被强制终止（`kill_on_drop`）。
/// 退出码非零时返回 `Execution`，携带合并后的输出。
pub(crate) async fn run_tool<I, S>(
    program: &str,
    args: I,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<ToolOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| DashError::execution(format!("无法启动 {program}: {e}"), ""))?;

    debug!(program, pid = ?child.id(), "外部命令已启动");

    let output = tokio::select! {
        result = tokio::time::timeout(timeout, child.wait_with_output()) => match result {
            Ok(output) => output
                .map_err(|e| DashError::execution(format!("等待 {program} 结束失败: {e}"), ""))?,
            Err(_) => {
                return Err(DashError::timeout(format!(
                    "{program} 在 {}s 内未完成，已强制终止",
                    timeout.as_secs_f64()
                )));
            }
        },
        _ = cancel.cancelled() => {
            return Err(DashError::execution(format!("{program} 已被取消"), ""));
        }
    };

    let output_text = ToolOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };

    if !output.status.success() {
        return Err(DashError::execution(
            format!("{program} 执行失败: {}", output.status),
            output_text.combined(),
        ));
    }

    Ok(output_text)
}
