use anyhow::{Context, anyhow};
use dashboard_core::config::LogConfig;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt};

/// 设置后日志写入该文件而不是终端
pub const LOG_FILE_ENV: &str = "DASH_LOG_FILE";

/// 初始化日志
///
/// 级别优先级：`RUST_LOG` > `-v` > 配置文件 `log.level`。
/// `log.format = "json"` 时输出结构化 JSON。
/// 写文件时返回的 guard 必须存活到进程结束，否则缓冲中的日志会丢失。
pub fn setup_logging(verbose: bool, log: &LogConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let default_level = if verbose { "debug" } else { log.level.as_str() };
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .with_context(|| format!("无效的日志级别: {default_level}"))?;
    let json = log.format.eq_ignore_ascii_case("json");

    if let Ok(log_file) = std::env::var(LOG_FILE_ENV) {
        let path = Path::new(&log_file);
        let file_name = path
            .file_name()
            .ok_or_else(|| anyhow!("无效的日志文件路径: {log_file}"))?;
        let dir = path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        std::fs::create_dir_all(dir).with_context(|| format!("创建日志目录失败: {}", dir.display()))?;

        let (writer, guard) =
            tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));

        // 文件输出：保留模块路径、线程与行号便于排查
        let builder = fmt()
            .with_env_filter(env_filter)
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
            .with_thread_names(true)
            .with_line_number(true);
        let initialized = if json {
            builder.json().try_init()
        } else {
            builder.try_init()
        };
        initialized.map_err(|e| anyhow!("初始化日志失败: {e}"))?;

        Ok(Some(guard))
    } else {
        let builder = fmt().with_env_filter(env_filter).with_target(false);
        let initialized = if json {
            builder.json().try_init()
        } else {
            builder.compact().try_init()
        };
        initialized.map_err(|e| anyhow!("初始化日志失败: {e}"))?;

        Ok(None)
    }
}
