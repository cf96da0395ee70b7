use anyhow::Context;
use clap::Parser;
use dashboard_core::config::AppConfig;
use dashboard_server::{Cli, DashboardApp, setup_logging};
use tracing::error;

#[tokio::main]
async fn main() {
    // 解析命令行参数
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("❌ 操作失败: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // 指定了配置文件就只用它，否则按默认顺序查找
    let config = match &cli.config {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("加载配置文件 '{}' 失败", path.display()))?,
        None => AppConfig::find_and_load_config().context("加载配置失败")?,
    };

    // 日志文件的写入线程需要存活到进程结束
    let _log_guard = setup_logging(cli.verbose, &config.log)?;

    let app = DashboardApp::new(config)
        .await
        .context("应用初始化失败")?;

    let result = app.run_command(cli.command).await;
    if let Err(e) = app.close().await {
        error!(error = %e, "关闭状态库失败");
    }
    result?;
    Ok(())
}
