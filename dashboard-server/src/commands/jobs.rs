use crate::app::DashboardApp;
use chrono::Local;
use dashboard_core::Result;
use tracing::info;

/// 显示定时备份任务及下一次触发时间
pub async fn run_jobs(app: &DashboardApp) -> Result<()> {
    app.register_daily_backup();

    let scheduler = app.backups.scheduler();
    let jobs = scheduler.list_jobs();
    if jobs.is_empty() {
        info!("⏰ 没有定时备份任务");
        return Ok(());
    }

    info!("⏰ 定时备份任务:");
    for name in jobs {
        if let Some((expression, next)) = scheduler.job_info(&name) {
            let next = next
                .map(|at| at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string());
            info!("   {:<24} {:<16} 下次执行: {}", name, expression, next);
        }
    }
    info!(
        "💡 保留 {} 天内的备份（0 表示不清理）",
        app.config.backup.retention_days
    );
    Ok(())
}
