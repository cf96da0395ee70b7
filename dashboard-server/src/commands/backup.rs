use crate::app::DashboardApp;
use chrono::Local;
use dashboard_core::db::{BackupRecord, BackupStatus, TriggerOrigin};
use dashboard_core::{DashError, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Ctrl-C 时取消正在执行的外部工具
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = trigger.cancelled() => {}
            result = tokio::signal::ctrl_c() => {
                if result.is_ok() {
                    warn!("收到中断信号，正在取消");
                    trigger.cancel();
                }
            }
        }
    });
    token
}

fn describe(record: &BackupRecord) -> String {
    let started = record.started_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S");
    let duration = record
        .completed_at
        .map(|done| format!("{:.1}s", (done - record.started_at).num_milliseconds() as f64 / 1000.0))
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{}  {:<16} {:<10} {:<9} {:>9.2} MB  {:>7}  {}",
        record.id,
        record.database_name,
        record.status.as_str(),
        record.triggered_by.as_str(),
        record.size_mb(),
        duration,
        started
    )
}

/// 立即备份指定数据库
pub async fn run_backup(app: &DashboardApp, database: &str) -> Result<()> {
    info!("💾 开始备份数据库: {}", database);

    let cancel = cancel_on_ctrl_c();
    let record = app
        .backups
        .trigger_backup(database, TriggerOrigin::Manual, &cancel)
        .await;
    cancel.cancel();
    let record = record?;

    match record.status {
        BackupStatus::Completed => {
            info!("✅ 备份完成");
            info!("   ID: {}", record.id);
            info!("   文件: {}", record.file_path);
            info!("   大小: {:.2} MB", record.size_mb());
            Ok(())
        }
        _ => {
            let message = record.error_message.unwrap_or_default();
            error!("❌ 备份失败 (ID: {})", record.id);
            Err(DashError::execution(format!("备份 {} 失败", record.id), message))
        }
    }
}

/// 列出最近的备份
pub async fn run_list_backups(app: &DashboardApp, limit: usize) -> Result<()> {
    let backups = app.backups.list_backups(limit).await?;
    if backups.is_empty() {
        info!("📦 暂无备份记录");
        return Ok(());
    }

    info!("📦 最近 {} 条备份:", backups.len());
    for record in &backups {
        info!("{}", describe(record));
        if let Some(message) = record.error_message.as_deref() {
            info!("      错误: {}", message.lines().next().unwrap_or_default());
        }
    }
    Ok(())
}

/// 用指定备份恢复数据库
pub async fn run_restore(app: &DashboardApp, backup_id: &str) -> Result<()> {
    let Some(record) = app.backups.get_backup(backup_id).await? else {
        return Err(DashError::not_found(format!("备份 {backup_id}")));
    };
    warn!(
        "⚠️  即将用备份 {} 覆盖数据库 {}",
        record.id, record.database_name
    );

    let cancel = cancel_on_ctrl_c();
    let result = app.backups.restore_backup(backup_id, &cancel).await;
    cancel.cancel();
    result?;

    info!("✅ 数据库 {} 已恢复", record.database_name);
    Ok(())
}

/// 删除备份文件与记录
pub async fn run_delete_backup(app: &DashboardApp, backup_id: &str) -> Result<()> {
    app.backups.delete_backup(backup_id).await?;
    info!("🗑️  备份 {} 已删除", backup_id);
    Ok(())
}
