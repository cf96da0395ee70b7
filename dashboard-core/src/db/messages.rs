use crate::Result;
use tokio::sync::oneshot;

use super::models::{BackupRecord, BackupStatus};

/// DuckDB数据库操作消息
#[derive(Debug)]
pub enum DbMessage {
    /// 初始化数据库表
    InitTables {
        respond_to: oneshot::Sender<Result<()>>,
    },
    /// 连通性检查
    Ping {
        respond_to: oneshot::Sender<Result<()>>,
    },
    /// 插入备份记录
    InsertBackup {
        record: BackupRecord,
        respond_to: oneshot::Sender<Result<()>>,
    },
    /// 更新备份状态（同时写入 completed_at）
    UpdateBackupStatus {
        id: String,
        status: BackupStatus,
        file_path: String,
        size_bytes: i64,
        error_message: Option<String>,
        respond_to: oneshot::Sender<Result<()>>,
    },
    /// 根据ID获取备份记录
    GetBackupById {
        id: String,
        respond_to: oneshot::Sender<Result<Option<BackupRecord>>>,
    },
    /// 按开始时间倒序列出最近的备份
    ListRecentBackups {
        limit: usize,
        respond_to: oneshot::Sender<Result<Vec<BackupRecord>>>,
    },
    /// 删除备份记录
    DeleteBackup {
        id: String,
        respond_to: oneshot::Sender<Result<()>>,
    },
    /// 删除早于指定天数的备份记录
    DeleteBackupsOlderThan {
        days: u32,
        respond_to: oneshot::Sender<Result<u64>>,
    },
    /// 关闭连接，Actor 退出
    Close {
        respond_to: oneshot::Sender<Result<()>>,
    },
}
