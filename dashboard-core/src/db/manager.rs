use crate::backup::BackupStore;
use crate::{DashError, Result};
use std::path::Path;
use tokio::sync::{mpsc, oneshot};

use super::actor::DuckDbActor;
use super::messages::DbMessage;
use super::models::{BackupRecord, BackupStatus};

const ACTOR_QUEUE_CAPACITY: usize = 100;

/// DuckDB数据库管理器
///
/// 可以随意克隆，所有克隆共享同一个 Actor。
#[derive(Debug, Clone)]
pub struct DuckDbManager {
    sender: mpsc::Sender<DbMessage>,
}

impl DuckDbManager {
    /// 创建新的DuckDB管理器
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();

        // 确保数据库文件的父目录存在
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let actor = DuckDbActor::new(db_path)?;
        Self::spawn(actor).await
    }

    /// 创建内存数据库管理器 (主要用于测试)
    pub async fn new_memory() -> Result<Self> {
        let actor = DuckDbActor::new_memory()?;
        Self::spawn(actor).await
    }

    async fn spawn(actor: DuckDbActor) -> Result<Self> {
        let (sender, receiver) = mpsc::channel(ACTOR_QUEUE_CAPACITY);
        tokio::spawn(actor.run(receiver));

        let manager = Self { sender };
        manager
            .request(|respond_to| DbMessage::InitTables { respond_to })
            .await?;

        Ok(manager)
    }

    /// 发送消息并等待 Actor 的响应
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> DbMessage,
    ) -> Result<T> {
        let (respond_to, receiver) = oneshot::channel();

        self.sender
            .send(build(respond_to))
            .await
            .map_err(|_| DashError::persistence("数据库Actor已关闭"))?;

        receiver
            .await
            .map_err(|_| DashError::persistence("数据库Actor未返回响应"))?
    }

    /// 连通性检查
    pub async fn ping(&self) -> Result<()> {
        self.request(|respond_to| DbMessage::Ping { respond_to })
            .await
    }

    /// 关闭数据库连接
    ///
    /// 关闭后所有克隆上的调用都会返回持久化错误。重复关闭是空操作。
    pub async fn close(&self) -> Result<()> {
        match self
            .request(|respond_to| DbMessage::Close { respond_to })
            .await
        {
            Err(DashError::Persistence(_)) if self.sender.is_closed() => Ok(()),
            other => other,
        }
    }

    pub async fn insert_backup(&self, record: BackupRecord) -> Result<()> {
        self.request(|respond_to| DbMessage::InsertBackup { record, respond_to })
            .await
    }

    pub async fn update_backup_status(
        &self,
        id: &str,
        status: BackupStatus,
        file_path: &str,
        size_bytes: i64,
        error_message: Option<String>,
    ) -> Result<()> {
        self.request(|respond_to| DbMessage::UpdateBackupStatus {
            id: id.to_string(),
            status,
            file_path: file_path.to_string(),
            size_bytes,
            error_message,
            respond_to,
        })
        .await
    }

    pub async fn get_backup_by_id(&self, id: &str) -> Result<Option<BackupRecord>> {
        self.request(|respond_to| DbMessage::GetBackupById {
            id: id.to_string(),
            respond_to,
        })
        .await
    }

    pub async fn list_recent_backups(&self, limit: usize) -> Result<Vec<BackupRecord>> {
        self.request(|respond_to| DbMessage::ListRecentBackups { limit, respond_to })
            .await
    }

    pub async fn delete_backup(&self, id: &str) -> Result<()> {
        self.request(|respond_to| DbMessage::DeleteBackup {
            id: id.to_string(),
            respond_to,
        })
        .await
    }

    pub async fn delete_backups_older_than(&self, days: u32) -> Result<u64> {
        self.request(|respond_to| DbMessage::DeleteBackupsOlderThan { days, respond_to })
            .await
    }
}

impl BackupStore for DuckDbManager {
    async fn insert(&self, record: &BackupRecord) -> Result<()> {
        self.insert_backup(record.clone()).await
    }

    async fn update_status(
        &self,
        id: &str,
        status: BackupStatus,
        file_path: &str,
        size_bytes: i64,
        error_message: Option<&str>,
    ) -> Result<()> {
        self.update_backup_status(
            id,
            status,
            file_path,
            size_bytes,
            error_message.map(str::to_string),
        )
        .await
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<BackupRecord>> {
        self.get_backup_by_id(id).await
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<BackupRecord>> {
        self.list_recent_backups(limit).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.delete_backup(id).await
    }

    async fn delete_older_than(&self, days: u32) -> Result<u64> {
        self.delete_backups_older_than(days).await
    }
}
