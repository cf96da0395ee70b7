use crate::Result;
use chrono::{Duration, Utc};
use duckdb::{Connection, Row, params};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::messages::DbMessage;
use super::models::{BackupRecord, BackupRow, BackupStatus};

const BACKUP_COLUMNS: &str = "id, database_name, file_path, size_bytes, started_at, completed_at, status, error_message, triggered_by";

/// DuckDB Actor - 确保单线程访问DuckDB
///
/// 连接只被这一个任务持有，所有读写都经由消息队列串行执行，
/// 因此不存在并发写者。
pub struct DuckDbActor {
    connection: Connection,
}

impl DuckDbActor {
    /// 创建新的DuckDB Actor
    pub fn new(db_path: PathBuf) -> Result<Self> {
        let connection = Connection::open(db_path)?;
        Ok(Self { connection })
    }

    /// 创建内存DuckDB Actor
    pub fn new_memory() -> Result<Self> {
        let connection = Connection::open_in_memory()?;
        Ok(Self { connection })
    }

    /// 运行Actor消息循环
    pub async fn run(mut self, mut receiver: mpsc::Receiver<DbMessage>) {
        info!("DuckDB Actor 已启动");

        while let Some(message) = receiver.recv().await {
            if !self.handle_message(message) {
                // 拒绝后续消息，已排队的消息随 receiver 一起丢弃
                receiver.close();
                break;
            }
        }

        info!("DuckDB Actor 已关闭");
    }

    /// 处理数据库消息，返回 false 表示 Actor 应当退出
    fn handle_message(&mut self, message: DbMessage) -> bool {
        match message {
            DbMessage::InitTables { respond_to } => {
                let _ = respond_to.send(self.init_tables());
            }
            DbMessage::Ping { respond_to } => {
                let _ = respond_to.send(self.ping());
            }
            DbMessage::InsertBackup { record, respond_to } => {
                let _ = respond_to.send(self.insert_backup(&record));
            }
            DbMessage::UpdateBackupStatus {
                id,
                status,
                file_path,
                size_bytes,
                error_message,
                respond_to,
            } => {
                let result = self.update_backup_status(
                    &id,
                    status,
                    &file_path,
                    size_bytes,
                    error_message.as_deref(),
                );
                let _ = respond_to.send(result);
            }
            DbMessage::GetBackupById { id, respond_to } => {
                let _ = respond_to.send(self.get_backup_by_id(&id));
            }
            DbMessage::ListRecentBackups { limit, respond_to } => {
                let _ = respond_to.send(self.list_recent_backups(limit));
            }
            DbMessage::DeleteBackup { id, respond_to } => {
                let _ = respond_to.send(self.delete_backup(&id));
            }
            DbMessage::DeleteBackupsOlderThan { days, respond_to } => {
                let _ = respond_to.send(self.delete_backups_older_than(days));
            }
            DbMessage::Close { respond_to } => {
                let _ = respond_to.send(Ok(()));
                return false;
            }
        }
        true
    }

    /// 初始化数据库表
    fn init_tables(&mut self) -> Result<()> {
        debug!("正在初始化DuckDB表...");

        let sql_content = include_str!("../../migrations/init_duckdb.sql");

        // 按分号分割SQL语句并执行
        for statement in sql_content.split(';') {
            let trimmed = statement.trim();
            if trimmed.lines().all(|l| l.trim().is_empty() || l.trim().starts_with("--")) {
                continue;
            }
            self.connection.execute(trimmed, [])?;
        }

        info!("DuckDB表初始化完成");
        Ok(())
    }

    fn ping(&mut self) -> Result<()> {
        let _: i32 = self.connection.query_row("SELECT 1", [], |row| row.get(0))?;
        Ok(())
    }

    /// 插入备份记录
    fn insert_backup(&mut self, record: &BackupRecord) -> Result<()> {
        self.connection.execute(
            "INSERT INTO backups (id, database_name, file_path, size_bytes, started_at, completed_at, status, error_message, triggered_by)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                record.id,
                record.database_name,
                record.file_path,
                record.size_bytes,
                record.started_at.naive_utc(),
                record.completed_at.map(|t| t.naive_utc()),
                record.status.as_str(),
                record.error_message,
                record.triggered_by.as_str(),
            ],
        )?;
        Ok(())
    }

    /// 更新备份状态
    fn update_backup_status(
        &mut self,
        id: &str,
        status: BackupStatus,
        file_path: &str,
        size_bytes: i64,
        error_message: Option<&str>,
    ) -> Result<()> {
        let completed_at = Utc::now().naive_utc();
        let error_message = error_message.filter(|m| !m.is_empty());
        self.connection.execute(
            "UPDATE backups SET status = ?, file_path = ?, size_bytes = ?, completed_at = ?, error_message = ?
             WHERE id = ?",
            params![status.as_str(), file_path, size_bytes, completed_at, error_message, id],
        )?;
        Ok(())
    }

    /// 根据ID获取备份记录
    fn get_backup_by_id(&mut self, id: &str) -> Result<Option<BackupRecord>> {
        let sql = format!("SELECT {BACKUP_COLUMNS} FROM backups WHERE id = ?");
        let mut stmt = self.connection.prepare(&sql)?;
        let mut rows = stmt.query(params![id])?;

        match rows.next()? {
            Some(row) => Ok(Some(read_backup_row(row)?.try_into()?)),
            None => Ok(None),
        }
    }

    /// 获取最近的备份记录
    fn list_recent_backups(&mut self, limit: usize) -> Result<Vec<BackupRecord>> {
        let sql = format!(
            "SELECT {BACKUP_COLUMNS} FROM backups ORDER BY started_at DESC LIMIT ?"
        );
        let mut stmt = self.connection.prepare(&sql)?;
        let backup_iter = stmt.query_map(params![limit as i64], read_backup_row)?;

        let mut backups = Vec::new();
        for backup in backup_iter {
            backups.push(backup?.try_into()?);
        }

        Ok(backups)
    }

    /// 删除备份记录
    fn delete_backup(&mut self, id: &str) -> Result<()> {
        self.connection
            .execute("DELETE FROM backups WHERE id = ?", params![id])?;
        Ok(())
    }

    /// 删除早于指定天数的备份记录
    fn delete_backups_older_than(&mut self, days: u32) -> Result<u64> {
        let cutoff = (Utc::now() - Duration::days(i64::from(days))).naive_utc();
        let deleted = self
            .connection
            .execute("DELETE FROM backups WHERE started_at < ?", params![cutoff])?;
        Ok(deleted as u64)
    }
}

fn read_backup_row(row: &Row<'_>) -> duckdb::Result<BackupRow> {
    Ok(BackupRow {
        id: row.get(0)?,
        database_name: row.get(1)?,
        file_path: row.get(2)?,
        size_bytes: row.get(3)?,
        started_at: row.get(4)?,
        completed_at: row.get(5)?,
        status: row.get(6)?,
        error_message: row.get(7)?,
        triggered_by: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[test]
    fn test_schema_only_creates_backups_table() {
        let mut actor = DuckDbActor::new_memory().unwrap();
        actor.init_tables().unwrap();
        // 重复初始化是幂等的
        actor.init_tables().unwrap();

        let mut stmt = actor
            .connection
            .prepare("SELECT table_name FROM information_schema.tables WHERE table_schema = 'main' ORDER BY table_name")
            .unwrap();
        let tables: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<duckdb::Result<_>>()
            .unwrap();
        assert_eq!(tables, vec!["backups"]);
    }

    #[tokio::test]
    async fn test_close_stops_loop_and_drops_queued_messages() {
        let actor = DuckDbActor::new_memory().unwrap();
        let (sender, receiver) = mpsc::channel(8);

        let (close_tx, close_rx) = oneshot::channel();
        let (ping_tx, ping_rx) = oneshot::channel();
        sender
            .send(DbMessage::Close { respond_to: close_tx })
            .await
            .unwrap();
        sender
            .send(DbMessage::Ping { respond_to: ping_tx })
            .await
            .unwrap();

        actor.run(receiver).await;

        assert!(close_rx.await.unwrap().is_ok());
        // 排在关闭之后的消息不会被处理
        assert!(ping_rx.await.is_err());
        assert!(sender.is_closed());
    }
}
