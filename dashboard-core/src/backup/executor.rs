use crate::config::AppConfig;
use crate::constants::backup;
use crate::process::run_tool;
use crate::{DashError, Result};
use chrono::Local;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// 一次成功备份的结果
#[derive(Debug, Clone, PartialEq)]
pub struct BackupOutcome {
    pub file_path: PathBuf,
    pub size_bytes: i64,
    pub elapsed: Duration,
}

/// 备份执行能力：由编排服务消费
///
/// 超时由调用方决定，执行器只负责在期限内运行外部工具。
pub trait BackupRunner: Send + Sync + 'static {
    /// 导出指定数据库，生成压缩归档
    fn execute(
        &self,
        database: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<BackupOutcome>> + Send;

    /// 用归档覆盖恢复指定数据库
    fn restore(
        &self,
        archive: &Path,
        database: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<()>> + Send;

    /// 删除归档文件，文件不存在不算错误
    fn delete_file(&self, path: &Path) -> impl Future<Output = Result<()>> + Send;

    /// 获取文件大小
    fn file_size(&self, path: &Path) -> impl Future<Output = Result<u64>> + Send;
}

/// 基于 mongodump / mongorestore 的执行器
#[derive(Debug, Clone)]
pub struct MongoToolExecutor {
    mongodump_path: String,
    mongorestore_path: String,
    output_dir: PathBuf,
    mongo_uri: String,
}

impl MongoToolExecutor {
    pub fn new(
        mongodump_path: impl Into<String>,
        mongorestore_path: impl Into<String>,
        output_dir: impl Into<PathBuf>,
        mongo_uri: impl Into<String>,
    ) -> Self {
        Self {
            mongodump_path: mongodump_path.into(),
            mongorestore_path: mongorestore_path.into(),
            output_dir: output_dir.into(),
            mongo_uri: mongo_uri.into(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            &config.backup.mongodump_path,
            &config.backup.mongorestore_path,
            config.get_backup_dir(),
            &config.mongodb.uri,
        )
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// 检查外部工具是否可用
    pub fn check_prerequisites(&self) -> Result<()> {
        let missing: Vec<&str> = [&self.mongodump_path, &self.mongorestore_path]
            .into_iter()
            .filter(|tool| which::which(tool.as_str()).is_err())
            .map(String::as_str)
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(DashError::execution(
                format!("未找到外部工具: {}", missing.join(", ")),
                "",
            ))
        }
    }

    /// 归档文件路径：`{database}_{timestamp}.gz`
    pub fn archive_path(&self, database: &str) -> PathBuf {
        let timestamp = Local::now().format(backup::ARCHIVE_TIMESTAMP_FORMAT);
        self.output_dir.join(format!(
            "{database}_{timestamp}.{}",
            backup::ARCHIVE_EXTENSION
        ))
    }
}

impl BackupRunner for MongoToolExecutor {
    async fn execute(
        &self,
        database: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<BackupOutcome> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| DashError::execution(format!("创建备份目录失败: {e}"), ""))?;

        let output_path = self.archive_path(database);
        let started = Instant::now();

        debug!(database, path = %output_path.display(), "开始执行 mongodump");
        let args = [
            "--uri".to_string(),
            self.mongo_uri.clone(),
            "--db".to_string(),
            database.to_string(),
            format!("--archive={}", output_path.display()),
            "--gzip".to_string(),
        ];
        run_tool(&self.mongodump_path, &args, timeout, cancel).await?;

        let size = self.file_size(&output_path).await.map_err(|e| {
            DashError::execution(format!("读取备份文件信息失败: {e}"), "")
        })?;

        Ok(BackupOutcome {
            file_path: output_path,
            size_bytes: i64::try_from(size).unwrap_or(i64::MAX),
            elapsed: started.elapsed(),
        })
    }

    async fn restore(
        &self,
        archive: &Path,
        database: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        info!(database, archive = %archive.display(), "开始执行 mongorestore");
        let args = [
            "--uri".to_string(),
            self.mongo_uri.clone(),
            "--db".to_string(),
            database.to_string(),
            format!("--archive={}", archive.display()),
            "--gzip".to_string(),
            "--drop".to_string(),
        ];
        run_tool(&self.mongorestore_path, &args, timeout, cancel).await?;
        Ok(())
    }

    async fn delete_file(&self, path: &Path) -> Result<()> {
        if path.as_os_str().is_empty() {
            return Ok(());
        }
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn file_size(&self, path: &Path) -> Result<u64> {
        Ok(tokio::fs::metadata(path).await?.len())
    }
}
