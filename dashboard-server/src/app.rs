use dashboard_core::backup::{BackupOptions, BackupService, JobScheduler, MongoToolExecutor};
use dashboard_core::config::AppConfig;
use dashboard_core::constants::backup::CLEANUP_TIMEOUT;
use dashboard_core::db::DuckDbManager;
use dashboard_core::health::Readiness;
use dashboard_core::Result;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cli::Commands;
use crate::commands;

pub type DashboardBackups = BackupService<DuckDbManager, MongoToolExecutor>;

/// 进程内共享的组件，只在入口构造一次并显式传递
#[derive(Clone)]
pub struct DashboardApp {
    pub config: AppConfig,
    pub store: DuckDbManager,
    pub executor: MongoToolExecutor,
    pub backups: Arc<DashboardBackups>,
    pub readiness: Readiness,
}

impl DashboardApp {
    pub async fn new(config: AppConfig) -> Result<Self> {
        let store = match DuckDbManager::new(&config.store.path).await {
            Ok(store) => store,
            Err(e) => {
                warn!(
                    path = %config.store.path,
                    "状态库打开失败；若服务正在运行，请通过 /api/backups 接口操作"
                );
                return Err(e);
            }
        };
        info!(path = %config.store.path, "备份状态库已打开");

        let executor = MongoToolExecutor::from_config(&config);
        if let Err(e) = executor.check_prerequisites() {
            warn!(error = %e, "备份工具不可用，备份与恢复会失败");
        }

        let backups = BackupService::new(
            store.clone(),
            executor.clone(),
            JobScheduler::new(),
            BackupOptions {
                retention_days: config.backup.retention_days,
                timeout: config.backup_timeout(),
            },
        );

        Ok(Self {
            config,
            store,
            executor,
            backups,
            readiness: Readiness::new(),
        })
    }

    /// 按配置注册每日备份任务，失败只记录日志
    pub fn register_daily_backup(&self) {
        if !self.config.backup.daily_enabled {
            info!("每日备份未启用");
            return;
        }
        let database = &self.config.mongodb.database;
        if let Err(e) = self.backups.setup_daily_backup(database) {
            warn!(database = %database, error = %e, "注册每日备份任务失败");
        }
    }

    /// 运行应用命令
    pub async fn run_command(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Serve => commands::run_serve(self).await,
            Commands::Backup { database } => commands::run_backup(self, &database).await,
            Commands::ListBackups { limit } => commands::run_list_backups(self, limit).await,
            Commands::Restore { backup_id } => commands::run_restore(self, &backup_id).await,
            Commands::DeleteBackup { backup_id } => {
                commands::run_delete_backup(self, &backup_id).await
            }
            Commands::Jobs => commands::run_jobs(self).await,
        }
    }

    /// 等待后台清理结束后关闭状态库
    pub async fn close(&self) -> Result<()> {
        if tokio::time::timeout(CLEANUP_TIMEOUT, self.backups.wait_background())
            .await
            .is_err()
        {
            warn!("等待后台清理超时，直接关闭状态库");
        }
        self.store.close().await
    }
}
