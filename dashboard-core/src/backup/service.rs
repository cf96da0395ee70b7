use crate::constants::backup;
use crate::db::{BackupRecord, BackupStatus, TriggerOrigin};
use crate::{DashError, Result};
use chrono::{Duration as ChronoDuration, Utc};
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, instrument, warn};

use super::executor::BackupRunner;
use super::scheduler::{JobScheduler, StopHandle};

/// 备份记录存储能力：由编排服务消费
pub trait BackupStore: Send + Sync + 'static {
    fn insert(&self, record: &BackupRecord) -> impl Future<Output = Result<()>> + Send;

    fn update_status(
        &self,
        id: &str,
        status: BackupStatus,
        file_path: &str,
        size_bytes: i64,
        error_message: Option<&str>,
    ) -> impl Future<Output = Result<()>> + Send;

    fn get_by_id(&self, id: &str) -> impl Future<Output = Result<Option<BackupRecord>>> + Send;

    fn list_recent(&self, limit: usize) -> impl Future<Output = Result<Vec<BackupRecord>>> + Send;

    fn delete(&self, id: &str) -> impl Future<Output = Result<()>> + Send;

    fn delete_older_than(&self, days: u32) -> impl Future<Output = Result<u64>> + Send;
}

/// 编排服务选项
#[derive(Debug, Clone)]
pub struct BackupOptions {
    /// 保留天数，0 表示不清理
    pub retention_days: u32,
    /// 单次备份/恢复的超时
    pub timeout: Duration,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            retention_days: backup::DEFAULT_RETENTION_DAYS,
            timeout: Duration::from_secs(backup::DEFAULT_TIMEOUT_SECS),
        }
    }
}

/// 备份编排服务
///
/// 创建记录、驱动状态流转、调用执行器、回写结果，并在成功后异步清理过期备份。
/// 后台派生的清理与备份都登记在 `background` 里，关闭前可以等它们结束。
pub struct BackupService<S, R> {
    store: S,
    runner: R,
    scheduler: JobScheduler,
    options: BackupOptions,
    background: TaskTracker,
}

impl<S: BackupStore, R: BackupRunner> BackupService<S, R> {
    /// 创建服务并把定时备份回调注入调度器
    pub fn new(store: S, runner: R, scheduler: JobScheduler, options: BackupOptions) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak = weak.clone();
            scheduler.set_handler(move |database: String| {
                let weak = weak.clone();
                async move {
                    let service = weak
                        .upgrade()
                        .ok_or_else(|| DashError::execution("备份服务已释放", ""))?;
                    service.run_scheduled_backup(&database).await
                }
            });

            Self {
                store,
                runner,
                scheduler,
                options,
                background: TaskTracker::new(),
            }
        })
    }

    pub fn scheduler(&self) -> &JobScheduler {
        &self.scheduler
    }

    pub fn options(&self) -> &BackupOptions {
        &self.options
    }

    /// 定时任务入口：失败的备份也作为错误返回给调度器记录
    async fn run_scheduled_backup(self: &Arc<Self>, database: &str) -> Result<()> {
        let record = self
            .trigger_backup(database, TriggerOrigin::Scheduled, &CancellationToken::new())
            .await?;
        match record.status {
            BackupStatus::Completed => Ok(()),
            _ => Err(DashError::execution(
                format!("备份 {} 失败", record.id),
                record.error_message.unwrap_or_default(),
            )),
        }
    }

    /// 触发一次备份
    ///
    /// 返回时记录一定处于 `completed` 或 `failed`；只有记录读写失败时才返回错误。
    #[instrument(skip(self, cancel), fields(backup_id))]
    pub async fn trigger_backup(
        self: &Arc<Self>,
        database: &str,
        triggered_by: TriggerOrigin,
        cancel: &CancellationToken,
    ) -> Result<BackupRecord> {
        let record = BackupRecord::start(database, triggered_by);
        tracing::Span::current().record("backup_id", record.id.as_str());

        self.store.insert(&record).await?;
        info!("备份开始");

        match self
            .runner
            .execute(database, self.options.timeout, cancel)
            .await
        {
            Ok(outcome) => {
                let file_path = outcome.file_path.to_string_lossy();
                self.store
                    .update_status(
                        &record.id,
                        BackupStatus::Completed,
                        &file_path,
                        outcome.size_bytes,
                        None,
                    )
                    .await?;
                info!(
                    size_bytes = outcome.size_bytes,
                    elapsed_ms = outcome.elapsed.as_millis() as u64,
                    path = %file_path,
                    "备份完成"
                );
                self.spawn_cleanup();
            }
            Err(e) => {
                let message = e.to_string();
                error!(error = %message, "备份失败");
                self.store
                    .update_status(&record.id, BackupStatus::Failed, "", 0, Some(&message))
                    .await?;
            }
        }

        self.store
            .get_by_id(&record.id)
            .await?
            .ok_or_else(|| DashError::persistence(format!("备份记录 {} 写入后丢失", record.id)))
    }

    /// 用指定备份恢复数据库，不修改记录
    #[instrument(skip(self, cancel))]
    pub async fn restore_backup(&self, id: &str, cancel: &CancellationToken) -> Result<()> {
        let record = self.find(id).await?;

        self.runner
            .restore(
                Path::new(&record.file_path),
                &record.database_name,
                self.options.timeout,
                cancel,
            )
            .await?;

        info!(database = %record.database_name, "备份已恢复");
        Ok(())
    }

    pub async fn list_backups(&self, limit: usize) -> Result<Vec<BackupRecord>> {
        self.store.list_recent(limit).await
    }

    pub async fn get_backup(&self, id: &str) -> Result<Option<BackupRecord>> {
        self.store.get_by_id(id).await
    }

    /// 删除备份：文件删除尽力而为，记录删除失败才返回错误
    #[instrument(skip(self))]
    pub async fn delete_backup(&self, id: &str) -> Result<()> {
        let record = self.find(id).await?;

        if let Err(e) = self.runner.delete_file(Path::new(&record.file_path)).await {
            warn!(path = %record.file_path, error = %e, "删除备份文件失败");
        }

        self.store.delete(id).await?;
        info!("备份已删除");
        Ok(())
    }

    /// 注册每日备份任务 `daily-{database}`
    pub fn setup_daily_backup(&self, database: &str) -> Result<()> {
        self.scheduler.add_job(
            &format!("{}{database}", backup::DAILY_JOB_PREFIX),
            backup::DAILY_CRON,
            database,
        )
    }

    pub fn start_scheduler(&self) {
        self.scheduler.start();
    }

    pub fn stop_scheduler(&self) -> StopHandle {
        self.scheduler.stop()
    }

    /// 在后台执行一次手动备份
    ///
    /// 调用方放弃等待不会中断备份，记录总会落到终态。
    pub fn spawn_backup(self: &Arc<Self>, database: &str) -> JoinHandle<Result<BackupRecord>> {
        let service = Arc::clone(self);
        let database = database.to_string();
        self.background.spawn(async move {
            service
                .trigger_backup(&database, TriggerOrigin::Manual, &CancellationToken::new())
                .await
        })
    }

    /// 在后台执行一次恢复，调用方放弃等待不会中断恢复
    pub fn spawn_restore(self: &Arc<Self>, id: &str) -> JoinHandle<Result<()>> {
        let service = Arc::clone(self);
        let id = id.to_string();
        self.background.spawn(async move {
            service.restore_backup(&id, &CancellationToken::new()).await
        })
    }

    /// 等待后台派生的备份、恢复与清理全部结束
    ///
    /// 之后仍可派生新任务，再次调用会继续等待它们。
    pub async fn wait_background(&self) {
        self.background.close();
        self.background.wait().await;
    }

    async fn find(&self, id: &str) -> Result<BackupRecord> {
        self.store
            .get_by_id(id)
            .await?
            .ok_or_else(|| DashError::not_found(format!("备份 {id}")))
    }

    /// 后台清理过期备份，不阻塞调用方
    fn spawn_cleanup(self: &Arc<Self>) {
        if self.options.retention_days == 0 {
            return;
        }
        let service = Arc::clone(self);
        self.background.spawn(async move {
            if tokio::time::timeout(backup::CLEANUP_TIMEOUT, service.cleanup_old_backups())
                .await
                .is_err()
            {
                warn!("清理过期备份超时");
            }
        });
    }

    /// 删除早于保留期的备份文件与记录，返回删除的记录数
    ///
    /// 单条失败只记录日志并继续处理下一条。
    pub async fn cleanup_old_backups(&self) -> usize {
        let backups = match self.store.list_recent(backup::CLEANUP_SCAN_LIMIT).await {
            Ok(backups) => backups,
            Err(e) => {
                error!(error = %e, "列出备份失败，跳过清理");
                return 0;
            }
        };

        let cutoff = Utc::now() - ChronoDuration::days(i64::from(self.options.retention_days));
        let mut removed = 0;
        for record in backups.iter().filter(|r| r.started_at < cutoff) {
            if let Err(e) = self.runner.delete_file(Path::new(&record.file_path)).await {
                warn!(path = %record.file_path, error = %e, "删除过期备份文件失败");
            }
            match self.store.delete(&record.id).await {
                Ok(()) => {
                    removed += 1;
                    let age_days = (Utc::now() - record.started_at).num_hours() as f64 / 24.0;
                    info!(backup_id = %record.id, age_days, "已清理过期备份");
                }
                Err(e) => warn!(backup_id = %record.id, error = %e, "删除过期备份记录失败"),
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::BackupOutcome;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// 内存记录存储
    #[derive(Clone, Default)]
    struct MemoryStore {
        records: Arc<Mutex<HashMap<String, BackupRecord>>>,
        fail_insert: bool,
        fail_delete: bool,
    }

    impl MemoryStore {
        fn put(&self, record: BackupRecord) {
            self.records
                .lock()
                .unwrap()
                .insert(record.id.clone(), record);
        }

        fn all(&self) -> Vec<BackupRecord> {
            self.records.lock().unwrap().values().cloned().collect()
        }
    }

    impl BackupStore for MemoryStore {
        async fn insert(&self, record: &BackupRecord) -> Result<()> {
            if self.fail_insert {
                return Err(DashError::persistence("disk full"));
            }
            self.put(record.clone());
            Ok(())
        }

        async fn update_status(
            &self,
            id: &str,
            status: BackupStatus,
            file_path: &str,
            size_bytes: i64,
            error_message: Option<&str>,
        ) -> Result<()> {
            let mut records = self.records.lock().unwrap();
            let record = records
                .get_mut(id)
                .ok_or_else(|| DashError::persistence("missing"))?;
            record.status = status;
            record.file_path = file_path.to_string();
            record.size_bytes = size_bytes;
            record.error_message = error_message.map(str::to_string);
            record.completed_at = Some(Utc::now());
            Ok(())
        }

        async fn get_by_id(&self, id: &str) -> Result<Option<BackupRecord>> {
            Ok(self.records.lock().unwrap().get(id).cloned())
        }

        async fn list_recent(&self, limit: usize) -> Result<Vec<BackupRecord>> {
            let mut all = self.all();
            all.sort_by(|a, b| b.started_at.cmp(&a.started_at));
            all.truncate(limit);
            Ok(all)
        }

        async fn delete(&self, id: &str) -> Result<()> {
            if self.fail_delete {
                return Err(DashError::persistence("locked"));
            }
            self.records.lock().unwrap().remove(id);
            Ok(())
        }

        async fn delete_older_than(&self, days: u32) -> Result<u64> {
            let cutoff = Utc::now() - ChronoDuration::days(i64::from(days));
            let mut records = self.records.lock().unwrap();
            let before = records.len();
            records.retain(|_, r| r.started_at >= cutoff);
            Ok((before - records.len()) as u64)
        }
    }

    /// 可编排结果的执行器替身
    #[derive(Clone, Default)]
    struct FakeRunner {
        fail_with: Option<String>,
        fail_file_delete: bool,
        delay: Duration,
        deleted: Arc<Mutex<Vec<PathBuf>>>,
        restored: Arc<Mutex<Vec<(PathBuf, String)>>>,
    }

    impl BackupRunner for FakeRunner {
        async fn execute(
            &self,
            database: &str,
            _timeout: Duration,
            _cancel: &CancellationToken,
        ) -> Result<BackupOutcome> {
            tokio::time::sleep(self.delay).await;
            match &self.fail_with {
                Some(output) => Err(DashError::execution("mongodump 执行失败: exit status: 1", output)),
                None => Ok(BackupOutcome {
                    file_path: PathBuf::from(format!("/backups/{database}_2026-10-16_00-00-00.gz")),
                    size_bytes: 4096,
                    elapsed: Duration::from_millis(1200),
                }),
            }
        }

        async fn restore(
            &self,
            archive: &Path,
            database: &str,
            _timeout: Duration,
            _cancel: &CancellationToken,
        ) -> Result<()> {
            self.restored
                .lock()
                .unwrap()
                .push((archive.to_path_buf(), database.to_string()));
            Ok(())
        }

        async fn delete_file(&self, path: &Path) -> Result<()> {
            if self.fail_file_delete {
                return Err(DashError::Io(std::io::Error::other("permission denied")));
            }
            self.deleted.lock().unwrap().push(path.to_path_buf());
            Ok(())
        }

        async fn file_size(&self, _path: &Path) -> Result<u64> {
            Ok(4096)
        }
    }

    fn service(
        store: MemoryStore,
        runner: FakeRunner,
        retention_days: u32,
    ) -> Arc<BackupService<MemoryStore, FakeRunner>> {
        BackupService::new(
            store,
            runner,
            JobScheduler::new(),
            BackupOptions {
                retention_days,
                timeout: Duration::from_secs(5),
            },
        )
    }

    fn aged_record(database: &str, days: i64) -> BackupRecord {
        let mut record = BackupRecord::start(database, TriggerOrigin::Scheduled);
        record.started_at = Utc::now() - ChronoDuration::days(days);
        record.status = BackupStatus::Completed;
        record.file_path = format!("/backups/{database}.gz");
        record
    }

    #[tokio::test]
    async fn test_manual_backup_completes() {
        let store = MemoryStore::default();
        let svc = service(store.clone(), FakeRunner::default(), 7);

        let record = svc
            .trigger_backup("orders", TriggerOrigin::Manual, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(record.status, BackupStatus::Completed);
        assert_eq!(record.size_bytes, 4096);
        assert!(!record.file_path.is_empty());
        assert!(record.error_message.is_none());
        assert!(record.completed_at.is_some());
        assert_eq!(record.triggered_by, TriggerOrigin::Manual);
        assert_eq!(store.all().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_backup_is_recorded_and_deletable() {
        let store = MemoryStore::default();
        let runner = FakeRunner {
            fail_with: Some("Failed: error connecting to db server".to_string()),
            fail_file_delete: true,
            ..Default::default()
        };
        let svc = service(store.clone(), runner, 7);

        let record = svc
            .trigger_backup("orders", TriggerOrigin::Manual, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(record.status, BackupStatus::Failed);
        let message = record.error_message.clone().unwrap();
        assert!(message.contains("error connecting"));
        assert_eq!(record.size_bytes, 0);

        svc.delete_backup(&record.id).await.unwrap();
        assert!(svc.get_backup(&record.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_record_creation_failure_is_returned() {
        let store = MemoryStore {
            fail_insert: true,
            ..Default::default()
        };
        let svc = service(store.clone(), FakeRunner::default(), 7);

        let err = svc
            .trigger_backup("orders", TriggerOrigin::Manual, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DashError::Persistence(_)));
        assert!(store.all().is_empty());
    }

    #[tokio::test]
    async fn test_restore_and_delete_unknown_id() {
        let svc = service(MemoryStore::default(), FakeRunner::default(), 7);
        let cancel = CancellationToken::new();

        assert!(svc.restore_backup("nope", &cancel).await.unwrap_err().is_not_found());
        assert!(svc.delete_backup("nope").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_restore_uses_record_path_without_mutating() {
        let store = MemoryStore::default();
        let runner = FakeRunner::default();
        let svc = service(store.clone(), runner.clone(), 7);

        let record = aged_record("orders", 1);
        store.put(record.clone());

        svc.restore_backup(&record.id, &CancellationToken::new())
            .await
            .unwrap();

        let restored = runner.restored.lock().unwrap().clone();
        assert_eq!(
            restored,
            vec![(PathBuf::from("/backups/orders.gz"), "orders".to_string())]
        );
        assert_eq!(svc.get_backup(&record.id).await.unwrap().unwrap(), record);
    }

    #[tokio::test]
    async fn test_delete_fails_when_record_delete_fails() {
        let store = MemoryStore {
            fail_delete: true,
            ..Default::default()
        };
        let runner = FakeRunner::default();
        let svc = service(store.clone(), runner.clone(), 7);

        let record = aged_record("orders", 1);
        store.put(record.clone());

        let err = svc.delete_backup(&record.id).await.unwrap_err();
        assert!(matches!(err, DashError::Persistence(_)));
        assert_eq!(runner.deleted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_retention_sweep() {
        let store = MemoryStore::default();
        let runner = FakeRunner::default();
        let svc = service(store.clone(), runner.clone(), 7);

        let old = aged_record("old", 10);
        let recent = aged_record("recent", 2);
        store.put(old.clone());
        store.put(recent.clone());

        let removed = svc.cleanup_old_backups().await;

        assert_eq!(removed, 1);
        assert!(svc.get_backup(&old.id).await.unwrap().is_none());
        assert!(svc.get_backup(&recent.id).await.unwrap().is_some());
        assert_eq!(
            runner.deleted.lock().unwrap().clone(),
            vec![PathBuf::from("/backups/old.gz")]
        );
    }

    #[tokio::test]
    async fn test_retention_sweep_continues_past_failures() {
        let store = MemoryStore::default();
        let runner = FakeRunner {
            fail_file_delete: true,
            ..Default::default()
        };
        let svc = service(store.clone(), runner, 7);

        store.put(aged_record("a", 30));
        store.put(aged_record("b", 20));

        assert_eq!(svc.cleanup_old_backups().await, 2);
        assert!(store.all().is_empty());
    }

    #[tokio::test]
    async fn test_successful_backup_triggers_background_sweep() {
        let store = MemoryStore::default();
        let svc = service(store.clone(), FakeRunner::default(), 7);
        let old = aged_record("old", 10);
        store.put(old.clone());

        svc.trigger_backup("orders", TriggerOrigin::Manual, &CancellationToken::new())
            .await
            .unwrap();
        svc.wait_background().await;

        assert!(svc.get_backup(&old.id).await.unwrap().is_none());
        assert_eq!(store.all().len(), 1);
    }

    #[tokio::test]
    async fn test_spawned_backup_survives_dropped_handle() {
        let store = MemoryStore::default();
        let runner = FakeRunner {
            delay: Duration::from_millis(200),
            ..Default::default()
        };
        let svc = service(store.clone(), runner, 7);

        drop(svc.spawn_backup("orders"));
        svc.wait_background().await;

        let records = store.all();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, BackupStatus::Completed);
    }

    #[tokio::test]
    async fn test_spawned_restore_reports_missing_backup() {
        let svc = service(MemoryStore::default(), FakeRunner::default(), 7);
        let err = svc.spawn_restore("nope").await.unwrap().unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_wait_background_allows_later_spawns() {
        let store = MemoryStore::default();
        let svc = service(store.clone(), FakeRunner::default(), 0);

        svc.wait_background().await;
        let record = svc.spawn_backup("orders").await.unwrap().unwrap();
        svc.wait_background().await;

        assert_eq!(record.status, BackupStatus::Completed);
        assert_eq!(store.all().len(), 1);
    }

    #[tokio::test]
    async fn test_setup_daily_backup_registers_job() {
        let svc = service(MemoryStore::default(), FakeRunner::default(), 7);
        svc.setup_daily_backup("orders").unwrap();
        svc.setup_daily_backup("orders").unwrap();

        assert_eq!(svc.scheduler().list_jobs(), vec!["daily-orders"]);
        let (expression, next) = svc.scheduler().job_info("daily-orders").unwrap();
        assert_eq!(expression, "0 0 0 * * *");
        assert!(next.is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_scheduled_job_runs_backup() {
        let store = MemoryStore::default();
        let svc = service(store.clone(), FakeRunner::default(), 7);

        svc.scheduler()
            .add_job("every-second", "* * * * * *", "orders")
            .unwrap();
        svc.start_scheduler();

        let mut found = false;
        for _ in 0..40 {
            if store
                .all()
                .iter()
                .any(|r| r.triggered_by == TriggerOrigin::Scheduled)
            {
                found = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        svc.stop_scheduler().wait().await;
        assert!(found);
        assert!(store.all().iter().all(|r| r.status.is_terminal()));
    }
}
