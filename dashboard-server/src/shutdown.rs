use dashboard_core::Result;
use dashboard_core::health::Readiness;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{error, info, warn};

/// 单个关闭步骤的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Done,
    Failed(String),
    TimedOut,
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOutcome::Done => f.write_str("done"),
            StepOutcome::Failed(reason) => write!(f, "failed: {reason}"),
            StepOutcome::TimedOut => f.write_str("timed out"),
        }
    }
}

/// 关闭过程中每一步的记录
#[derive(Debug, Default, Clone)]
pub struct ShutdownReport {
    pub steps: Vec<(&'static str, StepOutcome)>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.steps.iter().all(|(_, outcome)| *outcome == StepOutcome::Done)
    }

    pub fn outcome(&self, step: &str) -> Option<&StepOutcome> {
        self.steps
            .iter()
            .find(|(name, _)| *name == step)
            .map(|(_, outcome)| outcome)
    }
}

/// 关闭协调器
///
/// 固定顺序：标记未就绪 -> 等待摘流 -> 停止 HTTP -> 停止调度器并等待任务结束 -> 关闭状态库。
/// 每一步单独限时，失败只记录日志，后续步骤照常执行。
/// 等待进行中备份的那一步使用 `job_timeout`，其余步骤使用 `step_timeout`。
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    readiness: Readiness,
    drain_delay: Duration,
    step_timeout: Duration,
    job_timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(readiness: Readiness, drain_delay: Duration, step_timeout: Duration) -> Self {
        Self {
            readiness,
            drain_delay,
            step_timeout,
            job_timeout: step_timeout,
        }
    }

    /// 设置等待进行中备份的上限，不应小于单次备份的超时
    pub fn with_job_timeout(mut self, job_timeout: Duration) -> Self {
        self.job_timeout = job_timeout;
        self
    }

    /// 依次执行关闭步骤
    ///
    /// 传入的 future 在对应步骤开始时才会被轮询。
    pub async fn run<H, S, C>(&self, stop_http: H, stop_scheduler: S, close_store: C) -> ShutdownReport
    where
        H: Future<Output = Result<()>>,
        S: Future<Output = ()>,
        C: Future<Output = Result<()>>,
    {
        let mut report = ShutdownReport::default();
        info!(
            drain_delay_secs = self.drain_delay.as_secs_f64(),
            timeout_secs = self.step_timeout.as_secs_f64(),
            job_timeout_secs = self.job_timeout.as_secs_f64(),
            "开始关闭"
        );

        self.readiness.begin_shutdown();
        report.steps.push(("mark_not_ready", StepOutcome::Done));

        tokio::time::sleep(self.drain_delay).await;
        report.steps.push(("drain_delay", StepOutcome::Done));

        let outcome = self.step("stop_http", self.step_timeout, stop_http).await;
        report.steps.push(("stop_http", outcome));

        let outcome = self
            .step("stop_scheduler", self.job_timeout, async {
                stop_scheduler.await;
                Ok(())
            })
            .await;
        report.steps.push(("stop_scheduler", outcome));

        let outcome = self
            .step("close_store", self.step_timeout, close_store)
            .await;
        report.steps.push(("close_store", outcome));

        if report.is_clean() {
            info!("关闭完成");
        } else {
            warn!("关闭完成，部分步骤未成功");
        }
        report
    }

    async fn step<F>(&self, name: &'static str, limit: Duration, future: F) -> StepOutcome
    where
        F: Future<Output = Result<()>>,
    {
        match tokio::time::timeout(limit, future).await {
            Ok(Ok(())) => {
                info!(step = name, "关闭步骤完成");
                StepOutcome::Done
            }
            Ok(Err(e)) => {
                error!(step = name, error = %e, "关闭步骤失败");
                StepOutcome::Failed(e.to_string())
            }
            Err(_) => {
                error!(step = name, "关闭步骤超时");
                StepOutcome::TimedOut
            }
        }
    }
}

/// 等待 Ctrl-C 或 SIGTERM，返回信号名
pub async fn shutdown_signal() -> std::io::Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.map(|()| "SIGINT"),
            _ = terminate.recv() => Ok("SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.map(|()| "CtrlC")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dashboard_core::DashError;
    use dashboard_core::backup::{
        BackupOptions, BackupOutcome, BackupRunner, BackupService, JobScheduler,
    };
    use dashboard_core::db::{BackupStatus, DuckDbManager};
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};
    use tokio_util::sync::CancellationToken;

    /// 导出很慢的执行器
    struct SlowRunner {
        delay: Duration,
    }

    impl BackupRunner for SlowRunner {
        async fn execute(
            &self,
            database: &str,
            _timeout: Duration,
            _cancel: &CancellationToken,
        ) -> Result<BackupOutcome> {
            tokio::time::sleep(self.delay).await;
            Ok(BackupOutcome {
                file_path: PathBuf::from(format!("/backups/{database}.gz")),
                size_bytes: 1024,
                elapsed: self.delay,
            })
        }

        async fn restore(
            &self,
            _archive: &Path,
            _database: &str,
            _timeout: Duration,
            _cancel: &CancellationToken,
        ) -> Result<()> {
            Ok(())
        }

        async fn delete_file(&self, _path: &Path) -> Result<()> {
            Ok(())
        }

        async fn file_size(&self, _path: &Path) -> Result<u64> {
            Ok(1024)
        }
    }

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) + Clone) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let writer = {
            let log = log.clone();
            move |entry: &str| log.lock().unwrap().push(entry.to_string())
        };
        (log, writer)
    }

    #[tokio::test(start_paused = true)]
    async fn test_steps_run_in_order() {
        let readiness = Readiness::new();
        let coordinator = ShutdownCoordinator::new(
            readiness.clone(),
            Duration::from_secs(5),
            Duration::from_secs(15),
        );
        let (log, record) = recorder();
        let started = tokio::time::Instant::now();

        let report = coordinator
            .run(
                {
                    let record = record.clone();
                    let readiness = readiness.clone();
                    async move {
                        assert!(!readiness.is_ready());
                        assert!(started.elapsed() >= Duration::from_secs(5));
                        record("http");
                        Ok(())
                    }
                },
                {
                    let record = record.clone();
                    async move { record("scheduler") }
                },
                async move {
                    record("store");
                    Ok(())
                },
            )
            .await;

        assert!(report.is_clean());
        assert_eq!(*log.lock().unwrap(), vec!["http", "scheduler", "store"]);
        assert_eq!(
            report.steps.iter().map(|(name, _)| *name).collect::<Vec<_>>(),
            vec![
                "mark_not_ready",
                "drain_delay",
                "stop_http",
                "stop_scheduler",
                "close_store"
            ]
        );
        assert!(readiness.is_shutting_down());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_running_backup_finishes_before_store_closes() {
        let store = DuckDbManager::new_memory().await.unwrap();
        let backups = BackupService::new(
            store.clone(),
            SlowRunner {
                delay: Duration::from_millis(800),
            },
            JobScheduler::new(),
            BackupOptions {
                retention_days: 0,
                timeout: Duration::from_secs(5),
            },
        );
        backups
            .scheduler()
            .add_job("every-second", "* * * * * *", "orders")
            .unwrap();
        backups.start_scheduler();

        let mut running = false;
        for _ in 0..60 {
            let records = store.list_recent_backups(10).await.unwrap();
            if records.iter().any(|r| r.status == BackupStatus::Running) {
                running = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(running);

        // 单步超时远小于备份耗时，只有等待备份的那一步放宽
        let coordinator =
            ShutdownCoordinator::new(Readiness::new(), Duration::ZERO, Duration::from_millis(50))
                .with_job_timeout(Duration::from_secs(10));
        let report = coordinator
            .run(
                async { Ok(()) },
                async {
                    backups.stop_scheduler().wait().await;
                    backups.wait_background().await;
                },
                {
                    let store = store.clone();
                    async move {
                        let records = store.list_recent_backups(10).await?;
                        assert!(!records.is_empty());
                        assert!(records.iter().all(|r| r.status.is_terminal()));
                        store.close().await
                    }
                },
            )
            .await;

        assert!(report.is_clean());
        assert_eq!(report.outcome("stop_scheduler"), Some(&StepOutcome::Done));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_do_not_abort_sequence() {
        let coordinator = ShutdownCoordinator::new(
            Readiness::new(),
            Duration::from_secs(5),
            Duration::from_secs(15),
        );
        let (log, record) = recorder();

        let report = coordinator
            .run(
                async { Err(DashError::Io(std::io::Error::other("listener gone"))) },
                // 调度器中的任务一直不结束
                std::future::pending::<()>(),
                async move {
                    record("store");
                    Ok(())
                },
            )
            .await;

        assert!(!report.is_clean());
        assert!(matches!(
            report.outcome("stop_http"),
            Some(StepOutcome::Failed(_))
        ));
        assert_eq!(report.outcome("stop_scheduler"), Some(&StepOutcome::TimedOut));
        assert_eq!(report.outcome("close_store"), Some(&StepOutcome::Done));
        assert_eq!(*log.lock().unwrap(), vec!["store"]);
    }
}
