use crate::{DashError, Result};
use chrono::{DateTime, Utc};
use cron::Schedule;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// 定时任务回调：参数为目标数据库名
pub type JobHandler = Arc<dyn Fn(String) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// 已注册的定时任务
struct JobEntry {
    expression: String,
    schedule: Schedule,
    target: String,
    /// 触发循环的取消令牌，仅在调度器运行后存在
    trigger: Option<CancellationToken>,
}

#[derive(Default)]
struct Registry {
    started: bool,
    stopped: bool,
    jobs: HashMap<String, JobEntry>,
}

struct SchedulerInner {
    registry: Mutex<Registry>,
    handler: OnceLock<JobHandler>,
    shutdown: CancellationToken,
    invocations: TaskTracker,
}

/// 基于六字段 cron 表达式（秒级精度）的定时任务调度器
///
/// 每个任务有独立的触发循环；每次触发在单独的任务里调用回调，
/// 回调失败或 panic 只记录日志，不影响后续触发。
#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<SchedulerInner>,
}

/// `stop()` 返回的句柄，等待所有进行中的回调结束
#[derive(Debug, Clone)]
pub struct StopHandle {
    invocations: TaskTracker,
}

impl StopHandle {
    /// 等待进行中的任务全部结束
    pub async fn wait(self) {
        self.invocations.wait().await;
    }

    /// 是否已没有进行中的任务
    pub fn is_finished(&self) -> bool {
        self.invocations.is_closed() && self.invocations.is_empty()
    }
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// 解析六字段 cron 表达式：秒 分 时 日 月 周
pub fn parse_schedule(expression: &str) -> Result<Schedule> {
    let expression = expression.trim();
    let fields = expression.split_whitespace().count();
    if !expression.starts_with('@') && fields != 6 {
        return Err(DashError::invalid_schedule(
            expression,
            format!("需要 6 个字段（秒 分 时 日 月 周），实际为 {fields} 个"),
        ));
    }
    Schedule::from_str(expression)
        .map_err(|e| DashError::invalid_schedule(expression, e.to_string()))
}

impl JobScheduler {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                registry: Mutex::new(Registry::default()),
                handler: OnceLock::new(),
                shutdown: CancellationToken::new(),
                invocations: TaskTracker::new(),
            }),
        }
    }

    /// 注入任务回调，只能设置一次
    pub fn set_handler<F, Fut>(&self, handler: F)
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handler: JobHandler = Arc::new(move |target| Box::pin(handler(target)));
        if self.inner.handler.set(handler).is_err() {
            warn!("任务回调已设置，忽略重复设置");
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        // 持锁期间不会 panic，中毒时直接沿用内部数据
        self.inner
            .registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 注册任务；同名任务会先注销旧触发器再安装新的
    pub fn add_job(&self, name: &str, expression: &str, target: &str) -> Result<()> {
        let schedule = parse_schedule(expression)?;

        let mut registry = self.registry();
        if let Some(previous) = registry.jobs.remove(name) {
            if let Some(trigger) = previous.trigger {
                trigger.cancel();
            }
            debug!(job = name, old = %previous.expression, "替换已有定时任务");
        }

        let mut entry = JobEntry {
            expression: expression.trim().to_string(),
            schedule,
            target: target.to_string(),
            trigger: None,
        };
        if registry.started && !registry.stopped {
            entry.trigger = Some(self.spawn_trigger(name, &entry));
        }
        registry.jobs.insert(name.to_string(), entry);

        info!(job = name, expression, database = target, "定时任务已注册");
        Ok(())
    }

    /// 注销任务，不存在时为空操作
    pub fn remove_job(&self, name: &str) {
        let mut registry = self.registry();
        if let Some(entry) = registry.jobs.remove(name) {
            if let Some(trigger) = entry.trigger {
                trigger.cancel();
            }
            info!(job = name, "定时任务已移除");
        }
    }

    /// 已注册的任务名（排序后）
    pub fn list_jobs(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registry().jobs.keys().cloned().collect();
        names.sort();
        names
    }

    /// 任务的表达式与下一次触发时间
    pub fn job_info(&self, name: &str) -> Option<(String, Option<DateTime<Utc>>)> {
        self.registry().jobs.get(name).map(|entry| {
            (
                entry.expression.clone(),
                entry.schedule.upcoming(Utc).next(),
            )
        })
    }

    /// 任务下一次触发时间
    pub fn next_fire(&self, name: &str) -> Option<DateTime<Utc>> {
        self.job_info(name).and_then(|(_, next)| next)
    }

    /// 开始触发已注册的任务
    pub fn start(&self) {
        let mut registry = self.registry();
        if registry.stopped {
            warn!("调度器已停止，不能再次启动");
            return;
        }
        if registry.started {
            return;
        }
        registry.started = true;

        for (name, entry) in registry.jobs.iter_mut() {
            let trigger = self.spawn_trigger(name, entry);
            entry.trigger = Some(trigger);
        }
        info!(jobs = registry.jobs.len(), "备份调度器已启动");
    }

    /// 停止触发新的任务，返回等待进行中任务结束的句柄
    pub fn stop(&self) -> StopHandle {
        {
            let mut registry = self.registry();
            if !registry.stopped {
                registry.stopped = true;
                info!("备份调度器正在停止");
            }
            self.inner.shutdown.cancel();
            self.inner.invocations.close();
        }
        StopHandle {
            invocations: self.inner.invocations.clone(),
        }
    }

    fn spawn_trigger(&self, name: &str, entry: &JobEntry) -> CancellationToken {
        let token = self.inner.shutdown.child_token();
        tokio::spawn(trigger_loop(
            self.clone(),
            name.to_string(),
            entry.schedule.clone(),
            entry.target.clone(),
            token.clone(),
        ));
        token
    }

    /// 触发一次任务回调
    fn fire(&self, name: &str, target: &str, trigger: &CancellationToken) {
        let Some(handler) = self.inner.handler.get().cloned() else {
            warn!(job = name, "未设置任务回调，跳过本次触发");
            return;
        };

        // 与 stop() 互斥：要么在停止前被追踪，要么不再执行
        let registry = self.registry();
        if registry.stopped || trigger.is_cancelled() {
            return;
        }

        let name = name.to_string();
        let target = target.to_string();
        let invocation = {
            let target = target.clone();
            tokio::spawn(async move { handler(target).await })
        };
        self.inner.invocations.spawn(async move {
            info!(job = %name, database = %target, "定时备份开始");
            match invocation.await {
                Ok(Ok(())) => info!(job = %name, database = %target, "定时备份完成"),
                Ok(Err(e)) => error!(job = %name, database = %target, error = %e, "定时备份失败"),
                Err(e) if e.is_panic() => {
                    error!(job = %name, database = %target, "定时任务发生 panic")
                }
                Err(e) => warn!(job = %name, database = %target, error = %e, "定时任务被中止"),
            }
        });
        drop(registry);
    }
}

async fn trigger_loop(
    scheduler: JobScheduler,
    name: String,
    schedule: Schedule,
    target: String,
    token: CancellationToken,
) {
    let mut last_fired = None;
    loop {
        let now = Utc::now();
        let Some(next) = next_fire_after(&schedule, last_fired, now) else {
            warn!(job = %name, "表达式没有后续触发时间，触发循环结束");
            break;
        };
        let wait = (next - now).to_std().unwrap_or_default();

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }

        last_fired = Some(next);
        scheduler.fire(&name, &target, &token);
    }
    debug!(job = %name, "触发循环已退出");
}

/// 下一次触发时间，严格晚于上次触发
///
/// 醒来时墙钟可能还没走到上次的触发点，此时从上次触发点往后算。
fn next_fire_after(
    schedule: &Schedule,
    last_fired: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let from = last_fired.map_or(now, |last| last.max(now));
    schedule.after(&from).next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::{Notify, mpsc};

    const EVERY_SECOND: &str = "* * * * * *";
    const YEARLY: &str = "0 0 0 1 1 *";

    fn counting_scheduler() -> (JobScheduler, Arc<AtomicUsize>) {
        let scheduler = JobScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        scheduler.set_handler(move |_target| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        (scheduler, count)
    }

    #[test]
    fn test_next_fire_skips_already_fired_instant() {
        let schedule = parse_schedule(EVERY_SECOND).unwrap();
        let fired = DateTime::parse_from_rfc3339("2026-10-16T00:00:10Z")
            .unwrap()
            .with_timezone(&Utc);
        // 墙钟比 tokio 计时器慢一点
        let lagging_now = fired - chrono::Duration::milliseconds(300);

        let next = next_fire_after(&schedule, Some(fired), lagging_now).unwrap();
        assert_eq!(next, fired + chrono::Duration::seconds(1));

        let first = next_fire_after(&schedule, None, lagging_now).unwrap();
        assert_eq!(first, fired);
    }

    #[test]
    fn test_parse_schedule() {
        assert!(parse_schedule("0 0 0 * * *").is_ok());
        assert!(matches!(
            parse_schedule("0 0 * * *"),
            Err(DashError::InvalidSchedule { .. })
        ));
        assert!(matches!(
            parse_schedule("not a cron at all ok"),
            Err(DashError::InvalidSchedule { .. })
        ));
    }

    #[tokio::test]
    async fn test_add_invalid_job_fails() {
        let scheduler = JobScheduler::new();
        let err = scheduler.add_job("x", "bogus * * * * *", "orders").unwrap_err();
        assert!(matches!(err, DashError::InvalidSchedule { .. }));
        assert!(scheduler.list_jobs().is_empty());
    }

    #[tokio::test]
    async fn test_list_and_remove_jobs() {
        let scheduler = JobScheduler::new();
        scheduler.add_job("daily-b", YEARLY, "b").unwrap();
        scheduler.add_job("daily-a", YEARLY, "a").unwrap();
        assert_eq!(scheduler.list_jobs(), vec!["daily-a", "daily-b"]);
        assert!(scheduler.next_fire("daily-a").is_some());

        scheduler.remove_job("daily-a");
        scheduler.remove_job("daily-a");
        scheduler.remove_job("unknown");
        assert_eq!(scheduler.list_jobs(), vec!["daily-b"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_replaced_job_uses_new_schedule() {
        let (scheduler, count) = counting_scheduler();
        scheduler.start();

        scheduler.add_job("x", EVERY_SECOND, "orders").unwrap();
        scheduler.add_job("x", YEARLY, "orders").unwrap();
        assert_eq!(scheduler.list_jobs(), vec!["x"]);
        assert_eq!(scheduler.job_info("x").unwrap().0, YEARLY);

        tokio::time::sleep(Duration::from_millis(2200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        scheduler.stop().wait().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_jobs_fire_only_after_start() {
        let (scheduler, count) = counting_scheduler();
        scheduler.add_job("x", YEARLY, "orders").unwrap();
        scheduler.add_job("x", EVERY_SECOND, "orders").unwrap();

        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        scheduler.start();
        tokio::time::sleep(Duration::from_millis(2200)).await;
        assert!(count.load(Ordering::SeqCst) >= 1);

        scheduler.stop().wait().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failing_and_panicking_jobs_keep_firing() {
        let scheduler = JobScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        scheduler.set_handler(move |_target| {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    panic!("first invocation blows up");
                }
                Err(DashError::execution("exit status 1", ""))
            }
        });
        scheduler.add_job("x", EVERY_SECOND, "orders").unwrap();
        scheduler.start();

        tokio::time::sleep(Duration::from_millis(3200)).await;
        assert!(count.load(Ordering::SeqCst) >= 2);
        assert_eq!(scheduler.list_jobs(), vec!["x"]);

        scheduler.stop().wait().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stop_waits_for_running_job() {
        let scheduler = JobScheduler::new();
        let started = Arc::new(Notify::new());
        let (release_tx, release_rx) = mpsc::channel::<()>(1);
        let release_rx = Arc::new(tokio::sync::Mutex::new(release_rx));
        let count = Arc::new(AtomicUsize::new(0));

        {
            let started = started.clone();
            let count = count.clone();
            scheduler.set_handler(move |_target| {
                let started = started.clone();
                let release_rx = release_rx.clone();
                let count = count.clone();
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    started.notify_one();
                    release_rx.lock().await.recv().await;
                    Ok(())
                }
            });
        }
        scheduler.add_job("slow", EVERY_SECOND, "orders").unwrap();
        scheduler.start();

        tokio::time::timeout(Duration::from_secs(3), started.notified())
            .await
            .expect("job should fire");

        let handle = scheduler.stop();
        assert!(!handle.is_finished());
        let wait = handle.clone().wait();
        tokio::pin!(wait);
        assert!(
            tokio::time::timeout(Duration::from_millis(300), &mut wait)
                .await
                .is_err()
        );

        drop(release_tx);
        tokio::time::timeout(Duration::from_secs(2), &mut wait)
            .await
            .expect("stop handle should complete after the job returns");
        assert!(handle.is_finished());

        // 停止后不再触发
        let fired = count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(count.load(Ordering::SeqCst), fired);

        // 停止后注册的任务也不会触发
        scheduler.add_job("late", EVERY_SECOND, "orders").unwrap();
        scheduler.start();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(count.load(Ordering::SeqCst), fired);
    }
}
