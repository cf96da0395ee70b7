use crate::app::DashboardApp;
use crate::server::{AppState, router};
use crate::shutdown::{ShutdownCoordinator, shutdown_signal};
use dashboard_core::live::{Hub, MetricsBroadcaster, ServerStatusSource};
use dashboard_core::{DashError, Result};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// 运行仪表盘服务直到收到退出信号
pub async fn run_serve(app: &DashboardApp) -> Result<()> {
    let config = &app.config;
    let root = CancellationToken::new();

    // 实时推送
    let (hub, runner) = Hub::new();
    let hub_task = tokio::spawn(runner.run(root.clone()));
    let producer = MetricsBroadcaster::new(
        hub.clone(),
        ServerStatusSource::from_config(config),
        config.metrics_interval(),
    );
    let producer_task = tokio::spawn(producer.run(root.clone()));

    // 定时备份
    app.register_daily_backup();
    app.backups.start_scheduler();

    // HTTP
    let address = config.server_address();
    let listener = TcpListener::bind(&address).await?;
    info!(
        address = %address,
        environment = %config.app.environment,
        "仪表盘服务已启动"
    );

    let state = AppState {
        hub,
        readiness: app.readiness.clone(),
        store: app.store.clone(),
        backups: app.backups.clone(),
        default_database: config.mongodb.database.clone(),
        shutdown: root.clone(),
    };
    let http_stop = CancellationToken::new();
    let mut http_task = tokio::spawn({
        let stop = http_stop.clone();
        async move {
            axum::serve(listener, router(state))
                .with_graceful_shutdown(stop.cancelled_owned())
                .await
        }
    });

    let mut http_finished = false;
    tokio::select! {
        signal = shutdown_signal() => match signal {
            Ok(name) => info!(signal = name, "收到退出信号"),
            Err(e) => error!(error = %e, "监听退出信号失败，开始关闭"),
        },
        result = &mut http_task => {
            http_finished = true;
            match result {
                Ok(Ok(())) => error!("HTTP 服务意外退出"),
                Ok(Err(e)) => error!(error = %e, "HTTP 服务异常退出"),
                Err(e) => error!(error = %e, "HTTP 任务异常结束"),
            }
        }
    }

    // 推送中心、指标推送与所有 WebSocket 会话
    root.cancel();

    let coordinator = ShutdownCoordinator::new(
        app.readiness.clone(),
        config.drain_delay(),
        config.shutdown_timeout(),
    )
    .with_job_timeout(config.job_drain_timeout());
    let report = coordinator
        .run(
            async move {
                http_stop.cancel();
                if http_finished {
                    return Ok(());
                }
                match http_task.await {
                    Ok(result) => result.map_err(DashError::from),
                    Err(e) => Err(DashError::from(e)),
                }
            },
            async {
                app.backups.stop_scheduler().wait().await;
                // 通过 HTTP 触发的备份与恢复，以及成功后派生的清理
                app.backups.wait_background().await;
            },
            app.close(),
        )
        .await;

    for task in [hub_task, producer_task] {
        if let Err(e) = task.await {
            error!(error = %e, "后台任务异常结束");
        }
    }

    if !report.is_clean() {
        for (step, outcome) in &report.steps {
            info!(step = *step, outcome = %outcome, "关闭步骤");
        }
    }
    Ok(())
}
