use crate::Result;
use crate::constants::live;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::hub::Hub;

/// 指标快照来源
pub trait MetricsSource: Send + Sync + 'static {
    type Snapshot: Serialize + Send;

    fn snapshot(
        &self,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Self::Snapshot>> + Send;
}

/// 周期性指标推送
///
/// 没有观看者时整轮跳过，不访问指标来源。
pub struct MetricsBroadcaster<M> {
    hub: Hub,
    source: M,
    interval: Duration,
}

impl<M: MetricsSource> MetricsBroadcaster<M> {
    pub fn new(hub: Hub, source: M, interval: Duration) -> Self {
        Self {
            hub,
            source,
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_ms = self.interval.as_millis() as u64, "指标推送已启动");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if self.hub.live_count() == 0 {
                continue;
            }

            let snapshot = tokio::select! {
                _ = shutdown.cancelled() => break,
                snapshot = self.source.snapshot(&shutdown) => snapshot,
            };
            match snapshot {
                Ok(snapshot) => {
                    if !self.hub.broadcast(live::METRICS_MESSAGE_TYPE, &snapshot) {
                        debug!("本轮指标未能入队");
                    }
                }
                Err(e) => error!(error = %e, "获取推送指标失败"),
            }
        }
        info!("指标推送已停止");
    }
}
