use crate::constants::live;
use crate::{DashError, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::message::BroadcastMessage;
use super::viewer::{LiveViewer, ViewerId};

/// 推送中心事件，按提交顺序处理
#[derive(Debug)]
enum HubEvent {
    Register(LiveViewer),
    Unregister(ViewerId),
    Broadcast(Arc<str>),
}

type ViewerSet = Arc<RwLock<HashMap<ViewerId, LiveViewer>>>;

/// 实时推送中心句柄
///
/// 成员变更只发生在 [`HubRunner`] 所在任务里；
/// 句柄只通过事件队列提交请求，读锁仅用于统计在线人数。
#[derive(Clone, Debug)]
pub struct Hub {
    events: mpsc::Sender<HubEvent>,
    viewers: ViewerSet,
}

/// 推送中心事件循环
#[derive(Debug)]
pub struct HubRunner {
    events: mpsc::Receiver<HubEvent>,
    viewers: ViewerSet,
}

fn read(viewers: &ViewerSet) -> RwLockReadGuard<'_, HashMap<ViewerId, LiveViewer>> {
    viewers.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write(viewers: &ViewerSet) -> RwLockWriteGuard<'_, HashMap<ViewerId, LiveViewer>> {
    viewers.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Hub {
    pub fn new() -> (Self, HubRunner) {
        Self::with_capacity(live::HUB_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (Self, HubRunner) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let viewers: ViewerSet = Arc::default();
        (
            Self {
                events: sender,
                viewers: viewers.clone(),
            },
            HubRunner {
                events: receiver,
                viewers,
            },
        )
    }

    /// 注册观看者；中心已关闭时返回错误，观看者队列随之关闭
    pub async fn register(&self, viewer: LiveViewer) -> Result<()> {
        self.events
            .send(HubEvent::Register(viewer))
            .await
            .map_err(|_| DashError::HubClosed)
    }

    /// 注销观看者，重复注销无副作用
    pub async fn unregister(&self, id: ViewerId) {
        let _ = self.events.send(HubEvent::Unregister(id)).await;
    }

    /// 序列化一次后提交广播，不阻塞调用方
    ///
    /// 队列已满或中心已关闭时丢弃消息，返回是否已入队。
    pub fn broadcast<T: Serialize>(&self, message_type: &str, payload: &T) -> bool {
        let encoded = match BroadcastMessage::new(message_type, payload).encode() {
            Ok(encoded) => encoded,
            Err(e) => {
                error!(message_type, error = %e, "序列化推送消息失败");
                return false;
            }
        };

        match self.events.try_send(HubEvent::Broadcast(encoded)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(message_type, "推送队列已满，丢弃消息");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(message_type, "推送中心已关闭，丢弃消息");
                false
            }
        }
    }

    /// 当前在线观看者数量
    pub fn live_count(&self) -> usize {
        read(&self.viewers).len()
    }
}

impl HubRunner {
    /// 处理事件直到收到关闭信号，退出前关闭所有观看者队列
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("实时推送中心已启动");
        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                event = self.events.recv() => event,
            };
            match event {
                Some(event) => self.handle(event),
                None => break,
            }
        }

        self.events.close();
        let closed = {
            let mut viewers = write(&self.viewers);
            let count = viewers.len();
            viewers.clear();
            count
        };
        info!(viewers = closed, "实时推送中心已停止");
    }

    fn handle(&mut self, event: HubEvent) {
        match event {
            HubEvent::Register(viewer) => {
                let label = viewer.label().to_string();
                let total = {
                    let mut viewers = write(&self.viewers);
                    viewers.insert(viewer.id(), viewer);
                    viewers.len()
                };
                debug!(viewer = %label, total, "观看者已加入");
            }
            HubEvent::Unregister(id) => {
                let mut viewers = write(&self.viewers);
                if let Some(viewer) = viewers.remove(&id) {
                    debug!(viewer = viewer.label(), total = viewers.len(), "观看者已离开");
                }
            }
            HubEvent::Broadcast(message) => self.fan_out(message),
        }
    }

    /// 非阻塞投递；队列已满的观看者视为失效并移除
    fn fan_out(&mut self, message: Arc<str>) {
        let mut viewers = write(&self.viewers);
        let dead: Vec<ViewerId> = viewers
            .values()
            .filter_map(|viewer| match viewer.try_deliver(message.clone()) {
                Ok(()) => None,
                Err(TrySendError::Full(_)) => {
                    warn!(viewer = viewer.label(), "观看者消费过慢，断开连接");
                    Some(viewer.id())
                }
                Err(TrySendError::Closed(_)) => Some(viewer.id()),
            })
            .collect();

        for id in dead {
            viewers.remove(&id);
        }
    }
}
