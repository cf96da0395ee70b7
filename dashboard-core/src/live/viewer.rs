use crate::Result;
use crate::constants::live;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::hub::Hub;

/// WebSocket 关闭码：正常关闭
pub const CLOSE_NORMAL: u16 = 1000;
/// WebSocket 关闭码：服务端离开
pub const CLOSE_GOING_AWAY: u16 = 1001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewerId(Uuid);

impl ViewerId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ViewerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// 已连接的实时观看者
///
/// 出站队列的发送端由推送中心持有，从中心移除即关闭队列。
#[derive(Debug)]
pub struct LiveViewer {
    id: ViewerId,
    label: String,
    sender: mpsc::Sender<Arc<str>>,
}

impl LiveViewer {
    pub fn new() -> (Self, mpsc::Receiver<Arc<str>>) {
        Self::with_capacity(live::VIEWER_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (Self, mpsc::Receiver<Arc<str>>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let id = ViewerId::new();
        let label = id.to_string()[..live::VIEWER_LABEL_LEN].to_string();
        (Self { id, label, sender }, receiver)
    }

    pub fn id(&self) -> ViewerId {
        self.id
    }

    /// 日志里使用的短标识
    pub fn label(&self) -> &str {
        &self.label
    }

    pub(crate) fn try_deliver(
        &self,
        message: Arc<str>,
    ) -> std::result::Result<(), mpsc::error::TrySendError<Arc<str>>> {
        self.sender.try_send(message)
    }
}

/// 传输层写端
pub trait ViewerSink: Send + 'static {
    fn send_text(&mut self, text: Arc<str>) -> impl Future<Output = Result<()>> + Send;

    fn close(&mut self, code: u16, reason: &str) -> impl Future<Output = Result<()>> + Send;
}

/// 传输层读端
pub trait ViewerStream: Send {
    /// 读取下一帧；`None` 表示对端已关闭
    fn next_frame(&mut self) -> impl Future<Output = Option<Result<()>>> + Send;
}

/// 服务一个观看者连接直到任一方向结束
///
/// 写循环在独立任务里把队列中的消息写到传输层，每次写入有超时；
/// 读循环只用于发现对端断开。任一方结束都会注销观看者。
pub async fn serve_viewer<K, M>(hub: &Hub, mut sink: K, mut stream: M, shutdown: &CancellationToken)
where
    K: ViewerSink,
    M: ViewerStream,
{
    let (viewer, mut queue) = LiveViewer::new();
    let id = viewer.id();
    let label = viewer.label().to_string();

    if hub.register(viewer).await.is_err() {
        let _ = sink.close(CLOSE_GOING_AWAY, "server shutting down").await;
        return;
    }
    debug!(viewer = %label, "观看者已连接");

    let conn = shutdown.child_token();

    let writer = {
        let conn = conn.clone();
        let shutdown = shutdown.clone();
        let label = label.clone();
        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = conn.cancelled() => break,
                    message = queue.recv() => message,
                };
                let Some(message) = message else {
                    break;
                };
                match tokio::time::timeout(live::WRITE_TIMEOUT, sink.send_text(message)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!(viewer = %label, error = %e, "写入失败，断开连接");
                        break;
                    }
                    Err(_) => {
                        warn!(viewer = %label, "写入超时，断开连接");
                        break;
                    }
                }
            }

            let (code, reason) = if shutdown.is_cancelled() {
                (CLOSE_GOING_AWAY, "server shutting down")
            } else {
                (CLOSE_NORMAL, "connection closed")
            };
            let _ = sink.close(code, reason).await;
            conn.cancel();
        })
    };

    loop {
        tokio::select! {
            _ = conn.cancelled() => break,
            frame = stream.next_frame() => match frame {
                Some(Ok(())) => {}
                Some(Err(e)) => {
                    debug!(viewer = %label, error = %e, "读取失败");
                    break;
                }
                None => break,
            },
        }
    }
    conn.cancel();

    if let Err(e) = writer.await {
        warn!(viewer = %label, error = %e, "写循环异常退出");
    }
    hub.unregister(id).await;
    debug!(viewer = %label, "观看者已断开");
}
