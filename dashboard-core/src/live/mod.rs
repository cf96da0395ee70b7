//! 实时指标分发
//!
//! ```text
//! MetricsBroadcaster ──broadcast──► Hub ──事件队列──► HubRunner ──每个观看者一个有界队列──► serve_viewer
//! ```
//!
//! 慢消费者在队列写满时被直接断开，推送方永远不被阻塞。

mod hub;
mod message;
mod metrics;
mod producer;
mod viewer;

pub use hub::{Hub, HubRunner};
pub use message::BroadcastMessage;
pub use metrics::{ServerStatus, ServerStatusSource};
pub use producer::{MetricsBroadcaster, MetricsSource};
pub use viewer::{
    CLOSE_GOING_AWAY, CLOSE_NORMAL, LiveViewer, ViewerId, ViewerSink, ViewerStream, serve_viewer,
};
