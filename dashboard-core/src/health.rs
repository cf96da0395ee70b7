use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// 探针结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStatus {
    Ok,
    NotReady,
    ShuttingDown,
}

impl ProbeStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, ProbeStatus::Ok)
    }
}

/// 就绪/存活状态，由关闭协调器在关闭开始时翻转
#[derive(Debug, Clone)]
pub struct Readiness {
    ready: Arc<AtomicBool>,
    shutting_down: Arc<AtomicBool>,
}

impl Default for Readiness {
    fn default() -> Self {
        Self::new()
    }
}

impl Readiness {
    /// 初始为就绪
    pub fn new() -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(true)),
            shutting_down: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst) && !self.is_shutting_down()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// 负载均衡器从此不再路由新流量
    pub fn mark_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    pub fn begin_shutdown(&self) {
        self.mark_not_ready();
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    pub fn liveness(&self) -> ProbeStatus {
        if self.is_shutting_down() {
            ProbeStatus::ShuttingDown
        } else {
            ProbeStatus::Ok
        }
    }

    pub fn readiness(&self) -> ProbeStatus {
        if self.is_shutting_down() {
            ProbeStatus::ShuttingDown
        } else if !self.is_ready() {
            ProbeStatus::NotReady
        } else {
            ProbeStatus::Ok
        }
    }
}
