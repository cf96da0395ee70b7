//! 备份生命周期：外部工具执行、定时调度与编排服务

mod executor;
mod scheduler;
mod service;

pub use executor::{BackupOutcome, BackupRunner, MongoToolExecutor};
pub use scheduler::{JobHandler, JobScheduler, StopHandle, parse_schedule};
pub use service::{BackupOptions, BackupService, BackupStore};
