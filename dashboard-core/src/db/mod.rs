// DuckDB数据库模块
//
// 这个模块提供备份记录的持久化。DuckDB 连接只由一个 Actor 任务持有，
// 所有读写通过消息队列串行化，对外是可克隆的异步句柄。
//
// 主要组件：
// - DuckDbManager: 高级API接口，实现 BackupStore
// - DuckDbActor: 内部Actor，处理实际的数据库操作
// - 数据模型和消息定义

mod actor;
mod manager;
mod messages;
mod models;

// 公开核心接口
pub use manager::DuckDbManager;
pub use models::{BackupRecord, BackupStatus, TriggerOrigin};
