use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// MongoDB Dashboard - 定时备份与实时指标推送服务
#[derive(Parser, Debug)]
#[command(name = "dashboard-server")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// 配置文件路径（默认按 config.toml、dashboard.toml、.dashboard.toml 顺序查找）
    #[arg(short, long, env = "DASHBOARD_CONFIG")]
    pub config: Option<PathBuf>,

    /// 详细输出
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// 除 `serve` 外的命令都会直接打开状态库文件。
/// `serve` 运行期间该文件被独占，这时请改用 `/api/backups` 接口。
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// 启动仪表盘服务（HTTP、WebSocket 推送与定时备份）
    Serve,
    /// 立即备份指定数据库
    Backup {
        /// 数据库名称
        database: String,
    },
    /// 列出最近的备份
    ListBackups {
        /// 最多显示的条数
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// 用指定备份恢复数据库（会覆盖现有数据）
    Restore {
        /// 备份 ID
        backup_id: String,
    },
    /// 删除备份文件与记录
    DeleteBackup {
        /// 备份 ID
        backup_id: String,
    },
    /// 显示定时备份任务
    Jobs,
}
