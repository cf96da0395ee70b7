/// 备份相关常量
pub mod backup {
    use std::time::Duration;

    /// 默认备份输出目录
    pub const DEFAULT_OUTPUT_DIR: &str = "./backups";

    /// 默认导出工具
    pub const DEFAULT_MONGODUMP_PATH: &str = "mongodump";

    /// 默认恢复工具
    pub const DEFAULT_MONGORESTORE_PATH: &str = "mongorestore";

    /// 备份归档扩展名
    pub const ARCHIVE_EXTENSION: &str = "gz";

    /// 归档文件名中的时间戳格式
    pub const ARCHIVE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

    /// 默认保留天数
    pub const DEFAULT_RETENTION_DAYS: u32 = 30;

    /// 单次备份的默认超时（秒）
    pub const DEFAULT_TIMEOUT_SECS: u64 = 30 * 60;

    /// 每日备份任务名前缀
    pub const DAILY_JOB_PREFIX: &str = "daily-";

    /// 每日备份触发表达式：每天 00:00:00
    pub const DAILY_CRON: &str = "0 0 0 * * *";

    /// 清理时最多扫描的记录数
    pub const CLEANUP_SCAN_LIMIT: usize = 1000;

    /// 清理任务整体超时
    pub const CLEANUP_TIMEOUT: Duration = Duration::from_secs(5 * 60);
}

/// 实时推送相关常量
pub mod live {
    use std::time::Duration;

    /// 每个观看者的发送队列容量
    pub const VIEWER_QUEUE_CAPACITY: usize = 256;

    /// Hub 事件队列容量
    pub const HUB_QUEUE_CAPACITY: usize = 256;

    /// 单次写入的超时
    pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

    /// 默认指标推送间隔（毫秒）
    pub const DEFAULT_METRICS_INTERVAL_MS: u64 = 2000;

    /// 指标消息类型
    pub const METRICS_MESSAGE_TYPE: &str = "metrics";

    /// 观看者标签长度
    pub const VIEWER_LABEL_LEN: usize = 8;
}

/// 服务相关常量
pub mod server {
    /// 默认监听地址
    pub const DEFAULT_HOST: &str = "0.0.0.0";

    /// 默认监听端口
    pub const DEFAULT_PORT: u16 = 8080;

    /// 默认关闭超时（秒）
    pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 15;

    /// 默认摘流等待（秒）
    pub const DEFAULT_DRAIN_DELAY_SECS: u64 = 5;
}

/// 配置文件相关常量
pub mod config {
    /// 按优先级查找的配置文件名
    pub const CONFIG_FILE_CANDIDATES: [&str; 3] =
        ["config.toml", "dashboard.toml", ".dashboard.toml"];

    /// 默认配置文件名
    pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

    /// 默认状态库路径
    pub const DEFAULT_STORE_PATH: &str = "./data/dashboard.duckdb";

    /// 默认 MongoDB 连接串
    pub const DEFAULT_MONGODB_URI: &str = "mongodb://localhost:27017";

    /// 默认数据库
    pub const DEFAULT_MONGODB_DATABASE: &str = "admin";

    /// 默认 mongosh 路径
    pub const DEFAULT_MONGOSH_PATH: &str = "mongosh";
}
