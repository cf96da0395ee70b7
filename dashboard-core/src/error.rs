use thiserror::Error;

pub type Result<T> = std::result::Result<T, DashError>;

#[derive(Error, Debug)]
pub enum DashError {
    #[error("记录不存在: {0}")]
    NotFound(String),

    #[error("外部命令执行失败: {message}, 输出: {output}")]
    Execution { message: String, output: String },

    #[error("无效的定时表达式 '{expression}': {reason}")]
    InvalidSchedule { expression: String, reason: String },

    #[error("持久化错误: {0}")]
    Persistence(String),

    #[error("操作超时: {0}")]
    Timeout(String),

    #[error("实时推送中心已关闭")]
    HubClosed,

    #[error("传输错误: {0}")]
    Transport(String),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("配置解析错误: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("任务执行错误: {0}")]
    Join(#[from] tokio::task::JoinError),
}

// 为DuckDB错误实现From trait
impl From<duckdb::Error> for DashError {
    fn from(err: duckdb::Error) -> Self {
        DashError::Persistence(err.to_string())
    }
}

impl DashError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn execution(message: impl Into<String>, output: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
            output: output.into(),
        }
    }

    pub fn invalid_schedule(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSchedule {
            expression: expression.into(),
            reason: reason.into(),
        }
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// 是否为“记录不存在”错误
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
