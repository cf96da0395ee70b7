use crate::constants::{backup, config, live, server};
use crate::error::{DashError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 应用配置结构
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppInfo,
    pub server: ServerConfig,
    pub mongodb: MongoConfig,
    pub store: StoreConfig,
    pub backup: BackupConfig,
    pub live: LiveConfig,
    pub log: LogConfig,
}

/// 应用信息
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AppInfo {
    pub name: String,
    pub version: String,
    pub environment: String,
}

/// HTTP 服务配置
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
    pub drain_delay_secs: u64,
}

/// MongoDB 连接配置
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
}

/// 备份记录状态库配置
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    pub path: String,
}

/// 备份相关配置
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct BackupConfig {
    pub output_dir: String,
    pub mongodump_path: String,
    pub mongorestore_path: String,
    pub mongosh_path: String,
    pub retention_days: u32,
    pub timeout_secs: u64,
    pub daily_enabled: bool,
}

/// 实时推送配置
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LiveConfig {
    pub metrics_interval_ms: u64,
}

/// 日志配置
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub format: String,
}

impl Default for AppInfo {
    fn default() -> Self {
        Self {
            name: "MongoDB Dashboard".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            environment: "development".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: server::DEFAULT_HOST.to_string(),
            port: server::DEFAULT_PORT,
            shutdown_timeout_secs: server::DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            drain_delay_secs: server::DEFAULT_DRAIN_DELAY_SECS,
        }
    }
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            uri: config::DEFAULT_MONGODB_URI.to_string(),
            database: config::DEFAULT_MONGODB_DATABASE.to_string(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: config::DEFAULT_STORE_PATH.to_string(),
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            output_dir: backup::DEFAULT_OUTPUT_DIR.to_string(),
            mongodump_path: backup::DEFAULT_MONGODUMP_PATH.to_string(),
            mongorestore_path: backup::DEFAULT_MONGORESTORE_PATH.to_string(),
            mongosh_path: config::DEFAULT_MONGOSH_PATH.to_string(),
            retention_days: backup::DEFAULT_RETENTION_DAYS,
            timeout_secs: backup::DEFAULT_TIMEOUT_SECS,
            daily_enabled: true,
        }
    }
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            metrics_interval_ms: live::DEFAULT_METRICS_INTERVAL_MS,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl AppConfig {
    /// 智能查找并加载配置文件
    /// 按优先级查找：config.toml -> dashboard.toml -> .dashboard.toml
    pub fn find_and_load_config() -> Result<Self> {
        for config_file in &config::CONFIG_FILE_CANDIDATES {
            if Path::new(config_file).exists() {
                tracing::info!("找到配置文件: {}", config_file);
                return Self::load(config_file);
            }
        }

        // 如果没找到配置文件，创建默认配置
        tracing::warn!("未找到配置文件，创建默认配置: {}", config::DEFAULT_CONFIG_FILE);
        let default_config = Self::default();
        default_config.save_to_file(config::DEFAULT_CONFIG_FILE)?;
        default_config.finish(std::env::vars())
    }

    /// 加载指定配置文件，并应用环境变量覆盖与校验
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load_from_file(path)?.finish(std::env::vars())
    }

    /// 从指定文件加载配置（不含环境变量覆盖）
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)?;
        let config: AppConfig = toml::from_str(&content)?;

        Ok(config)
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = self.to_toml_with_comments();
        fs::write(&path, content)?;
        Ok(())
    }

    fn finish(mut self, vars: impl IntoIterator<Item = (String, String)>) -> Result<Self> {
        self.apply_env_overrides(vars)?;
        self.validate()?;
        Ok(self)
    }

    /// 应用环境变量覆盖
    pub fn apply_env_overrides(
        &mut self,
        vars: impl IntoIterator<Item = (String, String)>,
    ) -> Result<()> {
        for (key, value) in vars {
            match key.as_str() {
                "MONGODB_URI" => self.mongodb.uri = value,
                "MONGODB_DATABASE" => self.mongodb.database = value,
                "STORE_PATH" => self.store.path = value,
                "BACKUP_OUTPUT_DIR" => self.backup.output_dir = value,
                "BACKUP_MONGODUMP_PATH" => self.backup.mongodump_path = value,
                "BACKUP_RETENTION_DAYS" => {
                    self.backup.retention_days = value.parse().map_err(|_| {
                        DashError::config(format!("BACKUP_RETENTION_DAYS 不是有效数字: {value}"))
                    })?
                }
                "ENVIRONMENT" => self.app.environment = value,
                "HOST" => self.server.host = value,
                "PORT" => {
                    self.server.port = value
                        .parse()
                        .map_err(|_| DashError::config(format!("PORT 不是有效端口: {value}")))?
                }
                "LOG_LEVEL" => self.log.level = value,
                "LOG_FORMAT" => self.log.format = value,
                _ => {}
            }
        }
        Ok(())
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.mongodb.uri.trim().is_empty() {
            return Err(DashError::config("mongodb.uri 不能为空"));
        }
        if self.server.port == 0 {
            return Err(DashError::config("server.port 必须大于 0"));
        }
        if self.backup.timeout_secs == 0 {
            return Err(DashError::config("backup.timeout_secs 必须大于 0"));
        }
        if self.live.metrics_interval_ms == 0 {
            return Err(DashError::config("live.metrics_interval_ms 必须大于 0"));
        }
        if !matches!(self.log.format.to_ascii_lowercase().as_str(), "text" | "json") {
            return Err(DashError::config(format!(
                "log.format 只支持 text 或 json: {}",
                self.log.format
            )));
        }
        Ok(())
    }

    /// 生成带注释的TOML配置
    fn to_toml_with_comments(&self) -> String {
        const TEMPLATE: &str = include_str!("../templates/config.toml.template");

        TEMPLATE
            .replace("{app_name}", &self.app.name)
            .replace("{environment}", &self.app.environment)
            .replace("{host}", &self.server.host)
            .replace("{port}", &self.server.port.to_string())
            .replace(
                "{shutdown_timeout_secs}",
                &self.server.shutdown_timeout_secs.to_string(),
            )
            .replace("{drain_delay_secs}", &self.server.drain_delay_secs.to_string())
            .replace("{mongodb_uri}", &self.mongodb.uri)
            .replace("{mongodb_database}", &self.mongodb.database)
            .replace("{store_path}", &self.store.path)
            .replace("{output_dir}", &self.backup.output_dir)
            .replace("{mongodump_path}", &self.backup.mongodump_path)
            .replace("{mongorestore_path}", &self.backup.mongorestore_path)
            .replace("{mongosh_path}", &self.backup.mongosh_path)
            .replace("{retention_days}", &self.backup.retention_days.to_string())
            .replace("{timeout_secs}", &self.backup.timeout_secs.to_string())
            .replace("{daily_enabled}", &self.backup.daily_enabled.to_string())
            .replace(
                "{metrics_interval_ms}",
                &self.live.metrics_interval_ms.to_string(),
            )
            .replace("{log_level}", &self.log.level)
            .replace("{log_format}", &self.log.format)
    }

    /// 监听地址
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// 获取备份目录路径
    pub fn get_backup_dir(&self) -> PathBuf {
        PathBuf::from(&self.backup.output_dir)
    }

    pub fn backup_timeout(&self) -> Duration {
        Duration::from_secs(self.backup.timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }

    /// 关闭时等待进行中备份的上限
    ///
    /// 备份与清理各自有超时，这里在两者之和上再留一个关闭步骤的余量。
    pub fn job_drain_timeout(&self) -> Duration {
        self.backup_timeout() + backup::CLEANUP_TIMEOUT + self.shutdown_timeout()
    }

    pub fn drain_delay(&self) -> Duration {
        Duration::from_secs(self.server.drain_delay_secs)
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_millis(self.live.metrics_interval_ms)
    }
}
