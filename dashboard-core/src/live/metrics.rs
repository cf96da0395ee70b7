use crate::config::AppConfig;
use crate::process::run_tool;
use crate::{DashError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::producer::MetricsSource;

/// 单次采集的上限
const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(10);

/// 通过 mongosh 执行的 serverStatus 摘要脚本
const SERVER_STATUS_SCRIPT: &str = r#"const s = db.adminCommand({ serverStatus: 1 });
print(EJSON.stringify({
  host: s.host,
  version: s.version,
  uptime: s.uptime,
  connections: s.connections,
  opcounters: s.opcounters,
  mem: s.mem,
  network: { bytesIn: s.network.bytesIn, bytesOut: s.network.bytesOut, numRequests: s.network.numRequests }
}, { relaxed: true }));"#;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Connections {
    pub current: i64,
    pub available: i64,
    pub total_created: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Opcounters {
    pub insert: i64,
    pub query: i64,
    pub update: i64,
    pub delete: i64,
    pub getmore: i64,
    pub command: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Memory {
    pub resident: i64,
    pub r#virtual: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Network {
    pub bytes_in: i64,
    pub bytes_out: i64,
    pub num_requests: i64,
}

/// 推送给观看者的服务器状态快照
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerStatus {
    pub host: String,
    pub version: String,
    pub uptime: f64,
    pub connections: Connections,
    pub opcounters: Opcounters,
    pub mem: Memory,
    pub network: Network,
}

impl ServerStatus {
    /// 解析 mongosh 输出：取最后一行非空 JSON
    pub fn parse(stdout: &str) -> Result<Self> {
        let line = stdout
            .lines()
            .map(str::trim)
            .rfind(|line| !line.is_empty())
            .ok_or_else(|| DashError::execution("mongosh 没有输出", ""))?;
        Ok(serde_json::from_str(line)?)
    }
}

/// 基于 mongosh 的指标来源
#[derive(Debug, Clone)]
pub struct ServerStatusSource {
    mongosh_path: String,
    mongo_uri: String,
}

impl ServerStatusSource {
    pub fn new(mongosh_path: impl Into<String>, mongo_uri: impl Into<String>) -> Self {
        Self {
            mongosh_path: mongosh_path.into(),
            mongo_uri: mongo_uri.into(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(&config.backup.mongosh_path, &config.mongodb.uri)
    }
}

impl MetricsSource for ServerStatusSource {
    type Snapshot = ServerStatus;

    async fn snapshot(&self, cancel: &CancellationToken) -> Result<ServerStatus> {
        let args = [
            self.mongo_uri.as_str(),
            "--quiet",
            "--eval",
            SERVER_STATUS_SCRIPT,
        ];
        let output = run_tool(&self.mongosh_path, args, SNAPSHOT_TIMEOUT, cancel).await?;
        ServerStatus::parse(&output.stdout)
    }
}
