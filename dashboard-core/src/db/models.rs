use crate::{DashError, Result};
use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// 备份状态
///
/// `Pending -> Running -> Completed | Failed`，终态之后不再变更（只能删除）。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackupStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl BackupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupStatus::Pending => "pending",
            BackupStatus::Running => "running",
            BackupStatus::Completed => "completed",
            BackupStatus::Failed => "failed",
        }
    }

    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, BackupStatus::Completed | BackupStatus::Failed)
    }
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupStatus {
    type Err = DashError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(BackupStatus::Pending),
            "running" => Ok(BackupStatus::Running),
            "completed" => Ok(BackupStatus::Completed),
            "failed" => Ok(BackupStatus::Failed),
            other => Err(DashError::persistence(format!("未知的备份状态: {other}"))),
        }
    }
}

/// 备份触发来源
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TriggerOrigin {
    Manual,
    Scheduled,
}

impl TriggerOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerOrigin::Manual => "manual",
            TriggerOrigin::Scheduled => "scheduled",
        }
    }
}

impl fmt::Display for TriggerOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerOrigin {
    type Err = DashError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "manual" => Ok(TriggerOrigin::Manual),
            "scheduled" => Ok(TriggerOrigin::Scheduled),
            other => Err(DashError::persistence(format!("未知的触发来源: {other}"))),
        }
    }
}

/// 备份记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackupRecord {
    pub id: String,
    pub database_name: String,
    pub file_path: String,
    pub size_bytes: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: BackupStatus,
    pub error_message: Option<String>,
    pub triggered_by: TriggerOrigin,
}

impl BackupRecord {
    /// 创建一条进入 `running` 状态的新记录
    pub fn start(database_name: impl Into<String>, triggered_by: TriggerOrigin) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            database_name: database_name.into(),
            file_path: String::new(),
            size_bytes: 0,
            // DuckDB TIMESTAMP 只保留微秒
            started_at: Utc::now().trunc_subsecs(6),
            completed_at: None,
            status: BackupStatus::Running,
            error_message: None,
            triggered_by,
        }
    }

    pub fn size_mb(&self) -> f64 {
        self.size_bytes as f64 / (1024.0 * 1024.0)
    }
}

/// 数据库中读出的原始行
#[derive(Debug)]
pub(crate) struct BackupRow {
    pub id: String,
    pub database_name: String,
    pub file_path: String,
    pub size_bytes: i64,
    pub started_at: NaiveDateTime,
    pub completed_at: Option<NaiveDateTime>,
    pub status: String,
    pub error_message: Option<String>,
    pub triggered_by: String,
}

impl TryFrom<BackupRow> for BackupRecord {
    type Error = DashError;

    fn try_from(row: BackupRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            database_name: row.database_name,
            file_path: row.file_path,
            size_bytes: row.size_bytes,
            started_at: row.started_at.and_utc(),
            completed_at: row.completed_at.map(|t| t.and_utc()),
            status: row.status.parse()?,
            error_message: row.error_message,
            triggered_by: row.triggered_by.parse()?,
        })
    }
}
