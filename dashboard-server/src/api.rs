use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use dashboard_core::DashError;
use dashboard_core::db::{BackupRecord, BackupStatus, TriggerOrigin};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::task::JoinError;
use tracing::{error, warn};

use crate::server::AppState;

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 100;

/// 备份管理接口，挂在 `/api/backups` 下
///
/// 服务运行时状态库被独占打开，一次性命令行无法再打开同一个文件，
/// 这组接口是运行中管理备份的入口。
pub fn backup_routes() -> Router<AppState> {
    Router::new()
        .route("/api/backups", get(list_backups).post(create_backup))
        .route("/api/backups/{id}", get(get_backup).delete(delete_backup))
        .route("/api/backups/{id}/restore", post(restore_backup))
}

/// 接口错误，按错误类型映射状态码
pub struct ApiError(DashError);

impl From<DashError> for ApiError {
    fn from(e: DashError) -> Self {
        Self(e)
    }
}

impl From<JoinError> for ApiError {
    fn from(e: JoinError) -> Self {
        Self(DashError::from(e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            DashError::NotFound(_) => StatusCode::NOT_FOUND,
            DashError::InvalidSchedule { .. } | DashError::Config(_) => StatusCode::BAD_REQUEST,
            _ => {
                error!(error = %self.0, "备份接口出错");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Serialize)]
struct BackupView {
    id: String,
    database_name: String,
    file_path: String,
    size_bytes: i64,
    size_mb: f64,
    started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    completed_at: Option<DateTime<Utc>>,
    status: BackupStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
    triggered_by: TriggerOrigin,
}

impl From<BackupRecord> for BackupView {
    fn from(record: BackupRecord) -> Self {
        let size_mb = record.size_mb();
        Self {
            id: record.id,
            database_name: record.database_name,
            file_path: record.file_path,
            size_bytes: record.size_bytes,
            size_mb,
            started_at: record.started_at,
            completed_at: record.completed_at,
            status: record.status,
            error_message: record.error_message,
            triggered_by: record.triggered_by,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    limit: Option<String>,
}

/// 非法或越界的 limit 回落到默认值
fn list_limit(raw: Option<&str>) -> usize {
    raw.and_then(|l| l.parse::<usize>().ok())
        .filter(|l| (1..=MAX_LIST_LIMIT).contains(l))
        .unwrap_or(DEFAULT_LIST_LIMIT)
}

#[derive(Debug, Default, Deserialize)]
struct CreateBackupRequest {
    #[serde(default)]
    database_name: String,
}

async fn list_backups(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<BackupView>>> {
    let limit = list_limit(query.limit.as_deref());
    let backups = state.backups.list_backups(limit).await?;
    Ok(Json(backups.into_iter().map(BackupView::from).collect()))
}

/// 立即备份；请求体缺失或无法解析时备份默认数据库
async fn create_backup(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<BackupView>)> {
    let request: CreateBackupRequest = serde_json::from_slice(&body).unwrap_or_default();
    let database = match request.database_name.trim() {
        "" => state.default_database.as_str(),
        name => name,
    };

    // 备份在后台任务里执行，客户端断开也会把记录写到终态
    let record = state.backups.spawn_backup(database).await??;
    if record.status == BackupStatus::Failed {
        warn!(backup_id = %record.id, "手动备份失败");
    }
    Ok((StatusCode::CREATED, Json(record.into())))
}

async fn get_backup(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<BackupView>> {
    match state.backups.get_backup(&id).await? {
        Some(record) => Ok(Json(record.into())),
        None => Err(DashError::not_found(format!("备份 {id}")).into()),
    }
}

async fn delete_backup(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.backups.delete_backup(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn restore_backup(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.backups.spawn_restore(&id).await??;
    Ok(Json(json!({ "message": "restore completed" })))
}
