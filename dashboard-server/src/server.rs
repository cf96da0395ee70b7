use axum::extract::State;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use dashboard_core::db::DuckDbManager;
use dashboard_core::health::{ProbeStatus, Readiness};
use dashboard_core::live::{Hub, ViewerSink, ViewerStream, serve_viewer};
use dashboard_core::{DashError, Result};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::api::backup_routes;
use crate::app::DashboardBackups;

/// 路由共享状态
#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub readiness: Readiness,
    pub store: DuckDbManager,
    pub backups: Arc<DashboardBackups>,
    /// 手动备份未指定数据库时使用
    pub default_database: String,
    /// 进程级关闭信号，所有 WebSocket 会话都会观察它
    pub shutdown: CancellationToken,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/livez", get(livez))
        .route("/readyz", get(readyz))
        .route("/ws", get(ws_upgrade))
        .merge(backup_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn probe_response(status: ProbeStatus, detail: serde_json::Value) -> Response {
    let code = if status.is_ok() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(json!({ "status": status, "detail": detail }))).into_response()
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({
        "status": ProbeStatus::Ok,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn livez(State(state): State<AppState>) -> Response {
    probe_response(state.readiness.liveness(), json!({}))
}

async fn readyz(State(state): State<AppState>) -> Response {
    let status = state.readiness.readiness();
    if !status.is_ok() {
        return probe_response(status, json!({}));
    }

    match state.store.ping().await {
        Ok(()) => probe_response(
            ProbeStatus::Ok,
            json!({ "store": "ok", "viewers": state.hub.live_count() }),
        ),
        Err(e) => {
            warn!(error = %e, "状态库不可用");
            probe_response(ProbeStatus::NotReady, json!({ "store": e.to_string() }))
        }
    }
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| async move {
        let (sink, stream) = socket.split();
        serve_viewer(
            &state.hub,
            SocketSink(sink),
            SocketStream(stream),
            &state.shutdown,
        )
        .await;
    })
}

/// axum WebSocket 写端
struct SocketSink(SplitSink<WebSocket, Message>);

impl ViewerSink for SocketSink {
    async fn send_text(&mut self, text: Arc<str>) -> Result<()> {
        self.0
            .send(Message::Text(text.as_ref().into()))
            .await
            .map_err(|e| DashError::transport(e.to_string()))
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<()> {
        let frame = CloseFrame {
            code,
            reason: reason.into(),
        };
        self.0
            .send(Message::Close(Some(frame)))
            .await
            .map_err(|e| DashError::transport(e.to_string()))?;
        self.0
            .close()
            .await
            .map_err(|e| DashError::transport(e.to_string()))
    }
}

/// axum WebSocket 读端，只关心断开
struct SocketStream(SplitStream<WebSocket>);

impl ViewerStream for SocketStream {
    async fn next_frame(&mut self) -> Option<Result<()>> {
        match self.0.next().await? {
            Ok(Message::Close(_)) => None,
            Ok(_) => Some(Ok(())),
            Err(e) => Some(Err(DashError::transport(e.to_string()))),
        }
    }
}
