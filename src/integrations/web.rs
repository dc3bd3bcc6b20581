//! Web 聊天接口
//!
//! 面向网页端的同步聊天路由：请求体自带线程与用户标识，回合跑完后
//! 直接在响应里返回回复与该线程的完整消息历史。线程归档只翻标志，
//! 消息行保留。

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::post,
    Json, Router as AxumRouter,
};
use serde::{Deserialize, Serialize};

use crate::core::{Orchestrator, RequestContext};
use crate::store::{ChatStore, StoredMessage};

/// Web 聊天服务状态
pub struct WebState {
    pub orchestrator: Arc<Orchestrator>,
    pub store: Arc<ChatStore>,
    pub default_database_id: String,
}

/// POST /chat 请求体
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub thread_id: String,
    pub user_id: String,
    pub message: String,
    /// 未携带时使用配置里的默认任务库
    pub database_id: Option<String>,
}

/// POST /chat 响应体
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub reply: String,
    pub history: Vec<StoredMessage>,
}

/// 创建 Web 聊天路由
pub fn create_router(state: Arc<WebState>) -> AxumRouter {
    AxumRouter::new()
        .route("/chat", post(chat))
        .route("/chat/archive/:thread_id", post(archive_chat))
        .with_state(state)
}

/// POST /chat - 同步跑一个完整回合
async fn chat(
    State(state): State<Arc<WebState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, StatusCode> {
    if req.message.trim().is_empty() || req.user_id.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let database_id = req
        .database_id
        .unwrap_or_else(|| state.default_database_id.clone());
    let ctx = RequestContext::new(
        req.thread_id,
        req.user_id,
        database_id,
        chrono::Utc::now().date_naive(),
    );

    let result = state.orchestrator.run_turn(&req.message, &ctx, "web").await;
    Ok(Json(ChatResponse {
        reply: result.reply,
        history: result.history,
    }))
}

/// POST /chat/archive/:thread_id - 归档线程
async fn archive_chat(
    State(state): State<Arc<WebState>>,
    Path(thread_id): Path<String>,
) -> StatusCode {
    match state.store.archive_thread(&thread_id).await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            tracing::error!("Failed to archive thread {}: {}", thread_id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
