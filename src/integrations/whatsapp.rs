//! WhatsApp Cloud API 集成
//!
//! 通过 Webhook 接收消息，交给编排器跑完整回合后把回复发回去。
//! 只处理 text 类型消息；发件人手机号经目录表反查规范身份，线程 ID
//! 由通道名 + 发件人派生，同一发件人的消息落进同一线程。

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router as AxumRouter,
};
use serde::Deserialize;

use crate::core::{Orchestrator, RequestContext};
use crate::messaging::MessagingGateway;
use crate::store::ChatStore;

/// WhatsApp 服务状态
pub struct WhatsappState {
    pub orchestrator: Arc<Orchestrator>,
    pub store: Arc<ChatStore>,
    pub gateway: Arc<dyn MessagingGateway>,
    pub verify_token: String,
    pub default_database_id: String,
}

/// Webhook 验证参数
#[derive(Debug, Deserialize)]
pub struct WebhookVerifyQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// WhatsApp Webhook 请求体
#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    pub object: Option<String>,
    pub entry: Option<Vec<WebhookEntry>>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEntry {
    pub changes: Option<Vec<WebhookChange>>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookChange {
    pub value: Option<WebhookValue>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookValue {
    pub messages: Option<Vec<WebhookMessage>>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookMessage {
    pub from: String,
    #[serde(rename = "type")]
    pub msg_type: Option<String>,
    pub text: Option<WebhookText>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookText {
    pub body: String,
}

/// 创建 WhatsApp 路由
pub fn create_router(state: Arc<WhatsappState>) -> AxumRouter {
    AxumRouter::new()
        .route("/webhook", get(webhook_verify).post(webhook_receive))
        .route("/health", get(|| async { "OK" }))
        .with_state(state)
}

/// GET /webhook - Meta 验证 Webhook
async fn webhook_verify(
    State(state): State<Arc<WhatsappState>>,
    Query(query): Query<WebhookVerifyQuery>,
) -> Result<String, StatusCode> {
    if query.mode.as_deref() == Some("subscribe")
        && query.verify_token.as_deref() == Some(&state.verify_token)
    {
        Ok(query.challenge.unwrap_or_default())
    } else {
        Err(StatusCode::FORBIDDEN)
    }
}

/// POST /webhook - 接收 WhatsApp 消息
async fn webhook_receive(
    State(state): State<Arc<WhatsappState>>,
    Json(payload): Json<WebhookPayload>,
) -> StatusCode {
    if payload.object.as_deref() != Some("whatsapp_business_account") {
        return StatusCode::OK;
    }

    let Some(entries) = payload.entry else {
        return StatusCode::OK;
    };

    for entry in entries {
        let Some(changes) = entry.changes else { continue };
        for change in changes {
            let Some(value) = change.value else { continue };
            let Some(messages) = value.messages else { continue };

            for msg in messages {
                if msg.msg_type.as_deref() != Some("text") {
                    continue;
                }
                let Some(text) = msg.text else { continue };
                handle_inbound(&state, &msg.from, &text.body).await;
            }
        }
    }

    StatusCode::OK
}

async fn handle_inbound(state: &WhatsappState, from: &str, body: &str) {
    // 发件人手机号 → 规范身份；不在目录里的发件人用手机号本身当 ID，
    // 回合照常跑，处理器侧会在需要身份的地方给出明确的错误信封
    let contact = format!("+{}", from.trim_start_matches('+'));
    let user_id = match state.store.identity_by_contact(&contact).await {
        Ok(Some(identity)) => identity.canonical_id,
        Ok(None) => from.to_string(),
        Err(e) => {
            tracing::error!("Directory lookup for {} failed: {}", contact, e);
            from.to_string()
        }
    };

    let ctx = RequestContext::new(
        format!("wa-{}", from),
        user_id,
        state.default_database_id.clone(),
        chrono::Utc::now().date_naive(),
    );

    let result = state.orchestrator.run_turn(body, &ctx, "whatsapp").await;

    if let Err(e) = state.gateway.send_text(from, &result.reply).await {
        tracing::error!("Failed to send WhatsApp reply: {}", e);
    }
}
