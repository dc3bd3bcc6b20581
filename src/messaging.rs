//! 外发消息网关
//!
//! 通知分发器与服务端回复通过这里触达用户。WhatsApp Cloud API 对单条
//! 消息有长度上限，超限时按 `(part/total) ` 前缀分段发送；任何一段失败
//! 即放弃剩余分段（收到一半编号消息比静默丢失更可诊断）。

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use crate::core::AgentError;

/// 单条消息安全上限（字符数）
const MAX_BODY_CHARS: usize = 4070;
/// `(part/total) ` 前缀的预留空间
const PART_PREFIX_RESERVE: usize = 15;
/// 分段之间的发送间隔
const INTER_CHUNK_DELAY: Duration = Duration::from_millis(750);

/// 消息网关能力面：把一段文本送达一个联系地址
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    async fn send_text(&self, to: &str, body: &str) -> Result<(), AgentError>;
}

/// 把正文切成带 `(part/total) ` 前缀的分段；不超限时原样返回单段
pub fn chunk_body(body: &str) -> Vec<String> {
    let chars: Vec<char> = body.chars().collect();
    if chars.len() <= MAX_BODY_CHARS {
        return vec![body.to_string()];
    }

    let chunk_size = MAX_BODY_CHARS - PART_PREFIX_RESERVE;
    let pieces: Vec<String> = chars
        .chunks(chunk_size)
        .map(|c| c.iter().collect())
        .collect();
    let total = pieces.len();
    pieces
        .into_iter()
        .enumerate()
        .map(|(i, piece)| format!("({}/{}) {}", i + 1, total, piece))
        .collect()
}

/// WhatsApp Cloud API 发送请求体
#[derive(Debug, Serialize)]
struct SendMessageRequest {
    messaging_product: String,
    to: String,
    #[serde(rename = "type")]
    msg_type: String,
    text: SendMessageText,
}

#[derive(Debug, Serialize)]
struct SendMessageText {
    body: String,
}

/// WhatsApp Cloud API 网关
pub struct WhatsAppGateway {
    client: reqwest::Client,
    access_token: String,
    phone_number_id: String,
}

impl WhatsAppGateway {
    pub fn new(access_token: &str, phone_number_id: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            access_token: access_token.to_string(),
            phone_number_id: phone_number_id.to_string(),
        }
    }

    async fn send_chunk(&self, to: &str, body: String) -> Result<(), AgentError> {
        let url = format!(
            "https://graph.facebook.com/v18.0/{}/messages",
            self.phone_number_id
        );
        let req = SendMessageRequest {
            messaging_product: "whatsapp".to_string(),
            to: to.replace('+', ""),
            msg_type: "text".to_string(),
            text: SendMessageText { body },
        };

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&req)
            .send()
            .await
            .map_err(|e| AgentError::Messaging(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(AgentError::Messaging(format!("{}: {}", status, text)));
        }
        Ok(())
    }
}

#[async_trait]
impl MessagingGateway for WhatsAppGateway {
    async fn send_text(&self, to: &str, body: &str) -> Result<(), AgentError> {
        let chunks = chunk_body(body);
        let multi = chunks.len() > 1;
        for (i, chunk) in chunks.into_iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(INTER_CHUNK_DELAY).await;
            }
            // 一段失败即放弃剩余分段
            self.send_chunk(to, chunk).await.map_err(|e| {
                tracing::error!("WhatsApp send failed at chunk {}: {}", i + 1, e);
                e
            })?;
        }
        if multi {
            tracing::info!("Sent multi-part WhatsApp message to {}", to);
        }
        Ok(())
    }
}

/// 测试用网关：记录全部发送，可配置为失败
#[derive(Default)]
pub struct MockGateway {
    pub sent: std::sync::Mutex<Vec<(String, String)>>,
    pub fail: bool,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            sent: std::sync::Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().expect("sent lock").len()
    }
}

#[async_trait]
impl MessagingGateway for MockGateway {
    async fn send_text(&self, to: &str, body: &str) -> Result<(), AgentError> {
        if self.fail {
            return Err(AgentError::Messaging("mock gateway down".to_string()));
        }
        self.sent
            .lock()
            .expect("sent lock")
            .push((to.to_string(), body.to_string()));
        Ok(())
    }
}
