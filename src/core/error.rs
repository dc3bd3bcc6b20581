//! 编排层错误类型
//!
//! 仅覆盖基础设施故障（持久化 / 外部 API 传输）。校验失败与歧义澄清
//! 不是错误：它们以 HandoffEnvelope 值的形式正常返回（"never silent" 不变量）。

use thiserror::Error;

/// 一轮对话中可能出现的基础设施错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Workspace API error: {0}")]
    Workspace(String),

    #[error("Messaging gateway error: {0}")]
    Messaging(String),

    #[error("Content generator error: {0}")]
    Generator(String),

    #[error("Envelope parse error: {0}")]
    EnvelopeParse(String),
}
