//! 内容生成能力面
//!
//! 内容生成处理器唯一的不透明依赖：给一段简报，产出任务页面正文。
//! 生成文本从不直接作为整轮回复，始终装进信封由格式化器呈现。

pub mod mock;
pub mod openai;

use async_trait::async_trait;

use crate::core::AgentError;

pub use mock::MockGenerator;
pub use openai::OpenAiGenerator;

/// 内容生成器 trait：brief 进、富文本正文出
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(&self, brief: &str) -> Result<String, AgentError>;
}
