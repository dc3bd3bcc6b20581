//! Mock 内容生成器（测试用，无需 API）

use async_trait::async_trait;

use crate::core::AgentError;
use crate::llm::ContentGenerator;

/// 回显简报为固定结构的正文；fail 时模拟生成端不可用
#[derive(Debug, Default)]
pub struct MockGenerator {
    pub fail: bool,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self { fail: true }
    }
}

#[async_trait]
impl ContentGenerator for MockGenerator {
    async fn generate(&self, brief: &str) -> Result<String, AgentError> {
        if self.fail {
            return Err(AgentError::Generator("mock generator down".to_string()));
        }
        Ok(format!("# {}\n\n- [ ] Draft\n- [ ] Review\n- [ ] Publish", brief))
    }
}
