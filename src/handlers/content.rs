//! 内容生成处理器
//!
//! 唯一依赖不透明生成能力的处理器。简报来自从句（引号优先），生成的
//! 正文装进 ContentGenerated 信封；从句点名某个任务时再把正文追加到该
//! 任务页面。生成失败与工作区失败都收敛为错误信封。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::core::RequestContext;
use crate::handlers::{
    find_unique_task, parse, ActionType, AnnotatedQuery, Handler, HandlerKind, HandoffEnvelope,
};
use crate::llm::ContentGenerator;
use crate::workspace::WorkspaceApi;

pub struct ContentGeneratorHandler {
    generator: Arc<dyn ContentGenerator>,
    workspace: Arc<dyn WorkspaceApi>,
}

impl ContentGeneratorHandler {
    pub fn new(generator: Arc<dyn ContentGenerator>, workspace: Arc<dyn WorkspaceApi>) -> Self {
        Self { generator, workspace }
    }
}

/// 简报：引号内容优先，否则去掉指令动词后的剩余从句
fn brief_from_clause(clause: &str) -> Option<String> {
    if let Some(quoted) = parse::extract_quoted(clause) {
        return Some(quoted);
    }
    let stripped = clause.trim_start_matches(|c: char| !c.is_alphabetic());
    let lower = stripped.to_lowercase();
    for prefix in ["generate", "write", "draft", "create content for", "напиши", "yaz"] {
        if lower.starts_with(prefix) {
            let rest: String = stripped.chars().skip(prefix.chars().count()).collect();
            let rest = rest.trim();
            if rest.len() > 3 {
                return Some(rest.to_string());
            }
        }
    }
    None
}

#[async_trait]
impl Handler for ContentGeneratorHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::ContentGenerator
    }

    async fn handle(&self, query: &AnnotatedQuery, ctx: &RequestContext) -> HandoffEnvelope {
        let clause = query
            .clause_for(HandlerKind::ContentGenerator)
            .unwrap_or_default();

        let Some(brief) = brief_from_clause(&clause) else {
            return HandoffEnvelope::error(
                ActionType::ContentGenerated,
                query.language,
                query.full.clone(),
                "Missing Brief",
                "Please describe what content to generate.",
            );
        };

        let content = match self.generator.generate(&brief).await {
            Ok(content) => content,
            Err(e) => {
                tracing::error!("Content generation failed: {}", e);
                return HandoffEnvelope::error(
                    ActionType::ContentGenerated,
                    query.language,
                    query.full.clone(),
                    "Generation Failed",
                    &e.to_string(),
                );
            }
        };

        // 第二段引号点名任务时，把正文追加到对应页面
        let mut page_id = None;
        if let Some(title) = parse::extract_all_quoted(&clause).get(1).cloned() {
            let task = match find_unique_task(
                self.workspace.as_ref(),
                &ctx.database_id,
                &title,
                ActionType::ContentGenerated,
                query,
            )
            .await
            {
                Ok(task) => task,
                Err(envelope) => return envelope,
            };
            if let Err(e) = self.workspace.append_page_content(&task.id, &content).await {
                tracing::error!("Appending generated content failed: {}", e);
                return HandoffEnvelope::error(
                    ActionType::ContentGenerated,
                    query.language,
                    query.full.clone(),
                    "Workspace Error",
                    &e.to_string(),
                );
            }
            page_id = Some(task.id);
        }

        HandoffEnvelope::success(
            ActionType::ContentGenerated,
            query.language,
            query.full.clone(),
            json!({
                "title": brief,
                "content": content,
                "page_id": page_id,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockGenerator;
    use crate::workspace::MockWorkspace;
    use chrono::NaiveDate;

    fn ctx() -> RequestContext {
        RequestContext::new(
            "t1",
            "u1",
            "db",
            NaiveDate::from_ymd_opt(2025, 9, 19).unwrap(),
        )
    }

    #[tokio::test]
    async fn generated_content_lands_in_the_envelope() {
        let handler = ContentGeneratorHandler::new(
            Arc::new(MockGenerator::new()),
            Arc::new(MockWorkspace::new()),
        );
        let query = AnnotatedQuery::parse(
            "(language='en') Generate an onboarding checklist [Content_Generator_Agent]",
        )
        .unwrap();

        let envelope = handler.handle(&query, &ctx()).await;
        assert!(!envelope.is_error());
        assert!(envelope.tool_output["content"]
            .as_str()
            .unwrap()
            .contains("onboarding checklist"));
        assert!(envelope.tool_output["page_id"].is_null());
    }

    #[tokio::test]
    async fn generator_failure_becomes_an_error_envelope() {
        let handler = ContentGeneratorHandler::new(
            Arc::new(MockGenerator::failing()),
            Arc::new(MockWorkspace::new()),
        );
        let query = AnnotatedQuery::parse(
            "(language='en') Generate an onboarding checklist [Content_Generator_Agent]",
        )
        .unwrap();

        let envelope = handler.handle(&query, &ctx()).await;
        assert_eq!(envelope.error_kind(), Some("Generation Failed"));
    }
}
