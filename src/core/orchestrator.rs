//! 回合编排器
//!
//! 一条入站消息端到端走完：建线程 → 持久化入站回合 → 注入线程任务
//! 上下文 → 路由 → 修复
//! 搁浅的移交 → 任务创建的确定性覆写 → 持久化出站回合。回合内严格
//! 顺序执行，单线程内无并行。回合级失败被顶层捕获并作为可见的助手
//! 错误消息落库，绝不让调用方崩溃。

use std::sync::Arc;

use crate::core::{AgentError, RequestContext};
use crate::formatter;
use crate::handlers::{ActionType, AnnotatedQuery, HandlerRegistry, HandoffEnvelope};
use crate::router::{RouteOutcome, Router};
use crate::store::{ChatStore, StoredMessage};

/// 修复循环上限：有界重试，不是无界轮询
const MAX_REPAIR_ITERATIONS: usize = 2;

/// 一轮对话的产出：最终回复 + 全量有序历史
#[derive(Debug)]
pub struct TurnResult {
    pub reply: String,
    pub history: Vec<StoredMessage>,
}

pub struct Orchestrator {
    store: Arc<ChatStore>,
    router: Router,
    handlers: Arc<HandlerRegistry>,
}

impl Orchestrator {
    pub fn new(store: Arc<ChatStore>, router: Router, handlers: Arc<HandlerRegistry>) -> Self {
        Self {
            store,
            router,
            handlers,
        }
    }

    /// 单轮入口；任何阶段的失败都收敛为可见的错误回复
    pub async fn run_turn(
        &self,
        message: &str,
        ctx: &RequestContext,
        channel: &str,
    ) -> TurnResult {
        match self.try_turn(message, ctx, channel).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("Turn failed: {}", e);
                let reply =
                    "Sorry, something went wrong while processing your message. Please try again."
                        .to_string();
                // 已落库的回合不回滚，错误本身也要在线程里可见
                let _ = self
                    .store
                    .append_message(&ctx.thread_id, "assistant", &reply)
                    .await;
                let history = self
                    .store
                    .load_messages(&ctx.thread_id)
                    .await
                    .unwrap_or_default();
                TurnResult { reply, history }
            }
        }
    }

    async fn try_turn(
        &self,
        message: &str,
        ctx: &RequestContext,
        channel: &str,
    ) -> Result<TurnResult, AgentError> {
        let title: String = message.chars().take(60).collect();
        self.store
            .ensure_thread(&ctx.thread_id, &ctx.user_id, &title, channel)
            .await?;

        // 入站回合落库前的计数决定问候的详略
        let first_turn = self.store.message_count(&ctx.thread_id).await? == 0;
        self.store
            .append_message(&ctx.thread_id, "user", message)
            .await?;

        // 线程里已创建的任务注入本轮上下文，处理器据此解析"那个任务"指代
        let ctx = ctx
            .clone()
            .with_recent_tasks(self.store.thread_tasks(&ctx.thread_id).await?);
        let ctx = &ctx;

        let reply = match self.router.route(message, ctx, first_turn).await {
            RouteOutcome::Refusal(text) => text.to_string(),
            RouteOutcome::Greeting(text) => text,
            RouteOutcome::Delegated { envelope, .. } => {
                let text = if envelope.action_type == ActionType::TaskCreation
                    && !envelope.is_error()
                {
                    self.creation_override(&envelope, ctx).await?
                } else {
                    formatter::format_reply(&envelope)
                };
                self.reconcile(text, ctx).await
            }
        };

        self.store
            .append_message(&ctx.thread_id, "assistant", &reply)
            .await?;
        let history = self.store.load_messages(&ctx.thread_id).await?;
        Ok(TurnResult { reply, history })
    }

    /// 搁浅移交的修复循环
    ///
    /// 两种搁浅形态：回复文本是裸注释路由串（委派没有执行），则提取
    /// 标签直接调用处理器；回复文本是原始信封线格式（处理器没有移交
    /// 给格式化器），则直接调用格式化器。每次修复后重新检视，最多两轮。
    async fn reconcile(&self, mut text: String, ctx: &RequestContext) -> String {
        for _ in 0..MAX_REPAIR_ITERATIONS {
            if let Some(query) = stalled_route(&text) {
                if let Some(handler) = query.first_tag().and_then(|k| self.handlers.get(k)) {
                    tracing::warn!("Repairing unexecuted delegation: {}", query.full);
                    let envelope = handler.handle(&query, ctx).await;
                    text = formatter::format_reply(&envelope);
                    continue;
                }
            }
            if HandoffEnvelope::looks_like_wire(&text) {
                match HandoffEnvelope::parse_wire(&text) {
                    Ok(envelope) => {
                        tracing::warn!("Repairing unformatted envelope");
                        text = formatter::format_reply(&envelope);
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!("Envelope-shaped reply failed to parse: {}", e);
                    }
                }
            }
            break;
        }
        text
    }

    /// 任务创建的确定性覆写：回写线程任务缓存，并用结构化摘要取代
    /// 格式化器文本（唯一享受此待遇的动作类别）
    async fn creation_override(
        &self,
        envelope: &HandoffEnvelope,
        ctx: &RequestContext,
    ) -> Result<String, AgentError> {
        let output = &envelope.tool_output;
        let task_name = output
            .get("task_name")
            .and_then(|v| v.as_str())
            .unwrap_or("N/A");
        let page_id = output.get("page_id").and_then(|v| v.as_str());

        if let Some(page_id) = page_id {
            // INSERT OR IGNORE：重复创建同名任务不会撑爆缓存
            self.store
                .remember_task(&ctx.thread_id, page_id, task_name)
                .await?;
        }

        let field = |key: &str| {
            output
                .get(key)
                .and_then(|v| v.as_str())
                .unwrap_or("N/A")
                .to_string()
        };
        let mut text = format!(
            "Task '{}' has been created successfully. Here are the details:\n\n\
             - **Task Name**: {}\n\
             - **Task Page ID**: {}\n\
             - **Assigned to**: {}\n\
             - **Status**: {}\n\
             - **Priority**: {}\n\
             - **Due Date**: {}",
            task_name,
            task_name,
            page_id.unwrap_or("N/A"),
            field("assignee"),
            field("status"),
            field("priority"),
            field("due_date"),
        );

        // 覆写取代了格式化器文本，多意图消息的续作问题要补回来
        if let Some(question) = formatter::continuation_question(envelope) {
            text.push_str("\n\n");
            text.push_str(&question);
        }
        Ok(text)
    }
}

/// 裸注释路由串：以语言前缀开头且带至少一个处理器标签
fn stalled_route(text: &str) -> Option<AnnotatedQuery> {
    let trimmed = text.trim();
    if !trimmed.starts_with("(language='") {
        return None;
    }
    AnnotatedQuery::parse(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{DirectoryResolver, DirectoryStore, Identity};
    use crate::handlers::{
        create::TaskCreationHandler, modify::TaskModificationHandler,
        retrieve::TaskRetrievalHandler, Language,
    };
    use crate::messaging::MockGateway;
    use crate::notify::SideEffectDispatcher;
    use crate::workspace::MockWorkspace;
    use chrono::NaiveDate;
    use serde_json::json;

    async fn fixture() -> (Orchestrator, Arc<ChatStore>, Arc<MockWorkspace>) {
        let store = Arc::new(ChatStore::in_memory().await.unwrap());
        store
            .upsert_identity(&Identity {
                canonical_id: "u1".to_string(),
                display_name: "Aboo Fainaz".to_string(),
                contact_address: "+994u1".to_string(),
            })
            .await
            .unwrap();
        let workspace = Arc::new(MockWorkspace::new());
        let resolver = Arc::new(DirectoryResolver::new(
            store.clone() as Arc<dyn DirectoryStore>
        ));
        let dispatcher = Arc::new(SideEffectDispatcher::new(
            store.clone(),
            Arc::new(MockGateway::new()),
        ));

        let mut registry = HandlerRegistry::new();
        registry.register(TaskCreationHandler::new(
            workspace.clone(),
            resolver.clone(),
            dispatcher.clone(),
        ));
        registry.register(TaskModificationHandler::new(
            workspace.clone(),
            resolver.clone(),
            dispatcher,
        ));
        registry.register(TaskRetrievalHandler::new(
            workspace.clone(),
            resolver.clone(),
        ));
        let handlers = Arc::new(registry);

        let router = Router::new(handlers.clone(), resolver);
        (
            Orchestrator::new(store.clone(), router, handlers),
            store,
            workspace,
        )
    }

    fn ctx() -> RequestContext {
        RequestContext::new(
            "t1",
            "u1",
            "db",
            NaiveDate::from_ymd_opt(2025, 9, 19).unwrap(),
        )
    }

    #[tokio::test]
    async fn refusal_is_persisted_like_any_other_turn() {
        let (orchestrator, store, _) = fixture().await;

        let result = orchestrator.run_turn("今天的任务是什么", &ctx(), "web").await;
        assert!(result.reply.starts_with("I can only communicate"));
        assert_eq!(store.message_count("t1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn creation_gets_the_deterministic_summary_and_cache_entry() {
        let (orchestrator, store, _) = fixture().await;

        let result = orchestrator
            .run_turn("Create a task 'Ship the beta'", &ctx(), "web")
            .await;
        assert!(result
            .reply
            .starts_with("Task 'Ship the beta' has been created successfully."));
        assert!(result.reply.contains("**Task Page ID**"));

        let cached = store.thread_tasks("t1").await.unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].task_name, "Ship the beta");
    }

    #[tokio::test]
    async fn that_task_pronoun_resolves_to_the_cached_task() {
        let (orchestrator, _, workspace) = fixture().await;

        orchestrator
            .run_turn("Create a task 'Fix the login bug'", &ctx(), "web")
            .await;
        let result = orchestrator
            .run_turn("Mark that task as done", &ctx(), "web")
            .await;

        assert!(!result.reply.contains("Please name the task"));
        let tasks = workspace.tasks.lock().unwrap();
        assert_eq!(tasks[0].name, "Fix the login bug");
        assert_eq!(tasks[0].status, "Done");
    }

    #[tokio::test]
    async fn multi_intent_creation_keeps_the_continuation_question() {
        let (orchestrator, _, _) = fixture().await;

        let result = orchestrator
            .run_turn(
                "Create a task 'Fix the login bug' and then show my tasks",
                &ctx(),
                "web",
            )
            .await;

        assert!(result
            .reply
            .starts_with("Task 'Fix the login bug' has been created successfully."));
        assert!(result.reply.contains("Shall I now proceed with"));
    }

    #[tokio::test]
    async fn raw_envelope_wire_is_repaired_into_prose() {
        let (orchestrator, _, _) = fixture().await;

        let envelope = HandoffEnvelope::success(
            ActionType::CommentAdded,
            Language::En,
            "(language='en') add a comment 'LGTM' on 'Ship the beta' [Comment_Agent]",
            json!({ "comment": "LGTM", "task_name": "Ship the beta" }),
        );
        let repaired = orchestrator.reconcile(envelope.to_wire(), &ctx()).await;
        assert!(repaired.starts_with("Done! I've added the comment \"LGTM\""));
    }

    #[tokio::test]
    async fn bare_routing_string_is_repaired_by_direct_invocation() {
        let (orchestrator, _, _) = fixture().await;

        let stalled = "(language='en') Show my tasks [Task_Retrieval_Agent]".to_string();
        let repaired = orchestrator.reconcile(stalled, &ctx()).await;
        assert!(!repaired.contains("[Task_Retrieval_Agent]"));
        assert!(repaired.contains("anything else"));
    }

    #[tokio::test]
    async fn first_and_second_greetings_differ() {
        let (orchestrator, _, _) = fixture().await;

        let first = orchestrator.run_turn("Hi", &ctx(), "web").await;
        assert!(first.reply.contains("Task Management Agent"));

        let second = orchestrator.run_turn("Hello!", &ctx(), "web").await;
        assert!(!second.reply.contains("Task Management Agent"));
        assert_eq!(second.history.len(), 4);
    }
}
