//! 任务创建处理器
//!
//! 校验任务名（拒绝泛型占位名）→ 解析被指派人 → 一次 create 调用 →
//! 产出 TaskCreation 信封。缺省属性：截止今天、优先级 High、状态
//! Not started、被指派人为创建者本人。跨人指派触发副作用分发。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::core::RequestContext;
use crate::directory::DirectoryResolver;
use crate::handlers::{
    caller_identity, parse, resolve_person, ActionType, AnnotatedQuery, Handler, HandlerKind,
    HandoffEnvelope, NameResolution,
};
use crate::notify::{assignee_display, assignment_body, SideEffectDispatcher};
use crate::workspace::{NewTask, WorkspaceApi};

pub struct TaskCreationHandler {
    workspace: Arc<dyn WorkspaceApi>,
    resolver: Arc<DirectoryResolver>,
    dispatcher: Arc<SideEffectDispatcher>,
}

impl TaskCreationHandler {
    pub fn new(
        workspace: Arc<dyn WorkspaceApi>,
        resolver: Arc<DirectoryResolver>,
        dispatcher: Arc<SideEffectDispatcher>,
    ) -> Self {
        Self {
            workspace,
            resolver,
            dispatcher,
        }
    }
}

#[async_trait]
impl Handler for TaskCreationHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::TaskCreation
    }

    async fn handle(&self, query: &AnnotatedQuery, ctx: &RequestContext) -> HandoffEnvelope {
        let clause = query
            .clause_for(HandlerKind::TaskCreation)
            .unwrap_or_default();

        // 校验先于任何外部调用
        let task_name = match parse::task_name_from_clause(&clause) {
            Some(name) if !parse::is_vague_task_name(&name) => name,
            _ => {
                return HandoffEnvelope::error(
                    ActionType::TaskCreation,
                    query.language,
                    query.full.clone(),
                    "Invalid Task Name",
                    "Please provide a specific task name.",
                );
            }
        };

        let actor = match caller_identity(&self.resolver, ctx, ActionType::TaskCreation, query).await
        {
            Ok(identity) => identity,
            Err(envelope) => return envelope,
        };

        let assignee = match parse::person_name(&clause) {
            Some(name) => {
                match resolve_person(&self.resolver, &name, ActionType::TaskCreation, query).await {
                    NameResolution::Identity(identity) => identity,
                    NameResolution::Envelope(envelope) => return envelope,
                }
            }
            None => actor.clone(),
        };

        let due_date = parse::date_hint(&clause, ctx.today).unwrap_or(ctx.today);
        let priority = parse::priority_keyword(&clause).unwrap_or("High").to_string();
        let status = parse::status_keyword(&clause).unwrap_or("Not started").to_string();

        let new_task = NewTask {
            name: task_name.clone(),
            creator_id: actor.canonical_id.clone(),
            assignee_id: assignee.canonical_id.clone(),
            due_date,
            priority: priority.clone(),
            status: status.clone(),
            content: None,
        };

        let task = match self.workspace.create_task(&ctx.database_id, new_task).await {
            Ok(task) => task,
            Err(e) => {
                tracing::error!("Task creation failed: {}", e);
                return HandoffEnvelope::error(
                    ActionType::TaskCreation,
                    query.language,
                    query.full.clone(),
                    "Workspace Error",
                    &e.to_string(),
                );
            }
        };

        // 跨人指派：通知 + 外部消息在主动作成功之后发出
        if assignee.canonical_id != actor.canonical_id {
            let body = assignment_body(
                query.language,
                &actor.display_name,
                &task.name,
                &due_date.to_string(),
                &priority,
                &status,
            );
            self.dispatcher
                .dispatch(&actor, &assignee, "assignment", &body, &body)
                .await;
        }

        HandoffEnvelope::success(
            ActionType::TaskCreation,
            query.language,
            query.full.clone(),
            json!({
                "task_name": task.name,
                "status": status,
                "due_date": due_date.to_string(),
                "priority": priority,
                "page_id": task.id,
                "assignee": assignee_display(query.language, &actor.canonical_id, &assignee),
            }),
        )
    }
}
