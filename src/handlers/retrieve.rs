//! 任务检索处理器
//!
//! 只读：从从句推出过滤器（被指派人 / 优先级 / 状态），一次查询，
//! 结果收窄后装进 TasksRetrieved 信封。空结果也是正常信封，由格式化
//! 器渲染固定的"没有找到"文案。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::core::RequestContext;
use crate::directory::DirectoryResolver;
use crate::handlers::{
    parse, resolve_person, ActionType, AnnotatedQuery, Handler, HandlerKind, HandoffEnvelope,
    NameResolution,
};
use crate::workspace::{TaskFilter, WorkspaceApi};

pub struct TaskRetrievalHandler {
    workspace: Arc<dyn WorkspaceApi>,
    resolver: Arc<DirectoryResolver>,
}

impl TaskRetrievalHandler {
    pub fn new(workspace: Arc<dyn WorkspaceApi>, resolver: Arc<DirectoryResolver>) -> Self {
        Self { workspace, resolver }
    }
}

fn is_my_tasks(clause: &str) -> bool {
    let lower = clause.to_lowercase();
    lower.contains("my ") || lower.contains("мои") || lower.contains("mənim")
}

#[async_trait]
impl Handler for TaskRetrievalHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::TaskRetrieval
    }

    async fn handle(&self, query: &AnnotatedQuery, ctx: &RequestContext) -> HandoffEnvelope {
        let clause = query
            .clause_for(HandlerKind::TaskRetrieval)
            .unwrap_or_default();

        let mut filter = TaskFilter {
            assignee_id: None,
            priority: parse::priority_keyword(&clause).map(String::from),
            status: parse::status_keyword(&clause).map(String::from),
        };

        if is_my_tasks(&clause) {
            filter.assignee_id = Some(ctx.user_id.clone());
        } else if let Some(name) = parse::person_name(&clause) {
            match resolve_person(&self.resolver, &name, ActionType::TasksRetrieved, query).await {
                NameResolution::Identity(identity) => {
                    filter.assignee_id = Some(identity.canonical_id)
                }
                NameResolution::Envelope(envelope) => return envelope,
            }
        }

        let tasks = match self.workspace.query_tasks(&ctx.database_id, &filter).await {
            Ok(tasks) => tasks,
            Err(e) => {
                tracing::error!("Task query failed: {}", e);
                return HandoffEnvelope::error(
                    ActionType::TasksRetrieved,
                    query.language,
                    query.full.clone(),
                    "Workspace Error",
                    &e.to_string(),
                );
            }
        };

        let results: Vec<_> = tasks
            .iter()
            .map(|t| {
                json!({
                    "id": t.id,
                    "name": t.name,
                    "status": t.status,
                    "due_date": t.due_date.map(|d| d.to_string()),
                    "priority": t.priority,
                    // 格式化器是信封的纯函数，逾期判定只能在这里做
                    "overdue": t.status != "Done"
                        && t.due_date.map_or(false, |d| d < ctx.today),
                })
            })
            .collect();

        HandoffEnvelope::success(
            ActionType::TasksRetrieved,
            query.language,
            query.full.clone(),
            json!({ "results": results, "count": results.len() }),
        )
    }
}
