//! 任务分析处理器
//!
//! 只读的负载分析：一次查询后在本地聚合（总量、逾期、按状态 / 按优先级
//! 计数）。可选按人过滤，人名照例走歧义子协议。

use std::collections::BTreeMap;
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

pub struct TaskAnalysisHandler {
    workspace: Arc<dyn WorkspaceApi>,
    resolver: Arc<DirectoryResolver>,
}

impl TaskAnalysisHandler {
    pub fn new(workspace: Arc<dyn WorkspaceApi>, resolver: Arc<DirectoryResolver>) -> Self {
        Self { workspace, resolver }
    }
}

#[async_trait]
impl Handler for TaskAnalysisHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::TaskAnalysis
    }

    async fn handle(&self, query: &AnnotatedQuery, ctx: &RequestContext) -> HandoffEnvelope {
        let clause = query
            .clause_for(HandlerKind::TaskAnalysis)
            .unwrap_or_default();

        let mut filter = TaskFilter::default();
        let mut subject = "everyone".to_string();
        if clause.to_lowercase().contains("my ") {
            filter.assignee_id = Some(ctx.user_id.clone());
            subject = "you".to_string();
        } else if let Some(name) = parse::person_name(&clause) {
            match resolve_person(&self.resolver, &name, ActionType::TaskAnalysis, query).await {
                NameResolution::Identity(identity) => {
                    filter.assignee_id = Some(identity.canonical_id);
                    subject = identity.display_name;
                }
                NameResolution::Envelope(envelope) => return envelope,
            }
        }

        let tasks = match self.workspace.query_tasks(&ctx.database_id, &filter).await {
            Ok(tasks) => tasks,
            Err(e) => {
                tracing::error!("Task query for analysis failed: {}", e);
                return HandoffEnvelope::error(
                    ActionType::TaskAnalysis,
                    query.language,
                    query.full.clone(),
                    "Workspace Error",
                    &e.to_string(),
                );
            }
        };

        let mut by_status: BTreeMap<String, usize> = BTreeMap::new();
        let mut by_priority: BTreeMap<String, usize> = BTreeMap::new();
        let mut overdue = 0usize;
        for task in &tasks {
            *by_status.entry(task.status.clone()).or_default() += 1;
            *by_priority.entry(task.priority.clone()).or_default() += 1;
            if task.status != "Done" && task.due_date.map_or(false, |d| d < ctx.today) {
                overdue += 1;
            }
        }

        HandoffEnvelope::success(
            ActionType::TaskAnalysis,
            query.language,
            query.full.clone(),
            json!({
                "subject": subject,
                "total": tasks.len(),
                "overdue": overdue,
                "by_status": by_status,
                "by_priority": by_priority,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::DirectoryStore;
    use crate::store::ChatStore;
    use crate::workspace::{MockWorkspace, Task};
    use chrono::NaiveDate;

    fn task(id: &str, status: &str, priority: &str, due: (i32, u32, u32)) -> Task {
        Task {
            id: id.to_string(),
            name: format!("Task {}", id),
            status: status.to_string(),
            due_date: NaiveDate::from_ymd_opt(due.0, due.1, due.2),
            priority: priority.to_string(),
            created_by: Some("u1".to_string()),
            assignee: Some("u1".to_string()),
            url: None,
        }
    }

    #[tokio::test]
    async fn aggregates_count_overdue_excluding_done() {
        let store = Arc::new(ChatStore::in_memory().await.unwrap());
        let workspace = Arc::new(MockWorkspace::new());
        workspace.push_task(task("1", "Not started", "High", (2025, 9, 1)));
        workspace.push_task(task("2", "Done", "High", (2025, 9, 1)));
        workspace.push_task(task("3", "In Progress", "Low", (2025, 9, 30)));
        let resolver = Arc::new(DirectoryResolver::new(store as Arc<dyn DirectoryStore>));
        let handler = TaskAnalysisHandler::new(workspace, resolver);

        let ctx = RequestContext::new(
            "t1",
            "u1",
            "db",
            NaiveDate::from_ymd_opt(2025, 9, 19).unwrap(),
        );
        let query = AnnotatedQuery::parse(
            "(language='en') Analyze the current workload [Task_Analysis_Agent]",
        )
        .unwrap();

        let envelope = handler.handle(&query, &ctx).await;
        assert_eq!(envelope.tool_output["total"], 3);
        assert_eq!(envelope.tool_output["overdue"], 1);
        assert_eq!(envelope.tool_output["by_priority"]["High"], 2);
        assert_eq!(envelope.tool_output["by_status"]["Done"], 1);
    }
}
