//! 任务修改处理器
//!
//! 按标题找到唯一任务（引号缺失时 "that task" 指代回退到线程里最近创建
//! 的任务）→ 从从句提取属性变更（状态 / 截止日期 / 优先级 / 改派）→
//! 一次 update（或 archive）调用。零命中与多命中都是校验失败，绝不猜测
//! 任务。任务的被指派人不是发起者时触发变更通知。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::core::RequestContext;
use crate::directory::DirectoryResolver;
use crate::handlers::{
    caller_identity, find_unique_task, parse, referenced_task_name, resolve_person, ActionType,
    AnnotatedQuery, Handler, HandlerKind, HandoffEnvelope, NameResolution,
};
use crate::notify::SideEffectDispatcher;
use crate::workspace::{TaskPatch, WorkspaceApi};

pub struct TaskModificationHandler {
    workspace: Arc<dyn WorkspaceApi>,
    resolver: Arc<DirectoryResolver>,
    dispatcher: Arc<SideEffectDispatcher>,
}

impl TaskModificationHandler {
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

fn is_archive_request(clause: &str) -> bool {
    let lower = clause.to_lowercase();
    lower.contains("delete") || lower.contains("archive") || lower.contains("удали") || lower.contains("sil ")
}

#[async_trait]
impl Handler for TaskModificationHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::TaskModification
    }

    async fn handle(&self, query: &AnnotatedQuery, ctx: &RequestContext) -> HandoffEnvelope {
        let clause = query
            .clause_for(HandlerKind::TaskModification)
            .unwrap_or_default();

        // 引号任务名优先；"that task" 一类指代回退到线程里最近创建的任务
        let title = match parse::extract_quoted(&clause)
            .or_else(|| referenced_task_name(&clause, ctx))
        {
            Some(title) => title,
            None => {
                return HandoffEnvelope::error(
                    ActionType::TaskModification,
                    query.language,
                    query.full.clone(),
                    "Missing Task Name",
                    "Please name the task to modify, in quotes.",
                );
            }
        };

        let task = match find_unique_task(
            self.workspace.as_ref(),
            &ctx.database_id,
            &title,
            ActionType::TaskModification,
            query,
        )
        .await
        {
            Ok(task) => task,
            Err(envelope) => return envelope,
        };

        if is_archive_request(&clause) {
            return match self.workspace.archive(&task.id).await {
                Ok(()) => HandoffEnvelope::success(
                    ActionType::TaskModification,
                    query.language,
                    query.full.clone(),
                    json!({ "task_name": task.name, "page_id": task.id, "archived": true }),
                ),
                Err(e) => {
                    tracing::error!("Task archive failed: {}", e);
                    HandoffEnvelope::error(
                        ActionType::TaskModification,
                        query.language,
                        query.full.clone(),
                        "Workspace Error",
                        &e.to_string(),
                    )
                }
            };
        }

        let mut patch = TaskPatch {
            status: parse::status_keyword(&clause).map(String::from),
            due_date: parse::date_hint(&clause, ctx.today),
            priority: parse::priority_keyword(&clause).map(String::from),
            assignee_id: None,
        };

        // 改派：人名经歧义子协议，绝不猜测
        let mut new_assignee = None;
        if let Some(name) = parse::person_name(&clause) {
            match resolve_person(&self.resolver, &name, ActionType::TaskModification, query).await {
                NameResolution::Identity(identity) => {
                    patch.assignee_id = Some(identity.canonical_id.clone());
                    new_assignee = Some(identity);
                }
                NameResolution::Envelope(envelope) => return envelope,
            }
        }

        if patch.status.is_none()
            && patch.due_date.is_none()
            && patch.priority.is_none()
            && patch.assignee_id.is_none()
        {
            return HandoffEnvelope::error(
                ActionType::TaskModification,
                query.language,
                query.full.clone(),
                "Invalid Modification",
                "No recognizable property change was found in the request.",
            );
        }

        let updated = match self.workspace.update_properties(&task.id, &patch).await {
            Ok(updated) => updated,
            Err(e) => {
                tracing::error!("Task update failed: {}", e);
                return HandoffEnvelope::error(
                    ActionType::TaskModification,
                    query.language,
                    query.full.clone(),
                    "Workspace Error",
                    &e.to_string(),
                );
            }
        };

        // 受影响者 = 新被指派人（改派时）或任务当前被指派人
        if let Ok(actor) =
            caller_identity(&self.resolver, ctx, ActionType::TaskModification, query).await
        {
            let affected = match new_assignee {
                Some(identity) => Some(identity),
                None => match updated.assignee.as_deref() {
                    Some(id) => self.resolver.identity(id).await.ok().flatten(),
                    None => None,
                },
            };
            if let Some(target) = affected {
                let title = format!("Task updated: {}", updated.name);
                let body = format!(
                    "*{}* updated the task *{}*.\n> Status: *{}*\n> Due date: *{}*\n> Priority: *{}*",
                    actor.display_name,
                    updated.name,
                    updated.status,
                    updated
                        .due_date
                        .map(|d| d.to_string())
                        .unwrap_or_else(|| "N/A".to_string()),
                    updated.priority
                );
                self.dispatcher
                    .dispatch(&actor, &target, "update", &title, &body)
                    .await;
            }
        }

        HandoffEnvelope::success(
            ActionType::TaskModification,
            query.language,
            query.full.clone(),
            json!({
                "task_name": updated.name,
                "page_id": updated.id,
                "status": updated.status,
                "due_date": updated.due_date.map(|d| d.to_string()),
                "priority": updated.priority,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{DirectoryStore, Identity};
    use crate::messaging::MockGateway;
    use crate::store::{ChatStore, TaskRef};
    use crate::workspace::{MockWorkspace, Task};
    use chrono::NaiveDate;

    async fn fixture() -> (TaskModificationHandler, Arc<MockWorkspace>, Arc<ChatStore>) {
        let store = Arc::new(ChatStore::in_memory().await.unwrap());
        for (id, name) in [("u1", "Aboo Fainaz"), ("u2", "Shafraz")] {
            store
                .upsert_identity(&Identity {
                    canonical_id: id.to_string(),
                    display_name: name.to_string(),
                    contact_address: format!("+994{}", id),
                })
                .await
                .unwrap();
        }
        let workspace = Arc::new(MockWorkspace::new());
        workspace.push_task(Task {
            id: "task-1".to_string(),
            name: "Review the Q3 report".to_string(),
            status: "Not started".to_string(),
            due_date: NaiveDate::from_ymd_opt(2025, 9, 19),
            priority: "High".to_string(),
            created_by: Some("u1".to_string()),
            assignee: Some("u1".to_string()),
            url: None,
        });
        let resolver = Arc::new(DirectoryResolver::new(store.clone() as Arc<dyn DirectoryStore>));
        let dispatcher = Arc::new(SideEffectDispatcher::new(
            store.clone(),
            Arc::new(MockGateway::new()),
        ));
        (
            TaskModificationHandler::new(workspace.clone(), resolver, dispatcher),
            workspace,
            store,
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
    async fn status_change_updates_the_unique_match() {
        let (handler, workspace, store) = fixture().await;
        let query = AnnotatedQuery::parse(
            "(language='en') Mark 'Review the Q3 report' as done [Task_Modification_Agent]",
        )
        .unwrap();

        let envelope = handler.handle(&query, &ctx()).await;
        assert!(!envelope.is_error());
        assert_eq!(envelope.tool_output["status"], "Done");
        assert_eq!(workspace.mutations(), 1);
        // 自己任务的自我修改：没有通知
        assert!(store.notifications_for("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn pronoun_reference_falls_back_to_the_latest_cached_task() {
        let (handler, workspace, _) = fixture().await;
        let query = AnnotatedQuery::parse(
            "(language='en') Mark that task as done [Task_Modification_Agent]",
        )
        .unwrap();
        let ctx = ctx().with_recent_tasks(vec![TaskRef {
            task_id: "task-1".to_string(),
            task_name: "Review the Q3 report".to_string(),
        }]);

        let envelope = handler.handle(&query, &ctx).await;
        assert!(!envelope.is_error());
        assert_eq!(envelope.tool_output["status"], "Done");
        assert_eq!(workspace.mutations(), 1);
    }

    #[tokio::test]
    async fn pronoun_reference_without_cached_tasks_still_asks_for_the_name() {
        let (handler, workspace, _) = fixture().await;
        let query = AnnotatedQuery::parse(
            "(language='en') Mark that task as done [Task_Modification_Agent]",
        )
        .unwrap();

        let envelope = handler.handle(&query, &ctx()).await;
        assert_eq!(envelope.error_kind(), Some("Missing Task Name"));
        assert_eq!(workspace.mutations(), 0);
    }

    #[tokio::test]
    async fn unknown_task_is_a_validation_error() {
        let (handler, workspace, _) = fixture().await;
        let query = AnnotatedQuery::parse(
            "(language='en') Mark 'No such task' as done [Task_Modification_Agent]",
        )
        .unwrap();

        let envelope = handler.handle(&query, &ctx()).await;
        assert_eq!(envelope.error_kind(), Some("Task Not Found"));
        assert_eq!(workspace.mutations(), 0);
    }

    #[tokio::test]
    async fn reassignment_notifies_the_new_assignee() {
        let (handler, _, store) = fixture().await;
        let query = AnnotatedQuery::parse(
            "(language='en') Reassign 'Review the Q3 report' to Shafraz [Task_Modification_Agent]",
        )
        .unwrap();

        let envelope = handler.handle(&query, &ctx()).await;
        assert!(!envelope.is_error());
        assert_eq!(store.notifications_for("u2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn no_recognizable_change_is_rejected() {
        let (handler, workspace, _) = fixture().await;
        let query = AnnotatedQuery::parse(
            "(language='en') Do something with 'Review the Q3 report' [Task_Modification_Agent]",
        )
        .unwrap();

        let envelope = handler.handle(&query, &ctx()).await;
        assert_eq!(envelope.error_kind(), Some("Invalid Modification"));
        assert_eq!(workspace.mutations(), 0);
    }
}
