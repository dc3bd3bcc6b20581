//! 评论处理器
//!
//! 两个方向：在任务上新增评论（强制追加署名行），或读取任务的评论。
//! 新增评论写法约定为两段引号：先评论文本、后任务名。任务的被指派人
//! 不是评论者时触发通知。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::core::RequestContext;
use crate::directory::DirectoryResolver;
use crate::handlers::{
    caller_identity, find_unique_task, parse, referenced_task_name, ActionType, AnnotatedQuery,
    Handler, HandlerKind, HandoffEnvelope,
};
use crate::notify::SideEffectDispatcher;
use crate::workspace::WorkspaceApi;

pub struct CommentHandler {
    workspace: Arc<dyn WorkspaceApi>,
    resolver: Arc<DirectoryResolver>,
    dispatcher: Arc<SideEffectDispatcher>,
}

impl CommentHandler {
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

fn is_read_request(clause: &str) -> bool {
    let lower = clause.to_lowercase();
    lower.contains("show") || lower.contains("read") || lower.contains("retrieve")
        || lower.contains("what are") || lower.contains("покажи") || lower.contains("göstər")
}

/// 署名行，从解析出的身份派生，调用方不能伪造
fn signed(text: &str, commenter: &str) -> String {
    format!("{}\n\n__________\nCommented by {}", text, commenter)
}

#[async_trait]
impl Handler for CommentHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Comment
    }

    async fn handle(&self, query: &AnnotatedQuery, ctx: &RequestContext) -> HandoffEnvelope {
        let clause = query.clause_for(HandlerKind::Comment).unwrap_or_default();
        let quoted = parse::extract_all_quoted(&clause);

        if is_read_request(&clause) {
            let title = match quoted
                .into_iter()
                .next()
                .or_else(|| referenced_task_name(&clause, ctx))
            {
                Some(title) => title,
                None => {
                    return HandoffEnvelope::error(
                        ActionType::CommentsRetrieved,
                        query.language,
                        query.full.clone(),
                        "Missing Task Name",
                        "Please name the task whose comments you want, in quotes.",
                    );
                }
            };
            let task = match find_unique_task(
                self.workspace.as_ref(),
                &ctx.database_id,
                &title,
                ActionType::CommentsRetrieved,
                query,
            )
            .await
            {
                Ok(task) => task,
                Err(envelope) => return envelope,
            };
            return match self.workspace.list_comments(&task.id).await {
                Ok(comments) => HandoffEnvelope::success(
                    ActionType::CommentsRetrieved,
                    query.language,
                    query.full.clone(),
                    json!({
                        "task_name": task.name,
                        "count": comments.len(),
                        "comments": comments
                            .iter()
                            .map(|c| json!({ "author": c.author, "text": c.text }))
                            .collect::<Vec<_>>(),
                    }),
                ),
                Err(e) => {
                    tracing::error!("Comment listing failed: {}", e);
                    HandoffEnvelope::error(
                        ActionType::CommentsRetrieved,
                        query.language,
                        query.full.clone(),
                        "Workspace Error",
                        &e.to_string(),
                    )
                }
            };
        }

        // 新增评论：第一段引号是评论文本，第二段是任务名；第二段缺失时
        // 允许 "that task" 指代回退到线程里最近创建的任务
        let (text, title) = match (quoted.first(), quoted.get(1)) {
            (Some(text), Some(title)) => (text.clone(), title.clone()),
            (Some(text), None) => match referenced_task_name(&clause, ctx) {
                Some(title) => (text.clone(), title),
                None => {
                    return HandoffEnvelope::error(
                        ActionType::CommentAdded,
                        query.language,
                        query.full.clone(),
                        "Missing Task Name",
                        "Please name the task to comment on, in quotes.",
                    );
                }
            },
            _ => {
                return HandoffEnvelope::error(
                    ActionType::CommentAdded,
                    query.language,
                    query.full.clone(),
                    "Missing Comment",
                    "Please provide the comment text, in quotes.",
                );
            }
        };

        let actor = match caller_identity(&self.resolver, ctx, ActionType::CommentAdded, query).await
        {
            Ok(identity) => identity,
            Err(envelope) => return envelope,
        };

        let task = match find_unique_task(
            self.workspace.as_ref(),
            &ctx.database_id,
            &title,
            ActionType::CommentAdded,
            query,
        )
        .await
        {
            Ok(task) => task,
            Err(envelope) => return envelope,
        };

        let comment = match self
            .workspace
            .add_comment(&task.id, &signed(&text, &actor.display_name))
            .await
        {
            Ok(comment) => comment,
            Err(e) => {
                tracing::error!("Comment creation failed: {}", e);
                return HandoffEnvelope::error(
                    ActionType::CommentAdded,
                    query.language,
                    query.full.clone(),
                    "Workspace Error",
                    &e.to_string(),
                );
            }
        };

        if let Some(assignee_id) = task.assignee.as_deref() {
            if assignee_id != actor.canonical_id {
                if let Ok(Some(target)) = self.resolver.identity(assignee_id).await {
                    let title = format!("New comment on: {}", task.name);
                    let body = format!(
                        "*{}* commented on *{}*:\n> {}",
                        actor.display_name, task.name, text
                    );
                    self.dispatcher
                        .dispatch(&actor, &target, "comment", &title, &body)
                        .await;
                }
            }
        }

        HandoffEnvelope::success(
            ActionType::CommentAdded,
            query.language,
            query.full.clone(),
            json!({
                "task_name": task.name,
                "page_id": task.id,
                "comment_id": comment.id,
                "comment": text,
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

    async fn fixture() -> (CommentHandler, Arc<MockWorkspace>, Arc<ChatStore>) {
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
            status: "In Progress".to_string(),
            due_date: NaiveDate::from_ymd_opt(2025, 9, 19),
            priority: "High".to_string(),
            created_by: Some("u1".to_string()),
            assignee: Some("u2".to_string()),
            url: None,
        });
        let resolver = Arc::new(DirectoryResolver::new(store.clone() as Arc<dyn DirectoryStore>));
        let dispatcher = Arc::new(SideEffectDispatcher::new(
            store.clone(),
            Arc::new(MockGateway::new()),
        ));
        (
            CommentHandler::new(workspace.clone(), resolver, dispatcher),
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
    async fn comment_is_signed_and_assignee_is_notified() {
        let (handler, workspace, store) = fixture().await;
        let query = AnnotatedQuery::parse(
            "(language='en') Add a comment 'Looks good to me' on 'Review the Q3 report' [Comment_Agent]",
        )
        .unwrap();

        let envelope = handler.handle(&query, &ctx()).await;
        assert!(!envelope.is_error());
        assert_eq!(envelope.action_type, ActionType::CommentAdded);

        let comments = workspace.comments.lock().unwrap();
        assert!(comments[0].1.text.ends_with("Commented by Aboo Fainaz"));
        drop(comments);

        assert_eq!(store.notifications_for("u2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn pronoun_reference_comments_on_the_cached_task() {
        let (handler, _, _) = fixture().await;
        let query = AnnotatedQuery::parse(
            "(language='en') Add a comment 'Done deal' on that task [Comment_Agent]",
        )
        .unwrap();
        let ctx = ctx().with_recent_tasks(vec![TaskRef {
            task_id: "task-1".to_string(),
            task_name: "Review the Q3 report".to_string(),
        }]);

        let envelope = handler.handle(&query, &ctx).await;
        assert!(!envelope.is_error());
        assert_eq!(envelope.tool_output["task_name"], "Review the Q3 report");
    }

    #[tokio::test]
    async fn missing_comment_text_is_rejected_before_any_call() {
        let (handler, workspace, _) = fixture().await;
        let query = AnnotatedQuery::parse(
            "(language='en') Add a comment on the report task [Comment_Agent]",
        )
        .unwrap();

        let envelope = handler.handle(&query, &ctx()).await;
        assert_eq!(envelope.error_kind(), Some("Missing Comment"));
        assert_eq!(workspace.mutations(), 0);
    }

    #[tokio::test]
    async fn reading_comments_returns_them_all() {
        let (handler, workspace, _) = fixture().await;
        workspace.add_comment("task-1", "First note").await.unwrap();
        let query = AnnotatedQuery::parse(
            "(language='en') Show comments on 'Review the Q3 report' [Comment_Agent]",
        )
        .unwrap();

        let envelope = handler.handle(&query, &ctx()).await;
        assert_eq!(envelope.action_type, ActionType::CommentsRetrieved);
        assert_eq!(envelope.tool_output["count"], 1);
    }
}
