//! HTTP 任务工作区客户端
//!
//! 通过 REST 端点访问外部任务库。响应在这里立即收窄为最小字段集，
//! 原始负载不向上层泄漏。

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;

use crate::core::AgentError;
use crate::workspace::{
    Comment, NewTask, Task, TaskFilter, TaskPatch, WorkspaceApi, WorkspaceUser,
};

/// REST 客户端：base_url + Bearer token
pub struct HttpWorkspace {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

/// 工作区端的任务负载（反序列化后立即收窄为 Task）
#[derive(Debug, Deserialize)]
struct TaskPayload {
    id: String,
    name: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    due_date: Option<NaiveDate>,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    created_by: Option<String>,
    #[serde(default)]
    assignee: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

impl From<TaskPayload> for Task {
    fn from(p: TaskPayload) -> Self {
        Task {
            id: p.id,
            name: p.name,
            status: p.status.unwrap_or_else(|| "Not started".to_string()),
            due_date: p.due_date,
            priority: p.priority.unwrap_or_else(|| "High".to_string()),
            created_by: p.created_by,
            assignee: p.assignee,
            url: p.url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListPayload<T> {
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct UserPayload {
    id: String,
    name: String,
    #[serde(default)]
    email: Option<String>,
    /// "person" 或 "bot"
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

impl HttpWorkspace {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, AgentError> {
        let resp = self
            .client
            .post(self.url(path))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::Workspace(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(AgentError::Workspace(format!("{}: {}", status, text)));
        }
        resp.json::<T>()
            .await
            .map_err(|e| AgentError::Workspace(e.to_string()))
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, AgentError> {
        let resp = self
            .client
            .get(self.url(path))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| AgentError::Workspace(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(AgentError::Workspace(format!("{}: {}", status, text)));
        }
        resp.json::<T>()
            .await
            .map_err(|e| AgentError::Workspace(e.to_string()))
    }
}

#[async_trait]
impl WorkspaceApi for HttpWorkspace {
    async fn create_task(&self, database_id: &str, task: NewTask) -> Result<Task, AgentError> {
        let payload: TaskPayload = self
            .post_json(
                &format!("/v1/databases/{}/tasks", database_id),
                serde_json::to_value(&task).map_err(|e| AgentError::Workspace(e.to_string()))?,
            )
            .await?;
        Ok(payload.into())
    }

    async fn query_tasks(
        &self,
        database_id: &str,
        filter: &TaskFilter,
    ) -> Result<Vec<Task>, AgentError> {
        let payload: ListPayload<TaskPayload> = self
            .post_json(
                &format!("/v1/databases/{}/query", database_id),
                serde_json::to_value(filter).map_err(|e| AgentError::Workspace(e.to_string()))?,
            )
            .await?;
        Ok(payload.results.into_iter().map(Task::from).collect())
    }

    async fn search_by_title(
        &self,
        database_id: &str,
        title: &str,
    ) -> Result<Vec<Task>, AgentError> {
        let payload: ListPayload<TaskPayload> = self
            .post_json(
                &format!("/v1/databases/{}/search", database_id),
                json!({ "query": title }),
            )
            .await?;
        Ok(payload.results.into_iter().map(Task::from).collect())
    }

    async fn update_properties(
        &self,
        task_id: &str,
        patch: &TaskPatch,
    ) -> Result<Task, AgentError> {
        let payload: TaskPayload = self
            .post_json(
                &format!("/v1/tasks/{}", task_id),
                serde_json::to_value(patch).map_err(|e| AgentError::Workspace(e.to_string()))?,
            )
            .await?;
        Ok(payload.into())
    }

    async fn archive(&self, task_id: &str) -> Result<(), AgentError> {
        let _: serde_json::Value = self
            .post_json(&format!("/v1/tasks/{}", task_id), json!({ "archived": true }))
            .await?;
        Ok(())
    }

    async fn list_comments(&self, task_id: &str) -> Result<Vec<Comment>, AgentError> {
        let payload: ListPayload<Comment> = self
            .get_json(&format!("/v1/tasks/{}/comments", task_id))
            .await?;
        Ok(payload.results)
    }

    async fn add_comment(&self, task_id: &str, rich_text: &str) -> Result<Comment, AgentError> {
        self.post_json(
            &format!("/v1/tasks/{}/comments", task_id),
            json!({ "rich_text": rich_text }),
        )
        .await
    }

    async fn append_page_content(&self, task_id: &str, content: &str) -> Result<(), AgentError> {
        let _: serde_json::Value = self
            .post_json(
                &format!("/v1/tasks/{}/content", task_id),
                json!({ "append": content }),
            )
            .await?;
        Ok(())
    }

    async fn list_users(&self) -> Result<Vec<WorkspaceUser>, AgentError> {
        let payload: ListPayload<UserPayload> = self.get_json("/v1/users").await?;
        // 机器人与集成账号在此过滤，上层只看到人类用户
        Ok(payload
            .results
            .into_iter()
            .filter(|u| u.kind.as_deref() != Some("bot"))
            .map(|u| WorkspaceUser {
                id: u.id,
                name: u.name,
                email: u.email,
            })
            .collect())
    }
}
