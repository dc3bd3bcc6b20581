//! 外部任务工作区能力面
//!
//! 任务库的创建 / 查询 / 更新 / 归档、评论、页面内容与用户清单。核心把它
//! 当作外部协作者：每次调用独立、无缓存；状态变更调用不保证幂等，因此
//! 上层绝不盲目重试（见错误处理设计）。

pub mod http;
pub mod mock;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::core::AgentError;

pub use http::HttpWorkspace;
pub use mock::MockWorkspace;

/// 任务的最小字段集（处理器只向格式化器暴露这些，不泄漏原始 API 负载）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub status: String,
    pub due_date: Option<NaiveDate>,
    pub priority: String,
    pub created_by: Option<String>,
    pub assignee: Option<String>,
    pub url: Option<String>,
}

/// 新任务属性；缺省值由创建处理器补齐（今天 / High / Not started / 创建者自派）
#[derive(Debug, Clone, Serialize)]
pub struct NewTask {
    pub name: String,
    pub creator_id: String,
    pub assignee_id: String,
    pub due_date: NaiveDate,
    pub priority: String,
    pub status: String,
    /// 可选富文本正文（内容生成处理器产物）
    pub content: Option<String>,
}

/// 属性级更新；None 字段保持不变
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskPatch {
    pub status: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub priority: Option<String>,
    pub assignee_id: Option<String>,
}

/// 查询过滤器
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskFilter {
    pub assignee_id: Option<String>,
    pub priority: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub author: String,
    pub text: String,
}

/// 工作区用户（仅人类用户，机器人在客户端被过滤）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceUser {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
}

/// 任务工作区 API；每个方法对应一次独立的外部调用
#[async_trait]
pub trait WorkspaceApi: Send + Sync {
    async fn create_task(&self, database_id: &str, task: NewTask) -> Result<Task, AgentError>;

    async fn query_tasks(
        &self,
        database_id: &str,
        filter: &TaskFilter,
    ) -> Result<Vec<Task>, AgentError>;

    /// 按标题搜索；返回全部命中，歧义处理在调用方
    async fn search_by_title(
        &self,
        database_id: &str,
        title: &str,
    ) -> Result<Vec<Task>, AgentError>;

    async fn update_properties(
        &self,
        task_id: &str,
        patch: &TaskPatch,
    ) -> Result<Task, AgentError>;

    async fn archive(&self, task_id: &str) -> Result<(), AgentError>;

    async fn list_comments(&self, task_id: &str) -> Result<Vec<Comment>, AgentError>;

    async fn add_comment(&self, task_id: &str, rich_text: &str) -> Result<Comment, AgentError>;

    async fn append_page_content(&self, task_id: &str, content: &str) -> Result<(), AgentError>;

    async fn list_users(&self) -> Result<Vec<WorkspaceUser>, AgentError>;
}
