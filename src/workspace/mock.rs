//! 内存工作区（测试用，无需外部 API）
//!
//! 任务存在内存里；记录状态变更调用次数，便于断言"校验失败时零外部调用"。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::core::AgentError;
use crate::workspace::{
    Comment, NewTask, Task, TaskFilter, TaskPatch, WorkspaceApi, WorkspaceUser,
};

#[derive(Default)]
pub struct MockWorkspace {
    pub tasks: Mutex<Vec<Task>>,
    pub comments: Mutex<Vec<(String, Comment)>>,
    pub users: Mutex<Vec<WorkspaceUser>>,
    pub pages: Mutex<Vec<(String, String)>>,
    /// 状态变更调用计数（create / update / archive / comment）
    pub mutation_calls: AtomicUsize,
}

impl MockWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(users: Vec<WorkspaceUser>) -> Self {
        let mock = Self::default();
        *mock.users.lock().expect("users lock") = users;
        mock
    }

    pub fn push_task(&self, task: Task) {
        self.tasks.lock().expect("tasks lock").push(task);
    }

    pub fn mutations(&self) -> usize {
        self.mutation_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkspaceApi for MockWorkspace {
    async fn create_task(&self, _database_id: &str, task: NewTask) -> Result<Task, AgentError> {
        self.mutation_calls.fetch_add(1, Ordering::SeqCst);
        let created = Task {
            id: Uuid::new_v4().to_string(),
            name: task.name,
            status: task.status,
            due_date: Some(task.due_date),
            priority: task.priority,
            created_by: Some(task.creator_id.clone()),
            assignee: Some(task.assignee_id.clone()),
            url: None,
        };
        self.tasks.lock().expect("tasks lock").push(created.clone());
        if let Some(content) = task.content {
            self.pages
                .lock()
                .expect("pages lock")
                .push((created.id.clone(), content));
        }
        Ok(created)
    }

    async fn query_tasks(
        &self,
        _database_id: &str,
        filter: &TaskFilter,
    ) -> Result<Vec<Task>, AgentError> {
        Ok(self
            .tasks
            .lock()
            .expect("tasks lock")
            .iter()
            .filter(|t| {
                filter
                    .assignee_id
                    .as_ref()
                    .map_or(true, |a| t.assignee.as_deref() == Some(a.as_str()))
                    && filter
                        .priority
                        .as_ref()
                        .map_or(true, |p| &t.priority == p)
                    && filter.status.as_ref().map_or(true, |s| &t.status == s)
            })
            .cloned()
            .collect())
    }

    async fn search_by_title(
        &self,
        _database_id: &str,
        title: &str,
    ) -> Result<Vec<Task>, AgentError> {
        let needle = title.to_lowercase();
        Ok(self
            .tasks
            .lock()
            .expect("tasks lock")
            .iter()
            .filter(|t| t.name.to_lowercase().contains(&needle))
            .cloned()
            .collect())
    }

    async fn update_properties(
        &self,
        task_id: &str,
        patch: &TaskPatch,
    ) -> Result<Task, AgentError> {
        self.mutation_calls.fetch_add(1, Ordering::SeqCst);
        let mut tasks = self.tasks.lock().expect("tasks lock");
        let task = tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or_else(|| AgentError::Workspace(format!("task {} not found", task_id)))?;
        if let Some(status) = &patch.status {
            task.status = status.clone();
        }
        if let Some(due) = patch.due_date {
            task.due_date = Some(due);
        }
        if let Some(priority) = &patch.priority {
            task.priority = priority.clone();
        }
        if let Some(assignee) = &patch.assignee_id {
            task.assignee = Some(assignee.clone());
        }
        Ok(task.clone())
    }

    async fn archive(&self, task_id: &str) -> Result<(), AgentError> {
        self.mutation_calls.fetch_add(1, Ordering::SeqCst);
        self.tasks
            .lock()
            .expect("tasks lock")
            .retain(|t| t.id != task_id);
        Ok(())
    }

    async fn list_comments(&self, task_id: &str) -> Result<Vec<Comment>, AgentError> {
        Ok(self
            .comments
            .lock()
            .expect("comments lock")
            .iter()
            .filter(|(id, _)| id == task_id)
            .map(|(_, c)| c.clone())
            .collect())
    }

    async fn add_comment(&self, task_id: &str, rich_text: &str) -> Result<Comment, AgentError> {
        self.mutation_calls.fetch_add(1, Ordering::SeqCst);
        let comment = Comment {
            id: Uuid::new_v4().to_string(),
            author: "mock".to_string(),
            text: rich_text.to_string(),
        };
        self.comments
            .lock()
            .expect("comments lock")
            .push((task_id.to_string(), comment.clone()));
        Ok(comment)
    }

    async fn append_page_content(&self, task_id: &str, content: &str) -> Result<(), AgentError> {
        self.mutation_calls.fetch_add(1, Ordering::SeqCst);
        self.pages
            .lock()
            .expect("pages lock")
            .push((task_id.to_string(), content.to_string()));
        Ok(())
    }

    async fn list_users(&self) -> Result<Vec<WorkspaceUser>, AgentError> {
        Ok(self.users.lock().expect("users lock").clone())
    }
}
