//! 会话持久化（SQLite）
//!
//! 线程、消息、线程任务引用、通知与用户目录都落在一个 sqlx 连接池上。
//! 消息表只追加、按插入顺序读取；归档线程只翻 archived 标志，不动消息行。
//! 指派通知的两次写入必须在同一事务里提交（半成品通知不可见）。

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use async_trait::async_trait;

use crate::core::AgentError;
use crate::directory::{DirectoryStore, Identity};

/// 线程元数据
#[derive(Debug, Clone, PartialEq)]
pub struct Thread {
    pub id: String,
    pub title: String,
    /// "web" / "whatsapp" / "notification"
    pub channel: String,
    pub archived: bool,
}

/// 持久化消息行
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct StoredMessage {
    pub role: String,
    pub content: String,
    pub created_at: String,
}

/// 线程内已创建任务的引用（编排器创建覆盖逻辑用）
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRef {
    pub task_id: String,
    pub task_name: String,
}

/// 持久化通知行：发起者、接收者、承载线程与类别全部可追溯
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub sender_id: String,
    pub user_id: String,
    pub thread_id: String,
    /// "assignment" / "update" / "comment"
    pub kind: String,
    pub title: String,
}

/// 会话存储：一个池承载全部协议状态
pub struct ChatStore {
    pool: SqlitePool,
}

impl ChatStore {
    pub async fn connect(db_url: &str) -> Result<Self, AgentError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await?;
        let store = Self { pool };
        store.init_tables().await?;
        Ok(store)
    }

    /// 测试用内存库；每个连接各自一份内存库，池必须收敛到单连接
    pub async fn in_memory() -> Result<Self, AgentError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.init_tables().await?;
        Ok(store)
    }

    async fn init_tables(&self) -> Result<(), AgentError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS threads (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                channel TEXT NOT NULL DEFAULT 'web',
                archived INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                thread_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (thread_id) REFERENCES threads(id) ON DELETE CASCADE
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS thread_tasks (
                thread_id TEXT NOT NULL,
                task_id TEXT NOT NULL,
                task_name TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (thread_id, task_id)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS notifications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                sender_id TEXT NOT NULL,
                thread_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                title TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS directory_users (
                canonical_id TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                contact_address TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages(thread_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_threads_user ON threads(user_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// 线程不存在则创建；存在则只刷新 updated_at
    pub async fn ensure_thread(
        &self,
        thread_id: &str,
        user_id: &str,
        title: &str,
        channel: &str,
    ) -> Result<(), AgentError> {
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO threads (id, user_id, title, channel, archived, created_at, updated_at)
             VALUES (?, ?, ?, ?, 0, ?, ?)
             ON CONFLICT(id) DO UPDATE SET updated_at = excluded.updated_at",
        )
        .bind(thread_id)
        .bind(user_id)
        .bind(title)
        .bind(channel)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn thread(&self, thread_id: &str) -> Result<Option<Thread>, AgentError> {
        let row = sqlx::query("SELECT id, title, channel, archived FROM threads WHERE id = ?")
            .bind(thread_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| Thread {
            id: r.get("id"),
            title: r.get("title"),
            channel: r.get("channel"),
            archived: r.get::<i64, _>("archived") != 0,
        }))
    }

    /// 归档只翻标志，消息行保持不变
    pub async fn archive_thread(&self, thread_id: &str) -> Result<(), AgentError> {
        sqlx::query("UPDATE threads SET archived = 1, updated_at = ? WHERE id = ?")
            .bind(chrono::Utc::now().to_rfc3339())
            .bind(thread_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn append_message(
        &self,
        thread_id: &str,
        role: &str,
        content: &str,
    ) -> Result<(), AgentError> {
        sqlx::query(
            "INSERT INTO messages (thread_id, role, content, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(thread_id)
        .bind(role)
        .bind(content)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// 按插入顺序读取全部消息
    pub async fn load_messages(&self, thread_id: &str) -> Result<Vec<StoredMessage>, AgentError> {
        let rows = sqlx::query(
            "SELECT role, content, created_at FROM messages WHERE thread_id = ? ORDER BY id",
        )
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| StoredMessage {
                role: r.get("role"),
                content: r.get("content"),
                created_at: r.get("created_at"),
            })
            .collect())
    }

    pub async fn message_count(&self, thread_id: &str) -> Result<i64, AgentError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM messages WHERE thread_id = ?")
            .bind(thread_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    /// 记录线程里创建过的任务；重复任务 id 静默忽略
    pub async fn remember_task(
        &self,
        thread_id: &str,
        task_id: &str,
        task_name: &str,
    ) -> Result<(), AgentError> {
        sqlx::query(
            "INSERT OR IGNORE INTO thread_tasks (thread_id, task_id, task_name, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(thread_id)
        .bind(task_id)
        .bind(task_name)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn thread_tasks(&self, thread_id: &str) -> Result<Vec<TaskRef>, AgentError> {
        let rows = sqlx::query(
            "SELECT task_id, task_name FROM thread_tasks WHERE thread_id = ? ORDER BY created_at",
        )
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| TaskRef {
                task_id: r.get("task_id"),
                task_name: r.get("task_name"),
            })
            .collect())
    }

    /// 指派通知的持久化：通知线程 + 通知行在同一事务内提交
    pub async fn record_assignment(
        &self,
        sender_id: &str,
        target_user_id: &str,
        kind: &str,
        title: &str,
        body: &str,
    ) -> Result<String, AgentError> {
        let now = chrono::Utc::now().to_rfc3339();
        let thread_id = uuid::Uuid::new_v4().to_string();

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO threads (id, user_id, title, channel, archived, created_at, updated_at)
             VALUES (?, ?, ?, 'notification', 0, ?, ?)",
        )
        .bind(&thread_id)
        .bind(target_user_id)
        .bind(title)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "INSERT INTO messages (thread_id, role, content, created_at) VALUES (?, 'assistant', ?, ?)",
        )
        .bind(&thread_id)
        .bind(body)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "INSERT INTO notifications (user_id, sender_id, thread_id, kind, title, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(target_user_id)
        .bind(sender_id)
        .bind(&thread_id)
        .bind(kind)
        .bind(title)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(thread_id)
    }

    pub async fn notifications_for(&self, user_id: &str) -> Result<Vec<Notification>, AgentError> {
        let rows = sqlx::query(
            "SELECT user_id, sender_id, thread_id, kind, title FROM notifications
             WHERE user_id = ? ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| Notification {
                sender_id: r.get("sender_id"),
                user_id: r.get("user_id"),
                thread_id: r.get("thread_id"),
                kind: r.get("kind"),
                title: r.get("title"),
            })
            .collect())
    }

    /// 目录行写入（启动时从工作区用户清单同步）
    pub async fn upsert_identity(&self, identity: &Identity) -> Result<(), AgentError> {
        sqlx::query(
            "INSERT INTO directory_users (canonical_id, display_name, contact_address)
             VALUES (?, ?, ?)
             ON CONFLICT(canonical_id) DO UPDATE SET
                 display_name = excluded.display_name,
                 contact_address = excluded.contact_address",
        )
        .bind(&identity.canonical_id)
        .bind(&identity.display_name)
        .bind(&identity.contact_address)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// 联系地址（消息通道侧的发件人 ID）反查规范身份
    pub async fn identity_by_contact(
        &self,
        contact_address: &str,
    ) -> Result<Option<Identity>, AgentError> {
        let row = sqlx::query(
            "SELECT canonical_id, display_name, contact_address FROM directory_users
             WHERE contact_address = ?",
        )
        .bind(contact_address)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| Identity {
            canonical_id: r.get("canonical_id"),
            display_name: r.get("display_name"),
            contact_address: r.get("contact_address"),
        }))
    }

    pub async fn identity_by_id(&self, canonical_id: &str) -> Result<Option<Identity>, AgentError> {
        let row = sqlx::query(
            "SELECT canonical_id, display_name, contact_address FROM directory_users
             WHERE canonical_id = ?",
        )
        .bind(canonical_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| Identity {
            canonical_id: r.get("canonical_id"),
            display_name: r.get("display_name"),
            contact_address: r.get("contact_address"),
        }))
    }
}

#[async_trait]
impl DirectoryStore for ChatStore {
    async fn find_by_name_like(&self, pattern: &str) -> Result<Vec<Identity>, AgentError> {
        let like = format!("%{}%", pattern);
        let rows = sqlx::query(
            "SELECT canonical_id, display_name, contact_address FROM directory_users
             WHERE display_name LIKE ? COLLATE NOCASE ORDER BY canonical_id",
        )
        .bind(&like)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| Identity {
                canonical_id: r.get("canonical_id"),
                display_name: r.get("display_name"),
                contact_address: r.get("contact_address"),
            })
            .collect())
    }

    async fn find_by_id(&self, canonical_id: &str) -> Result<Option<Identity>, AgentError> {
        self.identity_by_id(canonical_id).await
    }

    async fn all_names(&self) -> Result<Vec<String>, AgentError> {
        let rows = sqlx::query("SELECT display_name FROM directory_users ORDER BY canonical_id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| r.get("display_name")).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(id: &str, name: &str) -> Identity {
        Identity {
            canonical_id: id.to_string(),
            display_name: name.to_string(),
            contact_address: format!("+994{}", id),
        }
    }

    #[tokio::test]
    async fn messages_come_back_in_insertion_order() {
        let store = ChatStore::in_memory().await.unwrap();
        store.ensure_thread("t1", "u1", "Chat", "web").await.unwrap();
        store.append_message("t1", "user", "first").await.unwrap();
        store.append_message("t1", "assistant", "second").await.unwrap();
        store.append_message("t1", "user", "third").await.unwrap();

        let messages = store.load_messages("t1").await.unwrap();
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
        assert_eq!(store.message_count("t1").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn archiving_keeps_message_rows() {
        let store = ChatStore::in_memory().await.unwrap();
        store.ensure_thread("t1", "u1", "Chat", "web").await.unwrap();
        store.append_message("t1", "user", "hello").await.unwrap();
        store.archive_thread("t1").await.unwrap();

        let thread = store.thread("t1").await.unwrap().unwrap();
        assert!(thread.archived);
        assert_eq!(store.load_messages("t1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn remember_task_ignores_duplicates() {
        let store = ChatStore::in_memory().await.unwrap();
        store.ensure_thread("t1", "u1", "Chat", "web").await.unwrap();
        store.remember_task("t1", "task-1", "Write report").await.unwrap();
        store.remember_task("t1", "task-1", "Write report").await.unwrap();
        store.remember_task("t1", "task-2", "Review PR").await.unwrap();

        let tasks = store.thread_tasks("t1").await.unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].task_name, "Write report");
    }

    #[tokio::test]
    async fn assignment_writes_thread_and_notification_atomically() {
        let store = ChatStore::in_memory().await.unwrap();
        let thread_id = store
            .record_assignment(
                "u1",
                "u2",
                "assignment",
                "New task: Review PR",
                "Aboo just assigned this task to you.",
            )
            .await
            .unwrap();

        let thread = store.thread(&thread_id).await.unwrap().unwrap();
        assert_eq!(thread.channel, "notification");
        assert_eq!(store.load_messages(&thread_id).await.unwrap().len(), 1);

        let pending = store.notifications_for("u2").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].title, "New task: Review PR");
        assert_eq!(pending[0].sender_id, "u1");
        assert_eq!(pending[0].thread_id, thread_id);
        assert_eq!(pending[0].kind, "assignment");
        assert_ne!(pending[0].sender_id, pending[0].user_id);
    }

    #[tokio::test]
    async fn concurrent_writers_share_the_in_memory_database() {
        let store = std::sync::Arc::new(ChatStore::in_memory().await.unwrap());
        store.ensure_thread("t1", "u1", "Chat", "web").await.unwrap();

        let a = store.clone();
        let b = store.clone();
        let (ra, rb) = tokio::join!(
            a.append_message("t1", "user", "one"),
            b.append_message("t1", "user", "two")
        );
        ra.unwrap();
        rb.unwrap();
        assert_eq!(store.message_count("t1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn directory_queries_are_case_insensitive() {
        let store = ChatStore::in_memory().await.unwrap();
        store.upsert_identity(&ident("1", "Aboo Fainaz")).await.unwrap();
        store.upsert_identity(&ident("2", "Shafraz")).await.unwrap();

        let hits = store.find_by_name_like("aboo").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].display_name, "Aboo Fainaz");

        let names = store.all_names().await.unwrap();
        assert_eq!(names, vec!["Aboo Fainaz".to_string(), "Shafraz".to_string()]);
    }
}
