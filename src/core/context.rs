//! 每请求上下文
//!
//! 将"当前用户 / 当前任务库 / 当前日期"作为显式值沿调用链传递，
//! 替代通过环境变量的全局可变覆盖。

use chrono::NaiveDate;

use crate::store::TaskRef;

/// 单轮请求的上下文：调用方身份、目标任务库、用户本地日期
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// 会话线程 ID
    pub thread_id: String,
    /// 调用方在任务工作区中的规范 ID
    pub user_id: String,
    /// 本轮要操作的任务库 ID（覆盖配置默认值时由请求携带）
    pub database_id: String,
    /// 用户本地当前日期（逾期判断、默认截止日）
    pub today: NaiveDate,
    /// 线程里已创建任务的引用，按创建顺序；"那个任务"指代解析到最后一条
    pub recent_tasks: Vec<TaskRef>,
}

impl RequestContext {
    pub fn new(
        thread_id: impl Into<String>,
        user_id: impl Into<String>,
        database_id: impl Into<String>,
        today: NaiveDate,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            user_id: user_id.into(),
            database_id: database_id.into(),
            today,
            recent_tasks: Vec::new(),
        }
    }

    pub fn with_recent_tasks(mut self, tasks: Vec<TaskRef>) -> Self {
        self.recent_tasks = tasks;
        self
    }
}
