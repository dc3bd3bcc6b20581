//! 副作用分发器
//!
//! 动作的发起者与受影响者不同时触发：持久化一条通知线程与通知行（同一
//! 事务），再向对方的联系地址发一条外部消息。发起者即受影响者时什么都
//! 不做。持久化或发送失败都只记日志，绝不影响主动作的信封。

use std::sync::Arc;

use crate::directory::Identity;
use crate::handlers::Language;
use crate::messaging::MessagingGateway;
use crate::store::ChatStore;

/// 指派通知正文（外部消息与通知标题共用同一文本）
pub fn assignment_body(
    language: Language,
    assigner: &str,
    task_name: &str,
    due_date: &str,
    priority: &str,
    status: &str,
) -> String {
    match language {
        Language::En => format!(
            "*{}* just assigned this task to you: *{}*\n> Due date: *{}*\n> Priority: *{}*\n> Status: *{}*\n> Assigned by: *{}*",
            assigner, task_name, due_date, priority, status, assigner
        ),
        Language::Ru => format!(
            "*{}* назначил(а) вам задачу: *{}*\n> Срок: *{}*\n> Приоритет: *{}*\n> Статус: *{}*\n> Назначил(а): *{}*",
            assigner, task_name, due_date, priority, status, assigner
        ),
        Language::Az => format!(
            "*{}* sizə bu tapşırığı təyin etdi: *{}*\n> Son tarix: *{}*\n> Prioritet: *{}*\n> Status: *{}*\n> Təyin edən: *{}*",
            assigner, task_name, due_date, priority, status, assigner
        ),
    }
}

/// 回复里呈现的被指派人名：自派显示第二人称
pub fn assignee_display(language: Language, actor_id: &str, target: &Identity) -> String {
    if target.canonical_id == actor_id {
        match language {
            Language::En => "You".to_string(),
            Language::Ru => "Вы".to_string(),
            Language::Az => "Siz".to_string(),
        }
    } else {
        target.display_name.clone()
    }
}

pub struct SideEffectDispatcher {
    store: Arc<ChatStore>,
    gateway: Arc<dyn MessagingGateway>,
}

impl SideEffectDispatcher {
    pub fn new(store: Arc<ChatStore>, gateway: Arc<dyn MessagingGateway>) -> Self {
        Self { store, gateway }
    }

    /// 仅当 actor ≠ target 才产生任何效果；kind 标记通知类别
    /// ("assignment" / "update" / "comment")
    pub async fn dispatch(
        &self,
        actor: &Identity,
        target: &Identity,
        kind: &str,
        title: &str,
        body: &str,
    ) {
        if actor.canonical_id == target.canonical_id {
            return;
        }

        match self
            .store
            .record_assignment(&actor.canonical_id, &target.canonical_id, kind, title, body)
            .await
        {
            Ok(thread_id) => {
                tracing::info!(
                    "Notification persisted for {} in thread {}",
                    target.display_name,
                    thread_id
                );
            }
            Err(e) => {
                tracing::error!("Failed to persist notification for {}: {}", target.canonical_id, e);
                return;
            }
        }

        // 外部发送是尽力而为，失败不回滚已提交的通知
        if let Err(e) = self.gateway.send_text(&target.contact_address, body).await {
            tracing::warn!("Notification send to {} failed: {}", target.contact_address, e);
        }
    }
}
