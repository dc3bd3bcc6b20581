//! 提醒处理器
//!
//! 任务关联提醒：先按标题找到唯一任务（找不到就不预约），再解析提醒
//! 对象（缺省为发起者本人）与日期 / 时刻，产出 ReminderSet 信封。提醒
//! 文本按自提醒 / 代提醒两种口径本地化。实际投递由独立的调度进程完成，
//! 不在本处理器内。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::core::RequestContext;
use crate::directory::DirectoryResolver;
use crate::handlers::{
    caller_identity, find_unique_task, parse, referenced_task_name, resolve_person, ActionType,
    AnnotatedQuery, Handler, HandlerKind, HandoffEnvelope, Language, NameResolution,
};
use crate::workspace::WorkspaceApi;

pub struct ReminderHandler {
    workspace: Arc<dyn WorkspaceApi>,
    resolver: Arc<DirectoryResolver>,
}

impl ReminderHandler {
    pub fn new(workspace: Arc<dyn WorkspaceApi>, resolver: Arc<DirectoryResolver>) -> Self {
        Self { workspace, resolver }
    }
}

/// 提醒文本：自提醒与代提醒两种口径
fn reminder_text(
    language: Language,
    target: &str,
    creator: &str,
    task_name: &str,
    due: &str,
    is_self: bool,
) -> String {
    match (language, is_self) {
        (Language::En, true) => format!(
            "Hi {}. Just a reminder that you wanted to '{}' by *{}*.",
            target, task_name, due
        ),
        (Language::En, false) => format!(
            "Hi {}. {} wanted me to remind you to '{}' by *{}*.",
            target, creator, task_name, due
        ),
        (Language::Ru, true) => format!(
            "Привет, {}. Напоминаю, вы хотели '{}' к *{}*.",
            target, task_name, due
        ),
        (Language::Ru, false) => format!(
            "Привет, {}. {} просил(а) напомнить вам сделать '{}' к *{}*.",
            target, creator, task_name, due
        ),
        (Language::Az, true) => format!(
            "Salam, {}. Xatırlatmaq istədim ki, '{}' tapşırığını *{}* tarixinədək etməli idiniz.",
            target, task_name, due
        ),
        (Language::Az, false) => format!(
            "Salam, {}. {} '{}' tapşırığını *{}* tarixinədək etməyinizi xatırlatmağımı istədi.",
            target, creator, task_name, due
        ),
    }
}

#[async_trait]
impl Handler for ReminderHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Reminder
    }

    async fn handle(&self, query: &AnnotatedQuery, ctx: &RequestContext) -> HandoffEnvelope {
        let clause = query.clause_for(HandlerKind::Reminder).unwrap_or_default();

        let title = match parse::extract_quoted(&clause)
            .or_else(|| referenced_task_name(&clause, ctx))
        {
            Some(title) => title,
            None => {
                return HandoffEnvelope::error(
                    ActionType::ReminderSet,
                    query.language,
                    query.full.clone(),
                    "Missing Task Name",
                    "Please name the task to be reminded about, in quotes.",
                );
            }
        };

        // 任务必须存在才能预约提醒
        let task = match find_unique_task(
            self.workspace.as_ref(),
            &ctx.database_id,
            &title,
            ActionType::ReminderSet,
            query,
        )
        .await
        {
            Ok(task) => task,
            Err(envelope) => return envelope,
        };

        let actor = match caller_identity(&self.resolver, ctx, ActionType::ReminderSet, query).await
        {
            Ok(identity) => identity,
            Err(envelope) => return envelope,
        };

        let target = match parse::person_name(&clause) {
            Some(name) => {
                match resolve_person(&self.resolver, &name, ActionType::ReminderSet, query).await {
                    NameResolution::Identity(identity) => identity,
                    NameResolution::Envelope(envelope) => return envelope,
                }
            }
            None => actor.clone(),
        };

        let remind_date = parse::date_hint(&clause, ctx.today)
            .or(task.due_date)
            .unwrap_or(ctx.today);
        let remind_time = parse::time_hint(&clause).unwrap_or_else(|| "09:00".to_string());

        let is_self = target.canonical_id == actor.canonical_id;
        let text = reminder_text(
            query.language,
            &target.display_name,
            &actor.display_name,
            &task.name,
            &remind_date.to_string(),
            is_self,
        );

        HandoffEnvelope::success(
            ActionType::ReminderSet,
            query.language,
            query.full.clone(),
            json!({
                "task_name": task.name,
                "page_id": task.id,
                "target_name": target.display_name,
                "target_id": target.canonical_id,
                "remind_date": remind_date.to_string(),
                "remind_time": remind_time,
                "reminder_text": text,
            }),
        )
    }
}
