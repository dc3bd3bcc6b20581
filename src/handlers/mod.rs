//! 专家处理器：共享契约与注册表
//!
//! 每个处理器拥有一类动作（创建 / 修改 / 检索 / 分析 / 评论 / 提醒 / 内容生成 /
//! 用户查询），遵循同一四阶段协议：校验 → 解析身份 → 执行（至多一次改状态调用）→
//! 产出信封。处理器按标签注册进 HandlerRegistry，由路由器与编排器按名查找。

pub mod analyze;
pub mod comment;
pub mod content;
pub mod create;
pub mod envelope;
pub mod modify;
pub mod parse;
pub mod remind;
pub mod retrieve;
pub mod users;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use re::tag_regex;

use crate::core::RequestContext;
use crate::directory::{AmbiguityResult, DirectoryResolver, Identity};

pub use envelope::{ActionType, HandoffEnvelope, Language};

/// 处理器类别：每个类别对应一个注释标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    TaskCreation,
    TaskModification,
    TaskRetrieval,
    TaskAnalysis,
    Comment,
    Reminder,
    ContentGenerator,
    UserLookup,
}

impl HandlerKind {
    /// 注释标签名（不含方括号）
    pub fn tag(&self) -> &'static str {
        match self {
            HandlerKind::TaskCreation => "Task_Creation_Agent",
            HandlerKind::TaskModification => "Task_Modification_Agent",
            HandlerKind::TaskRetrieval => "Task_Retrieval_Agent",
            HandlerKind::TaskAnalysis => "Task_Analysis_Agent",
            HandlerKind::Comment => "Comment_Agent",
            HandlerKind::Reminder => "Reminder_Agent",
            HandlerKind::ContentGenerator => "Content_Generator_Agent",
            HandlerKind::UserLookup => "User_Agent",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "Task_Creation_Agent" => Some(HandlerKind::TaskCreation),
            "Task_Modification_Agent" => Some(HandlerKind::TaskModification),
            "Task_Retrieval_Agent" => Some(HandlerKind::TaskRetrieval),
            "Task_Analysis_Agent" => Some(HandlerKind::TaskAnalysis),
            "Comment_Agent" => Some(HandlerKind::Comment),
            "Reminder_Agent" => Some(HandlerKind::Reminder),
            "Content_Generator_Agent" => Some(HandlerKind::ContentGenerator),
            "User_Agent" => Some(HandlerKind::UserLookup),
            _ => None,
        }
    }
}

mod re {
    use regex::Regex;
    use std::sync::OnceLock;

    /// `[Xxx_Agent]` 标签的共享正则
    pub fn tag_regex() -> &'static Regex {
        static RE: OnceLock<Regex> = OnceLock::new();
        RE.get_or_init(|| Regex::new(r"\[([A-Za-z_]+_Agent)\]").expect("tag regex"))
    }
}

/// 路由器产出的注释查询：`(language='xx') 从句 [Tag] 从句2 [Tag2]`
#[derive(Debug, Clone)]
pub struct AnnotatedQuery {
    pub language: Language,
    /// 含语言前缀与全部标签的完整注释串
    pub full: String,
}

impl AnnotatedQuery {
    pub fn new(language: Language, full: impl Into<String>) -> Self {
        Self {
            language,
            full: full.into(),
        }
    }

    /// 从编排器看到的裸注释串还原（修复循环用）；无语言前缀时为 None
    pub fn parse(full: &str) -> Option<Self> {
        let trimmed = full.trim();
        let rest = trimmed.strip_prefix("(language='")?;
        let code_end = rest.find('\'')?;
        let language = Language::from_code(&rest[..code_end])?;
        Some(Self::new(language, trimmed))
    }

    /// 出现顺序的全部标签（可重复）
    pub fn tags(&self) -> Vec<HandlerKind> {
        tag_regex()
            .captures_iter(&self.full)
            .filter_map(|c| HandlerKind::from_tag(&c[1]))
            .collect()
    }

    /// 不同标签的数量（单意图 / 多意图判断）
    pub fn distinct_tag_count(&self) -> usize {
        let mut seen = Vec::new();
        for tag in self.tags() {
            if !seen.contains(&tag) {
                seen.push(tag);
            }
        }
        seen.len()
    }

    pub fn first_tag(&self) -> Option<HandlerKind> {
        self.tags().into_iter().next()
    }

    /// 某处理器对应的从句：其标签之前、上一标签（或语言前缀）之后的文本
    pub fn clause_for(&self, kind: HandlerKind) -> Option<String> {
        let needle = format!("[{}]", kind.tag());
        let end = self.full.find(&needle)?;
        let head = &self.full[..end];

        // 上一个标签结束处或语言前缀结束处
        let start = tag_regex()
            .find_iter(head)
            .last()
            .map(|m| m.end())
            .unwrap_or_else(|| head.find(')').map(|i| i + 1).unwrap_or(0));

        let clause = head[start..]
            .trim()
            .trim_start_matches(|c: char| {
                c == ',' || c == '.' || c == ';' || c.is_whitespace()
            })
            .trim();
        if clause.is_empty() {
            None
        } else {
            Some(clause.to_string())
        }
    }

    /// 第一个标签之后剩余的注释串（格式化器跟进问题用）
    pub fn clause_after_first(&self) -> Option<String> {
        let mut it = tag_regex().find_iter(&self.full);
        let first = it.next()?;
        let rest = self.full[first.end()..].trim();
        if rest.is_empty() {
            None
        } else {
            // 去掉剩余部分自身的标签，仅保留人类可读从句
            let cleaned = tag_regex().replace_all(rest, "").trim().to_string();
            let cleaned = cleaned
                .trim_start_matches(|c: char| {
                    c == ',' || c == '.' || c == ';' || c.is_whitespace()
                })
                .to_string();
            if cleaned.is_empty() {
                None
            } else {
                Some(cleaned)
            }
        }
    }
}

/// 人名解析的处理器侧收口：要么得到身份，要么得到一个可直接返回的信封
pub(crate) enum NameResolution {
    Identity(Identity),
    Envelope(HandoffEnvelope),
}

/// 歧义子协议 → 信封的统一映射；每个引用人名的处理器都经过这里
pub(crate) async fn resolve_person(
    resolver: &DirectoryResolver,
    name: &str,
    action: ActionType,
    query: &AnnotatedQuery,
) -> NameResolution {
    match resolver.resolve(name).await {
        Ok(AmbiguityResult::Resolved(identity)) => NameResolution::Identity(identity),
        Ok(AmbiguityResult::AmbiguousMatch(options)) => {
            NameResolution::Envelope(HandoffEnvelope::clarification(
                query.language,
                query.full.clone(),
                format!("I found multiple users matching '{}'. Which one did you mean?", name),
                options,
            ))
        }
        Ok(AmbiguityResult::SuggestedCorrection(candidate)) => {
            NameResolution::Envelope(HandoffEnvelope::clarification(
                query.language,
                query.full.clone(),
                format!("I couldn't find a user named '{}'. Did you mean:", name),
                vec![candidate],
            ))
        }
        Ok(AmbiguityResult::NotFound) => NameResolution::Envelope(HandoffEnvelope::error(
            action,
            query.language,
            query.full.clone(),
            "User Not Found",
            &format!("No user named '{}' was found in the directory.", name),
        )),
        Err(e) => {
            tracing::error!("Directory lookup for '{}' failed: {}", name, e);
            NameResolution::Envelope(HandoffEnvelope::error(
                action,
                query.language,
                query.full.clone(),
                "Directory Error",
                &e.to_string(),
            ))
        }
    }
}

/// 调用方自己的身份；目录里查不到时以信封收场
pub(crate) async fn caller_identity(
    resolver: &DirectoryResolver,
    ctx: &RequestContext,
    action: ActionType,
    query: &AnnotatedQuery,
) -> Result<Identity, HandoffEnvelope> {
    match resolver.identity(&ctx.user_id).await {
        Ok(Some(identity)) => Ok(identity),
        Ok(None) => Err(HandoffEnvelope::error(
            action,
            query.language,
            query.full.clone(),
            "User Not Found",
            "The caller is not registered in the user directory.",
        )),
        Err(e) => {
            tracing::error!("Caller identity lookup failed: {}", e);
            Err(HandoffEnvelope::error(
                action,
                query.language,
                query.full.clone(),
                "Directory Error",
                &e.to_string(),
            ))
        }
    }
}

/// 指代回退：从句没给引号任务名但指向"那个任务"时，取线程里最近创建的任务名
pub(crate) fn referenced_task_name(clause: &str, ctx: &RequestContext) -> Option<String> {
    if !parse::references_previous_task(clause) {
        return None;
    }
    ctx.recent_tasks.last().map(|t| t.task_name.clone())
}

/// 标题 → 唯一任务；零命中与多命中都收敛为校验错误信封，绝不猜测
pub(crate) async fn find_unique_task(
    workspace: &dyn crate::workspace::WorkspaceApi,
    database_id: &str,
    title: &str,
    action: ActionType,
    query: &AnnotatedQuery,
) -> Result<crate::workspace::Task, HandoffEnvelope> {
    let hits = match workspace.search_by_title(database_id, title).await {
        Ok(hits) => hits,
        Err(e) => {
            tracing::error!("Task search failed: {}", e);
            return Err(HandoffEnvelope::error(
                action,
                query.language,
                query.full.clone(),
                "Workspace Error",
                &e.to_string(),
            ));
        }
    };

    let mut hits = hits;
    match hits.len() {
        1 => Ok(hits.remove(0)),
        0 => Err(HandoffEnvelope::error(
            action,
            query.language,
            query.full.clone(),
            "Task Not Found",
            &format!("No task found with the name '{}'.", title),
        )),
        _ => Err(HandoffEnvelope::error(
            action,
            query.language,
            query.full.clone(),
            "Ambiguous Task Name",
            &format!("Multiple tasks found matching '{}'. Please be more specific.", title),
        )),
    }
}

/// 处理器契约：校验 → 解析身份 → 执行 → 产出信封；绝不抛错、绝不静默
#[async_trait]
pub trait Handler: Send + Sync {
    fn kind(&self) -> HandlerKind;

    async fn handle(&self, query: &AnnotatedQuery, ctx: &RequestContext) -> HandoffEnvelope;
}

/// 处理器注册表：按类别存储 Arc<dyn Handler>
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<HandlerKind, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: impl Handler + 'static) {
        self.handlers.insert(handler.kind(), Arc::new(handler));
    }

    pub fn get(&self, kind: HandlerKind) -> Option<Arc<dyn Handler>> {
        self.handlers.get(&kind).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn annotated_query_parses_language_and_tags() {
        let q = AnnotatedQuery::parse(
            "(language='en') Create a task 'A' [Task_Creation_Agent] and add a comment 'B' [Comment_Agent]",
        )
        .unwrap();
        assert_eq!(q.language, Language::En);
        assert_eq!(
            q.tags(),
            vec![HandlerKind::TaskCreation, HandlerKind::Comment]
        );
        assert_eq!(q.distinct_tag_count(), 2);
        assert_eq!(q.first_tag(), Some(HandlerKind::TaskCreation));
    }

    #[test]
    fn clause_extraction_is_bounded_by_neighbor_tags() {
        let q = AnnotatedQuery::parse(
            "(language='en') Create a task 'A' [Task_Creation_Agent] and add a comment 'B' [Comment_Agent]",
        )
        .unwrap();
        assert_eq!(
            q.clause_for(HandlerKind::TaskCreation).unwrap(),
            "Create a task 'A'"
        );
        assert_eq!(
            q.clause_for(HandlerKind::Comment).unwrap(),
            "and add a comment 'B'"
        );
    }

    #[test]
    fn clause_after_first_drops_tags() {
        let q = AnnotatedQuery::parse(
            "(language='en') Create a task 'A' [Task_Creation_Agent] and add a comment 'B' [Comment_Agent]",
        )
        .unwrap();
        assert_eq!(q.clause_after_first().unwrap(), "and add a comment 'B'");
    }

    #[test]
    fn parse_rejects_unannotated_text() {
        assert!(AnnotatedQuery::parse("just some text").is_none());
    }
}
