//! 路由器 / 监督者
//!
//! 一条入站消息在这里定语言、切从句、打标签，并把注释查询交给第一个
//! 被标记的处理器。语言检测闭合失败：受支持集合之外的语言由路由器直接
//! 用固定英文拒绝语回复，不做任何委派。纯问候也在路由器内完成（解析
//! 称呼 + 首轮 / 后续两种模板）。多意图消息只执行第一个标签，其余从句
//! 留在注释串里由格式化器变成跟进问题。

use std::sync::Arc;

use crate::core::RequestContext;
use crate::directory::DirectoryResolver;
use crate::handlers::{
    AnnotatedQuery, HandlerKind, HandlerRegistry, HandoffEnvelope, Language,
};

/// 固定英文拒绝语（语言检测闭合失败时的唯一出口）
pub const UNSUPPORTED_LANGUAGE_REPLY: &str = "I can only communicate in English, Russian, or \
Azerbaijani. Please try your request again in one of these languages.";

/// 一轮路由的三种出口
#[derive(Debug)]
pub enum RouteOutcome {
    /// 不支持的语言：固定英文拒绝语，零委派
    Refusal(&'static str),
    /// 纯问候：路由器自己渲染的问候文本
    Greeting(String),
    /// 已委派：注释查询 + 第一个处理器产出的信封
    Delegated {
        query: AnnotatedQuery,
        envelope: HandoffEnvelope,
    },
}

/// 文字系统分析的语言检测；None 表示受支持集合之外
pub fn detect_language(message: &str) -> Option<Language> {
    let mut latin = 0usize;
    let mut cyrillic = 0usize;
    let mut azerbaijani = 0usize;
    let mut other = 0usize;

    for c in message.chars().filter(|c| c.is_alphabetic()) {
        match c {
            'ə' | 'Ə' | 'ı' | 'İ' | 'ğ' | 'Ğ' | 'ş' | 'Ş' => azerbaijani += 1,
            'a'..='z' | 'A'..='Z' => latin += 1,
            '\u{0400}'..='\u{04FF}' => cyrillic += 1,
            // 其他拉丁扩展（ö、ü、ç 等）既见于阿塞拜疆语也见于借词，算拉丁
            '\u{00C0}'..='\u{024F}' => latin += 1,
            _ => other += 1,
        }
    }

    let supported = latin + cyrillic + azerbaijani;
    if other > supported {
        return None;
    }
    if supported == 0 {
        // 没有字母（纯数字 / 表情）按英语处理
        return Some(Language::En);
    }
    if cyrillic > latin + azerbaijani {
        Some(Language::Ru)
    } else if azerbaijani > 0 {
        Some(Language::Az)
    } else {
        Some(Language::En)
    }
}

const GREETING_WORDS: &[&str] = &[
    "hi", "hello", "hey", "hey there", "good morning", "good afternoon", "good evening",
    "привет", "здравствуйте", "добрый день", "salam", "salam aleykum",
];

fn is_pure_greeting(message: &str) -> bool {
    let lower = message
        .trim()
        .trim_end_matches(['!', '.', ',', '?'])
        .to_lowercase();
    GREETING_WORDS.iter().any(|g| lower == *g)
}

/// 意图关键词表；匹配顺序从具体到宽泛，避免 "add a comment" 落进创建
const INTENT_KEYWORDS: &[(HandlerKind, &[&str])] = &[
    (HandlerKind::Comment, &["comment", "коммент", "şərh"]),
    (HandlerKind::Reminder, &["remind", "напомн", "xatırlat"]),
    (
        HandlerKind::ContentGenerator,
        &["generate", "draft", "research", "write content", "напиши", "сгенерируй", "yaz"],
    ),
    (
        HandlerKind::UserLookup,
        &["users", "who is", "find the user", "пользовател", "istifadəçi"],
    ),
    (
        HandlerKind::TaskAnalysis,
        &["analyze", "analysis", "workload", "анализ", "нагрузк", "təhlil"],
    ),
    (
        HandlerKind::TaskRetrieval,
        &["show", "list", "retrieve", "what tasks", "my tasks", "покажи", "мои задачи", "göstər"],
    ),
    (
        HandlerKind::TaskModification,
        &[
            "update", "change", "mark", "reassign", "move", "delete", "archive", "set the",
            "измени", "обнови", "отметь", "удали", "dəyiş", "yenilə",
        ],
    ),
    (
        HandlerKind::TaskCreation,
        &["create", "add", "new task", "создай", "добавь", "yarat", "əlavə et"],
    ),
];

fn classify_clause(clause: &str) -> Option<HandlerKind> {
    let lower = clause.to_lowercase();
    INTENT_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(kind, _)| *kind)
}

/// 引号外的从句切分；无意图的片段并回前一从句
fn segment(message: &str) -> Vec<String> {
    const SEPARATORS: &[&str] = &[" and then ", " and ", " then ", "; ", " а затем ", " və "];

    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    let chars: Vec<char> = message.chars().collect();
    let mut i = 0;
    'outer: while i < chars.len() {
        let c = chars[i];
        if c == '\'' || c == '"' {
            in_quote = !in_quote;
        }
        if !in_quote {
            for sep in SEPARATORS {
                let sep_chars: Vec<char> = sep.chars().collect();
                if chars[i..].starts_with(&sep_chars[..]) {
                    pieces.push(current.trim().to_string());
                    current.clear();
                    i += sep_chars.len();
                    // 连接词本身丢弃，从句以自身动词开头
                    continue 'outer;
                }
            }
        }
        current.push(c);
        i += 1;
    }
    pieces.push(current.trim().to_string());

    // 无意图片段并回前一从句（"create a task to review and merge" 不能被切断）
    let mut merged: Vec<String> = Vec::new();
    for piece in pieces.into_iter().filter(|p| !p.is_empty()) {
        if classify_clause(&piece).is_none() {
            if let Some(last) = merged.last_mut() {
                last.push_str(" and ");
                last.push_str(&piece);
                continue;
            }
        }
        merged.push(piece);
    }
    merged
}

/// 切分 + 打标签 → 注释查询；没有任何可执行从句时为 None
pub fn annotate(message: &str, language: Language) -> Option<AnnotatedQuery> {
    let mut annotated = format!("(language='{}')", language.code());
    let mut tagged = 0usize;
    for clause in segment(message) {
        match classify_clause(&clause) {
            Some(kind) => {
                annotated.push_str(&format!(" {} [{}]", clause, kind.tag()));
                tagged += 1;
            }
            None => annotated.push_str(&format!(" {}", clause)),
        }
    }
    if tagged == 0 {
        None
    } else {
        Some(AnnotatedQuery::new(language, annotated))
    }
}

fn greeting_text(language: Language, name: &str, first_turn: bool) -> String {
    match (language, first_turn) {
        (Language::En, true) => format!(
            "Hi {}! I'm the BLAID Task Management Agent. How can I help you with your tasks today?",
            name
        ),
        (Language::En, false) => format!(
            "Hi {}! 👋 How can I help you with your tasks today? Just let me know what you need.",
            name
        ),
        (Language::Ru, true) => format!(
            "Привет, {}! Я агент управления задачами BLAID. Чем я могу помочь вам с задачами сегодня?",
            name
        ),
        (Language::Ru, false) => format!("Привет, {}! 👋 Чем помочь с задачами?", name),
        (Language::Az, true) => format!(
            "Salam, {}! Mən BLAID tapşırıq idarəetmə agentiyəm. Bu gün tapşırıqlarınızla bağlı sizə necə kömək edə bilərəm?",
            name
        ),
        (Language::Az, false) => format!("Salam, {}! 👋 Tapşırıqlarınızla necə kömək edim?", name),
    }
}

pub struct Router {
    handlers: Arc<HandlerRegistry>,
    resolver: Arc<DirectoryResolver>,
}

impl Router {
    pub fn new(handlers: Arc<HandlerRegistry>, resolver: Arc<DirectoryResolver>) -> Self {
        Self { handlers, resolver }
    }

    /// 一条入站消息 → 三种出口之一；first_turn 决定问候的详略
    pub async fn route(
        &self,
        message: &str,
        ctx: &RequestContext,
        first_turn: bool,
    ) -> RouteOutcome {
        let Some(language) = detect_language(message) else {
            tracing::info!("Unsupported language, refusing without delegation");
            return RouteOutcome::Refusal(UNSUPPORTED_LANGUAGE_REPLY);
        };

        if is_pure_greeting(message) {
            let name = match self.resolver.identity(&ctx.user_id).await {
                Ok(Some(identity)) => identity.display_name,
                _ => "there".to_string(),
            };
            return RouteOutcome::Greeting(greeting_text(language, &name, first_turn));
        }

        let Some(query) = annotate(message, language) else {
            // 没有可执行从句：以澄清信封收场，路由器依然不直接发文本
            let query = AnnotatedQuery::new(language, format!("(language='{}') {}", language.code(), message));
            let envelope = HandoffEnvelope::clarification(
                language,
                query.full.clone(),
                "I can create, update, retrieve, analyze, and comment on tasks, set reminders, \
                 draft content, and look up users. What would you like to do?"
                    .to_string(),
                Vec::new(),
            );
            return RouteOutcome::Delegated { query, envelope };
        };

        let kind = query.first_tag().unwrap_or(HandlerKind::TaskRetrieval);
        tracing::info!("Delegating to {:?} ({} tags)", kind, query.tags().len());

        let envelope = match self.handlers.get(kind) {
            Some(handler) => handler.handle(&query, ctx).await,
            None => HandoffEnvelope::error(
                crate::handlers::ActionType::ClarificationRequired,
                language,
                query.full.clone(),
                "Handler Unavailable",
                &format!("No handler registered for {:?}.", kind),
            ),
        };

        RouteOutcome::Delegated { query, envelope }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_analysis_covers_the_supported_set() {
        assert_eq!(detect_language("Create a task for me"), Some(Language::En));
        assert_eq!(detect_language("Создай задачу на завтра"), Some(Language::Ru));
        assert_eq!(detect_language("Tapşırıq yarat"), Some(Language::Az));
        assert_eq!(detect_language("今天的任务是什么"), None);
        assert_eq!(detect_language("مهمة جديدة"), None);
    }

    #[test]
    fn annotation_tags_each_actionable_clause() {
        let query = annotate(
            "Create a task 'A' and add a comment 'B' on 'A'",
            Language::En,
        )
        .unwrap();
        assert_eq!(
            query.full,
            "(language='en') Create a task 'A' [Task_Creation_Agent] add a comment 'B' on 'A' [Comment_Agent]"
        );
        assert_eq!(query.first_tag(), Some(HandlerKind::TaskCreation));
        assert_eq!(query.distinct_tag_count(), 2);
    }

    #[test]
    fn quoted_connectives_do_not_split_clauses() {
        let query = annotate(
            "Create a task 'Review and merge the PR' for Shafraz",
            Language::En,
        )
        .unwrap();
        assert_eq!(query.distinct_tag_count(), 1);
        assert!(query.full.contains("'Review and merge the PR'"));
    }

    #[test]
    fn unquoted_tail_without_intent_merges_back() {
        let query = annotate("Create a task to review and merge the PR", Language::En).unwrap();
        assert_eq!(query.distinct_tag_count(), 1);
        assert!(query
            .clause_for(HandlerKind::TaskCreation)
            .unwrap()
            .contains("merge the PR"));
    }

    #[test]
    fn pure_greetings_are_recognized() {
        assert!(is_pure_greeting("hi"));
        assert!(is_pure_greeting("Hello!"));
        assert!(is_pure_greeting("Привет"));
        assert!(!is_pure_greeting("hi can you find my tasks"));
    }
}
