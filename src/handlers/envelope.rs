//! 移交信封（Handoff Envelope）与四行线格式
//!
//! 专家处理器的唯一输出形态：{action_type, language, original_query, tool_output}。
//! 线格式为四个带标签的行（ACTION_TYPE / LANGUAGE / ORIGINAL_QUERY / TOOL_OUTPUT），
//! TOOL_OUTPUT 的值是序列化 JSON。校验失败与外部调用失败同样封装为信封
//! （tool_output 带 "error" 判别键），处理器绝不静默结束一轮。

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::AgentError;

/// 会话语言（受支持集合之外的语言由路由器直接拒绝，不会出现在信封里）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    En,
    Ru,
    Az,
}

impl Language {
    pub fn code(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Ru => "ru",
            Language::Az => "az",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "en" => Some(Language::En),
            "ru" => Some(Language::Ru),
            "az" => Some(Language::Az),
            _ => None,
        }
    }
}

/// 动作类别：模板表与移交协议共用的标签联合
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionType {
    TaskCreation,
    TaskModification,
    TasksRetrieved,
    TaskAnalysis,
    CommentAdded,
    CommentsRetrieved,
    ReminderSet,
    ContentGenerated,
    UsersListed,
    UserFound,
    ClarificationRequired,
}

impl ActionType {
    pub fn label(&self) -> &'static str {
        match self {
            ActionType::TaskCreation => "TaskCreation",
            ActionType::TaskModification => "TaskModification",
            ActionType::TasksRetrieved => "TasksRetrieved",
            ActionType::TaskAnalysis => "TaskAnalysis",
            ActionType::CommentAdded => "CommentAdded",
            ActionType::CommentsRetrieved => "CommentsRetrieved",
            ActionType::ReminderSet => "ReminderSet",
            ActionType::ContentGenerated => "ContentGenerated",
            ActionType::UsersListed => "UsersListed",
            ActionType::UserFound => "UserFound",
            ActionType::ClarificationRequired => "ClarificationRequired",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "TaskCreation" => Some(ActionType::TaskCreation),
            "TaskModification" => Some(ActionType::TaskModification),
            "TasksRetrieved" => Some(ActionType::TasksRetrieved),
            "TaskAnalysis" => Some(ActionType::TaskAnalysis),
            "CommentAdded" => Some(ActionType::CommentAdded),
            "CommentsRetrieved" => Some(ActionType::CommentsRetrieved),
            "ReminderSet" => Some(ActionType::ReminderSet),
            "ContentGenerated" => Some(ActionType::ContentGenerated),
            "UsersListed" => Some(ActionType::UsersListed),
            "UserFound" => Some(ActionType::UserFound),
            "ClarificationRequired" => Some(ActionType::ClarificationRequired),
            _ => None,
        }
    }
}

/// 专家处理器 → 呈现格式化器的移交信封
#[derive(Debug, Clone, PartialEq)]
pub struct HandoffEnvelope {
    pub action_type: ActionType,
    pub language: Language,
    pub original_query: String,
    /// 结构化结果或错误对象；永不为空
    pub tool_output: Value,
}

impl HandoffEnvelope {
    pub fn success(
        action_type: ActionType,
        language: Language,
        original_query: impl Into<String>,
        tool_output: Value,
    ) -> Self {
        Self {
            action_type,
            language,
            original_query: original_query.into(),
            tool_output,
        }
    }

    /// 校验 / 外部调用失败：tool_output 带 "error" 判别键
    pub fn error(
        action_type: ActionType,
        language: Language,
        original_query: impl Into<String>,
        error: &str,
        message: &str,
    ) -> Self {
        Self {
            action_type,
            language,
            original_query: original_query.into(),
            tool_output: json!({ "error": error, "message": message }),
        }
    }

    /// 歧义澄清：question + options，由格式化器逐项渲染（不翻译选项值）
    pub fn clarification(
        language: Language,
        original_query: impl Into<String>,
        question: impl Into<String>,
        options: Vec<String>,
    ) -> Self {
        Self {
            action_type: ActionType::ClarificationRequired,
            language,
            original_query: original_query.into(),
            tool_output: json!({ "question": question.into(), "options": options }),
        }
    }

    pub fn is_error(&self) -> bool {
        self.tool_output.get("error").is_some()
    }

    /// 错误判别键的值（无错误时为 None）
    pub fn error_kind(&self) -> Option<&str> {
        self.tool_output.get("error").and_then(Value::as_str)
    }

    /// 序列化为四行线格式
    pub fn to_wire(&self) -> String {
        format!(
            "ACTION_TYPE: {}\nLANGUAGE: {}\nORIGINAL_QUERY: {}\nTOOL_OUTPUT: {}",
            self.action_type.label(),
            self.language.code(),
            self.original_query,
            self.tool_output
        )
    }

    /// 文本是否像一个未被格式化器消费的信封（编排器修复循环用）
    pub fn looks_like_wire(text: &str) -> bool {
        text.contains("ACTION_TYPE:") && text.contains("TOOL_OUTPUT:")
    }

    /// 从四行线格式解析；字段缺失或 JSON 损坏时报 EnvelopeParse
    pub fn parse_wire(text: &str) -> Result<Self, AgentError> {
        let mut action_type = None;
        let mut language = None;
        let mut original_query = None;
        let mut tool_output = None;

        for line in text.lines() {
            let line = line.trim();
            if let Some(rest) = line.strip_prefix("ACTION_TYPE:") {
                action_type = ActionType::from_label(rest.trim());
            } else if let Some(rest) = line.strip_prefix("LANGUAGE:") {
                language = Language::from_code(rest.trim());
            } else if let Some(rest) = line.strip_prefix("ORIGINAL_QUERY:") {
                original_query = Some(rest.trim().to_string());
            } else if let Some(rest) = line.strip_prefix("TOOL_OUTPUT:") {
                tool_output = serde_json::from_str::<Value>(rest.trim()).ok();
            }
        }

        match (action_type, language, original_query, tool_output) {
            (Some(action_type), Some(language), Some(original_query), Some(tool_output)) => {
                Ok(Self {
                    action_type,
                    language,
                    original_query,
                    tool_output,
                })
            }
            _ => Err(AgentError::EnvelopeParse(format!(
                "incomplete envelope: {}",
                text.chars().take(80).collect::<String>()
            ))),
        }
    }
}
