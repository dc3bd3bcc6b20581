//! 从句文本抽取
//!
//! 处理器共用的确定性抽取：引号内容、任务名、人名。语言理解本身是
//! 非目标，这里只做协议需要的最小字段抽取。

use chrono::NaiveDate;
use regex::Regex;
use std::sync::OnceLock;

fn quote_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"["'«]([^"'»]+)["'»]"#).expect("quote regex"))
}

/// 第一个单引号或双引号包裹的片段
pub fn extract_quoted(text: &str) -> Option<String> {
    quote_regex().captures(text).map(|c| c[1].trim().to_string())
}

/// 全部引号片段（出现顺序）
pub fn extract_all_quoted(text: &str) -> Vec<String> {
    quote_regex()
        .captures_iter(text)
        .map(|c| c[1].trim().to_string())
        .collect()
}

/// 泛型占位任务名拒绝表（校验阶段使用）
const VAGUE_TASK_NAMES: &[&str] = &["task", "a task", "new task", "task 1", "todo", "задача", "tapşırıq"];

/// 从创建类从句中提取任务名：先取引号，再取 "task to/for/about/:" 之后的部分
pub fn task_name_from_clause(clause: &str) -> Option<String> {
    if let Some(quoted) = extract_quoted(clause) {
        return Some(quoted);
    }

    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(
            r"(?i)(?:task|to-do|action item|задач[ау]|tapşırıq)\s*(?:to|for|about|:)\s+(.+)",
        )
        .expect("task name regex")
    });

    let tail = re.captures(clause).map(|c| c[1].trim().to_string())?;
    // 去掉尾随的人名指派短语（"... for John" 由身份解析单独处理）
    let tail = tail
        .trim_end_matches(|c: char| c == '.' || c == '!' || c == ',')
        .trim()
        .to_string();
    if tail.is_empty() {
        None
    } else {
        Some(tail)
    }
}

/// 任务名是否为泛型占位（"task"、"new task" 一类）
pub fn is_vague_task_name(name: &str) -> bool {
    let lower = name.trim().to_lowercase();
    if lower.is_empty() || lower.split_whitespace().count() == 1 && lower.len() < 5 {
        return true;
    }
    VAGUE_TASK_NAMES.contains(&lower.as_str())
}

/// 从句中被指派 / 提及的人名："for Aboo"、"to Sarah"、"assign ... to X"、"@X"
pub fn person_name(clause: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(
            r"(?:@|\b(?i:for|to|assignee|assigned to|named|mention(?:ing)?|remind|для|üçün)\s+)([A-ZА-ЯЁƏİÖÜÇŞĞ][\w'-]*(?:\s+[A-ZА-ЯЁƏİÖÜÇŞĞ][\w'-]*)*)",
        )
        .expect("person regex")
    });
    let name = re.captures(clause).map(|c| c[1].trim().to_string())?;
    // "me" / 指代词不是人名
    match name.to_lowercase().as_str() {
        "me" | "myself" | "мне" | "mənə" => None,
        _ => Some(name),
    }
}

/// 从句是否用指代指向此前提过的任务（"that task" / "эту задачу" / "o tapşırığı"）
pub fn references_previous_task(clause: &str) -> bool {
    const PHRASES: &[&str] = &[
        "that task",
        "this task",
        "the task",
        "эту задачу",
        "ту задачу",
        "эта задача",
        "o tapşırığı",
        "bu tapşırığı",
    ];
    let lower = clause.to_lowercase();
    PHRASES.iter().any(|p| lower.contains(p))
}

/// 从句里的目标状态："done" / "in progress" / "blocked" / "not started"（含俄/阿塞拜疆语变体）
pub fn status_keyword(clause: &str) -> Option<&'static str> {
    let lower = clause.to_lowercase();
    if lower.contains("in progress") || lower.contains("в работ") || lower.contains("davam edir") {
        Some("In Progress")
    } else if lower.contains("not started") || lower.contains("не начат") {
        Some("Not started")
    } else if lower.contains("done") || lower.contains("complete") || lower.contains("готово") || lower.contains("выполнен") || lower.contains("hazır") {
        Some("Done")
    } else if lower.contains("blocked") || lower.contains("заблокирован") || lower.contains("bloklan") {
        Some("Blocked")
    } else {
        None
    }
}

/// 从句里的目标优先级
pub fn priority_keyword(clause: &str) -> Option<&'static str> {
    let lower = clause.to_lowercase();
    if lower.contains("high") || lower.contains("высок") || lower.contains("yüksək") {
        Some("High")
    } else if lower.contains("medium") || lower.contains("средн") || lower.contains("orta") {
        Some("Medium")
    } else if lower.contains("low") || lower.contains("низк") || lower.contains("aşağı") {
        Some("Low")
    } else {
        None
    }
}

/// 从句里的日期："today" / "tomorrow" / ISO `YYYY-MM-DD`
pub fn date_hint(clause: &str, today: NaiveDate) -> Option<NaiveDate> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"\b(\d{4}-\d{2}-\d{2})\b").expect("date regex"));
    if let Some(c) = re.captures(clause) {
        if let Ok(d) = NaiveDate::parse_from_str(&c[1], "%Y-%m-%d") {
            return Some(d);
        }
    }

    let lower = clause.to_lowercase();
    if lower.contains("tomorrow") || lower.contains("завтра") || lower.contains("sabah") {
        today.succ_opt()
    } else if lower.contains("today") || lower.contains("сегодня") || lower.contains("bu gün") {
        Some(today)
    } else {
        None
    }
}

/// 从句里的时刻："at 5pm" / "at 17:30" / "в 9:00" / "saat 14:00"
pub fn time_hint(clause: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?i)(?:\bat|\bв|\bsaat)\s+(\d{1,2}(?::\d{2})?\s*(?:am|pm)?)")
            .expect("time regex")
    });
    re.captures(clause).map(|c| c[1].trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoted_segment_wins() {
        assert_eq!(
            task_name_from_clause("Create a task 'Add unit tests for AuthService'").unwrap(),
            "Add unit tests for AuthService"
        );
    }

    #[test]
    fn task_to_pattern_extracts_tail() {
        assert_eq!(
            task_name_from_clause("Create a task to implement OAuth2 login flow").unwrap(),
            "implement OAuth2 login flow"
        );
    }

    #[test]
    fn vague_requests_yield_nothing_specific() {
        assert!(task_name_from_clause("create a task").is_none());
        assert!(is_vague_task_name("task"));
        assert!(is_vague_task_name("new task"));
        assert!(!is_vague_task_name("Implement OAuth2 login flow"));
    }

    #[test]
    fn property_hints_are_recognized() {
        assert_eq!(status_keyword("mark it as done"), Some("Done"));
        assert_eq!(status_keyword("set it to in progress"), Some("In Progress"));
        assert_eq!(priority_keyword("make it low priority"), Some("Low"));

        let today = NaiveDate::from_ymd_opt(2025, 9, 19).unwrap();
        assert_eq!(date_hint("due tomorrow", today), today.succ_opt());
        assert_eq!(
            date_hint("due on 2025-10-01", today),
            NaiveDate::from_ymd_opt(2025, 10, 1)
        );
        assert_eq!(time_hint("remind me at 5pm"), Some("5pm".to_string()));
    }

    #[test]
    fn pronoun_task_references_are_recognized() {
        assert!(references_previous_task("Mark that task as done"));
        assert!(references_previous_task("add a comment on the task"));
        assert!(references_previous_task("Напомни мне про эту задачу"));
        assert!(!references_previous_task("Mark 'Review the Q3 report' as done"));
    }

    #[test]
    fn person_after_for_is_captured() {
        assert_eq!(
            person_name("Create a task for Aboo to review the document").unwrap(),
            "Aboo"
        );
        assert!(person_name("create a task for me").is_none());
    }
}
