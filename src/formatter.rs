//! 呈现格式化器
//!
//! 唯一允许产出最终用户可见文本的组件。纯函数：信封 + 固定模板表
//! （按动作类别 × 语言取模板），绝不调用外部动作 API。语体语言只由
//! 信封的 language 字段决定，数据值（任务名、人名）原样嵌入不翻译。
//! 错误优先：tool_output 带 "error" 键时先于一切成功模板。

use serde_json::Value;

use crate::handlers::{ActionType, AnnotatedQuery, HandoffEnvelope, Language};

/// 信封 → 本地化回复文本
pub fn format_reply(envelope: &HandoffEnvelope) -> String {
    let language = envelope.language;

    if envelope.action_type == ActionType::ClarificationRequired && !envelope.is_error() {
        return render_clarification(&envelope.tool_output);
    }

    let body = if let Some(kind) = envelope.error_kind() {
        render_error(language, kind, &envelope.tool_output)
    } else {
        render_success(envelope)
    };

    // 空检索的固定文案自带跟进问题，不再叠加通用跟进
    if ends_with_question(&body) && !is_multi_intent(envelope) {
        return body;
    }
    match follow_up(envelope) {
        Some(question) => format!("{}\n\n{}", body, question),
        None => body,
    }
}

fn ends_with_question(body: &str) -> bool {
    body.trim_end().ends_with('?')
}

fn is_multi_intent(envelope: &HandoffEnvelope) -> bool {
    AnnotatedQuery::parse(&envelope.original_query)
        .map(|q| q.distinct_tag_count() >= 2)
        .unwrap_or(false)
}

/// question + 每个候选一条项目符号，候选值逐字呈现
fn render_clarification(output: &Value) -> String {
    let question = output
        .get("question")
        .and_then(Value::as_str)
        .unwrap_or("Could you clarify what you meant?");
    let mut text = question.to_string();
    if let Some(options) = output.get("options").and_then(Value::as_array) {
        for option in options {
            if let Some(name) = option.as_str() {
                text.push_str(&format!("\n- {}", name));
            }
        }
    }
    text
}

fn render_error(language: Language, kind: &str, output: &Value) -> String {
    // 校验模板：任务名不具体有自己的固定文案
    if kind == "Invalid Task Name" {
        return match language {
            Language::En => "I need more details to create a task. Please provide a specific \
                task name, like \"Implement OAuth2 login flow\" or \"Write unit tests for auth \
                middleware\"."
                .to_string(),
            Language::Ru => "Мне нужны более подробные данные для создания задачи. Пожалуйста, \
                укажите конкретное название задачи, например \"Реализовать OAuth2-вход\" или \
                \"Написать модульные тесты для auth middleware\"."
                .to_string(),
            Language::Az => "Tapşırıq yaratmaq üçün daha çox məlumat lazımdır. Zəhmət olmasa, \
                konkret tapşırıq adı verin, məsələn \"OAuth2 giriş axınını həyata keçirmək\" və \
                ya \"auth middleware üçün vahid testlər yazmaq\"."
                .to_string(),
        };
    }

    let detail = output
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or(kind);
    match language {
        Language::En => format!("I couldn't complete that request. It seems {}", detail),
        Language::Ru => format!("Я не смог выполнить этот запрос. Похоже, {}", detail),
        Language::Az => format!("Bu sorğunu tamamlaya bilmədim. Görünür, {}", detail),
    }
}

fn field<'a>(output: &'a Value, key: &str) -> &'a str {
    output.get(key).and_then(Value::as_str).unwrap_or("N/A")
}

fn render_success(envelope: &HandoffEnvelope) -> String {
    let language = envelope.language;
    let output = &envelope.tool_output;
    match envelope.action_type {
        ActionType::TaskCreation => {
            let lines = format!(
                "- Status: {}\n- Due Date: {}\n- Priority: {}\n- Assignee: {}",
                field(output, "status"),
                field(output, "due_date"),
                field(output, "priority"),
                field(output, "assignee"),
            );
            match language {
                Language::En => format!(
                    "Done! I've created the task \"{}\".\n{}",
                    field(output, "task_name"),
                    lines
                ),
                Language::Ru => format!(
                    "Готово! Я создал задачу \"{}\".\n{}",
                    field(output, "task_name"),
                    lines
                ),
                Language::Az => format!(
                    "Hazırdır! \"{}\" tapşırığını yaratdım.\n{}",
                    field(output, "task_name"),
                    lines
                ),
            }
        }
        ActionType::TaskModification => {
            if output.get("archived").and_then(Value::as_bool) == Some(true) {
                return match language {
                    Language::En => format!(
                        "All set! The task \"{}\" has been archived.",
                        field(output, "task_name")
                    ),
                    Language::Ru => format!(
                        "Готово! Задача \"{}\" отправлена в архив.",
                        field(output, "task_name")
                    ),
                    Language::Az => format!(
                        "Hazırdır! \"{}\" tapşırığı arxivləşdirildi.",
                        field(output, "task_name")
                    ),
                };
            }
            let lines = format!(
                "- Status: {}\n- Due Date: {}\n- Priority: {}",
                field(output, "status"),
                field(output, "due_date"),
                field(output, "priority"),
            );
            match language {
                Language::En => format!(
                    "All set! I've updated \"{}\".\n{}",
                    field(output, "task_name"),
                    lines
                ),
                Language::Ru => format!(
                    "Готово! Я обновил задачу \"{}\".\n{}",
                    field(output, "task_name"),
                    lines
                ),
                Language::Az => format!(
                    "Hazırdır! \"{}\" tapşırığını yenilədim.\n{}",
                    field(output, "task_name"),
                    lines
                ),
            }
        }
        ActionType::TasksRetrieved => render_task_list(language, output),
        ActionType::TaskAnalysis => {
            let header = match language {
                Language::En => format!("Here's the workload picture for {}:", field(output, "subject")),
                Language::Ru => format!("Вот картина загрузки для {}:", field(output, "subject")),
                Language::Az => format!("{} üçün iş yükü mənzərəsi belədir:", field(output, "subject")),
            };
            let total = output.get("total").and_then(Value::as_u64).unwrap_or(0);
            let overdue = output.get("overdue").and_then(Value::as_u64).unwrap_or(0);
            let mut text = match language {
                Language::En => format!("{}\n- Total tasks: {}\n- Overdue: {}", header, total, overdue),
                Language::Ru => format!("{}\n- Всего задач: {}\n- Просрочено: {}", header, total, overdue),
                Language::Az => format!("{}\n- Cəmi tapşırıq: {}\n- Vaxtı keçmiş: {}", header, total, overdue),
            };
            if let Some(by_status) = output.get("by_status").and_then(Value::as_object) {
                for (status, count) in by_status {
                    text.push_str(&format!("\n- {}: {}", status, count));
                }
            }
            text
        }
        ActionType::CommentAdded => match language {
            Language::En => format!(
                "Done! I've added the comment \"{}\" to the \"{}\" task.",
                field(output, "comment"),
                field(output, "task_name")
            ),
            Language::Ru => format!(
                "Готово! Я добавил комментарий \"{}\" к задаче \"{}\".",
                field(output, "comment"),
                field(output, "task_name")
            ),
            Language::Az => format!(
                "Hazırdır! \"{1}\" tapşırığına \"{0}\" şərhini əlavə etdim.",
                field(output, "comment"),
                field(output, "task_name")
            ),
        },
        ActionType::CommentsRetrieved => {
            let task_name = field(output, "task_name");
            let comments = output
                .get("comments")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            if comments.is_empty() {
                return match language {
                    Language::En => format!("There are no comments on \"{}\" yet.", task_name),
                    Language::Ru => format!("К задаче \"{}\" пока нет комментариев.", task_name),
                    Language::Az => format!("\"{}\" tapşırığında hələ şərh yoxdur.", task_name),
                };
            }
            let mut text = match language {
                Language::En => format!("Here are the comments on \"{}\":", task_name),
                Language::Ru => format!("Вот комментарии к задаче \"{}\":", task_name),
                Language::Az => format!("\"{}\" tapşırığının şərhləri bunlardır:", task_name),
            };
            for comment in &comments {
                text.push_str(&format!(
                    "\n- {}: {}",
                    comment.get("author").and_then(Value::as_str).unwrap_or("N/A"),
                    comment.get("text").and_then(Value::as_str).unwrap_or("")
                ));
            }
            text
        }
        ActionType::ReminderSet => match language {
            Language::En => format!(
                "Got it! I'll ping {} on {} at {} to remind them about \"{}\".",
                field(output, "target_name"),
                field(output, "remind_date"),
                field(output, "remind_time"),
                field(output, "task_name")
            ),
            Language::Ru => format!(
                "Понял! Я напомню {} о задаче \"{}\" {} в {}.",
                field(output, "target_name"),
                field(output, "task_name"),
                field(output, "remind_date"),
                field(output, "remind_time")
            ),
            Language::Az => format!(
                "Aydındır! {} üçün \"{}\" tapşırığını {} tarixində saat {} xatırladacağam.",
                field(output, "target_name"),
                field(output, "task_name"),
                field(output, "remind_date"),
                field(output, "remind_time")
            ),
        },
        ActionType::ContentGenerated => {
            let header = match language {
                Language::En => "Content Created Successfully.",
                Language::Ru => "Контент успешно создан.",
                Language::Az => "Məzmun uğurla yaradıldı.",
            };
            format!("{}\n\n{}", header, field(output, "content"))
        }
        ActionType::UsersListed => {
            let mut text = match language {
                Language::En => "Sure, here are all the users in the workspace:".to_string(),
                Language::Ru => "Конечно, вот все пользователи в рабочем пространстве:".to_string(),
                Language::Az => "Əlbəttə, iş məkanındakı bütün istifadəçilər bunlardır:".to_string(),
            };
            if let Some(users) = output.get("users").and_then(Value::as_array) {
                for user in users {
                    let name = user.get("name").and_then(Value::as_str).unwrap_or("N/A");
                    match user.get("email").and_then(Value::as_str) {
                        Some(email) => text.push_str(&format!("\n- {} ({})", name, email)),
                        None => text.push_str(&format!("\n- {}", name)),
                    }
                }
            }
            text
        }
        ActionType::UserFound => match language {
            Language::En => format!(
                "Found them! Here are the details:\n- Name: {}\n- User ID: {}",
                field(output, "name"),
                field(output, "id")
            ),
            Language::Ru => format!(
                "Нашел! Вот данные:\n- Имя: {}\n- ID пользователя: {}",
                field(output, "name"),
                field(output, "id")
            ),
            Language::Az => format!(
                "Tapdım! Məlumatlar bunlardır:\n- Ad: {}\n- İstifadəçi ID: {}",
                field(output, "name"),
                field(output, "id")
            ),
        },
        // 无错误的 ClarificationRequired 在 format_reply 顶部已拦截
        ActionType::ClarificationRequired => render_clarification(output),
    }
}

/// 互斥分桶：逾期 → 阻塞 → 高 → 中 → 低；每个任务只进第一个命中的桶，
/// Done 任务完全跳过
fn render_task_list(language: Language, output: &Value) -> String {
    let results = output
        .get("results")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let visible: Vec<&Value> = results
        .iter()
        .filter(|t| t.get("status").and_then(Value::as_str) != Some("Done"))
        .collect();

    if visible.is_empty() {
        return match language {
            Language::En => "Looks like you don't have any tasks that match that search. Is \
                there anything else I can look for?"
                .to_string(),
            Language::Ru => "Похоже, у вас нет задач, соответствующих этому поиску. Могу ли я \
                поискать что-то еще?"
                .to_string(),
            Language::Az => "Görünür, bu axtarışa uyğun heç bir tapşırığınız yoxdur. Başqa bir \
                şey axtara bilərəm?"
                .to_string(),
        };
    }

    let mut overdue = Vec::new();
    let mut blocked = Vec::new();
    let mut high = Vec::new();
    let mut medium = Vec::new();
    let mut low = Vec::new();
    for task in visible {
        let is_overdue = task.get("overdue").and_then(Value::as_bool) == Some(true);
        let status = task.get("status").and_then(Value::as_str).unwrap_or("");
        let priority = task.get("priority").and_then(Value::as_str).unwrap_or("");
        if is_overdue {
            overdue.push(task);
        } else if status == "Blocked" {
            blocked.push(task);
        } else if priority == "High" {
            high.push(task);
        } else if priority == "Medium" {
            medium.push(task);
        } else {
            low.push(task);
        }
    }

    let mut text = match language {
        Language::En => "Okay, I've looked over your tasks. Here's what's on your plate:".to_string(),
        Language::Ru => "Хорошо, я просмотрел ваши задачи. Вот что у вас в планах:".to_string(),
        Language::Az => "Yaxşı, tapşırıqlarınıza baxdım. Budur sizin planınız:".to_string(),
    };

    let headers: [(&Vec<&Value>, &str); 5] = match language {
        Language::En => [
            (&overdue, "> First up, Overdue tasks should be tackled immediately"),
            (&blocked, "> These tasks are currently Blocked"),
            (&high, "> For your upcoming High-priority tasks:"),
            (&medium, "> Upcoming Medium-priority tasks:"),
            (&low, "> Low-priority work:"),
        ],
        Language::Ru => [
            (&overdue, "> В первую очередь, просроченные задачи, которые нужно решить немедленно"),
            (&blocked, "> Эти задачи в настоящее время заблокированы"),
            (&high, "> Ваши предстоящие высокоприоритетные задачи:"),
            (&medium, "> Ваши предстоящие задачи со средним приоритетом:"),
            (&low, "> Низкоприоритетная работа:"),
        ],
        Language::Az => [
            (&overdue, "> İlk növbədə, vaxtı keçmiş və dərhal həll edilməli olan tapşırıqlar"),
            (&blocked, "> Bu tapşırıqlar hazırda bloklanıb"),
            (&high, "> Qarşıdan gələn Yüksək prioritetli tapşırıqlarınız:"),
            (&medium, "> Qarşıdan gələn Orta prioritetli tapşırıqlarınız:"),
            (&low, "> Aşağı prioritetli işlər:"),
        ],
    };

    for (bucket, header) in headers {
        if bucket.is_empty() {
            continue;
        }
        text.push_str(&format!("\n\n{}", header));
        for task in bucket {
            let name = task.get("name").and_then(Value::as_str).unwrap_or("N/A");
            let due = task.get("due_date").and_then(Value::as_str).unwrap_or("N/A");
            text.push_str(&format!("\n- \"{}\", due on {}.", name, due));
        }
    }
    text
}

/// 多意图消息的续作问题：点名第一个标签之后的未执行从句；单意图时 None
pub(crate) fn continuation_question(envelope: &HandoffEnvelope) -> Option<String> {
    let query = AnnotatedQuery::parse(&envelope.original_query)?;
    if query.distinct_tag_count() < 2 {
        return None;
    }
    let next = query.clause_after_first()?;
    Some(match envelope.language {
        Language::En => format!("Shall I now proceed with \"{}\"?", next),
        Language::Ru => format!("Теперь приступить к \"{}\"?", next),
        Language::Az => format!("İndi \"{}\" ilə davam edim?", next),
    })
}

/// 跟进问题：两个以上不同标签 → 点名下一个未执行从句；单标签 → 通用跟进
fn follow_up(envelope: &HandoffEnvelope) -> Option<String> {
    let query = AnnotatedQuery::parse(&envelope.original_query)?;
    if query.distinct_tag_count() >= 2 {
        continuation_question(envelope)
    } else {
        Some(match envelope.language {
            Language::En => "Is there anything else I can help with?".to_string(),
            Language::Ru => "Могу ли я чем-нибудь еще помочь?".to_string(),
            Language::Az => "Başqa kömək edə biləcəyim bir şey var?".to_string(),
        })
    }
}
