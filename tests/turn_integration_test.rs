//! 回合集成测试
//!
//! 全 Mock 栈（工作区 / 网关 / 生成器 + 内存 SQLite）跑完整回合：
//! 路由 → 处理器 → 格式化 → 持久化 → 副作用派发。

use std::sync::Arc;

use chrono::NaiveDate;

use blaid::core::{Orchestrator, RequestContext};
use blaid::directory::{DirectoryResolver, DirectoryStore, Identity};
use blaid::handlers::{
    analyze::TaskAnalysisHandler, comment::CommentHandler, content::ContentGeneratorHandler,
    create::TaskCreationHandler, modify::TaskModificationHandler, remind::ReminderHandler,
    retrieve::TaskRetrievalHandler, users::UserLookupHandler, HandlerRegistry,
};
use blaid::llm::MockGenerator;
use blaid::messaging::MockGateway;
use blaid::notify::SideEffectDispatcher;
use blaid::router::{Router, UNSUPPORTED_LANGUAGE_REPLY};
use blaid::store::ChatStore;
use blaid::workspace::{MockWorkspace, Task, WorkspaceUser};

struct Stack {
    orchestrator: Orchestrator,
    store: Arc<ChatStore>,
    workspace: Arc<MockWorkspace>,
    gateway: Arc<MockGateway>,
}

async fn build_stack() -> Stack {
    let store = Arc::new(ChatStore::in_memory().await.unwrap());
    for (id, name, contact) in [
        ("u1", "Aboo Fainaz", "+994500000001"),
        ("u2", "Shafraz", "+994500000002"),
    ] {
        store
            .upsert_identity(&Identity {
                canonical_id: id.to_string(),
                display_name: name.to_string(),
                contact_address: contact.to_string(),
            })
            .await
            .unwrap();
    }

    let workspace = Arc::new(MockWorkspace::with_users(vec![
        WorkspaceUser {
            id: "u1".to_string(),
            name: "Aboo Fainaz".to_string(),
            email: Some("aboo@example.com".to_string()),
        },
        WorkspaceUser {
            id: "u2".to_string(),
            name: "Shafraz".to_string(),
            email: None,
        },
    ]));

    let gateway = Arc::new(MockGateway::new());
    let resolver = Arc::new(DirectoryResolver::new(
        store.clone() as Arc<dyn DirectoryStore>
    ));
    let dispatcher = Arc::new(SideEffectDispatcher::new(store.clone(), gateway.clone()));

    let mut registry = HandlerRegistry::new();
    registry.register(TaskCreationHandler::new(
        workspace.clone(),
        resolver.clone(),
        dispatcher.clone(),
    ));
    registry.register(TaskModificationHandler::new(
        workspace.clone(),
        resolver.clone(),
        dispatcher.clone(),
    ));
    registry.register(TaskRetrievalHandler::new(
        workspace.clone(),
        resolver.clone(),
    ));
    registry.register(TaskAnalysisHandler::new(
        workspace.clone(),
        resolver.clone(),
    ));
    registry.register(CommentHandler::new(
        workspace.clone(),
        resolver.clone(),
        dispatcher.clone(),
    ));
    registry.register(ReminderHandler::new(workspace.clone(), resolver.clone()));
    registry.register(ContentGeneratorHandler::new(
        Arc::new(MockGenerator::new()),
        workspace.clone(),
    ));
    registry.register(UserLookupHandler::new(workspace.clone(), resolver.clone()));
    let handlers = Arc::new(registry);

    let router = Router::new(handlers.clone(), resolver);
    let orchestrator = Orchestrator::new(store.clone(), router, handlers);
    Stack {
        orchestrator,
        store,
        workspace,
        gateway,
    }
}

fn ctx() -> RequestContext {
    RequestContext::new(
        "thread-1",
        "u1",
        "db",
        NaiveDate::from_ymd_opt(2025, 9, 19).unwrap(),
    )
}

#[tokio::test]
async fn unsupported_language_never_reaches_a_handler() {
    let stack = build_stack().await;

    let result = stack
        .orchestrator
        .run_turn("今天的任务是什么", &ctx(), "web")
        .await;

    assert_eq!(result.reply, UNSUPPORTED_LANGUAGE_REPLY);
    assert_eq!(stack.workspace.mutations(), 0);
    assert_eq!(result.history.len(), 2);
}

#[tokio::test]
async fn cross_assignment_creates_notifies_and_caches() {
    let stack = build_stack().await;

    let result = stack
        .orchestrator
        .run_turn(
            "Create a task 'Review the Q3 report' for Shafraz",
            &ctx(),
            "web",
        )
        .await;

    assert!(result
        .reply
        .starts_with("Task 'Review the Q3 report' has been created successfully."));

    // 一次改状态调用
    assert_eq!(stack.workspace.mutations(), 1);
    // 被指派人收到外发通知与持久通知行，发起者与类别可追溯
    assert_eq!(stack.gateway.sent_count(), 1);
    let pending = stack.store.notifications_for("u2").await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].sender_id, "u1");
    assert_eq!(pending[0].kind, "assignment");
    assert!(stack
        .store
        .thread(&pending[0].thread_id)
        .await
        .unwrap()
        .is_some());
    // 线程任务缓存有了这条任务
    let cached = stack.store.thread_tasks("thread-1").await.unwrap();
    assert_eq!(cached.len(), 1);
}

#[tokio::test]
async fn self_assignment_sends_nothing() {
    let stack = build_stack().await;

    let result = stack
        .orchestrator
        .run_turn("Create a task 'Prepare the demo' for me", &ctx(), "web")
        .await;

    assert!(result.reply.contains("has been created successfully"));
    assert_eq!(stack.gateway.sent_count(), 0);
}

#[tokio::test]
async fn ambiguous_name_pauses_the_turn_with_options() {
    let stack = build_stack().await;
    stack
        .store
        .upsert_identity(&Identity {
            canonical_id: "u3".to_string(),
            display_name: "Aboo Ahamed".to_string(),
            contact_address: "+994500000003".to_string(),
        })
        .await
        .unwrap();

    let result = stack
        .orchestrator
        .run_turn("Create a task 'Ship it' for Aboo", &ctx(), "web")
        .await;

    assert!(result.reply.contains("Which one did you mean?"));
    assert!(result.reply.contains("Aboo Fainaz"));
    assert!(result.reply.contains("Aboo Ahamed"));
    // 澄清回合不触发任何工作区写入
    assert_eq!(stack.workspace.mutations(), 0);
}

#[tokio::test]
async fn retrieval_turn_buckets_open_tasks() {
    let stack = build_stack().await;
    stack.workspace.push_task(Task {
        id: "t-1".to_string(),
        name: "Chase the invoice".to_string(),
        status: "Not started".to_string(),
        due_date: NaiveDate::from_ymd_opt(2025, 9, 1),
        priority: "Medium".to_string(),
        created_by: Some("u1".to_string()),
        assignee: Some("u1".to_string()),
        url: None,
    });

    let result = stack
        .orchestrator
        .run_turn("Show my tasks", &ctx(), "web")
        .await;

    assert!(result.reply.contains("Overdue tasks should be tackled immediately"));
    assert!(result.reply.contains("Chase the invoice"));
}

#[tokio::test]
async fn multi_intent_executes_first_and_proposes_second() {
    let stack = build_stack().await;

    let result = stack
        .orchestrator
        .run_turn(
            "Create a task 'Fix the login bug' and then show my tasks",
            &ctx(),
            "web",
        )
        .await;

    // 只有创建执行了；续作问题点名第二个从句
    assert_eq!(stack.workspace.mutations(), 1);
    assert!(result.reply.contains("has been created successfully"));
    assert!(result.reply.contains("Shall I now proceed with"));
}

#[tokio::test]
async fn second_turn_pronoun_reaches_the_task_created_earlier() {
    let stack = build_stack().await;

    stack
        .orchestrator
        .run_turn("Create a task 'Fix the login bug'", &ctx(), "web")
        .await;
    let result = stack
        .orchestrator
        .run_turn("Mark that task as done", &ctx(), "web")
        .await;

    assert!(!result.reply.contains("Please name the task"));
    let tasks = stack.workspace.tasks.lock().unwrap();
    assert_eq!(tasks[0].name, "Fix the login bug");
    assert_eq!(tasks[0].status, "Done");
}

#[tokio::test]
async fn russian_turn_replies_in_russian() {
    let stack = build_stack().await;

    let result = stack
        .orchestrator
        .run_turn("Покажи мои задачи", &ctx(), "web")
        .await;

    assert!(result.reply.contains("Похоже, у вас нет задач"));
}
