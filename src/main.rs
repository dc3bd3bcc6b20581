//! BLAID - 任务管理聊天助手
//!
//! 入口：初始化日志、加载配置、建存储与目录、装配处理器注册表，
//! 启动 Web 聊天与 WhatsApp Webhook 服务。

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use blaid::config::load_config;
use blaid::core::Orchestrator;
use blaid::directory::{DirectoryResolver, DirectoryStore, Identity};
use blaid::handlers::{
    analyze::TaskAnalysisHandler, comment::CommentHandler, content::ContentGeneratorHandler,
    create::TaskCreationHandler, modify::TaskModificationHandler, remind::ReminderHandler,
    retrieve::TaskRetrievalHandler, users::UserLookupHandler, HandlerRegistry,
};
use blaid::integrations::web::{self, WebState};
use blaid::integrations::whatsapp::{self, WhatsappState};
use blaid::llm::OpenAiGenerator;
use blaid::messaging::WhatsAppGateway;
use blaid::notify::SideEffectDispatcher;
use blaid::router::Router;
use blaid::store::ChatStore;
use blaid::workspace::{HttpWorkspace, WorkspaceApi};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 日志：默认 info，可通过 RUST_LOG 覆盖
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with(fmt::layer())
        .init();

    let cfg = load_config().context("Failed to load config")?;

    let store = Arc::new(
        ChatStore::connect(&cfg.database.url)
            .await
            .context("Failed to open chat store")?,
    );

    let api_key = cfg
        .workspace
        .api_key
        .as_deref()
        .context("workspace.api_key is not set")?;
    let workspace: Arc<dyn WorkspaceApi> =
        Arc::new(HttpWorkspace::new(&cfg.workspace.base_url, api_key));

    // 启动时从工作区用户清单同步目录
    match workspace.list_users().await {
        Ok(users) => {
            for user in &users {
                store
                    .upsert_identity(&Identity {
                        canonical_id: user.id.clone(),
                        display_name: user.name.clone(),
                        contact_address: user.email.clone().unwrap_or_default(),
                    })
                    .await?;
            }
            tracing::info!("Directory synced: {} users", users.len());
        }
        Err(e) => tracing::warn!("Directory sync failed, continuing with stored rows: {}", e),
    }

    let resolver = Arc::new(DirectoryResolver::new(
        store.clone() as Arc<dyn DirectoryStore>
    ));

    let access_token = cfg
        .whatsapp
        .access_token
        .as_deref()
        .context("whatsapp.access_token is not set")?;
    let phone_number_id = cfg
        .whatsapp
        .phone_number_id
        .as_deref()
        .context("whatsapp.phone_number_id is not set")?;
    let gateway = Arc::new(WhatsAppGateway::new(access_token, phone_number_id));

    let dispatcher = Arc::new(SideEffectDispatcher::new(store.clone(), gateway.clone()));
    let generator = Arc::new(OpenAiGenerator::new(
        cfg.llm.base_url.as_deref(),
        &cfg.llm.model,
        cfg.llm.api_key.as_deref(),
    ));

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
    registry.register(ContentGeneratorHandler::new(generator, workspace.clone()));
    registry.register(UserLookupHandler::new(workspace.clone(), resolver.clone()));
    let handlers = Arc::new(registry);

    let router = Router::new(handlers.clone(), resolver);
    let orchestrator = Arc::new(Orchestrator::new(store.clone(), router, handlers));
    let default_database_id = cfg.workspace.database_id.clone().unwrap_or_default();

    let wa_state = Arc::new(WhatsappState {
        orchestrator: orchestrator.clone(),
        store: store.clone(),
        gateway,
        verify_token: cfg.whatsapp.verify_token.clone(),
        default_database_id: default_database_id.clone(),
    });
    let web_state = Arc::new(WebState {
        orchestrator,
        store,
        default_database_id,
    });

    let app = whatsapp::create_router(wa_state).merge(web::create_router(web_state));
    let listener = tokio::net::TcpListener::bind(&cfg.app.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", cfg.app.bind_addr))?;
    tracing::info!("Listening on {}", cfg.app.bind_addr);
    axum::serve(listener, app).await.context("Server failed")?;

    Ok(())
}
