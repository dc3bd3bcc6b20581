//! 用户查询处理器
//!
//! 点名某人时走歧义子协议产出 UserFound；否则列出工作区全部人类用户
//! （机器人在工作区客户端已被过滤）。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::core::RequestContext;
use crate::directory::DirectoryResolver;
use crate::handlers::{
    parse, resolve_person, ActionType, AnnotatedQuery, Handler, HandlerKind, HandoffEnvelope,
    NameResolution,
};
use crate::workspace::WorkspaceApi;

pub struct UserLookupHandler {
    workspace: Arc<dyn WorkspaceApi>,
    resolver: Arc<DirectoryResolver>,
}

impl UserLookupHandler {
    pub fn new(workspace: Arc<dyn WorkspaceApi>, resolver: Arc<DirectoryResolver>) -> Self {
        Self { workspace, resolver }
    }
}

#[async_trait]
impl Handler for UserLookupHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::UserLookup
    }

    async fn handle(&self, query: &AnnotatedQuery, _ctx: &RequestContext) -> HandoffEnvelope {
        let clause = query.clause_for(HandlerKind::UserLookup).unwrap_or_default();

        let name = parse::extract_quoted(&clause).or_else(|| parse::person_name(&clause));
        if let Some(name) = name {
            return match resolve_person(&self.resolver, &name, ActionType::UserFound, query).await {
                NameResolution::Identity(identity) => HandoffEnvelope::success(
                    ActionType::UserFound,
                    query.language,
                    query.full.clone(),
                    json!({
                        "id": identity.canonical_id,
                        "name": identity.display_name,
                    }),
                ),
                NameResolution::Envelope(envelope) => envelope,
            };
        }

        match self.workspace.list_users().await {
            Ok(users) => HandoffEnvelope::success(
                ActionType::UsersListed,
                query.language,
                query.full.clone(),
                json!({
                    "count": users.len(),
                    "users": users
                        .iter()
                        .map(|u| json!({ "id": u.id, "name": u.name, "email": u.email }))
                        .collect::<Vec<_>>(),
                }),
            ),
            Err(e) => {
                tracing::error!("User listing failed: {}", e);
                HandoffEnvelope::error(
                    ActionType::UsersListed,
                    query.language,
                    query.full.clone(),
                    "Workspace Error",
                    &e.to_string(),
                )
            }
        }
    }
}
