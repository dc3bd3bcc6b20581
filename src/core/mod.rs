//! 核心层：错误类型、每请求上下文、回合编排

pub mod context;
pub mod error;
pub mod orchestrator;

pub use context::RequestContext;
pub use error::AgentError;
pub use orchestrator::{Orchestrator, TurnResult};
