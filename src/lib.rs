//! BLAID - 任务管理聊天助手的多智能体派发与移交协议
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、每请求上下文、回合编排与移交修复
//! - **router**: 语言检测、从句切分打标、向专家处理器委派
//! - **handlers**: 专家处理器契约、8 个处理器实现与移交信封
//! - **directory**: 用户目录解析（精确 / 多匹配 / 模糊建议）
//! - **formatter**: 呈现格式化器（信封 → 本地化回复，纯函数）
//! - **notify**: 指派通知文案与副作用派发
//! - **workspace**: 任务工作区 API 客户端（HTTP / Mock）
//! - **messaging**: 外发消息网关与分段（WhatsApp Cloud API / Mock）
//! - **store**: 会话存储（SQLite：线程、消息、任务缓存、目录、通知）
//! - **llm**: 内容生成后端（OpenAI 兼容 / Mock）
//! - **integrations**: 通道集成（WhatsApp Webhook）

pub mod config;
pub mod core;
pub mod directory;
pub mod formatter;
pub mod handlers;
pub mod integrations;
pub mod llm;
pub mod messaging;
pub mod notify;
pub mod router;
pub mod store;
pub mod workspace;
