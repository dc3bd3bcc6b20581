//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `BLAID__*` 覆盖（双下划线
//! 表示嵌套，如 `BLAID__WORKSPACE__DATABASE_ID=abc`）。密钥类字段只放
//! 环境变量，不进 TOML。

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub workspace: WorkspaceSection,
    #[serde(default)]
    pub whatsapp: WhatsAppSection,
    #[serde(default)]
    pub llm: LlmSection,
}

/// [app] 段：服务名与监听地址
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

/// [database] 段：会话存储的 SQLite 位置
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSection {
    #[serde(default = "default_db_url")]
    pub url: String,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: default_db_url(),
        }
    }
}

fn default_db_url() -> String {
    "sqlite://blaid.db?mode=rwc".to_string()
}

/// [workspace] 段：任务工作区 API 与默认任务库
#[derive(Debug, Clone, Deserialize, Default)]
pub struct WorkspaceSection {
    #[serde(default = "default_workspace_base_url")]
    pub base_url: String,
    /// API 密钥，通常经 BLAID__WORKSPACE__API_KEY 注入
    pub api_key: Option<String>,
    /// 请求未携带时使用的任务库 ID
    pub database_id: Option<String>,
}

fn default_workspace_base_url() -> String {
    "https://api.notion.com".to_string()
}

/// [whatsapp] 段：Cloud API 凭据与 Webhook 校验令牌
#[derive(Debug, Clone, Deserialize, Default)]
pub struct WhatsAppSection {
    pub access_token: Option<String>,
    pub phone_number_id: Option<String>,
    #[serde(default = "default_verify_token")]
    pub verify_token: String,
}

fn default_verify_token() -> String {
    "blaid".to_string()
}

/// [llm] 段：内容生成后端
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmSection {
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app: AppSection::default(),
            database: DatabaseSection::default(),
            workspace: WorkspaceSection::default(),
            whatsapp: WhatsAppSection::default(),
            llm: LlmSection::default(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 BLAID__* 可覆盖
pub fn load_config() -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default", "default"] {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("BLAID")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_section() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.app.bind_addr, "0.0.0.0:8080");
        assert!(cfg.database.url.starts_with("sqlite://"));
        assert_eq!(cfg.whatsapp.verify_token, "blaid");
        assert!(cfg.workspace.api_key.is_none());
    }
}
