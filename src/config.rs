//! TOML configuration parsing.
//!
//! Every section has defaults, so an empty file is a valid configuration.
//! Secrets may live in the file or in the environment; environment values
//! are only consulted when the file leaves a field unset.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub notion: NotionConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub keygen: KeygenConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/capture-os.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Public origin of this server, used to build the OAuth redirect URI.
    #[serde(default)]
    pub base_url: String,
    /// Take the client IP from the first `X-Forwarded-For` hop.
    #[serde(default)]
    pub trust_proxy: bool,
    #[serde(default = "default_setup_page")]
    pub setup_page: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            base_url: String::new(),
            trust_proxy: false,
            setup_page: default_setup_page(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:3000".to_string()
}
fn default_setup_page() -> PathBuf {
    PathBuf::from("./public/index.html")
}

impl ServerConfig {
    pub fn redirect_uri(&self) -> String {
        format!("{}/callback", self.base_url)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotionConfig {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default = "default_notion_api_base")]
    pub api_base: String,
    #[serde(default = "default_notion_version")]
    pub version: String,
    #[serde(default = "default_notion_timeout")]
    pub timeout_secs: u64,
}

impl Default for NotionConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            api_base: default_notion_api_base(),
            version: default_notion_version(),
            timeout_secs: default_notion_timeout(),
        }
    }
}

fn default_notion_api_base() -> String {
    "https://api.notion.com".to_string()
}
fn default_notion_version() -> String {
    "2022-06-28".to_string()
}
fn default_notion_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_llm_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            api_key_env: default_llm_key_env(),
            api_key: None,
            timeout_secs: default_llm_timeout(),
        }
    }
}

fn default_llm_base_url() -> String {
    "https://open.bigmodel.cn/api/paas/v4".to_string()
}
fn default_llm_model() -> String {
    "glm-4.6v".to_string()
}
fn default_llm_key_env() -> String {
    "ZHIPU_API_KEY".to_string()
}
fn default_llm_timeout() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout(),
            max_chars: default_max_chars(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_fetch_timeout() -> u64 {
    10
}
fn default_max_chars() -> usize {
    6000
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DiscoveryConfig {
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            delay_ms: default_delay_ms(),
            page_size: default_page_size(),
        }
    }
}

fn default_attempts() -> u32 {
    5
}
fn default_delay_ms() -> u64 {
    2000
}
fn default_page_size() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    #[serde(default = "default_auth_per_minute")]
    pub auth_per_minute: u32,
    #[serde(default = "default_capture_per_minute")]
    pub capture_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            auth_per_minute: default_auth_per_minute(),
            capture_per_minute: default_capture_per_minute(),
        }
    }
}

fn default_auth_per_minute() -> u32 {
    5
}
fn default_capture_per_minute() -> u32 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct KeygenConfig {
    #[serde(default = "default_exports_dir")]
    pub exports_dir: PathBuf,
}

impl Default for KeygenConfig {
    fn default() -> Self {
        Self {
            exports_dir: default_exports_dir(),
        }
    }
}

fn default_exports_dir() -> PathBuf {
    PathBuf::from("./exports")
}

impl LlmConfig {
    pub fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse, normalise, and validate a configuration document.
pub fn parse_config(content: &str) -> Result<Config> {
    let mut config: Config =
        toml::from_str(content).with_context(|| "Failed to parse config file")?;

    config.server.base_url = config.server.base_url.trim().trim_end_matches('/').to_string();
    config.llm.base_url = config.llm.base_url.trim().trim_end_matches('/').to_string();
    config.notion.api_base = config.notion.api_base.trim().trim_end_matches('/').to_string();

    config.notion.client_id = secret_or_env(config.notion.client_id.take(), "NOTION_CLIENT_ID");
    config.notion.client_secret =
        secret_or_env(config.notion.client_secret.take(), "NOTION_CLIENT_SECRET");
    let key_env = config.llm.api_key_env.clone();
    config.llm.api_key = secret_or_env(config.llm.api_key.take(), &key_env);

    if config.fetch.max_chars == 0 {
        anyhow::bail!("fetch.max_chars must be > 0");
    }
    if config.discovery.attempts == 0 {
        anyhow::bail!("discovery.attempts must be >= 1");
    }
    if config.rate_limit.auth_per_minute == 0 || config.rate_limit.capture_per_minute == 0 {
        anyhow::bail!("rate_limit quotas must be >= 1");
    }

    Ok(config)
}

/// Trimmed value from the file, else from the environment. Blank counts as unset.
fn secret_or_env(value: Option<String>, var: &str) -> Option<String> {
    let trimmed = |v: String| Some(v.trim().to_string()).filter(|v| !v.is_empty());
    value
        .and_then(trimmed)
        .or_else(|| std::env::var(var).ok().and_then(trimmed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let cfg = parse_config("").unwrap();
        assert_eq!(cfg.discovery.attempts, 5);
        assert_eq!(cfg.discovery.delay_ms, 2000);
        assert_eq!(cfg.fetch.max_chars, 6000);
        assert_eq!(cfg.fetch.timeout_secs, 10);
        assert_eq!(cfg.rate_limit.auth_per_minute, 5);
        assert_eq!(cfg.rate_limit.capture_per_minute, 30);
        assert_eq!(cfg.notion.version, "2022-06-28");
    }

    #[test]
    fn base_url_is_trimmed() {
        let cfg = parse_config(
            r#"
[server]
base_url = "  https://capture.example.com/ "
"#,
        )
        .unwrap();
        assert_eq!(cfg.server.base_url, "https://capture.example.com");
        assert_eq!(
            cfg.server.redirect_uri(),
            "https://capture.example.com/callback"
        );
    }

    #[test]
    fn file_secrets_are_trimmed() {
        let cfg = parse_config(
            r#"
[notion]
client_id = " abc123\n"
client_secret = "   "
"#,
        )
        .unwrap();
        assert_eq!(cfg.notion.client_id.as_deref(), Some("abc123"));
        // blank file value falls through to the environment, which may or may not be set
        assert_ne!(cfg.notion.client_secret.as_deref(), Some(""));
    }

    #[test]
    fn rejects_zero_attempts() {
        let err = parse_config("[discovery]\nattempts = 0\n").unwrap_err();
        assert!(err.to_string().contains("discovery.attempts"));
    }
}
