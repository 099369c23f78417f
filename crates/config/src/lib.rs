//! Configuration loading, validation, and defaults for relayclaw.
//!
//! The config file is TOML with a section per subsystem: `server`,
//! `channels.*`, `llm`, `agents`, `tools`, `session`, `memory`, `logging`.
//! `${NAME}` environment-variable substitution is applied to token, key,
//! and secret fields so credentials never need to live in the file.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub channels: ChannelsConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    /// Agent id → definition. Empty map gets a built-in "default" agent.
    #[serde(default)]
    pub agents: HashMap<String, AgentConfig>,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn redact(s: &str) -> &'static str {
    if s.is_empty() { "\"\"" } else { "[REDACTED]" }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("server", &self.server)
            .field("channels", &self.channels)
            .field("llm", &self.llm)
            .field("agents", &self.agents)
            .field("tools", &self.tools)
            .field("session", &self.session)
            .field("memory", &self.memory)
            .field("logging", &self.logging)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_true")]
    pub health_check_enabled: bool,
}

fn default_port() -> u16 {
    8080
}
fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            health_check_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelsConfig {
    #[serde(default)]
    pub telegram: TelegramConfig,

    #[serde(default)]
    pub discord: DiscordConfig,

    #[serde(default)]
    pub feishu: FeishuConfig,
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub token: String,

    /// Numeric user IDs. Empty = deny all.
    #[serde(default)]
    pub allowed_users: Vec<i64>,
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("enabled", &self.enabled)
            .field("token", &redact(&self.token))
            .field("allowed_users", &self.allowed_users)
            .finish()
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct DiscordConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub token: String,

    /// Guild IDs allowed to invoke the bot. Empty = deny all.
    #[serde(default)]
    pub allowed_guilds: Vec<String>,
}

impl std::fmt::Debug for DiscordConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordConfig")
            .field("enabled", &self.enabled)
            .field("token", &redact(&self.token))
            .field("allowed_guilds", &self.allowed_guilds)
            .finish()
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct FeishuConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub app_id: String,

    #[serde(default)]
    pub app_secret: String,

    /// Event encryption key; empty disables decryption.
    #[serde(default)]
    pub encrypt_key: String,

    /// open_id allow-list. Empty = deny all.
    #[serde(default)]
    pub allowed_users: Vec<String>,
}

impl std::fmt::Debug for FeishuConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeishuConfig")
            .field("enabled", &self.enabled)
            .field("app_id", &self.app_id)
            .field("app_secret", &redact(&self.app_secret))
            .field("encrypt_key", &redact(&self.encrypt_key))
            .field("allowed_users", &self.allowed_users)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "openai", "anthropic", or "ollama"; anything else is treated as an
    /// OpenAI-compatible endpoint.
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default)]
    pub base_url: String,

    #[serde(default = "default_llm_timeout")]
    pub timeout_s: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_llm_timeout() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    3
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key: String::new(),
            base_url: String::new(),
            timeout_s: default_llm_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("timeout_s", &self.timeout_s)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub name: String,

    #[serde(default)]
    pub system_prompt: String,

    /// Tool subset. Missing = all enabled tools.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_work_dir")]
    pub work_dir: String,

    #[serde(default = "default_tool_timeout")]
    pub timeout_s: u64,

    #[serde(default = "default_true")]
    pub confirm_dangerous: bool,

    #[serde(default)]
    pub unattended_mode: bool,

    /// Operations (or op types) that skip the confirmation gate.
    #[serde(default)]
    pub always_allow_dangerous: Vec<String>,

    /// Case-insensitive substrings that flag a command as blocked.
    #[serde(default)]
    pub blocked_commands: Vec<String>,

    /// Tool name → enabled. Missing entries default to enabled.
    #[serde(default)]
    pub enabled_tools: HashMap<String, bool>,

    #[serde(default)]
    pub terminal_enabled: bool,

    #[serde(default)]
    pub web_search_enabled: bool,

    /// User-defined thin HTTP API tools.
    #[serde(default)]
    pub custom_apis: Vec<CustomApiConfig>,
}

fn default_work_dir() -> String {
    "./workspace".into()
}
fn default_tool_timeout() -> u64 {
    30
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            timeout_s: default_tool_timeout(),
            confirm_dangerous: true,
            unattended_mode: false,
            always_allow_dangerous: vec![],
            blocked_commands: vec![],
            enabled_tools: HashMap::new(),
            terminal_enabled: false,
            web_search_enabled: false,
            custom_apis: vec![],
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct CustomApiConfig {
    pub name: String,

    #[serde(default)]
    pub description: String,

    pub url: String,

    #[serde(default = "default_http_method")]
    pub method: String,

    #[serde(default)]
    pub headers: HashMap<String, String>,

    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_custom_api_timeout")]
    pub timeout_s: u64,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_http_method() -> String {
    "GET".into()
}
fn default_custom_api_timeout() -> u64 {
    15
}

impl std::fmt::Debug for CustomApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomApiConfig")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("method", &self.method)
            .field("api_key", &redact(&self.api_key))
            .field("enabled", &self.enabled)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_s: u64,

    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

fn default_max_messages() -> usize {
    40
}
fn default_idle_timeout() -> u64 {
    3600
}
fn default_max_sessions() -> usize {
    100
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            idle_timeout_s: default_idle_timeout(),
            max_sessions: default_max_sessions(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_memory_dir")]
    pub memory_dir: String,

    #[serde(default = "default_max_file_size")]
    pub max_file_size: usize,
}

fn default_memory_dir() -> String {
    "./data".into()
}
fn default_max_file_size() -> usize {
    64 * 1024
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            memory_dir: default_memory_dir(),
            max_file_size: default_max_file_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path; empty logs to stderr only.
    #[serde(default)]
    pub file: String,

    #[serde(default = "default_log_max_size")]
    pub max_size_mb: u64,

    /// "json" or "pretty"
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_log_max_size() -> u64 {
    50
}
fn default_log_format() -> String {
    "pretty".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: String::new(),
            max_size_mb: default_log_max_size(),
            format: default_log_format(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            channels: ChannelsConfig::default(),
            llm: LlmConfig::default(),
            agents: HashMap::new(),
            tools: ToolsConfig::default(),
            session: SessionConfig::default(),
            memory: MemoryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file, apply `${NAME}` env-var
    /// substitution to secret fields, and validate.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.expand_secrets();
        config.validate()?;
        Ok(config)
    }

    /// Write a commented default config file (first-run bootstrap).
    pub fn write_default(path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Read {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        }
        std::fs::write(path, Self::default_toml()).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// The default config rendered as TOML with placeholder env vars.
    pub fn default_toml() -> String {
        r#"# relayclaw configuration

[server]
port = 8080
health_check_enabled = true

[channels.telegram]
enabled = false
token = "${TELEGRAM_BOT_TOKEN}"
allowed_users = []

[channels.discord]
enabled = false
token = "${DISCORD_BOT_TOKEN}"
allowed_guilds = []

[channels.feishu]
enabled = false
app_id = "${FEISHU_APP_ID}"
app_secret = "${FEISHU_APP_SECRET}"
encrypt_key = "${FEISHU_ENCRYPT_KEY}"
allowed_users = []

[llm]
provider = "openai"
model = "gpt-4o-mini"
api_key = "${OPENAI_API_KEY}"
base_url = ""
timeout_s = 60
max_retries = 3

[agents.default]
name = "Assistant"
system_prompt = "You are a helpful assistant."

[tools]
work_dir = "./workspace"
timeout_s = 30
confirm_dangerous = true
unattended_mode = false
blocked_commands = []
terminal_enabled = false
web_search_enabled = false

[session]
max_messages = 40
idle_timeout_s = 3600
max_sessions = 100

[memory]
enabled = false
memory_dir = "./data"
max_file_size = 65536

[logging]
level = "info"
file = ""
max_size_mb = 50
format = "pretty"
"#
        .to_string()
    }

    /// Apply `${NAME}` substitution to token/key/secret fields.
    fn expand_secrets(&mut self) {
        self.channels.telegram.token = expand_env(&self.channels.telegram.token);
        self.channels.discord.token = expand_env(&self.channels.discord.token);
        self.channels.feishu.app_id = expand_env(&self.channels.feishu.app_id);
        self.channels.feishu.app_secret = expand_env(&self.channels.feishu.app_secret);
        self.channels.feishu.encrypt_key = expand_env(&self.channels.feishu.encrypt_key);
        self.llm.api_key = expand_env(&self.llm.api_key);
        for api in &mut self.tools.custom_apis {
            api.api_key = expand_env(&api.api_key);
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.session.max_messages == 0 {
            return Err(ConfigError::Validation(
                "session.max_messages must be at least 1".into(),
            ));
        }
        if self.session.max_sessions == 0 {
            return Err(ConfigError::Validation(
                "session.max_sessions must be at least 1".into(),
            ));
        }
        if self.llm.timeout_s == 0 {
            return Err(ConfigError::Validation(
                "llm.timeout_s must be at least 1".into(),
            ));
        }
        if self.memory.enabled && self.memory.max_file_size == 0 {
            return Err(ConfigError::Validation(
                "memory.max_file_size must be at least 1".into(),
            ));
        }
        match self.logging.format.as_str() {
            "json" | "pretty" => {}
            other => {
                return Err(ConfigError::Validation(format!(
                    "logging.format must be \"json\" or \"pretty\", got \"{other}\""
                )));
            }
        }
        Ok(())
    }
}

/// Replace `${NAME}` references with the environment variable's value.
/// Unset variables expand to the empty string; the channel then fails its
/// own health check rather than running with a literal placeholder.
pub fn expand_env(value: &str) -> String {
    let re = regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static regex");
    re.replace_all(value, |caps: &regex::Captures<'_>| {
        std::env::var(&caps[1]).unwrap_or_default()
    })
    .into_owned()
}

/// Configuration errors. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("failed to parse config file {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("config validation failed: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 8080);
        assert!(config.tools.confirm_dangerous);
        assert!(!config.tools.unattended_mode);
    }

    #[test]
    fn default_toml_parses_back() {
        let parsed: AppConfig = toml::from_str(&AppConfig::default_toml()).unwrap();
        assert_eq!(parsed.llm.provider, "openai");
        assert_eq!(parsed.session.max_messages, 40);
        assert!(parsed.agents.contains_key("default"));
    }

    #[test]
    fn env_substitution_applies() {
        // Safe: test-local unique variable name.
        std::env::set_var("RELAYCLAW_TEST_TOKEN_XYZ", "tok-123");
        assert_eq!(expand_env("${RELAYCLAW_TEST_TOKEN_XYZ}"), "tok-123");
        assert_eq!(
            expand_env("prefix-${RELAYCLAW_TEST_TOKEN_XYZ}"),
            "prefix-tok-123"
        );
    }

    #[test]
    fn unset_env_expands_empty() {
        assert_eq!(expand_env("${RELAYCLAW_DEFINITELY_UNSET_VAR}"), "");
    }

    #[test]
    fn literal_text_untouched() {
        assert_eq!(expand_env("plain-value"), "plain-value");
        assert_eq!(expand_env("$NOBRACES"), "$NOBRACES");
    }

    #[test]
    fn load_from_file_with_sections() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        write!(
            tmp,
            r#"
[server]
port = 9191

[llm]
provider = "anthropic"
model = "claude-3-haiku-20240307"

[session]
max_messages = 10
max_sessions = 3

[agents.ops]
name = "Ops"
system_prompt = "You manage the server."
tools = ["execute_command", "read_file"]
"#
        )
        .unwrap();

        let config = AppConfig::load_from(tmp.path()).unwrap();
        assert_eq!(config.server.port, 9191);
        assert_eq!(config.llm.provider, "anthropic");
        assert_eq!(config.session.max_sessions, 3);
        let ops = &config.agents["ops"];
        assert_eq!(ops.tools.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn zero_max_messages_rejected() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        write!(tmp, "[session]\nmax_messages = 0\n").unwrap();
        let err = AppConfig::load_from(tmp.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn bad_log_format_rejected() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        write!(tmp, "[logging]\nformat = \"xml\"\n").unwrap();
        assert!(AppConfig::load_from(tmp.path()).is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = AppConfig::load_from(Path::new("/nonexistent/relayclaw.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn debug_redacts_secrets() {
        let mut config = AppConfig::default();
        config.llm.api_key = "sk-secret".into();
        config.channels.telegram.token = "bot-token".into();
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(!debug.contains("bot-token"));
        assert!(debug.contains("[REDACTED]"));
    }
}
