// config.rs
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const CONFIG_ENV: &str = "FROOPY_CONFIG";
pub const API_KEY_ENV: &str = "FROOPY_BOT_API_KEY";
const DEFAULT_PATH: &str = "froopy.toml";

/// Server configuration. Every key has a default, so running without a
/// file gives a working local server.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` wins.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_static_dir")]
    pub static_dir: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            static_dir: default_static_dir(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3030
}

fn default_static_dir() -> String {
    "static".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingConfig {
    /// Seconds a searcher waits before a bot steps in.
    #[serde(default = "default_bot_fallback_secs")]
    pub bot_fallback_secs: u64,
    #[serde(default = "default_max_message_len")]
    pub max_message_len: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            bot_fallback_secs: default_bot_fallback_secs(),
            max_message_len: default_max_message_len(),
        }
    }
}

impl MatchingConfig {
    pub fn bot_fallback(&self) -> Duration {
        Duration::from_secs(self.bot_fallback_secs)
    }
}

fn default_bot_fallback_secs() -> u64 {
    60
}

fn default_max_message_len() -> usize {
    1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_duration_secs")]
    pub duration_secs: u64,
    #[serde(default = "default_warn_after_secs")]
    pub warn_after_secs: u64,
    /// Short chats for manual testing.
    #[serde(default)]
    pub test_mode: bool,
    #[serde(default = "default_test_duration_secs")]
    pub test_duration_secs: u64,
    #[serde(default = "default_test_warn_after_secs")]
    pub test_warn_after_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            duration_secs: default_duration_secs(),
            warn_after_secs: default_warn_after_secs(),
            test_mode: false,
            test_duration_secs: default_test_duration_secs(),
            test_warn_after_secs: default_test_warn_after_secs(),
        }
    }
}

fn default_duration_secs() -> u64 {
    180
}

fn default_warn_after_secs() -> u64 {
    150
}

fn default_test_duration_secs() -> u64 {
    30
}

fn default_test_warn_after_secs() -> u64 {
    20
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Number of bots that can be in a chat at the same time.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// OpenAI-compatible chat completions endpoint.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Empty means scripted replies only.
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Pause before a bot line is delivered, while the user sees "typing".
    #[serde(default = "default_reply_delay_ms")]
    pub reply_delay_ms: u64,
    #[serde(default = "default_avatar_base_url")]
    pub avatar_base_url: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            api_url: default_api_url(),
            api_key: String::new(),
            model: default_model(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            reply_delay_ms: default_reply_delay_ms(),
            avatar_base_url: default_avatar_base_url(),
        }
    }
}

fn default_pool_size() -> usize {
    5
}

fn default_api_url() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_timeout_secs() -> u64 {
    20
}

fn default_max_retries() -> u32 {
    3
}

fn default_reply_delay_ms() -> u64 {
    1500
}

fn default_avatar_base_url() -> String {
    "https://randomuser.me/api/portraits".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "froopy.db".to_string()
}

impl Config {
    /// Reads the config from `$FROOPY_CONFIG` or `froopy.toml`. A missing
    /// default file is not an error; a missing explicit one is.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) if Path::new(DEFAULT_PATH).exists() => Self::from_file(Path::new(DEFAULT_PATH))?,
            Err(_) => Self::default(),
        };
        if config.bot.api_key.is_empty() {
            if let Ok(key) = std::env::var(API_KEY_ENV) {
                config.bot.api_key = key;
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.duration_secs == 0 || self.session.test_duration_secs == 0 {
            return Err(ConfigError::Invalid("session duration must be positive".into()));
        }
        if self.matching.max_message_len == 0 {
            return Err(ConfigError::Invalid("max_message_len must be positive".into()));
        }
        Ok(())
    }
}
