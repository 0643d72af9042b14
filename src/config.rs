use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    memory::JsonFileStore,
    prompt::{DEFAULT_HISTORY_WINDOW, PromptComposer},
    provider::{BackoffStrategy, RetryPolicy, gemini},
};

const ENV_PREFIX: &str = "STUDY_NEXUS";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub provider: ProviderConfig,
    pub retry: RetryConfig,
    pub prompt: PromptConfig,
    pub log: LogConfig,
}

impl Config {
    /// Load the configuration from `path` (optional) and the environment.
    ///
    /// Environment variables use the `STUDY_NEXUS__` prefix and `__` as the
    /// section separator, e.g. `STUDY_NEXUS__SERVER__PORT=8080`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from(path.as_ref()).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3002,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
    pub conversations_file: String,
    pub user_data_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            conversations_file: "conversations.json".to_string(),
            user_data_file: "userData.json".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn file_store(&self) -> JsonFileStore {
        JsonFileStore::in_dir(&self.data_dir, &self.conversations_file, &self.user_data_file)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    pub model: String,
    /// Used when a chat request carries no `apiKey`
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: gemini::DEFAULT_BASE_URL.to_string(),
            model: gemini::DEFAULT_MODEL.to_string(),
            api_key: None,
            timeout_secs: 60,
        }
    }
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff: BackoffStrategy,
    /// Only retry quota and overload failures
    pub transient_only: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            backoff: BackoffStrategy::Linear,
            transient_only: false,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        if self.max_attempts <= 1 {
            return RetryPolicy::no_retry();
        }

        let policy = RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            self.backoff,
        );

        if self.transient_only {
            policy.transient_only()
        } else {
            policy
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PromptConfig {
    pub history_window: usize,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            history_window: DEFAULT_HISTORY_WINDOW,
        }
    }
}

impl PromptConfig {
    pub fn composer(&self) -> PromptComposer {
        PromptComposer::new(self.history_window)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    /// Directory for the daily rolling log file. Console only when unset.
    pub dir: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
        }
    }
}
