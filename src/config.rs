use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::engine::{ExecutionSettings, FailurePolicy};
use crate::error::{BatchError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub labels: LabelConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Default `after:` date (YYYY/MM/DD) for filters with no date bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emails_after: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: default_max_concurrent(),
            request_timeout_secs: default_request_timeout_secs(),
            emails_after: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelConfig {
    #[serde(default = "default_processed_label")]
    pub processed_label: String,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            processed_label: default_processed_label(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_mark_processed")]
    pub mark_processed: bool,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    #[serde(default = "default_max_concurrent_messages")]
    pub max_concurrent_messages: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            mark_processed: default_mark_processed(),
            failure_policy: FailurePolicy::default(),
            max_concurrent_messages: default_max_concurrent_messages(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    /// Users file; falls back to `$LOCAL_USERS_PATH`, then `secrets/users.json`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users_file: Option<PathBuf>,
}

fn default_max_concurrent() -> usize {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_processed_label() -> String {
    "Processed".to_string()
}

fn default_mark_processed() -> bool {
    true
}

fn default_max_concurrent_messages() -> usize {
    10
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        // If file doesn't exist, return default config with warning
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| BatchError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| BatchError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                BatchError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| BatchError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| BatchError::ConfigError(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        // 1..=50 keeps a single user under the Gmail per-user quota
        if self.store.max_concurrent_requests == 0 {
            return Err(BatchError::ConfigError(
                "store.max_concurrent_requests must be at least 1".to_string(),
            ));
        }
        if self.store.max_concurrent_requests > 50 {
            return Err(BatchError::ConfigError(
                "store.max_concurrent_requests cannot exceed 50".to_string(),
            ));
        }

        if self.store.request_timeout_secs == 0 {
            return Err(BatchError::ConfigError(
                "store.request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if let Some(date) = &self.store.emails_after {
            if NaiveDate::parse_from_str(date, "%Y/%m/%d").is_err() {
                return Err(BatchError::ConfigError(format!(
                    "Invalid store.emails_after: '{}'. Expected YYYY/MM/DD",
                    date
                )));
            }
        }

        let label = self.labels.processed_label.trim();
        if label.is_empty() {
            return Err(BatchError::ConfigError(
                "labels.processed_label cannot be empty".to_string(),
            ));
        }
        if label.contains('"') {
            return Err(BatchError::ConfigError(
                "labels.processed_label cannot contain '\"'".to_string(),
            ));
        }

        if self.execution.max_concurrent_messages == 0 {
            return Err(BatchError::ConfigError(
                "execution.max_concurrent_messages must be at least 1".to_string(),
            ));
        }
        if self.execution.max_concurrent_messages > 100 {
            return Err(BatchError::ConfigError(
                "execution.max_concurrent_messages cannot exceed 100".to_string(),
            ));
        }

        tracing::debug!("Configuration validation passed");
        Ok(())
    }

    /// Settings for the batch engine
    pub fn execution_settings(&self) -> ExecutionSettings {
        ExecutionSettings {
            mark_processed: self.execution.mark_processed,
            processed_label: self.labels.processed_label.trim().to_string(),
            failure_policy: self.execution.failure_policy,
            max_concurrent_messages: self.execution.max_concurrent_messages,
            emails_after: self.store.emails_after.clone(),
        }
    }

    /// Create an example configuration file
    pub async fn create_example(path: &Path) -> Result<()> {
        let config = Self::default();
        config.save(path).await
    }
}
