//! Configuration for the sales consultation tool

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::constants;

// =============================================================================
// File-based Configuration (config.toml)
// =============================================================================

/// Configuration loaded from config.toml
#[derive(Debug, Deserialize)]
pub struct FileConfig {
    pub api: ApiConfig,
    #[serde(default)]
    pub user: UserConfig,
    #[serde(default)]
    pub access: AccessConfig,
}

/// REST API section
#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    /// Bearer token issued by the API's login endpoint
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

/// Current user section
#[derive(Debug, Default, Deserialize)]
pub struct UserConfig {
    /// Name of the user's area; its filter starts checked
    #[serde(default)]
    pub area: Option<String>,
}

/// Permissions on the facts resource
#[derive(Debug, Default, Deserialize)]
pub struct AccessConfig {
    #[serde(default)]
    pub can_read: bool,
}

impl FileConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).with_context(|| {
            "Failed to parse config.toml. Check for:\n\
             - Missing required fields (api.base_url)\n\
             - Invalid TOML syntax (missing quotes, brackets, etc.)\n\
             - Incorrect data types (strings vs numbers)\n\n\
             See config.toml.example for the expected format."
        })
    }
}

// =============================================================================
// Runtime Configuration
// =============================================================================

/// Main configuration struct with resolved values
#[derive(Debug, Clone)]
pub struct Config {
    /// API base URL
    pub api_url: String,
    /// Bearer token (optional)
    pub token: Option<String>,
    /// Per-request HTTP timeout
    pub request_timeout: Duration,
    /// Current user's area name
    pub user_area: Option<String>,
    /// Whether the current user may read facts
    pub can_read: bool,
}

impl Config {
    /// Create config from file config and optional API URL override
    pub fn from_file(file_config: &FileConfig, api_url: Option<String>) -> Result<Self> {
        let api_url = api_url.unwrap_or_else(|| file_config.api.base_url.clone());
        if !api_url.starts_with("http://") && !api_url.starts_with("https://") {
            anyhow::bail!("Invalid API URL '{}': must start with http:// or https://", api_url);
        }

        Ok(Self {
            api_url,
            token: file_config.api.token.clone().filter(|t| !t.is_empty()),
            request_timeout: Duration::from_secs(
                file_config
                    .api
                    .request_timeout_secs
                    .unwrap_or(constants::DEFAULT_REQUEST_TIMEOUT_SECS),
            ),
            user_area: file_config.user.area.clone(),
            can_read: file_config.access.can_read,
        })
    }

    /// Token with all but the last four characters hidden, for safe logging
    pub fn masked_token(&self) -> String {
        match &self.token {
            None => "(none)".to_string(),
            Some(token) => {
                let visible: String = token
                    .chars()
                    .rev()
                    .take(4)
                    .collect::<Vec<_>>()
                    .into_iter()
                    .rev()
                    .collect();
                format!("****{}", visible)
            }
        }
    }
}
