//! Configuration management for llmtap.
//!
//! Settings live in `~/.llmtap/config.toml`. Every field has a default, so
//! a missing file or a partial one is fine. `LLMTAP_BASE_URL` overrides the
//! backend location; the API key is read from the file first and then from
//! the environment variable named by `api_key_env`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackError};
use crate::transport::DEFAULT_BASE_URL;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Timeout of a single backend call
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_key_env() -> String {
    "LLMTAP_API_KEY".to_string()
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl TrackerConfig {
    pub fn config_path() -> Result<PathBuf> {
        let home = dirs::home_dir().ok_or_else(|| TrackError::Config {
            reason: "could not determine home directory".to_string(),
        })?;
        Ok(home.join(".llmtap").join("config.toml"))
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load `path` if it exists (defaults otherwise), then apply env overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| TrackError::Config {
                reason: format!("failed to read config file {}: {}", path.display(), e),
            })?;
            toml::from_str(&content).map_err(|e| TrackError::Config {
                reason: format!("failed to parse config file {}: {}", path.display(), e),
            })?
        } else {
            Self::default()
        };

        if let Ok(base_url) = std::env::var("LLMTAP_BASE_URL") {
            if !base_url.is_empty() {
                config.base_url = base_url;
            }
        }

        Ok(config)
    }

    /// The API key, from the file or from `api_key_env`.
    ///
    /// Fails with [`TrackError::MissingApiKey`] when neither is set.
    pub fn api_key(&self) -> Result<String> {
        if let Some(key) = &self.api_key {
            if !key.is_empty() {
                return Ok(key.clone());
            }
        }
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.is_empty() => Ok(key),
            _ => Err(TrackError::MissingApiKey {
                env_var: self.api_key_env.clone(),
            }),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TrackError::Config {
                reason: format!("failed to create config directory {}: {}", parent.display(), e),
            })?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| TrackError::Config {
            reason: format!("failed to serialize config: {}", e),
        })?;
        std::fs::write(path, content).map_err(|e| TrackError::Config {
            reason: format!("failed to write config file {}: {}", path.display(), e),
        })
    }

    pub fn save_default() -> Result<PathBuf> {
        let path = Self::config_path()?;
        Self::default().save_to(&path)?;
        Ok(path)
    }
}
