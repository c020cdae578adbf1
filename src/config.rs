// Layered configuration: defaults < YAML file < environment / CLI flags

use crate::chat::DEFAULT_PROVIDER_TIMEOUT;
use crate::models::{CHAT_LOG, USERS};
use crate::provider::{DEFAULT_GEMINI_ENDPOINT, DEFAULT_GEMINI_MODEL};
use crate::store::CorruptPolicy;
use eyre::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_BIND: &str = "127.0.0.1:5000";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Address the HTTP server listens on
    pub bind: String,
    /// Directory holding the collection files
    pub data_dir: PathBuf,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_endpoint: String,
    pub provider_timeout_secs: u64,
    pub corrupt_policy: CorruptPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            data_dir: PathBuf::from("."),
            gemini_api_key: None,
            gemini_model: DEFAULT_GEMINI_MODEL.to_string(),
            gemini_endpoint: DEFAULT_GEMINI_ENDPOINT.to_string(),
            provider_timeout_secs: DEFAULT_PROVIDER_TIMEOUT.as_secs(),
            corrupt_policy: CorruptPolicy::default(),
        }
    }
}

/// Values that override the config file, from flags or the environment
#[derive(Debug, Default, Clone, clap::Args)]
pub struct ConfigOverrides {
    /// Address to listen on (e.g. 0.0.0.0:5000)
    #[arg(long, env = "CHATDESK_BIND")]
    pub bind: Option<String>,

    /// Directory holding users.json and chat_log.json
    #[arg(long, env = "CHATDESK_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Gemini API key; chat replies fall back to an error message without one
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub gemini_api_key: Option<String>,

    /// Gemini model name
    #[arg(long, env = "GEMINI_MODEL")]
    pub gemini_model: Option<String>,

    /// Base URL of the Gemini API
    #[arg(long, env = "GEMINI_ENDPOINT")]
    pub gemini_endpoint: Option<String>,

    /// Per-call provider timeout in seconds
    #[arg(long, env = "CHATDESK_PROVIDER_TIMEOUT_SECS")]
    pub provider_timeout_secs: Option<u64>,

    /// What to do with a collection file that is not valid JSON
    #[arg(long, env = "CHATDESK_CORRUPT_POLICY", value_enum)]
    pub corrupt_policy: Option<CorruptPolicy>,
}

/// `<config dir>/chatdesk/config.yaml`, if the platform has a config dir
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("chatdesk").join("config.yaml"))
}

impl Config {
    /// Load the YAML layer
    ///
    /// An explicit path must exist. Without one, the default location is used
    /// when present, otherwise built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => path,
                None => {
                    debug!("No config file found, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let content =
            fs::read_to_string(&path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_yaml(&content).with_context(|| format!("Invalid config file {}", path.display()))?;

        info!(file = ?path, "Loaded config file");
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str::<Self>(content).context("Failed to parse YAML config")
    }

    /// Apply flag / environment overrides on top of the file layer
    pub fn apply(&mut self, overrides: &ConfigOverrides) {
        let o = overrides.clone();
        if let Some(bind) = o.bind {
            self.bind = bind;
        }
        if let Some(data_dir) = o.data_dir {
            self.data_dir = data_dir;
        }
        if let Some(key) = o.gemini_api_key {
            self.gemini_api_key = Some(key);
        }
        if let Some(model) = o.gemini_model {
            self.gemini_model = model;
        }
        if let Some(endpoint) = o.gemini_endpoint {
            self.gemini_endpoint = endpoint;
        }
        if let Some(secs) = o.provider_timeout_secs {
            self.provider_timeout_secs = secs;
        }
        if let Some(policy) = o.corrupt_policy {
            self.corrupt_policy = policy;
        }
    }

    /// API key, ignoring blank values
    pub fn api_key(&self) -> Option<&str> {
        self.gemini_api_key.as_deref().map(str::trim).filter(|k| !k.is_empty())
    }

    pub fn users_path(&self) -> PathBuf {
        self.data_dir.join(USERS.file_name())
    }

    pub fn chat_log_path(&self) -> PathBuf {
        self.data_dir.join(CHAT_LOG.file_name())
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.bind, "127.0.0.1:5000");
        assert_eq!(config.users_path(), PathBuf::from("./users.json"));
        assert_eq!(config.chat_log_path(), PathBuf::from("./chat_log.json"));
        assert_eq!(config.provider_timeout(), Duration::from_secs(30));
        assert_eq!(config.corrupt_policy, CorruptPolicy::Recover);
        assert!(config.api_key().is_none());
    }

    #[test]
    fn test_yaml_partial_overrides_defaults() {
        let config = Config::from_yaml(
            "bind: 0.0.0.0:8080\ndata_dir: /var/lib/chatdesk\ncorrupt_policy: refuse\nprovider_timeout_secs: 5\n",
        )
        .unwrap();

        assert_eq!(config.bind, "0.0.0.0:8080");
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/chatdesk"));
        assert_eq!(config.corrupt_policy, CorruptPolicy::Refuse);
        assert_eq!(config.provider_timeout_secs, 5);
        assert_eq!(config.gemini_model, DEFAULT_GEMINI_MODEL);
    }

    #[test]
    fn test_yaml_rejects_unknown_keys() {
        assert!(Config::from_yaml("port: 5000\n").is_err());
    }

    #[test]
    fn test_empty_yaml_is_default() {
        assert_eq!(Config::from_yaml("  \n").unwrap(), Config::default());
    }

    #[test]
    fn test_load_explicit_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        fs::write(&path, "gemini_model: gemini-pro\n").unwrap();

        let config = Config::load(Some(path.as_path())).unwrap();
        assert_eq!(config.gemini_model, "gemini-pro");
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let temp = TempDir::new().unwrap();
        assert!(Config::load(Some(temp.path().join("missing.yaml").as_path())).is_err());
    }

    #[test]
    fn test_overrides_win() {
        let mut config = Config::from_yaml("bind: 0.0.0.0:8080\ngemini_api_key: from-file\n").unwrap();
        config.apply(&ConfigOverrides {
            gemini_api_key: Some("from-env".to_string()),
            corrupt_policy: Some(CorruptPolicy::Refuse),
            ..Default::default()
        });

        assert_eq!(config.bind, "0.0.0.0:8080");
        assert_eq!(config.api_key(), Some("from-env"));
        assert_eq!(config.corrupt_policy, CorruptPolicy::Refuse);
    }

    #[test]
    fn test_blank_api_key_ignored() {
        let config = Config::from_yaml("gemini_api_key: \"  \"\n").unwrap();
        assert!(config.api_key().is_none());
    }
}
