//! Configuration management for Nubra.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::compactor::CompactorConfig;
use crate::error::{NubraError, Result};
use crate::provider::ProviderConfig;

/// Backends tried in order by the client.
pub const DEFAULT_BACKEND_URLS: [&str; 3] = [
    "https://nubra-code-converter-backend.vercel.app",
    "http://localhost:3000",
    "http://127.0.0.1:3000",
];

/// Top-level Nubra configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NubraConfig {
    /// Completion provider used by the relay server.
    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub client: ClientSettings,

    /// Context compaction tuning.
    #[serde(default)]
    pub memory: CompactorConfig,
}

/// Relay server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub rate_limit_max: usize,
    pub rate_limit_window_secs: u64,
    pub max_body_bytes: usize,
    /// Empty means any origin.
    pub allowed_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            rate_limit_max: 30,
            rate_limit_window_secs: 60,
            max_body_bytes: 256 * 1024,
            allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub backend_urls: Vec<String>,
    /// Where sessions and logs live (None = platform data dir).
    pub data_dir: Option<PathBuf>,
    pub timeout_secs: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            backend_urls: DEFAULT_BACKEND_URLS.iter().map(|s| s.to_string()).collect(),
            data_dir: None,
            timeout_secs: 60,
        }
    }
}

impl ClientSettings {
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("nubra")
        })
    }
}

impl NubraConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| NubraError::Config(format!("Failed to read config: {}", e)))?;
        toml::from_str(&content)
            .map_err(|e| NubraError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Save config to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| NubraError::Config(format!("Failed to serialize config: {}", e)))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("nubra")
            .join("config.toml")
    }

    /// Apply process environment overrides.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup; blank values are ignored.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = get("CHATBASE_API_KEY") {
            self.provider.provider = "chatbase".to_string();
            self.provider.api_key = Some(key);
        } else if let Some(key) = get("OPENAI_API_KEY") {
            self.provider.provider = "openai".to_string();
            self.provider.api_key = Some(key);
        }
        if let Some(id) = get("CHATBASE_CHATBOT_ID") {
            self.provider.chatbot_id = Some(id);
        }
        if let Some(base) = get("CHATBASE_BASE_URL") {
            self.provider.api_base = Some(base);
        }
        if let Some(origins) = get("ALLOWED_ORIGINS") {
            self.server.allowed_origins = origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }
        if let Some(port) = get("PORT") {
            match port.trim().parse() {
                Ok(p) => self.server.port = p,
                Err(_) => tracing::warn!("Ignoring invalid PORT value: {}", port),
            }
        }
    }

    /// Set one dotted key (e.g. `server.port`) from a string value.
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        let mut doc = toml::Value::try_from(&*self)
            .map_err(|e| NubraError::Config(format!("Failed to serialize config: {}", e)))?;
        let (section, field) = key
            .split_once('.')
            .ok_or_else(|| NubraError::Config(format!("Expected section.key, got '{}'", key)))?;
        let table = doc
            .get_mut(section)
            .and_then(|v| v.as_table_mut())
            .ok_or_else(|| NubraError::Config(format!("Unknown section '{}'", section)))?;

        let parsed = match table.get(field) {
            Some(toml::Value::Integer(_)) => value
                .parse()
                .map(toml::Value::Integer)
                .map_err(|_| NubraError::Config(format!("'{}' expects an integer", key)))?,
            Some(toml::Value::Float(_)) => value
                .parse()
                .map(toml::Value::Float)
                .map_err(|_| NubraError::Config(format!("'{}' expects a number", key)))?,
            Some(toml::Value::Boolean(_)) => value
                .parse()
                .map(toml::Value::Boolean)
                .map_err(|_| NubraError::Config(format!("'{}' expects true or false", key)))?,
            Some(toml::Value::Array(_)) => toml::Value::Array(
                value
                    .split(',')
                    .map(|s| s.trim())
                    .filter(|s| !s.is_empty())
                    .map(|s| toml::Value::String(s.to_string()))
                    .collect(),
            ),
            _ => toml::Value::String(value.to_string()),
        };
        table.insert(field.to_string(), parsed);

        *self = doc
            .try_into()
            .map_err(|e| NubraError::Config(format!("Invalid value for '{}': {}", key, e)))?;
        Ok(())
    }
}
