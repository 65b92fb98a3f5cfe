use chatgate::chat::SessionConfig;
use chatgate::limits::LimitPolicy;
use chatgate::transport::GraphqlConfig;
use chatgate::transport::graphql::{DEFAULT_ENDPOINT, DEFAULT_TOKEN_ENV};
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub limits: LimitsConfig,
    pub chat: ChatConfig,
    pub backend: BackendConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub min_future_ms: u64,
    pub default_retry_after_secs: u64,
    pub tick_interval_ms: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            min_future_ms: 1500,
            default_retry_after_secs: 30,
            tick_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub refresh_delay_ms: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self { refresh_delay_ms: 2000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub endpoint: String,
    pub token_env: String,
    pub timeout_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            token_env: DEFAULT_TOKEN_ENV.to_string(),
            timeout_ms: 30000,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            limits: LimitsConfig::default(),
            chat: ChatConfig::default(),
            backend: BackendConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let project_name = env!("CARGO_PKG_NAME");
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Limit engine tunables; a zero tick interval falls back to one second
    pub fn limit_policy(&self) -> LimitPolicy {
        let tick_interval = match self.limits.tick_interval_ms {
            0 => LimitPolicy::default().tick_interval,
            ms => Duration::from_millis(ms),
        };
        LimitPolicy::new(
            self.limits.min_future_ms,
            self.limits.default_retry_after_secs,
            tick_interval,
        )
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::default()
            .with_limits(self.limit_policy())
            .with_refresh_delay(Duration::from_millis(self.chat.refresh_delay_ms))
    }

    pub fn graphql_config(&self) -> GraphqlConfig {
        GraphqlConfig {
            endpoint: self.backend.endpoint.clone(),
            token_env: self.backend.token_env.clone(),
            timeout: Duration::from_millis(self.backend.timeout_ms),
        }
    }
}
