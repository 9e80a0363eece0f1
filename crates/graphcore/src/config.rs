use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for {var}: {value}")]
    InvalidEnv { var: String, value: String },
}

/// Configuration shared by the runtime, the server and the CLI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RuntimeConfig {
    /// Finished executions kept in the store's history
    pub history_limit: usize,
    pub event_buffer_size: usize,
    pub simulation: SimulationConfig,
    pub stream: StreamConfig,
    pub server: ServerConfig,
    pub remote: RemoteConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            history_limit: 20,
            event_buffer_size: 1000,
            simulation: SimulationConfig::default(),
            stream: StreamConfig::default(),
            server: ServerConfig::default(),
            remote: RemoteConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Optional file, then `GRAPHRUN_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        tracing::debug!(
            path = ?path,
            remote = config.remote.endpoint.is_some(),
            history_limit = config.history_limit,
            "Loaded runtime config"
        );
        Ok(config)
    }

    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("GRAPHRUN_BIND_ADDRESS") {
            self.server.bind_address = addr;
        }
        if let Some(endpoint) = lookup("GRAPHRUN_REMOTE_ENDPOINT") {
            self.remote.endpoint = Some(endpoint);
        }
        if let Some(limit) = lookup("GRAPHRUN_HISTORY_LIMIT") {
            self.history_limit = limit.parse().map_err(|_| ConfigError::InvalidEnv {
                var: "GRAPHRUN_HISTORY_LIMIT".to_string(),
                value: limit.clone(),
            })?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SimulationConfig {
    /// Multiplier applied to every simulated delay; 0 disables them
    pub delay_scale: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self { delay_scale: 1.0 }
    }
}

impl SimulationConfig {
    pub fn instant() -> Self {
        Self { delay_scale: 0.0 }
    }

    pub fn scale(&self, base_ms: u64) -> Duration {
        let scaled = (base_ms as f64 * self.delay_scale.max(0.0)).round();
        Duration::from_millis(scaled as u64)
    }
}

/// Reconnect policy of the log stream client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StreamConfig {
    pub base_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_attempts: 5,
        }
    }
}

impl StreamConfig {
    /// Linear backoff: attempt number times the base delay.
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_delay_ms.saturating_mul(attempt as u64))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    pub bind_address: String,
    pub heartbeat_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            heartbeat_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RemoteConfig {
    /// Backend execution endpoint; `None` selects the simulated executor
    pub endpoint: Option<String>,
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: 120,
        }
    }
}
