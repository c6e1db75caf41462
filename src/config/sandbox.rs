use std::time::Duration;

use serde::{Deserialize, Deserializer};
use thiserror::Error;

/// Configuration for sandboxed execution including time and size limits
#[derive(Debug, Deserialize, Clone)]
pub struct SandboxConfig {
    /// Maximum wall-clock time per execution stage
    #[serde(
        default = "default_execution_timeout",
        deserialize_with = "deserialize_duration_from_millis"
    )]
    pub execution_timeout: Duration,

    /// Maximum size of a serialized result in bytes
    #[serde(default = "default_max_output_size")]
    pub max_output_size: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            execution_timeout: default_execution_timeout(),
            max_output_size: default_max_output_size(),
        }
    }
}

impl SandboxConfig {
    /// Loads configuration from `CRUCIBLE_`-prefixed environment variables,
    /// falling back to defaults for anything unset.
    pub fn load() -> Result<Self, ConfigError> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("CRUCIBLE"))
            .build()?;
        Ok(config.try_deserialize()?)
    }
}

/// Errors from loading the runtime configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The environment could not be read or deserialized.
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Default value for execution timeout
fn default_execution_timeout() -> Duration {
    Duration::from_millis(5_000)
}

fn default_max_output_size() -> usize {
    1024 * 1024
}

/// Custom deserializer for Duration from milliseconds
fn deserialize_duration_from_millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let millis = u64::deserialize(deserializer)?;
    Ok(Duration::from_millis(millis))
}
