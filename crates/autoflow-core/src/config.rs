//! Configuration for the execution engine and schedule runner
//!
//! Values come from serde defaults, optionally a YAML document, and finally
//! `AUTOFLOW_*` environment variables.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::{info, warn};

use crate::domain::workflow::{DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_INITIAL_DELAY_MS};
use crate::CoreError;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Timeout applied to action steps without their own override
    #[serde(default = "default_step_timeout_ms")]
    pub default_step_timeout_ms: u64,

    /// Upper bound on concurrently executing runs
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,

    /// Attempts filled into retry policies that leave `maxAttempts` unset
    #[serde(default = "default_retry_attempts")]
    pub default_retry_attempts: u32,

    /// Initial backoff filled into retry policies that leave it unset
    #[serde(default = "default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,

    /// How often the schedule runner looks for due workflows
    #[serde(default = "default_scheduler_tick_ms")]
    pub scheduler_tick_ms: u64,
}

fn default_step_timeout_ms() -> u64 {
    30_000
}

fn default_max_concurrent_runs() -> usize {
    64
}

fn default_retry_attempts() -> u32 {
    DEFAULT_RETRY_ATTEMPTS
}

fn default_retry_initial_delay_ms() -> u64 {
    DEFAULT_RETRY_INITIAL_DELAY_MS
}

fn default_scheduler_tick_ms() -> u64 {
    1_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_step_timeout_ms: default_step_timeout_ms(),
            max_concurrent_runs: default_max_concurrent_runs(),
            default_retry_attempts: default_retry_attempts(),
            retry_initial_delay_ms: default_retry_initial_delay_ms(),
            scheduler_tick_ms: default_scheduler_tick_ms(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from defaults and environment variables
    pub fn load() -> Result<Self, CoreError> {
        let config = Self::default().with_overrides(|key| env::var(key).ok());
        config.validate()?;
        info!(
            step_timeout_ms = config.default_step_timeout_ms,
            max_concurrent_runs = config.max_concurrent_runs,
            "Engine configuration loaded"
        );
        Ok(config)
    }

    /// Parse a YAML document, then validate it
    pub fn from_yaml_str(yaml: &str) -> Result<Self, CoreError> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| CoreError::ConfigurationError(format!("Invalid YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay `AUTOFLOW_*` values obtained through `lookup`
    ///
    /// Unparseable values are logged and ignored.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        override_value(
            &lookup,
            "AUTOFLOW_STEP_TIMEOUT_MS",
            &mut self.default_step_timeout_ms,
        );
        override_value(
            &lookup,
            "AUTOFLOW_MAX_CONCURRENT_RUNS",
            &mut self.max_concurrent_runs,
        );
        override_value(
            &lookup,
            "AUTOFLOW_RETRY_ATTEMPTS",
            &mut self.default_retry_attempts,
        );
        override_value(
            &lookup,
            "AUTOFLOW_RETRY_INITIAL_DELAY_MS",
            &mut self.retry_initial_delay_ms,
        );
        override_value(
            &lookup,
            "AUTOFLOW_SCHEDULER_TICK_MS",
            &mut self.scheduler_tick_ms,
        );
        self
    }

    /// Reject limits that would stall the engine
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.default_step_timeout_ms == 0 {
            return Err(CoreError::ConfigurationError(
                "default_step_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.max_concurrent_runs == 0 {
            return Err(CoreError::ConfigurationError(
                "max_concurrent_runs must be greater than zero".to_string(),
            ));
        }
        if self.default_retry_attempts == 0 {
            return Err(CoreError::ConfigurationError(
                "default_retry_attempts must be greater than zero".to_string(),
            ));
        }
        if self.scheduler_tick_ms == 0 {
            return Err(CoreError::ConfigurationError(
                "scheduler_tick_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Default step timeout
    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.default_step_timeout_ms)
    }

    /// Schedule runner tick
    pub fn scheduler_tick(&self) -> Duration {
        Duration::from_millis(self.scheduler_tick_ms)
    }
}

fn override_value<T, F>(lookup: &F, key: &str, target: &mut T)
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse::<T>() {
            Ok(value) => *target = value,
            Err(_) => warn!("Invalid {} value: {}", key, raw),
        }
    }
}
