//! Configuration
//!
//! `AccessConfig` collects every tunable of the access layer. Defaults carry
//! the observed production values; a JSON file and `LORNU_ACCESS_*`
//! environment variables can override them.
//!
//! | Variable | Field |
//! |----------|-------|
//! | `LORNU_ACCESS_RETRY_MAX_ATTEMPTS` | `retry.max_attempts` |
//! | `LORNU_ACCESS_RETRY_BASE_DELAY_MS` | `retry.base_delay_ms` |
//! | `LORNU_ACCESS_RETRY_MAX_DELAY_MS` | `retry.max_delay_ms` |
//! | `LORNU_ACCESS_RETRY_JITTER` | `retry.jitter` |
//! | `LORNU_ACCESS_RETRY_USE_PRESETS` | `retry.use_presets` |
//! | `LORNU_ACCESS_BREAKER_FAILURE_THRESHOLD` | `breaker.failure_threshold` |
//! | `LORNU_ACCESS_BREAKER_WINDOW_SECS` | `breaker.window_secs` |
//! | `LORNU_ACCESS_BREAKER_COOLDOWN_SECS` | `breaker.cooldown_secs` |
//! | `LORNU_ACCESS_BREAKER_USE_PRESETS` | `breaker.use_presets` |
//! | `LORNU_ACCESS_HEALTH_MINOR_MAX` | `health.thresholds.minor_max` |
//! | `LORNU_ACCESS_HEALTH_MAJOR_MAX` | `health.thresholds.major_max` |
//! | `LORNU_ACCESS_HEALTH_SEVERE_MAX` | `health.thresholds.severe_max` |
//! | `LORNU_ACCESS_HEALTH_CHECK_INTERVAL_SECS` | `health_check_interval_secs` |
//! | `LORNU_ACCESS_SESSION_REFRESH_THRESHOLD_SECS` | `sessions.refresh_threshold_secs` |
//! | `LORNU_ACCESS_SESSION_MAX_CHAIN_STEPS` | `sessions.max_chain_steps` |
//! | `LORNU_ACCESS_STORE_DIR` | `store_dir` |

use crate::identity::SessionSettings;
use crate::resilience::{
    BreakerConfig, CircuitBreakerRetryExecutor, DegradationCoordinator, HealthConfig,
    HealthTracker, Operation, RetryPolicies, RetryPolicy,
};
use crate::store::CredentialStore;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

const ENV_PREFIX: &str = "LORNU_ACCESS_";

/// Default retry behaviour for operations without a preset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub factor: f64,
    /// Fraction of each delay applied as ± jitter
    pub jitter: f64,
    /// Keep the built-in per-operation presets. Keys without one, and all
    /// keys when this is off, use the policy built from these settings.
    pub use_presets: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            factor: 2.0,
            jitter: 0.2,
            use_presets: true,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(self.max_attempts, Duration::from_millis(self.base_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_factor(self.factor)
            .with_jitter(self.jitter)
    }

    pub fn policies(&self) -> RetryPolicies {
        if self.use_presets {
            RetryPolicies::with_operation_presets(self.policy())
        } else {
            RetryPolicies::new(self.policy())
        }
    }
}

/// Circuit breaker settings for operations without a preset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub window_secs: u64,
    pub cooldown_secs: u64,
    /// Keep the built-in per-operation presets. Operations without one,
    /// and all operations when this is off, use these settings.
    pub use_presets: bool,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window_secs: 60,
            cooldown_secs: 120,
            use_presets: true,
        }
    }
}

impl BreakerSettings {
    pub fn breaker_config(&self) -> BreakerConfig {
        BreakerConfig::new(self.failure_threshold, Duration::from_secs(self.cooldown_secs))
            .with_window(Duration::from_secs(self.window_secs))
    }
}

/// Session manager settings in serializable units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub refresh_threshold_secs: u64,
    pub max_chain_steps: usize,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub refresh_retry_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let defaults = SessionSettings::default();
        Self {
            refresh_threshold_secs: defaults.refresh_threshold.as_secs(),
            max_chain_steps: defaults.max_chain_steps,
            retry_attempts: defaults.retry_attempts,
            retry_delay_ms: defaults.retry_delay.as_millis() as u64,
            refresh_retry_interval_secs: defaults.refresh_retry_interval.as_secs(),
        }
    }
}

impl From<&SessionConfig> for SessionSettings {
    fn from(config: &SessionConfig) -> Self {
        SessionSettings {
            refresh_threshold: Duration::from_secs(config.refresh_threshold_secs),
            max_chain_steps: config.max_chain_steps,
            retry_attempts: config.retry_attempts,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            refresh_retry_interval: Duration::from_secs(config.refresh_retry_interval_secs),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    pub retry: RetrySettings,
    pub breaker: BreakerSettings,
    pub health: HealthConfig,
    pub health_check_interval_secs: u64,
    pub sessions: SessionConfig,
    /// Credential store directory; `~/.lornu/credentials` when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_dir: Option<PathBuf>,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            retry: RetrySettings::default(),
            breaker: BreakerSettings::default(),
            health: HealthConfig::default(),
            health_check_interval_secs: 30,
            sessions: SessionConfig::default(),
            store_dir: None,
        }
    }
}

impl AccessConfig {
    /// Defaults overridden by `LORNU_ACCESS_*` variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Read a JSON file; missing fields keep their defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from any key lookup (the process environment in
    /// `from_env`)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |suffix: &str| lookup(&format!("{}{}", ENV_PREFIX, suffix));

        override_parsed(&get, "RETRY_MAX_ATTEMPTS", &mut self.retry.max_attempts)?;
        override_parsed(&get, "RETRY_BASE_DELAY_MS", &mut self.retry.base_delay_ms)?;
        override_parsed(&get, "RETRY_MAX_DELAY_MS", &mut self.retry.max_delay_ms)?;
        override_parsed(&get, "RETRY_JITTER", &mut self.retry.jitter)?;
        override_parsed(&get, "RETRY_USE_PRESETS", &mut self.retry.use_presets)?;
        override_parsed(&get, "BREAKER_FAILURE_THRESHOLD", &mut self.breaker.failure_threshold)?;
        override_parsed(&get, "BREAKER_WINDOW_SECS", &mut self.breaker.window_secs)?;
        override_parsed(&get, "BREAKER_COOLDOWN_SECS", &mut self.breaker.cooldown_secs)?;
        override_parsed(&get, "BREAKER_USE_PRESETS", &mut self.breaker.use_presets)?;
        override_parsed(&get, "HEALTH_MINOR_MAX", &mut self.health.thresholds.minor_max)?;
        override_parsed(&get, "HEALTH_MAJOR_MAX", &mut self.health.thresholds.major_max)?;
        override_parsed(&get, "HEALTH_SEVERE_MAX", &mut self.health.thresholds.severe_max)?;
        override_parsed(&get, "HEALTH_CHECK_INTERVAL_SECS", &mut self.health_check_interval_secs)?;
        override_parsed(
            &get,
            "SESSION_REFRESH_THRESHOLD_SECS",
            &mut self.sessions.refresh_threshold_secs,
        )?;
        override_parsed(&get, "SESSION_MAX_CHAIN_STEPS", &mut self.sessions.max_chain_steps)?;
        if let Some(dir) = get("STORE_DIR").filter(|d| !d.is_empty()) {
            self.store_dir = Some(PathBuf::from(dir));
        }

        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        self.health
            .thresholds
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid degradation thresholds: {}", e))?;
        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }
        if self.breaker.failure_threshold == 0 {
            anyhow::bail!("breaker.failure_threshold must be at least 1");
        }
        if self.sessions.max_chain_steps == 0 {
            anyhow::bail!("sessions.max_chain_steps must be at least 1");
        }
        Ok(())
    }

    pub fn health_tracker(&self) -> Arc<HealthTracker> {
        Arc::new(HealthTracker::new(self.health))
    }

    /// Executor without health reporting, for use behind a coordinator,
    /// which records one outcome per call itself
    pub fn executor(&self) -> CircuitBreakerRetryExecutor {
        let executor = CircuitBreakerRetryExecutor::new(self.retry.policies());
        executor.breakers().set_default_config(self.breaker.breaker_config());
        if !self.breaker.use_presets {
            for operation in Operation::KNOWN {
                executor.set_breaker_config(operation, self.breaker.breaker_config());
            }
        }
        executor
    }

    /// Executor used on its own, reporting every attempt to `tracker`
    pub fn standalone_executor(&self, tracker: Arc<HealthTracker>) -> CircuitBreakerRetryExecutor {
        self.executor().with_health_reporting(tracker)
    }

    /// Coordinator with its own health tracker and executor
    pub fn coordinator(&self) -> DegradationCoordinator {
        DegradationCoordinator::new(self.health_tracker(), Arc::new(self.executor()))
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings::from(&self.sessions)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn store_dir(&self) -> Result<PathBuf> {
        match &self.store_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(CredentialStore::default_location()?),
        }
    }

    pub fn credential_store(&self) -> Result<CredentialStore> {
        let dir = self.store_dir()?;
        CredentialStore::new(&dir)
            .with_context(|| format!("Failed to open credential store at {}", dir.display()))
    }
}

fn override_parsed<T, G>(get: &G, suffix: &str, target: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    if let Some(raw) = get(suffix) {
        *target = raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid {}{}={:?}: {}", ENV_PREFIX, suffix, raw, e))?;
    }
    Ok(())
}
