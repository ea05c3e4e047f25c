//! # Configuration
//!
//! Layered configuration for every resilience component: built-in defaults,
//! an optional TOML/JSON file, then `ORCHESTRA__*` environment variables.
//! Durations are written as `*_ms` / `*_secs` numbers and converted into the
//! `Duration`-based component configs at construction time.

use crate::logging::LoggingConfig;
use crate::orchestration::{DriftConfig, OrchestratorConfig};
use crate::resilience::{CircuitBreakerConfig, ResourceThresholds, RetryConfig};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix, e.g. `ORCHESTRA__RETRY__MAX_ATTEMPTS=5`
pub const ENV_PREFIX: &str = "ORCHESTRA";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub retry: RetrySettings,
    pub circuit_breaker: CircuitBreakerSettings,
    pub health: HealthSettings,
    pub watchdog: WatchdogSettings,
    pub drift: DriftConfig,
    pub orchestrator: OrchestratorConfig,
    pub availability: AvailabilitySettings,
    pub context: ContextSettings,
    pub logging: LoggingConfig,
}

/// Retry defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
    /// Extra random delay as a fraction of the computed delay
    pub jitter: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
            jitter: 0.0,
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            backoff_factor: settings.backoff_factor,
            jitter: settings.jitter,
        }
    }
}

/// Circuit breaker defaults applied to breakers created by name
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u32,
    pub recovery_timeout_secs: f64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_secs: 60.0,
        }
    }
}

impl From<&CircuitBreakerSettings> for CircuitBreakerConfig {
    fn from(settings: &CircuitBreakerSettings) -> Self {
        Self {
            failure_threshold: settings.failure_threshold,
            recovery_timeout: Duration::from_secs_f64(settings.recovery_timeout_secs.max(0.0)),
        }
    }
}

/// External dependency polled by the service reachability probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    pub name: String,
    pub url: String,
}

/// Health monitor and resource guard settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    pub thresholds: ResourceThresholds,
    /// Mount point whose usage the disk probe reports
    pub disk_path: PathBuf,
    pub services: Vec<ServiceEndpoint>,
    pub probe_timeout_ms: u64,
    /// Resource guard cache lifetime
    pub cache_ttl_secs: f64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            thresholds: ResourceThresholds::default(),
            disk_path: PathBuf::from("/"),
            services: Vec::new(),
            probe_timeout_ms: 2_000,
            cache_ttl_secs: 10.0,
        }
    }
}

impl HealthSettings {
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs_f64(self.cache_ttl_secs.max(0.0))
    }
}

/// Watchdog settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogSettings {
    pub interval_secs: f64,
    pub max_restarts: u32,
    pub cooldown_secs: f64,
    /// Upper bound on how long `stop()` waits for the loop thread
    pub stop_timeout_secs: f64,
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Self {
            interval_secs: 30.0,
            max_restarts: 3,
            cooldown_secs: 60.0,
            stop_timeout_secs: 5.0,
        }
    }
}

impl WatchdogSettings {
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_secs.max(0.0))
    }

    #[must_use]
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs_f64(self.cooldown_secs.max(0.0))
    }

    #[must_use]
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.stop_timeout_secs.max(0.0))
    }
}

/// Availability tracker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AvailabilitySettings {
    pub window_secs: u64,
    pub target: f64,
    /// Number of most recent checks written to the snapshot
    pub persist_entries: usize,
    /// Snapshot file; defaults to the platform data directory
    pub snapshot_path: Option<PathBuf>,
}

impl Default for AvailabilitySettings {
    fn default() -> Self {
        Self {
            window_secs: 24 * 60 * 60,
            target: 0.99,
            persist_entries: 1_000,
            snapshot_path: None,
        }
    }
}

impl AvailabilitySettings {
    #[must_use]
    pub const fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Configured snapshot path or `<data dir>/orchestra-resilience/availability.json`
    #[must_use]
    pub fn resolved_snapshot_path(&self) -> PathBuf {
        self.snapshot_path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("orchestra-resilience")
                .join("availability.json")
        })
    }
}

/// Planning context deduplicator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextSettings {
    pub max_facts: usize,
    pub stale_after_secs: u64,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            max_facts: 500,
            stale_after_secs: 60 * 60,
        }
    }
}

impl ContextSettings {
    #[must_use]
    pub const fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

impl ResilienceConfig {
    /// Load configuration: defaults, then the optional file, then the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Self::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make a component misbehave
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "must be at least 1"));
        }
        if !self.retry.backoff_factor.is_finite() || self.retry.backoff_factor < 1.0 {
            return Err(invalid("retry.backoff_factor", "must be a finite number >= 1.0"));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(invalid("retry.base_delay_ms", "must not exceed retry.max_delay_ms"));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(invalid("retry.jitter", "must be within [0, 1]"));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(invalid("circuit_breaker.failure_threshold", "must be at least 1"));
        }
        if !self.circuit_breaker.recovery_timeout_secs.is_finite()
            || self.circuit_breaker.recovery_timeout_secs < 0.0
        {
            return Err(invalid(
                "circuit_breaker.recovery_timeout_secs",
                "must be a non-negative number",
            ));
        }
        self.health.thresholds.validate()?;
        if self.health.cache_ttl_secs < 0.0 || !self.health.cache_ttl_secs.is_finite() {
            return Err(invalid("health.cache_ttl_secs", "must be a non-negative number"));
        }
        if self.watchdog.interval_secs <= 0.0 || !self.watchdog.interval_secs.is_finite() {
            return Err(invalid("watchdog.interval_secs", "must be positive"));
        }
        if self.drift.window_size == 0 {
            return Err(invalid("drift.window_size", "must be at least 1"));
        }
        if self.drift.contradiction_window < 2 {
            return Err(invalid("drift.contradiction_window", "must be at least 2"));
        }
        if !self.orchestrator.exploration_constant.is_finite()
            || self.orchestrator.exploration_constant < 0.0
        {
            return Err(invalid(
                "orchestrator.exploration_constant",
                "must be a non-negative number",
            ));
        }
        if self.orchestrator.history_size == 0 {
            return Err(invalid("orchestrator.history_size", "must be at least 1"));
        }
        if self.availability.window_secs == 0 {
            return Err(invalid("availability.window_secs", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.availability.target) {
            return Err(invalid("availability.target", "must be within [0, 1]"));
        }
        if self.context.max_facts == 0 {
            return Err(invalid("context.max_facts", "must be at least 1"));
        }
        Ok(())
    }
}

pub(crate) fn invalid(field: &str, reason: &str) -> Error {
    Error::InvalidInput {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
