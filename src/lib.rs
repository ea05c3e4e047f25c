pub mod config;
pub mod error;
pub mod logging;
pub mod orchestration;
pub mod resilience;
pub mod service;

pub use config::ResilienceConfig;
pub use error::{Error, ErrorCategory, Result};
pub use logging::{init_logging, LoggingConfig};
pub use orchestration::{
    AdaptiveOrchestrator, DriftMitigator, FactOutcome, PlanningContextDeduplicator,
};
pub use resilience::{
    retry, retry_with_config, retry_with_policy, BreakerError, CircuitBreaker,
    CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState, HealthCheckResult, HealthMonitor,
    HealthProbe, HealthReport, ResourceGuard, ResourceThresholds, RetryConfig, RetryPolicy,
};
pub use service::{AvailabilityTracker, ServiceWatchdog};
