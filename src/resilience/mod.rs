//! Failure-handling primitives: retries, circuit breakers, resource health.

pub mod circuit_breaker;
pub mod guard;
pub mod health;
pub mod probes;
pub mod registry;
pub mod retry;


pub use circuit_breaker::{
    BreakerError, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState,
};
pub use guard::{ResourceGuard, DEFAULT_CACHE_TTL};
pub use health::{
    ComponentHealth, HealthCheckResult, HealthMonitor, HealthProbe, HealthReport, ProbeScope,
    ResourceThresholds,
};
pub use probes::{CpuProbe, DiskProbe, GpuProbe, GpuReading, MemoryProbe, ServiceProbe};
pub use registry::CircuitBreakerRegistry;
pub use retry::{retry, retry_with_config, retry_with_policy, RetryConfig, RetryPolicy};
