use super::circuit_breaker::{
    BreakerError, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics,
};
use crate::{Error, Result};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Named circuit breakers for the local dependencies of one process.
///
/// Breakers are created on first use with the registry's default config, or
/// registered explicitly with their own. The health monitor reads this
/// registry to merge breaker state into its report.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    circuit_breakers: RwLock<BTreeMap<String, Arc<CircuitBreaker>>>,
    default_config: CircuitBreakerConfig,
}

impl CircuitBreakerRegistry {
    /// Create a registry whose breakers use the default config
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with custom default config
    #[must_use]
    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            circuit_breakers: RwLock::new(BTreeMap::new()),
            default_config: config,
        }
    }

    /// Register a breaker with its own config, replacing any breaker of the same name
    pub fn register(&self, name: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        let breaker = Arc::new(CircuitBreaker::new(name, config));
        let previous = self
            .circuit_breakers
            .write()
            .insert(name.to_string(), Arc::clone(&breaker));
        if previous.is_some() {
            warn!(service = name, "Replaced existing circuit breaker");
        } else {
            info!(service = name, "Registered circuit breaker");
        }
        breaker
    }

    /// Get or create a circuit breaker for a specific service
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.circuit_breakers.read().get(name) {
            return Arc::clone(breaker);
        }

        let mut breakers = self.circuit_breakers.write();
        Arc::clone(breakers.entry(name.to_string()).or_insert_with(|| {
            info!(service = name, "Creating new circuit breaker");
            Arc::new(CircuitBreaker::new(name, self.default_config.clone()))
        }))
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.circuit_breakers.read().get(name).cloned()
    }

    /// Execute an operation with the named service's breaker
    pub fn call<T, E, F>(&self, name: &str, operation: F) -> std::result::Result<T, BreakerError<E>>
    where
        F: FnOnce() -> std::result::Result<T, E>,
    {
        debug!(service = name, "Executing operation with circuit breaker");
        self.get_or_create(name).call(operation)
    }

    /// Reset a specific circuit breaker
    pub fn reset(&self, name: &str) -> Result<()> {
        let breaker = self.get(name).ok_or_else(|| Error::NotFound {
            kind: "circuit breaker",
            name: name.to_string(),
        })?;
        breaker.reset();
        Ok(())
    }

    /// Reset all circuit breakers
    pub fn reset_all(&self) {
        for breaker in self.circuit_breakers.read().values() {
            breaker.reset();
        }
    }

    /// Metrics for every registered breaker, ordered by name
    pub fn snapshots(&self) -> Vec<CircuitBreakerMetrics> {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.circuit_breakers.read().values().cloned().collect();
        breakers.iter().map(|breaker| breaker.metrics()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.circuit_breakers.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.circuit_breakers.read().is_empty()
    }
}
