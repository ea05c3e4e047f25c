use crate::Error;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed - requests flow normally
    Closed,
    /// Circuit is open - requests are rejected immediately
    Open,
    /// Circuit is half-open - a single trial request is allowed
    HalfOpen,
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Time to wait before transitioning from open to half-open
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

/// Outcome of a guarded call that did not produce a value
#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E> {
    /// The breaker refused to attempt the call
    #[error("Circuit breaker open for service: {service} (retry in {retry_after:?})")]
    Open {
        service: String,
        retry_after: Duration,
    },
    /// The call was attempted and returned its own error
    #[error("{0}")]
    Failed(E),
}

impl<E> BreakerError<E> {
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }

    /// The wrapped call's error, if the call was attempted
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Open { .. } => None,
            Self::Failed(error) => Some(error),
        }
    }
}

impl From<BreakerError<Error>> for Error {
    fn from(err: BreakerError<Error>) -> Self {
        match err {
            BreakerError::Open {
                service,
                retry_after,
            } => Self::CircuitBreakerOpen {
                service,
                retry_after,
            },
            BreakerError::Failed(error) => error,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    trial_in_flight: bool,
    /// Bumped on every state transition; outcomes of calls admitted under an
    /// older generation leave the state machine alone
    generation: u64,
    total_calls: u64,
    successes: u64,
    failures: u64,
    rejections: u64,
}

impl BreakerInner {
    const fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_time: None,
            trial_in_flight: false,
            generation: 0,
            total_calls: 0,
            successes: 0,
            failures: 0,
            rejections: 0,
        }
    }

    fn transition(&mut self, state: CircuitState) {
        self.state = state;
        self.generation += 1;
    }
}

/// Named circuit breaker guarding calls to one unreliable dependency.
///
/// All state lives behind a single mutex owned by this instance.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner::new()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Execute an operation with circuit breaker protection.
    ///
    /// An open breaker rejects without invoking `operation`. Otherwise the
    /// operation's result drives the state machine and its error is handed
    /// back unchanged inside [`BreakerError::Failed`].
    pub fn call<T, E, F>(&self, operation: F) -> std::result::Result<T, BreakerError<E>>
    where
        F: FnOnce() -> std::result::Result<T, E>,
    {
        let generation = self.acquire()?;

        let start_time = Instant::now();
        let result = match catch_unwind(AssertUnwindSafe(operation)) {
            Ok(result) => result,
            Err(panic) => {
                self.on_failure(generation);
                resume_unwind(panic);
            }
        };
        let duration = start_time.elapsed();

        match &result {
            Ok(_) => {
                self.on_success(generation);
                debug!(service = %self.name, ?duration, "Circuit breaker call succeeded");
            }
            Err(_) => {
                self.on_failure(generation);
                debug!(service = %self.name, ?duration, "Circuit breaker call failed");
            }
        }

        result.map_err(BreakerError::Failed)
    }

    /// Current state, applying the lazy Open -> HalfOpen transition once the
    /// recovery timeout has elapsed since the last failure.
    pub fn poll_state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.poll_locked(&mut inner);
        inner.state
    }

    /// Alias of [`poll_state`](Self::poll_state); reading the state may move
    /// an open breaker to half-open.
    pub fn state(&self) -> CircuitState {
        self.poll_state()
    }

    /// Estimated wait until an open breaker admits a trial call
    pub fn retry_after(&self) -> Option<Duration> {
        let mut inner = self.inner.lock();
        self.poll_locked(&mut inner);
        (inner.state == CircuitState::Open).then(|| self.remaining_cooldown(&inner))
    }

    /// Reset circuit breaker to closed state
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count = 0;
        inner.last_failure_time = None;
        inner.trial_in_flight = false;
        inner.transition(CircuitState::Closed);

        info!(service = %self.name, "Circuit breaker reset to Closed");
    }

    /// Force circuit breaker to open state, starting a fresh cooldown
    pub fn force_open(&self) {
        let mut inner = self.inner.lock();
        inner.transition(CircuitState::Open);
        inner.last_failure_time = Some(Instant::now());
        inner.trial_in_flight = false;

        warn!(service = %self.name, "Circuit breaker forced to Open");
    }

    /// Get circuit breaker metrics
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let mut inner = self.inner.lock();
        self.poll_locked(&mut inner);

        CircuitBreakerMetrics {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            failure_threshold: self.config.failure_threshold,
            total_calls: inner.total_calls,
            successes: inner.successes,
            failures: inner.failures,
            rejections: inner.rejections,
            seconds_since_last_failure: inner
                .last_failure_time
                .map(|at| at.elapsed().as_secs_f64()),
            retry_after_secs: (inner.state == CircuitState::Open)
                .then(|| self.remaining_cooldown(&inner).as_secs_f64()),
        }
    }

    fn poll_locked(&self, inner: &mut BreakerInner) {
        if inner.state != CircuitState::Open {
            return;
        }
        let recovered = inner
            .last_failure_time
            .map_or(true, |at| at.elapsed() >= self.config.recovery_timeout);
        if recovered {
            inner.transition(CircuitState::HalfOpen);
            inner.trial_in_flight = false;
            info!(service = %self.name, "Circuit breaker transitioning from Open to HalfOpen");
        }
    }

    fn remaining_cooldown(&self, inner: &BreakerInner) -> Duration {
        inner.last_failure_time.map_or(Duration::ZERO, |at| {
            self.config.recovery_timeout.saturating_sub(at.elapsed())
        })
    }

    /// Check if the circuit breaker allows execution, returning the
    /// generation the call was admitted under
    fn acquire<E>(&self) -> std::result::Result<u64, BreakerError<E>> {
        let mut inner = self.inner.lock();
        self.poll_locked(&mut inner);

        let admitted = match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    false
                } else {
                    inner.trial_in_flight = true;
                    true
                }
            }
        };

        if admitted {
            inner.total_calls += 1;
            return Ok(inner.generation);
        }

        inner.rejections += 1;
        let retry_after = self.remaining_cooldown(&inner);
        debug!(service = %self.name, ?retry_after, "Circuit breaker rejected call");
        Err(BreakerError::Open {
            service: self.name.clone(),
            retry_after,
        })
    }

    /// Handle successful operation
    fn on_success(&self, generation: u64) {
        let mut inner = self.inner.lock();
        inner.successes += 1;
        if generation != inner.generation {
            debug!(service = %self.name, "Ignoring success of call admitted before a transition");
            return;
        }

        match inner.state {
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::HalfOpen => {
                inner.transition(CircuitState::Closed);
                inner.failure_count = 0;
                inner.trial_in_flight = false;
                info!(
                    service = %self.name,
                    "Circuit breaker transitioning from HalfOpen to Closed"
                );
            }
            CircuitState::Open => {}
        }
    }

    /// Handle failed operation
    fn on_failure(&self, generation: u64) {
        let mut inner = self.inner.lock();
        inner.failures += 1;
        if generation != inner.generation {
            debug!(service = %self.name, "Ignoring failure of call admitted before a transition");
            return;
        }
        inner.failure_count += 1;
        inner.last_failure_time = Some(Instant::now());

        match inner.state {
            CircuitState::Closed => {
                if inner.failure_count >= self.config.failure_threshold {
                    inner.transition(CircuitState::Open);
                    warn!(
                        service = %self.name,
                        failures = inner.failure_count,
                        "Circuit breaker opening"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.transition(CircuitState::Open);
                inner.trial_in_flight = false;
                warn!(
                    service = %self.name,
                    "Circuit breaker returning to Open after failed trial call"
                );
            }
            CircuitState::Open => {}
        }
    }
}

/// Serializable breaker snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub total_calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub rejections: u64,
    pub seconds_since_last_failure: Option<f64>,
    pub retry_after_secs: Option<f64>,
}

impl CircuitBreakerMetrics {
    /// Check if circuit breaker is healthy
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.state == CircuitState::Closed
    }

    /// Get failure rate as percentage of attempted calls
    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            (self.failures as f64 / self.total_calls as f64) * 100.0
        }
    }
}
