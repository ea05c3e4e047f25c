use orchestra_resilience::{
    AdaptiveOrchestrator, AvailabilityTracker, BreakerError, CircuitBreakerConfig,
    CircuitBreakerRegistry, CircuitState, DriftMitigator, Error, FactOutcome, HealthCheckResult,
    HealthMonitor, HealthProbe, PlanningContextDeduplicator, ResilienceConfig, ResourceGuard,
    ServiceWatchdog,
};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;
use tempfile::TempDir;

#[derive(Debug, PartialEq)]
struct ConnectionRefused;

impl std::fmt::Display for ConnectionRefused {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("connection refused")
    }
}

#[test]
fn test_breaker_opens_then_recovers() {
    let registry = CircuitBreakerRegistry::new();
    let breaker = registry.register(
        "svc",
        CircuitBreakerConfig {
            failure_threshold: 2,
            recovery_timeout: Duration::from_millis(100),
        },
    );

    for _ in 0..2 {
        let result = breaker.call(|| Err::<(), _>(ConnectionRefused));
        assert!(matches!(result, Err(BreakerError::Failed(ConnectionRefused))));
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    let rejected = breaker.call(|| Ok::<_, ConnectionRefused>("unreachable"));
    match rejected {
        Err(BreakerError::Open { service, retry_after }) => {
            assert_eq!(service, "svc");
            assert!(retry_after <= Duration::from_millis(100));
        }
        other => panic!("expected open rejection, got {other:?}"),
    }

    sleep(Duration::from_millis(150));
    assert_eq!(breaker.call(|| Ok::<_, ConnectionRefused>("ok")).unwrap(), "ok");
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[test]
fn test_rankings_prefer_reliable_agent() {
    let orchestrator = AdaptiveOrchestrator::default();
    for _ in 0..5 {
        orchestrator.record_outcome("A", true, Duration::from_secs(1), None);
        orchestrator.record_outcome("B", false, Duration::from_secs(5), None);
    }

    let rankings = orchestrator.get_rankings();
    assert_eq!(rankings[0].agent, "A");
    assert_eq!(rankings[1].agent, "B");
    assert_eq!(orchestrator.select_agent(&["B", "A"]).as_deref(), Some("A"));
}

struct FlagProbe {
    healthy: Arc<AtomicBool>,
}

impl HealthProbe for FlagProbe {
    fn name(&self) -> &str {
        "inference"
    }

    fn check(&self) -> HealthCheckResult {
        if self.healthy.load(Ordering::SeqCst) {
            HealthCheckResult::healthy()
        } else {
            HealthCheckResult::unhealthy("inference endpoint unreachable")
        }
    }
}

#[test]
fn test_guard_watchdog_and_availability_together() {
    let up = Arc::new(AtomicBool::new(false));
    let guard = ResourceGuard::new(
        HealthMonitor::empty().with_probe(FlagProbe {
            healthy: Arc::clone(&up),
        }),
        Duration::from_secs(60),
    );
    let tracker = AvailabilityTracker::new(Duration::from_secs(3600), 0.5);

    assert!(matches!(
        guard.require(false),
        Err(Error::ResourceExhausted { .. })
    ));
    tracker.record_check(guard.can_proceed(false));

    let watchdog = ServiceWatchdog::new();
    let check_up = Arc::clone(&up);
    let restart_up = Arc::clone(&up);
    watchdog.register(
        "inference",
        move || Ok(check_up.load(Ordering::SeqCst)),
        move || {
            restart_up.store(true, Ordering::SeqCst);
            Ok(true)
        },
        3,
        Duration::ZERO,
    );
    assert!(watchdog.check_service("inference").unwrap());

    guard.invalidate();
    assert!(guard.require(false).is_ok());
    tracker.record_check(guard.can_proceed(false));

    assert!((tracker.availability() - 0.5).abs() < f64::EPSILON);
    assert!(tracker.meets_target());
}

#[test]
fn test_status_structures_serialize() {
    let dir = TempDir::new().unwrap();
    let config = ResilienceConfig::default();

    let tracker = AvailabilityTracker::from_settings(&config.availability)
        .with_snapshot_path(dir.path().join("availability.json"));
    tracker.record_check(true);
    tracker.save().unwrap();

    let drift = DriftMitigator::new(config.drift.clone());
    drift.record_decision("model", json!({"name": "llama3"}), "default");
    drift.record_decision("model", json!({"name": "qwen"}), "override");

    let report = serde_json::to_value(drift.check_drift()).unwrap();
    assert_eq!(report["findings"]["model"][0]["kind"], "contradiction");

    let status = serde_json::to_value(tracker.status()).unwrap();
    assert_eq!(status["total_checks"], 1);

    let context = PlanningContextDeduplicator::from_settings(&config.context);
    assert_eq!(context.add_fact("os", json!("linux"), "uname"), FactOutcome::New);
    assert_eq!(context.add_fact("os", json!("linux"), "uname"), FactOutcome::Duplicate);
    assert_eq!(serde_json::to_value(context.stats()).unwrap()["duplicates"], 1);
}
