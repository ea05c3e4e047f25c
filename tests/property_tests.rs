use orchestra_resilience::orchestration::stable_hash;
use orchestra_resilience::resilience::retry_with_policy;
use orchestra_resilience::{
    AdaptiveOrchestrator, AvailabilityTracker, BreakerError, CircuitBreaker,
    CircuitBreakerConfig, CircuitState, RetryConfig, RetryPolicy,
};
use proptest::prelude::*;
use serde_json::{Map, Value};
use std::cell::Cell;
use std::collections::HashSet;
use std::time::Duration;

/// Property-based tests for the retry and circuit breaker state machines
mod retry_props {
    use super::*;

    fn instant_policy(max_attempts: u32) -> RetryPolicy<String> {
        RetryPolicy::new(RetryConfig {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            ..RetryConfig::default()
        })
    }

    proptest! {
        #[test]
        fn test_always_failing_called_max_attempts(max_attempts in 1u32..8) {
            let calls = Cell::new(0u32);
            let result: Result<(), String> = retry_with_policy(
                || {
                    calls.set(calls.get() + 1);
                    Err(format!("failure {}", calls.get()))
                },
                &instant_policy(max_attempts),
                "always_fails",
            );

            prop_assert_eq!(calls.get(), max_attempts);
            // The last attempt's own error comes back untouched
            prop_assert_eq!(result, Err(format!("failure {max_attempts}")));
        }

        #[test]
        fn test_eventual_success_called_k_times(
            (max_attempts, k) in (1u32..8).prop_flat_map(|m| (Just(m), 1..=m))
        ) {
            let calls = Cell::new(0u32);
            let result: Result<u32, String> = retry_with_policy(
                || {
                    calls.set(calls.get() + 1);
                    if calls.get() < k {
                        Err("not yet".to_string())
                    } else {
                        Ok(calls.get())
                    }
                },
                &instant_policy(max_attempts),
                "flaky",
            );

            prop_assert_eq!(result, Ok(k));
            prop_assert_eq!(calls.get(), k);
        }

        #[test]
        fn test_breaker_opens_at_exact_threshold(threshold in 1u32..10) {
            let breaker = CircuitBreaker::new(
                "svc",
                CircuitBreakerConfig {
                    failure_threshold: threshold,
                    recovery_timeout: Duration::from_secs(60),
                },
            );

            for _ in 0..threshold - 1 {
                let result = breaker.call(|| Err::<(), _>("boom"));
                prop_assert!(matches!(result, Err(BreakerError::Failed("boom"))));
            }
            prop_assert_eq!(breaker.state(), CircuitState::Closed);

            let result = breaker.call(|| Err::<(), _>("boom"));
            prop_assert!(matches!(result, Err(BreakerError::Failed("boom"))));
            prop_assert_eq!(breaker.state(), CircuitState::Open);
        }

        #[test]
        fn test_state_reads_do_not_block_trial(reads in 0usize..50) {
            let breaker = CircuitBreaker::new(
                "svc",
                CircuitBreakerConfig {
                    failure_threshold: 1,
                    recovery_timeout: Duration::ZERO,
                },
            );
            let _ = breaker.call(|| Err::<(), _>("boom"));

            for _ in 0..reads {
                breaker.state();
            }
            prop_assert_eq!(breaker.call(|| Ok::<_, &str>(1)).ok(), Some(1));
            prop_assert_eq!(breaker.state(), CircuitState::Closed);
        }
    }
}

mod orchestration_props {
    use super::*;

    proptest! {
        #[test]
        fn test_every_candidate_explored_before_repeat(count in 2usize..12) {
            let orchestrator = AdaptiveOrchestrator::default();
            let candidates: Vec<String> = (0..count).map(|i| format!("agent-{i}")).collect();

            let mut seen = HashSet::new();
            for _ in 0..count {
                let agent = orchestrator.select_agent(&candidates).unwrap();
                prop_assert!(seen.insert(agent.clone()), "{} selected twice", agent);
                orchestrator.record_outcome(&agent, true, Duration::from_millis(100), None);
            }
            prop_assert_eq!(seen.len(), count);
        }

        #[test]
        fn test_hash_ignores_field_order(
            fields in prop::collection::btree_map("[a-z]{1,8}", any::<i64>(), 1..10)
        ) {
            let forward: Map<String, Value> =
                fields.iter().map(|(k, v)| (k.clone(), Value::from(*v))).collect();
            let reversed: Map<String, Value> =
                fields.iter().rev().map(|(k, v)| (k.clone(), Value::from(*v))).collect();

            prop_assert_eq!(
                stable_hash("decision", &Value::Object(forward)),
                stable_hash("decision", &Value::Object(reversed))
            );
        }

        #[test]
        fn test_availability_is_a_ratio(checks in prop::collection::vec(any::<bool>(), 0..100)) {
            let tracker = AvailabilityTracker::new(Duration::from_secs(3600), 0.9);
            for healthy in &checks {
                tracker.record_check(*healthy);
            }

            let availability = tracker.availability();
            prop_assert!((0.0..=1.0).contains(&availability));
            if checks.is_empty() {
                prop_assert!((availability - 1.0).abs() < f64::EPSILON);
            } else {
                let healthy = checks.iter().filter(|h| **h).count();
                prop_assert!((availability - healthy as f64 / checks.len() as f64).abs() < 1e-9);
            }
        }
    }
}
