use super::circuit_breaker::{CircuitBreakerMetrics, CircuitState};
use super::probes::{CpuProbe, DiskProbe, GpuProbe, MemoryProbe, ServiceProbe};
use super::registry::CircuitBreakerRegistry;
use crate::config::{invalid, HealthSettings};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Static resource limits; a probe is healthy while `usage < threshold`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceThresholds {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
    pub gpu_memory_percent: f64,
    pub gpu_temp_celsius: f64,
}

impl Default for ResourceThresholds {
    fn default() -> Self {
        Self {
            cpu_percent: 90.0,
            memory_percent: 90.0,
            disk_percent: 95.0,
            gpu_memory_percent: 95.0,
            gpu_temp_celsius: 85.0,
        }
    }
}

impl ResourceThresholds {
    pub fn validate(&self) -> Result<()> {
        let percentages = [
            ("health.thresholds.cpu_percent", self.cpu_percent),
            ("health.thresholds.memory_percent", self.memory_percent),
            ("health.thresholds.disk_percent", self.disk_percent),
            ("health.thresholds.gpu_memory_percent", self.gpu_memory_percent),
        ];
        for (field, value) in percentages {
            if !(value > 0.0 && value <= 100.0) {
                return Err(invalid(field, "must be within (0, 100]"));
            }
        }
        if !(self.gpu_temp_celsius > 0.0 && self.gpu_temp_celsius.is_finite()) {
            return Err(invalid("health.thresholds.gpu_temp_celsius", "must be positive"));
        }
        Ok(())
    }
}

/// Result of a single probe. Probes never fail: a missing tool or an
/// unreadable counter yields a healthy result with an explanatory note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub healthy: bool,
    pub metrics: BTreeMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl HealthCheckResult {
    #[must_use]
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            metrics: BTreeMap::new(),
            warning: None,
            note: None,
        }
    }

    #[must_use]
    pub fn unhealthy(warning: impl Into<String>) -> Self {
        Self {
            healthy: false,
            metrics: BTreeMap::new(),
            warning: Some(warning.into()),
            note: None,
        }
    }

    /// Healthy result for a probe whose instrumentation is missing
    #[must_use]
    pub fn unavailable(note: impl Into<String>) -> Self {
        Self::healthy().with_note(note)
    }

    /// Compare `usage` against `threshold` (strictly below is healthy)
    #[must_use]
    pub fn from_threshold(
        label: &str,
        metric: &str,
        usage: f64,
        threshold: f64,
        unit: &str,
    ) -> Self {
        let result = if usage < threshold {
            Self::healthy()
        } else {
            Self::unhealthy(format!(
                "{label} usage {usage:.1}{unit} >= threshold {threshold:.1}{unit}"
            ))
        };
        result
            .with_metric(metric, usage)
            .with_metric(format!("{metric}_threshold"), threshold)
    }

    /// Add a metric to the result
    #[must_use]
    pub fn with_metric(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metrics.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    #[must_use]
    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warning = Some(warning.into());
        self
    }
}

/// Whether a probe's verdict applies to every caller or only GPU workloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeScope {
    Always,
    Gpu,
}

/// A single health probe
pub trait HealthProbe: Send + Sync {
    /// Name of this probe in reports
    fn name(&self) -> &str;

    /// Perform the check; must not panic or block indefinitely
    fn check(&self) -> HealthCheckResult;

    fn scope(&self) -> ProbeScope {
        ProbeScope::Always
    }
}

/// Component health information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub scope: ProbeScope,
    pub result: HealthCheckResult,
}

/// Aggregated outcome of one `check_all` run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Logical AND of every component
    pub healthy: bool,
    /// Every non-empty component warning, in probe order
    pub warnings: Vec<String>,
    pub components: Vec<ComponentHealth>,
    pub circuit_breakers: Vec<CircuitBreakerMetrics>,
    pub checked_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl HealthReport {
    fn from_components(
        components: Vec<ComponentHealth>,
        circuit_breakers: Vec<CircuitBreakerMetrics>,
        duration: Duration,
    ) -> Self {
        Self {
            healthy: components.iter().all(|c| c.result.healthy),
            warnings: components
                .iter()
                .filter_map(|c| c.result.warning.clone())
                .filter(|w| !w.is_empty())
                .collect(),
            components,
            circuit_breakers,
            checked_at: Utc::now(),
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Warnings of the unhealthy components relevant to a caller.
    /// GPU-scoped components only count when `require_gpu` is set.
    #[must_use]
    pub fn blocking_warnings(&self, require_gpu: bool) -> Vec<String> {
        self.components
            .iter()
            .filter(|c| !c.result.healthy)
            .filter(|c| require_gpu || c.scope == ProbeScope::Always)
            .map(|c| {
                c.result
                    .warning
                    .clone()
                    .unwrap_or_else(|| format!("{} is unhealthy", c.name))
            })
            .collect()
    }

    #[must_use]
    pub fn component(&self, name: &str) -> Option<&ComponentHealth> {
        self.components.iter().find(|c| c.name == name)
    }
}

/// Runs a fixed probe set independently and aggregates the results,
/// merging in the state of any registered circuit breakers.
pub struct HealthMonitor {
    probes: Vec<Box<dyn HealthProbe>>,
    circuit_breakers: Option<Arc<CircuitBreakerRegistry>>,
}

impl HealthMonitor {
    /// Monitor with no probes; add them with [`with_probe`](Self::with_probe)
    #[must_use]
    pub fn empty() -> Self {
        Self {
            probes: Vec::new(),
            circuit_breakers: None,
        }
    }

    /// Standard probe set: cpu, memory, disk (`/`), gpu and an empty service list
    #[must_use]
    pub fn new(thresholds: ResourceThresholds) -> Self {
        Self::from_settings(&HealthSettings {
            thresholds,
            ..HealthSettings::default()
        })
    }

    #[must_use]
    pub fn from_settings(settings: &HealthSettings) -> Self {
        let thresholds = settings.thresholds;
        Self::empty()
            .with_probe(CpuProbe::new(thresholds.cpu_percent))
            .with_probe(MemoryProbe::new(thresholds.memory_percent))
            .with_probe(DiskProbe::new(
                settings.disk_path.clone(),
                thresholds.disk_percent,
            ))
            .with_probe(GpuProbe::new(
                thresholds.gpu_memory_percent,
                thresholds.gpu_temp_celsius,
            ))
            .with_probe(ServiceProbe::new(
                settings.services.clone(),
                settings.probe_timeout(),
            ))
    }

    #[must_use]
    pub fn with_probe(mut self, probe: impl HealthProbe + 'static) -> Self {
        self.probes.push(Box::new(probe));
        self
    }

    /// Merge breaker state from `registry` into every report
    #[must_use]
    pub fn with_circuit_breakers(mut self, registry: Arc<CircuitBreakerRegistry>) -> Self {
        self.circuit_breakers = Some(registry);
        self
    }

    #[must_use]
    pub fn probe_names(&self) -> Vec<&str> {
        self.probes.iter().map(|p| p.name()).collect()
    }

    /// Run every probe and aggregate; never fails
    pub fn check_all(&self) -> HealthReport {
        let start_time = Instant::now();
        let mut components: Vec<ComponentHealth> =
            self.probes.iter().map(|probe| run_probe(probe.as_ref())).collect();

        let breakers = self
            .circuit_breakers
            .as_ref()
            .map(|registry| registry.snapshots())
            .unwrap_or_default();
        if self.circuit_breakers.is_some() {
            components.push(breaker_component(&breakers));
        }

        let report = HealthReport::from_components(components, breakers, start_time.elapsed());
        if report.healthy {
            debug!(duration_ms = report.duration_ms, "Health check passed");
        } else {
            warn!(warnings = ?report.warnings, "Health check found problems");
        }
        report
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new(ResourceThresholds::default())
    }
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("probes", &self.probe_names())
            .field("circuit_breakers", &self.circuit_breakers.is_some())
            .finish()
    }
}

fn run_probe(probe: &dyn HealthProbe) -> ComponentHealth {
    let name = probe.name().to_string();
    let result = catch_unwind(AssertUnwindSafe(|| probe.check())).unwrap_or_else(|_| {
        warn!(probe = %name, "Health probe panicked");
        HealthCheckResult::healthy().with_warning(format!("{name} probe failed to run"))
    });
    ComponentHealth {
        name,
        scope: probe.scope(),
        result,
    }
}

fn breaker_component(breakers: &[CircuitBreakerMetrics]) -> ComponentHealth {
    let open: Vec<&str> = breakers
        .iter()
        .filter(|m| m.state == CircuitState::Open)
        .map(|m| m.name.as_str())
        .collect();

    let result = if open.is_empty() {
        HealthCheckResult::healthy()
    } else {
        HealthCheckResult::unhealthy(format!("Circuit breaker open: {}", open.join(", ")))
    };

    ComponentHealth {
        name: "circuit_breakers".to_string(),
        scope: ProbeScope::Always,
        result: result
            .with_metric("registered", breakers.len())
            .with_metric("open", open.len()),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    pub(crate) struct TestProbe {
        name: String,
        result: HealthCheckResult,
        scope: ProbeScope,
        pub(crate) call_count: Arc<AtomicU32>,
    }

    impl TestProbe {
        pub(crate) fn new(name: &str, result: HealthCheckResult) -> Self {
            Self {
                name: name.to_string(),
                result,
                scope: ProbeScope::Always,
                call_count: Arc::new(AtomicU32::new(0)),
            }
        }

        pub(crate) fn gpu(mut self) -> Self {
            self.scope = ProbeScope::Gpu;
            self
        }
    }

    impl HealthProbe for TestProbe {
        fn name(&self) -> &str {
            &self.name
        }

        fn check(&self) -> HealthCheckResult {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }

        fn scope(&self) -> ProbeScope {
            self.scope
        }
    }

    struct PanickingProbe;

    impl HealthProbe for PanickingProbe {
        fn name(&self) -> &str {
            "broken"
        }

        fn check(&self) -> HealthCheckResult {
            panic!("counter file vanished")
        }
    }

    #[test]
    fn test_aggregate_is_logical_and() {
        let monitor = HealthMonitor::empty()
            .with_probe(TestProbe::new("cpu", HealthCheckResult::healthy()))
            .with_probe(TestProbe::new("disk", HealthCheckResult::unhealthy("disk full")))
            .with_probe(TestProbe::new("memory", HealthCheckResult::unhealthy("memory high")));

        let report = monitor.check_all();
        assert!(!report.healthy);
        assert_eq!(report.warnings, vec!["disk full", "memory high"]);
        assert_eq!(report.components.len(), 3);
    }

    #[test]
    fn test_all_healthy() {
        let monitor = HealthMonitor::empty()
            .with_probe(TestProbe::new("cpu", HealthCheckResult::healthy()))
            .with_probe(TestProbe::new(
                "gpu",
                HealthCheckResult::unavailable("nvidia-smi not found"),
            ));

        let report = monitor.check_all();
        assert!(report.healthy);
        assert!(report.warnings.is_empty());
        assert_eq!(
            report.component("gpu").unwrap().result.note.as_deref(),
            Some("nvidia-smi not found")
        );
    }

    #[test]
    fn test_threshold_comparison_is_strict() {
        assert!(HealthCheckResult::from_threshold("CPU", "cpu_percent", 89.9, 90.0, "%").healthy);
        let at_limit = HealthCheckResult::from_threshold("CPU", "cpu_percent", 90.0, 90.0, "%");
        assert!(!at_limit.healthy);
        assert!(at_limit.warning.unwrap().contains("CPU usage 90.0%"));
    }

    #[test]
    fn test_panicking_probe_degrades_to_warning() {
        let monitor = HealthMonitor::empty()
            .with_probe(PanickingProbe)
            .with_probe(TestProbe::new("cpu", HealthCheckResult::healthy()));

        let report = monitor.check_all();
        assert!(report.healthy);
        assert_eq!(report.warnings, vec!["broken probe failed to run"]);
    }

    #[test]
    fn test_open_breaker_makes_report_unhealthy() {
        let registry = Arc::new(CircuitBreakerRegistry::new());
        registry.get_or_create("ollama");
        let monitor = HealthMonitor::empty().with_circuit_breakers(Arc::clone(&registry));

        let report = monitor.check_all();
        assert!(report.healthy);
        assert_eq!(report.circuit_breakers.len(), 1);

        registry.get_or_create("ollama").force_open();
        let report = monitor.check_all();
        assert!(!report.healthy);
        assert_eq!(report.warnings, vec!["Circuit breaker open: ollama"]);
    }

    #[test]
    fn test_gpu_scope_only_blocks_gpu_callers() {
        let monitor = HealthMonitor::empty()
            .with_probe(TestProbe::new("cpu", HealthCheckResult::healthy()))
            .with_probe(TestProbe::new("gpu", HealthCheckResult::unhealthy("GPU hot")).gpu());

        let report = monitor.check_all();
        assert!(!report.healthy);
        assert!(report.blocking_warnings(false).is_empty());
        assert_eq!(report.blocking_warnings(true), vec!["GPU hot"]);
    }

    #[test]
    fn test_report_serializes() {
        let monitor = HealthMonitor::empty().with_probe(TestProbe::new(
            "memory",
            HealthCheckResult::healthy().with_metric("memory_percent", 42.5),
        ));
        let json = serde_json::to_value(monitor.check_all()).unwrap();
        assert_eq!(json["healthy"], true);
        assert_eq!(json["components"][0]["result"]["metrics"]["memory_percent"], 42.5);
    }

    #[test]
    fn test_default_probe_set() {
        let monitor = HealthMonitor::default();
        assert_eq!(
            monitor.probe_names(),
            vec!["cpu", "memory", "disk", "gpu", "services"]
        );
    }

    #[test]
    fn test_threshold_validation() {
        assert!(ResourceThresholds::default().validate().is_ok());
        let bad = ResourceThresholds {
            disk_percent: 0.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
