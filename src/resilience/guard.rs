use super::health::{HealthMonitor, HealthReport};
use crate::config::HealthSettings;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default lifetime of a cached health report
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(10);

#[derive(Debug)]
struct CachedReport {
    report: Arc<HealthReport>,
    checked_at: Instant,
}

/// Gate in front of resource-hungry work.
///
/// Re-runs the monitor only when the cached report is older than the TTL,
/// so bursts of callers share one probe run.
#[derive(Debug)]
pub struct ResourceGuard {
    monitor: HealthMonitor,
    ttl: Duration,
    cache: Mutex<Option<CachedReport>>,
}

impl ResourceGuard {
    #[must_use]
    pub fn new(monitor: HealthMonitor, ttl: Duration) -> Self {
        Self {
            monitor,
            ttl,
            cache: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn from_settings(settings: &HealthSettings) -> Self {
        Self::new(HealthMonitor::from_settings(settings), settings.cache_ttl())
    }

    #[must_use]
    pub const fn monitor(&self) -> &HealthMonitor {
        &self.monitor
    }

    /// Cached report, refreshed when older than the TTL
    pub fn report(&self) -> Arc<HealthReport> {
        let mut cache = self.cache.lock();
        if let Some(cached) = cache.as_ref() {
            if cached.checked_at.elapsed() <= self.ttl {
                return Arc::clone(&cached.report);
            }
        }

        debug!("Resource guard cache expired, re-running health checks");
        let report = Arc::new(self.monitor.check_all());
        *cache = Some(CachedReport {
            report: Arc::clone(&report),
            checked_at: Instant::now(),
        });
        report
    }

    /// Last report without triggering a check
    #[must_use]
    pub fn last_report(&self) -> Option<Arc<HealthReport>> {
        self.cache.lock().as_ref().map(|c| Arc::clone(&c.report))
    }

    /// Drop the cached report so the next call probes again
    pub fn invalidate(&self) {
        *self.cache.lock() = None;
    }

    /// Whether work may start; GPU problems only matter when `require_gpu`
    pub fn can_proceed(&self, require_gpu: bool) -> bool {
        self.report().blocking_warnings(require_gpu).is_empty()
    }

    /// Like [`can_proceed`](Self::can_proceed) but fails with the warnings
    /// that caused the denial
    pub fn require(&self, require_gpu: bool) -> Result<()> {
        let warnings = self.report().blocking_warnings(require_gpu);
        if warnings.is_empty() {
            return Ok(());
        }
        warn!(?warnings, require_gpu, "Resource guard denied work");
        Err(Error::ResourceExhausted { warnings })
    }
}
