use crate::config::AvailabilitySettings;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Snapshot schema written by [`AvailabilityTracker::save`]
pub const SNAPSHOT_VERSION: u32 = 1;

/// One observed health check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityCheck {
    pub timestamp: DateTime<Utc>,
    pub healthy: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    saved_at: DateTime<Utc>,
    checks: Vec<AvailabilityCheck>,
}

/// Serializable summary for dashboards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityStatus {
    pub availability: f64,
    pub target: f64,
    pub meets_target: bool,
    pub total_checks: usize,
    pub failed_checks: usize,
    pub downtime_minutes: f64,
    pub window_secs: f64,
}

/// Rolling-window uptime ratio over recorded health checks, persisted to a
/// JSON snapshot so the ratio survives restarts.
#[derive(Debug)]
pub struct AvailabilityTracker {
    window: Duration,
    target: f64,
    persist_entries: usize,
    snapshot_path: PathBuf,
    checks: Mutex<Vec<AvailabilityCheck>>,
}

impl AvailabilityTracker {
    #[must_use]
    pub fn new(window: Duration, target: f64) -> Self {
        let mut tracker = Self::from_settings(&AvailabilitySettings {
            target,
            ..AvailabilitySettings::default()
        });
        tracker.window = window;
        tracker
    }

    #[must_use]
    pub fn from_settings(settings: &AvailabilitySettings) -> Self {
        Self {
            window: settings.window(),
            target: settings.target,
            persist_entries: settings.persist_entries,
            snapshot_path: settings.resolved_snapshot_path(),
            checks: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = path.into();
        self
    }

    #[must_use]
    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    #[must_use]
    pub const fn target(&self) -> f64 {
        self.target
    }

    pub fn record_check(&self, healthy: bool) {
        self.record_check_at(Utc::now(), healthy);
    }

    /// Record a check observed at `timestamp`. Checks that already fell
    /// out of the window are dropped on the way in.
    pub fn record_check_at(&self, timestamp: DateTime<Utc>, healthy: bool) {
        let mut checks = self.checks.lock();
        // Keep the log ordered; out-of-order replays are rare and short.
        let position = checks.partition_point(|c| c.timestamp <= timestamp);
        checks.insert(position, AvailabilityCheck { timestamp, healthy });
        self.trim(&mut checks);
    }

    fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        chrono::Duration::from_std(self.window)
            .ok()
            .and_then(|window| now.checked_sub_signed(window))
    }

    fn trim(&self, checks: &mut Vec<AvailabilityCheck>) {
        if let Some(cutoff) = self.cutoff(Utc::now()) {
            let expired = checks.partition_point(|c| c.timestamp < cutoff);
            if expired > 0 {
                checks.drain(..expired);
                debug!(expired, "Dropped checks outside the availability window");
            }
        }
    }

    /// Checks inside the window, oldest first
    pub fn checks(&self) -> Vec<AvailabilityCheck> {
        let mut checks = self.checks.lock();
        self.trim(&mut checks);
        checks.clone()
    }

    /// Healthy fraction of the checks inside the window; 1.0 without data
    pub fn availability(&self) -> f64 {
        let mut checks = self.checks.lock();
        self.trim(&mut checks);
        ratio(&checks)
    }

    pub fn meets_target(&self) -> bool {
        self.availability() >= self.target
    }

    /// Estimated downtime inside the window.
    ///
    /// Approximation: each failed check stands for one average gap between
    /// consecutive checks. Fewer than two checks give no interval, so 0.
    pub fn get_downtime_minutes(&self) -> f64 {
        let mut checks = self.checks.lock();
        self.trim(&mut checks);
        downtime_minutes(&checks)
    }

    pub fn status(&self) -> AvailabilityStatus {
        let mut checks = self.checks.lock();
        self.trim(&mut checks);
        let availability = ratio(&checks);

        AvailabilityStatus {
            availability,
            target: self.target,
            meets_target: availability >= self.target,
            total_checks: checks.len(),
            failed_checks: checks.iter().filter(|c| !c.healthy).count(),
            downtime_minutes: downtime_minutes(&checks),
            window_secs: self.window.as_secs_f64(),
        }
    }

    pub fn clear(&self) {
        self.checks.lock().clear();
    }

    /// Persist the most recent checks to the configured snapshot path
    pub fn save(&self) -> Result<usize> {
        self.save_to(&self.snapshot_path)
    }

    /// Persist the most recent checks to `path`, replacing it atomically
    pub fn save_to(&self, path: &Path) -> Result<usize> {
        let checks = {
            let mut checks = self.checks.lock();
            self.trim(&mut checks);
            let skip = checks.len().saturating_sub(self.persist_entries);
            checks[skip..].to_vec()
        };

        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            checks,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, serde_json::to_vec_pretty(&snapshot)?)?;
        fs::rename(&tmp_path, path)?;

        info!(
            path = %path.display(),
            entries = snapshot.checks.len(),
            "Saved availability snapshot"
        );
        Ok(snapshot.checks.len())
    }

    /// Restore checks from the configured snapshot path
    pub fn load(&self) -> Result<usize> {
        self.load_from(&self.snapshot_path)
    }

    /// Merge checks from the snapshot at `path` into the log.
    /// A missing file loads nothing.
    pub fn load_from(&self, path: &Path) -> Result<usize> {
        if !path.exists() {
            debug!(path = %path.display(), "No availability snapshot to load");
            return Ok(0);
        }

        let snapshot: Snapshot = serde_json::from_slice(&fs::read(path)?)?;
        if snapshot.version != SNAPSHOT_VERSION {
            warn!(
                path = %path.display(),
                version = snapshot.version,
                "Unsupported availability snapshot version"
            );
            return Err(Error::InvalidInput {
                field: "availability snapshot".to_string(),
                reason: format!(
                    "schema version {} (expected {SNAPSHOT_VERSION})",
                    snapshot.version
                ),
            });
        }

        let loaded = snapshot.checks.len();
        let mut checks = self.checks.lock();
        checks.extend(snapshot.checks);
        checks.sort_by_key(|c| c.timestamp);
        checks.dedup();
        self.trim(&mut checks);

        info!(path = %path.display(), loaded, "Loaded availability snapshot");
        Ok(loaded)
    }
}

impl Default for AvailabilityTracker {
    fn default() -> Self {
        Self::from_settings(&AvailabilitySettings::default())
    }
}

fn ratio(checks: &[AvailabilityCheck]) -> f64 {
    if checks.is_empty() {
        return 1.0;
    }
    let healthy = checks.iter().filter(|c| c.healthy).count();
    healthy as f64 / checks.len() as f64
}

fn downtime_minutes(checks: &[AvailabilityCheck]) -> f64 {
    let [first, .., last] = checks else {
        return 0.0;
    };

    let span_secs = (last.timestamp - first.timestamp).num_milliseconds() as f64 / 1000.0;
    let average_interval_secs = span_secs / (checks.len() - 1) as f64;
    let failed = checks.iter().filter(|c| !c.healthy).count();

    failed as f64 * average_interval_secs / 60.0
}
