use crate::config::WatchdogSettings;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Health check or restart action for a supervised service.
/// `Ok(true)` means healthy / restarted; `Ok(false)`, `Err` and panics all
/// count as failure.
pub type ServiceAction = Arc<dyn Fn() -> anyhow::Result<bool> + Send + Sync>;

struct WatchdogEntry {
    name: String,
    check: ServiceAction,
    restart: ServiceAction,
    max_restarts: u32,
    cooldown: Duration,
    restart_count: u32,
    last_restart: Option<Instant>,
    healthy: bool,
    last_error: Option<String>,
    last_checked: Option<DateTime<Utc>>,
}

impl WatchdogEntry {
    fn check(&mut self) -> bool {
        self.last_checked = Some(Utc::now());

        match invoke(&self.check) {
            Ok(true) => {
                if self.restart_count > 0 || !self.healthy {
                    info!(service = %self.name, "Service healthy again");
                }
                self.restart_count = 0;
                self.healthy = true;
                self.last_error = None;
                return true;
            }
            Ok(false) => {
                debug!(service = %self.name, "Health check reported unhealthy");
                self.last_error = Some("health check reported unhealthy".to_string());
            }
            Err(message) => {
                warn!(service = %self.name, error = %message, "Health check failed");
                self.last_error = Some(message);
            }
        }
        self.healthy = false;

        if self.restart_count >= self.max_restarts {
            error!(
                service = %self.name,
                restarts = self.restart_count,
                max_restarts = self.max_restarts,
                "Restart budget exhausted, manual intervention required"
            );
            return false;
        }

        if let Some(last_restart) = self.last_restart {
            if last_restart.elapsed() < self.cooldown {
                debug!(
                    service = %self.name,
                    cooldown_secs = self.cooldown.as_secs_f64(),
                    "Restart skipped during cooldown"
                );
                return false;
            }
        }

        info!(
            service = %self.name,
            attempt = self.restart_count + 1,
            max_restarts = self.max_restarts,
            "Restarting service"
        );
        let restarted = match invoke(&self.restart) {
            Ok(restarted) => restarted,
            Err(message) => {
                warn!(service = %self.name, error = %message, "Restart failed");
                self.last_error = Some(message);
                false
            }
        };

        self.restart_count += 1;
        self.last_restart = Some(Instant::now());
        self.healthy = restarted;
        restarted
    }

    fn status(&self) -> WatchdogStatus {
        WatchdogStatus {
            name: self.name.clone(),
            healthy: self.healthy,
            restart_count: self.restart_count,
            max_restarts: self.max_restarts,
            exhausted: self.restart_count >= self.max_restarts,
            seconds_since_restart: self.last_restart.map(|t| t.elapsed().as_secs_f64()),
            last_error: self.last_error.clone(),
            last_checked: self.last_checked,
        }
    }
}

fn invoke(action: &ServiceAction) -> std::result::Result<bool, String> {
    match catch_unwind(AssertUnwindSafe(|| action())) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(format!("{err:#}")),
        Err(panic) => Err(panic_message(panic.as_ref())),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked with unknown payload".to_string()
    }
}

/// Serializable view of one supervised service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchdogStatus {
    pub name: String,
    pub healthy: bool,
    pub restart_count: u32,
    pub max_restarts: u32,
    pub exhausted: bool,
    pub seconds_since_restart: Option<f64>,
    pub last_error: Option<String>,
    pub last_checked: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct WatchdogTable {
    entries: Mutex<BTreeMap<String, Arc<Mutex<WatchdogEntry>>>>,
}

impl WatchdogTable {
    fn entry(&self, name: &str) -> Result<Arc<Mutex<WatchdogEntry>>> {
        self.entries
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                kind: "service",
                name: name.to_string(),
            })
    }

    fn snapshot(&self) -> Vec<Arc<Mutex<WatchdogEntry>>> {
        self.entries.lock().values().cloned().collect()
    }

    fn check_all(&self) -> BTreeMap<String, bool> {
        // Table lock released before any callable runs; a slow service only
        // holds its own entry.
        self.snapshot()
            .into_iter()
            .map(|entry| {
                let mut entry = entry.lock();
                let healthy = entry.check();
                (entry.name.clone(), healthy)
            })
            .collect()
    }
}

struct Runner {
    stop_tx: Sender<()>,
    done_rx: Receiver<()>,
    handle: JoinHandle<()>,
}

/// Periodically checks registered services and restarts failed ones within
/// a bounded budget.
///
/// A failed check triggers at most one restart per cooldown period, and at
/// most `max_restarts` restarts until a healthy check resets the budget.
/// Exhaustion is reported through `check_service` returning `false` and an
/// `error!` event, never through an error value.
pub struct ServiceWatchdog {
    table: Arc<WatchdogTable>,
    settings: WatchdogSettings,
    runner: Mutex<Option<Runner>>,
}

impl ServiceWatchdog {
    #[must_use]
    pub fn new() -> Self {
        Self::from_settings(WatchdogSettings::default())
    }

    #[must_use]
    pub fn from_settings(settings: WatchdogSettings) -> Self {
        Self {
            table: Arc::new(WatchdogTable::default()),
            settings,
            runner: Mutex::new(None),
        }
    }

    /// Supervise `name`, replacing any service registered under it
    pub fn register<C, R>(
        &self,
        name: &str,
        check: C,
        restart: R,
        max_restarts: u32,
        cooldown: Duration,
    ) where
        C: Fn() -> anyhow::Result<bool> + Send + Sync + 'static,
        R: Fn() -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        let entry = WatchdogEntry {
            name: name.to_string(),
            check: Arc::new(check),
            restart: Arc::new(restart),
            max_restarts,
            cooldown,
            restart_count: 0,
            last_restart: None,
            healthy: true,
            last_error: None,
            last_checked: None,
        };

        let previous = self
            .table
            .entries
            .lock()
            .insert(name.to_string(), Arc::new(Mutex::new(entry)));
        if previous.is_some() {
            warn!(service = name, "Replaced existing watchdog registration");
        } else {
            info!(service = name, max_restarts, "Registered service with watchdog");
        }
    }

    /// Register with the configured restart budget and cooldown
    pub fn register_with_defaults<C, R>(&self, name: &str, check: C, restart: R)
    where
        C: Fn() -> anyhow::Result<bool> + Send + Sync + 'static,
        R: Fn() -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        self.register(
            name,
            check,
            restart,
            self.settings.max_restarts,
            self.settings.cooldown(),
        );
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.table.entries.lock().remove(name).is_some()
    }

    /// Check one service, restarting it if needed.
    ///
    /// Returns whether the service is healthy after this cycle; only an
    /// unknown name is an error.
    pub fn check_service(&self, name: &str) -> Result<bool> {
        let entry = self.table.entry(name)?;
        let healthy = entry.lock().check();
        Ok(healthy)
    }

    /// Check every service independently
    pub fn check_all(&self) -> BTreeMap<String, bool> {
        self.table.check_all()
    }

    /// Give a service its full restart budget back
    pub fn reset_restarts(&self, name: &str) -> Result<()> {
        let entry = self.table.entry(name)?;
        let mut entry = entry.lock();
        entry.restart_count = 0;
        entry.last_restart = None;
        info!(service = name, "Restart budget reset");
        Ok(())
    }

    /// Status of every service, ordered by name
    pub fn status(&self) -> Vec<WatchdogStatus> {
        self.table
            .snapshot()
            .iter()
            .map(|entry| entry.lock().status())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.table.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start the background loop, running `check_all` every `interval`.
    /// Starting an already running watchdog does nothing.
    pub fn start(&self, interval: Duration) -> Result<()> {
        let mut runner = self.runner.lock();
        if runner.is_some() {
            warn!("Watchdog already running");
            return Ok(());
        }

        let (stop_tx, stop_rx) = bounded::<()>(1);
        // Never sent on; disconnects when the loop thread exits.
        let (done_tx, done_rx) = bounded::<()>(0);
        let table = Arc::clone(&self.table);

        let handle = thread::Builder::new()
            .name("service-watchdog".to_string())
            .spawn(move || {
                let _done = done_tx;
                info!(interval_secs = interval.as_secs_f64(), "Watchdog loop started");
                loop {
                    let results = table.check_all();
                    debug!(services = results.len(), "Watchdog cycle complete");

                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                info!("Watchdog loop stopped");
            })?;

        *runner = Some(Runner {
            stop_tx,
            done_rx,
            handle,
        });
        Ok(())
    }

    /// Start with the configured interval
    pub fn start_default(&self) -> Result<()> {
        self.start(self.settings.interval())
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.runner.lock().is_some()
    }

    /// Signal the loop and wait up to the configured stop timeout for it to
    /// exit. Safe to call repeatedly. Returns `false` if the loop was still
    /// busy when the wait ran out; its thread is then left to finish alone.
    pub fn stop(&self) -> bool {
        let Some(runner) = self.runner.lock().take() else {
            return true;
        };

        let _ = runner.stop_tx.try_send(());
        match runner.done_rx.recv_timeout(self.settings.stop_timeout()) {
            Err(RecvTimeoutError::Disconnected) | Ok(()) => {
                if runner.handle.join().is_err() {
                    warn!("Watchdog loop thread panicked");
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    timeout_secs = self.settings.stop_timeout().as_secs_f64(),
                    "Watchdog loop did not stop in time, detaching"
                );
                false
            }
        }
    }
}

impl Default for ServiceWatchdog {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ServiceWatchdog {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ServiceWatchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceWatchdog")
            .field("services", &self.len())
            .field("running", &self.is_running())
            .finish()
    }
}
