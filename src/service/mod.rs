//! Supervision of long-running local services.

pub mod availability;
pub mod watchdog;

pub use availability::{
    AvailabilityCheck, AvailabilityStatus, AvailabilityTracker, SNAPSHOT_VERSION,
};
pub use watchdog::{ServiceAction, ServiceWatchdog, WatchdogStatus};
