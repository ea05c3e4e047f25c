//! Built-in probes for the resources local inference and container tooling
//! depend on. Each one reports "healthy with a note" when the telemetry it
//! needs is missing on this host.

use super::health::{HealthCheckResult, HealthProbe, ProbeScope};
use crate::config::ServiceEndpoint;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::process::Command;
use std::thread::sleep;
use std::time::Duration;
use sysinfo::{Disks, System};
use tracing::debug;

/// Gap between the two CPU samples of a first reading
const CPU_SAMPLE_INTERVAL: Duration = Duration::from_millis(250);

/// Global CPU utilisation
pub struct CpuProbe {
    threshold: f64,
    system: Mutex<Option<System>>,
}

impl CpuProbe {
    #[must_use]
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            system: Mutex::new(None),
        }
    }
}

impl HealthProbe for CpuProbe {
    fn name(&self) -> &str {
        "cpu"
    }

    fn check(&self) -> HealthCheckResult {
        let mut guard = self.system.lock();
        let system = guard.get_or_insert_with(|| {
            // usage is a delta between refreshes, so prime the first reading
            let mut system = System::new();
            system.refresh_cpu();
            sleep(CPU_SAMPLE_INTERVAL);
            system
        });
        system.refresh_cpu();

        if system.cpus().is_empty() {
            return HealthCheckResult::unavailable("CPU statistics unavailable on this host");
        }

        let usage = f64::from(system.global_cpu_info().cpu_usage());
        HealthCheckResult::from_threshold("CPU", "cpu_percent", usage, self.threshold, "%")
            .with_metric("cpu_count", system.cpus().len())
    }
}

/// Physical memory utilisation
pub struct MemoryProbe {
    threshold: f64,
    system: Mutex<System>,
}

impl MemoryProbe {
    #[must_use]
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            system: Mutex::new(System::new()),
        }
    }
}

impl HealthProbe for MemoryProbe {
    fn name(&self) -> &str {
        "memory"
    }

    fn check(&self) -> HealthCheckResult {
        let mut system = self.system.lock();
        system.refresh_memory();

        let total = system.total_memory();
        if total == 0 {
            return HealthCheckResult::unavailable("memory statistics unavailable on this host");
        }

        let used = system.used_memory();
        let usage = used as f64 / total as f64 * 100.0;
        HealthCheckResult::from_threshold("Memory", "memory_percent", usage, self.threshold, "%")
            .with_metric("memory_used_bytes", used)
            .with_metric("memory_total_bytes", total)
    }
}

/// Usage of the filesystem holding `path`
pub struct DiskProbe {
    path: PathBuf,
    threshold: f64,
}

impl DiskProbe {
    #[must_use]
    pub const fn new(path: PathBuf, threshold: f64) -> Self {
        Self { path, threshold }
    }
}

impl HealthProbe for DiskProbe {
    fn name(&self) -> &str {
        "disk"
    }

    fn check(&self) -> HealthCheckResult {
        let disks = Disks::new_with_refreshed_list();
        let Some(disk) = disks
            .list()
            .iter()
            .filter(|disk| self.path.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
        else {
            return HealthCheckResult::unavailable(format!(
                "no mounted filesystem found for {}",
                self.path.display()
            ));
        };

        let total = disk.total_space();
        if total == 0 {
            return HealthCheckResult::unavailable(format!(
                "{} reports zero capacity",
                disk.mount_point().display()
            ));
        }

        let used = total.saturating_sub(disk.available_space());
        let usage = used as f64 / total as f64 * 100.0;
        HealthCheckResult::from_threshold("Disk", "disk_percent", usage, self.threshold, "%")
            .with_metric("disk_mount", disk.mount_point().display().to_string())
            .with_metric("disk_free_bytes", disk.available_space())
    }
}

/// One GPU as reported by `nvidia-smi`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpuReading {
    pub memory_used_mib: f64,
    pub memory_total_mib: f64,
    pub temperature_celsius: f64,
}

impl GpuReading {
    #[must_use]
    pub fn memory_percent(&self) -> f64 {
        if self.memory_total_mib > 0.0 {
            self.memory_used_mib / self.memory_total_mib * 100.0
        } else {
            0.0
        }
    }
}

/// Parse `nvidia-smi --query-gpu=memory.used,memory.total,temperature.gpu
/// --format=csv,noheader,nounits` output; malformed lines are skipped.
#[must_use]
pub fn parse_nvidia_smi(output: &str) -> Vec<GpuReading> {
    output
        .lines()
        .filter_map(|line| {
            let fields: Vec<f64> = line
                .split(',')
                .map(|field| field.trim().parse::<f64>())
                .collect::<std::result::Result<_, _>>()
                .ok()?;
            match fields.as_slice() {
                [used, total, temp] => Some(GpuReading {
                    memory_used_mib: *used,
                    memory_total_mib: *total,
                    temperature_celsius: *temp,
                }),
                _ => None,
            }
        })
        .collect()
}

/// GPU memory and temperature via `nvidia-smi`
pub struct GpuProbe {
    command: String,
    memory_threshold: f64,
    temp_threshold: f64,
}

impl GpuProbe {
    #[must_use]
    pub fn new(memory_threshold: f64, temp_threshold: f64) -> Self {
        Self {
            command: "nvidia-smi".to_string(),
            memory_threshold,
            temp_threshold,
        }
    }

    /// Use a different query binary (tests, non-standard installs)
    #[must_use]
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }

    fn query(&self) -> Option<String> {
        let output = Command::new(&self.command)
            .args([
                "--query-gpu=memory.used,memory.total,temperature.gpu",
                "--format=csv,noheader,nounits",
            ])
            .output()
            .ok()?;
        if !output.status.success() {
            debug!(command = %self.command, status = ?output.status, "GPU query failed");
            return None;
        }
        String::from_utf8(output.stdout).ok()
    }

    /// Evaluate parsed readings against the thresholds
    #[must_use]
    pub fn evaluate(&self, readings: &[GpuReading]) -> HealthCheckResult {
        if readings.is_empty() {
            return HealthCheckResult::unavailable("no GPU reported");
        }

        let problems: Vec<String> = readings
            .iter()
            .enumerate()
            .flat_map(|(index, gpu)| {
                let mut found = Vec::new();
                let memory = gpu.memory_percent();
                if memory >= self.memory_threshold {
                    found.push(format!(
                        "GPU {index} memory usage {memory:.1}% >= threshold {:.1}%",
                        self.memory_threshold
                    ));
                }
                if gpu.temperature_celsius >= self.temp_threshold {
                    found.push(format!(
                        "GPU {index} temperature {:.0}C >= threshold {:.0}C",
                        gpu.temperature_celsius, self.temp_threshold
                    ));
                }
                found
            })
            .collect();

        let max_memory = readings
            .iter()
            .map(GpuReading::memory_percent)
            .fold(0.0, f64::max);
        let max_temp = readings
            .iter()
            .map(|gpu| gpu.temperature_celsius)
            .fold(f64::MIN, f64::max);

        let result = if problems.is_empty() {
            HealthCheckResult::healthy()
        } else {
            HealthCheckResult::unhealthy(problems.join("; "))
        };
        result
            .with_metric("gpu_count", readings.len())
            .with_metric("gpu_memory_percent", max_memory)
            .with_metric("gpu_temp_celsius", max_temp)
    }
}

impl HealthProbe for GpuProbe {
    fn name(&self) -> &str {
        "gpu"
    }

    fn check(&self) -> HealthCheckResult {
        match self.query() {
            Some(output) => self.evaluate(&parse_nvidia_smi(&output)),
            None => HealthCheckResult::unavailable(format!(
                "{} unavailable, GPU not monitored",
                self.command
            )),
        }
    }

    fn scope(&self) -> ProbeScope {
        ProbeScope::Gpu
    }
}

/// HTTP reachability of external services (inference endpoints and the like)
pub struct ServiceProbe {
    endpoints: Vec<ServiceEndpoint>,
    timeout: Duration,
}

impl ServiceProbe {
    #[must_use]
    pub const fn new(endpoints: Vec<ServiceEndpoint>, timeout: Duration) -> Self {
        Self { endpoints, timeout }
    }

    fn reach(client: &reqwest::blocking::Client, endpoint: &ServiceEndpoint) -> Option<String> {
        match client.get(&endpoint.url).send() {
            Ok(response) if response.status().is_success() => None,
            Ok(response) => Some(format!(
                "Service {} returned {}",
                endpoint.name,
                response.status()
            )),
            Err(e) => Some(format!("Service {} unreachable: {e}", endpoint.name)),
        }
    }
}

impl HealthProbe for ServiceProbe {
    fn name(&self) -> &str {
        "services"
    }

    fn check(&self) -> HealthCheckResult {
        if self.endpoints.is_empty() {
            return HealthCheckResult::unavailable("no external services configured");
        }

        let client = match reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                return HealthCheckResult::unavailable(format!("HTTP client unavailable: {e}"));
            }
        };

        let mut result = HealthCheckResult::healthy();
        let mut problems = Vec::new();
        for endpoint in &self.endpoints {
            let problem = Self::reach(&client, endpoint);
            result = result.with_metric(endpoint.name.clone(), problem.is_none());
            problems.extend(problem);
        }

        if problems.is_empty() {
            result
        } else {
            HealthCheckResult {
                healthy: false,
                warning: Some(problems.join("; ")),
                ..result
            }
        }
    }
}
