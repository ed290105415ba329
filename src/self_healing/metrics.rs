//! Metrics sampling.
//!
//! `SysinfoMetrics` reads host CPU, memory and disk usage. Snapshots add the
//! sampling latency and the rolling operation error rate on top of a raw sample.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;
use sysinfo::{Disks, ProcessesToUpdate, System};

use crate::errors::MetricsError;

/// Raw host usage, all in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsSample {
    pub cpu_pct: f64,
    pub mem_pct: f64,
    pub disk_pct: f64,
}

pub trait SystemMetricsProvider: Send + Sync {
    fn sample(&self) -> Result<MetricsSample, MetricsError>;
}

/// One health reading. Immutable once taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub cpu_pct: f64,
    pub mem_pct: f64,
    pub disk_pct: f64,
    pub response_time_s: f64,
    /// Fraction of recent operations that failed
    pub error_rate: f64,
    pub timestamp: DateTime<Utc>,
}

impl HealthSnapshot {
    pub fn from_sample(
        sample: MetricsSample,
        response_time: Duration,
        error_rate: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            cpu_pct: sample.cpu_pct,
            mem_pct: sample.mem_pct,
            disk_pct: sample.disk_pct,
            response_time_s: response_time.as_secs_f64(),
            error_rate,
            timestamp,
        }
    }
}

/// Host metrics through sysinfo.
///
/// CPU usage is computed between consecutive refreshes, so the `System` is
/// kept across samples.
pub struct SysinfoMetrics {
    system: Mutex<System>,
    disk_path: PathBuf,
}

impl SysinfoMetrics {
    pub fn new(disk_path: impl Into<PathBuf>) -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        system.refresh_memory();
        Self {
            system: Mutex::new(system),
            disk_path: disk_path.into(),
        }
    }

    fn disk_usage_pct(&self) -> f64 {
        let disks = Disks::new_with_refreshed_list();
        let best = disks
            .list()
            .iter()
            .filter(|d| self.disk_path.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len());

        match best {
            Some(disk) if disk.total_space() > 0 => {
                let total = disk.total_space() as f64;
                let available = disk.available_space() as f64;
                (1.0 - available / total) * 100.0
            }
            _ => {
                tracing::debug!(path = %self.disk_path.display(), "No disk found for path");
                0.0
            }
        }
    }

    pub fn disk_path(&self) -> &Path {
        &self.disk_path
    }
}

impl SystemMetricsProvider for SysinfoMetrics {
    fn sample(&self) -> Result<MetricsSample, MetricsError> {
        let (cpu_pct, mem_pct) = {
            let mut system = self.system.lock();
            system.refresh_cpu_usage();
            system.refresh_memory();

            let total = system.total_memory();
            if total == 0 {
                return Err(MetricsError::Unavailable(
                    "total memory reported as zero".to_string(),
                ));
            }
            let used = system.used_memory() as f64;
            (
                system.global_cpu_usage() as f64,
                used / total as f64 * 100.0,
            )
        };

        Ok(MetricsSample {
            cpu_pct,
            mem_pct,
            disk_pct: self.disk_usage_pct(),
        })
    }
}

/// Resident memory of this process in bytes, if the platform reports it.
pub fn process_rss_bytes() -> Option<u64> {
    let pid = sysinfo::get_current_pid().ok()?;
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).map(|p| p.memory())
}

/// Rolling window of operation outcomes feeding the error_rate metric.
#[derive(Debug)]
pub struct ErrorRateTracker {
    outcomes: Mutex<VecDeque<bool>>,
    window: usize,
}

impl ErrorRateTracker {
    pub fn new(window: usize) -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::with_capacity(window)),
            window: window.max(1),
        }
    }

    pub fn record(&self, success: bool) {
        let mut outcomes = self.outcomes.lock();
        if outcomes.len() >= self.window {
            outcomes.pop_front();
        }
        outcomes.push_back(success);
    }

    /// Failed fraction of the window; 0.0 with no data.
    pub fn rate(&self) -> f64 {
        let outcomes = self.outcomes.lock();
        if outcomes.is_empty() {
            return 0.0;
        }
        let failures = outcomes.iter().filter(|ok| !**ok).count();
        failures as f64 / outcomes.len() as f64
    }
}

impl Default for ErrorRateTracker {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Provider that replays a fixed script of results, repeating the last one.
///
/// Used to drive the monitor deterministically.
pub struct ScriptedMetrics {
    script: Mutex<VecDeque<Result<MetricsSample, MetricsError>>>,
    last: Mutex<Option<Result<MetricsSample, MetricsError>>>,
}

impl ScriptedMetrics {
    pub fn new(script: impl IntoIterator<Item = Result<MetricsSample, MetricsError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            last: Mutex::new(None),
        }
    }

    /// A provider that always reports the same usage.
    pub fn constant(cpu_pct: f64, mem_pct: f64, disk_pct: f64) -> Self {
        Self::new([Ok(MetricsSample {
            cpu_pct,
            mem_pct,
            disk_pct,
        })])
    }

    pub fn push(&self, result: Result<MetricsSample, MetricsError>) {
        self.script.lock().push_back(result);
    }
}

impl SystemMetricsProvider for ScriptedMetrics {
    fn sample(&self) -> Result<MetricsSample, MetricsError> {
        let next = self.script.lock().pop_front();
        let mut last = self.last.lock();
        if let Some(result) = next {
            *last = Some(result);
        }
        last.clone()
            .unwrap_or_else(|| Err(MetricsError::Unavailable("empty script".to_string())))
    }
}
