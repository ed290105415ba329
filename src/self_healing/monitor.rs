//! Background health monitor.
//!
//! Samples host metrics on an interval, keeps a bounded snapshot history,
//! raises alerts on threshold breaches and trends, and hands every alert to
//! the registered callbacks.

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::metrics::{ErrorRateTracker, HealthSnapshot, SystemMetricsProvider};
use crate::config::MonitorConfig;
use crate::errors::MetricsError;

/// Minimum samples before the CPU trend rule is evaluated.
const CPU_TREND_MIN_SAMPLES: usize = 5;
/// Memory growth, in percentage points across the window, treated as a leak.
const MEMORY_LEAK_GROWTH_PCT: f64 = 10.0;
/// Snapshot status is healthy while both cpu and memory stay below this.
const HEALTHY_CEILING_PCT: f64 = 80.0;

/// What triggered an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    CpuCritical,
    MemoryCritical,
    DiskCritical,
    SlowResponse,
    HighErrorRate,
    CpuTrendRising,
    MemoryLeakSuspected,
}

impl AlertKind {
    pub fn is_trend(&self) -> bool {
        matches!(self, AlertKind::CpuTrendRising | AlertKind::MemoryLeakSuspected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::CpuCritical => "cpu_critical",
            AlertKind::MemoryCritical => "memory_critical",
            AlertKind::DiskCritical => "disk_critical",
            AlertKind::SlowResponse => "slow_response",
            AlertKind::HighErrorRate => "high_error_rate",
            AlertKind::CpuTrendRising => "cpu_trend_rising",
            AlertKind::MemoryLeakSuspected => "memory_leak_suspected",
        }
    }
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub message: String,
    pub snapshot: HealthSnapshot,
}

pub type AlertCallback = Arc<dyn Fn(&Alert) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub current: HealthSnapshot,
    pub avg_cpu_pct: f64,
    pub avg_mem_pct: f64,
    pub samples: usize,
    pub status: HealthStatus,
    pub trend_alerts: Vec<String>,
    pub monitoring_active: bool,
}

/// Health summary; `NoData` until the first snapshot lands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum HealthSummary {
    NoData { monitoring_active: bool },
    Available(HealthReport),
}

impl HealthSummary {
    pub fn is_no_data(&self) -> bool {
        matches!(self, HealthSummary::NoData { .. })
    }

    pub fn report(&self) -> Option<&HealthReport> {
        match self {
            HealthSummary::Available(report) => Some(report),
            HealthSummary::NoData { .. } => None,
        }
    }
}

/// Result of one tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickReport {
    pub snapshot: HealthSnapshot,
    pub alerts: Vec<Alert>,
}

#[derive(Debug, Default)]
pub struct MonitorStats {
    pub ticks: AtomicU64,
    pub sample_failures: AtomicU64,
    pub alerts_raised: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct MonitorStatsSummary {
    pub ticks: u64,
    pub sample_failures: u64,
    pub alerts_raised: u64,
}

pub struct HealthMonitor {
    config: MonitorConfig,
    provider: Arc<dyn SystemMetricsProvider>,
    error_rate: Arc<ErrorRateTracker>,
    history: RwLock<VecDeque<HealthSnapshot>>,
    trend_alerts: RwLock<Vec<String>>,
    callbacks: RwLock<Vec<AlertCallback>>,
    running: AtomicBool,
    task: Mutex<Option<(JoinHandle<()>, oneshot::Sender<()>)>>,
    stats: MonitorStats,
}

impl HealthMonitor {
    pub fn new(config: MonitorConfig, provider: Arc<dyn SystemMetricsProvider>) -> Self {
        Self {
            history: RwLock::new(VecDeque::with_capacity(config.history_cap)),
            config,
            provider,
            error_rate: Arc::new(ErrorRateTracker::default()),
            trend_alerts: RwLock::new(Vec::new()),
            callbacks: RwLock::new(Vec::new()),
            running: AtomicBool::new(false),
            task: Mutex::new(None),
            stats: MonitorStats::default(),
        }
    }

    pub fn error_rate_tracker(&self) -> Arc<ErrorRateTracker> {
        Arc::clone(&self.error_rate)
    }

    /// Register a callback invoked synchronously for every alert.
    pub fn on_alert<F>(&self, callback: F)
    where
        F: Fn(&Alert) + Send + Sync + 'static,
    {
        self.callbacks.write().push(Arc::new(callback));
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the sampling loop. Returns false if it was already running.
    pub fn start(self: &Arc<Self>, interval: Duration) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("Health monitor already running");
            return false;
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        let monitor = Arc::clone(self);
        let handle = tokio::spawn(async move { monitor.run_loop(interval, stop_rx).await });
        *self.task.lock() = Some((handle, stop_tx));
        info!(interval_secs = interval.as_secs_f64(), "Health monitor started");
        true
    }

    /// Stop the loop and wait, bounded, for it to exit. No-op when not running.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let task = self.task.lock().take();
        if let Some((handle, stop_tx)) = task {
            let _ = stop_tx.send(());
            if tokio::time::timeout(self.config.stop_timeout(), handle)
                .await
                .is_err()
            {
                warn!("Health monitor loop did not exit within the stop timeout");
            }
        }
        info!("Health monitor stopped");
    }

    async fn run_loop(self: Arc<Self>, interval: Duration, mut stop_rx: oneshot::Receiver<()>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = &mut stop_rx => break,
            }
            if !self.is_running() {
                break;
            }

            let monitor = Arc::clone(&self);
            match tokio::task::spawn_blocking(move || monitor.check_now()).await {
                Ok(Ok(report)) => debug!(
                    cpu_pct = report.snapshot.cpu_pct,
                    mem_pct = report.snapshot.mem_pct,
                    alerts = report.alerts.len(),
                    "Health tick"
                ),
                Ok(Err(e)) => warn!(error = %e, "Health sample failed"),
                Err(e) => error!(error = %e, "Health tick panicked"),
            }
        }
        debug!("Health monitor loop exited");
    }

    /// Take a snapshot now and process it like a scheduled tick.
    pub fn check_now(&self) -> Result<TickReport, MetricsError> {
        self.stats.ticks.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        let sample = match self.provider.sample() {
            Ok(sample) => sample,
            Err(e) => {
                self.stats.sample_failures.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };
        let snapshot = HealthSnapshot::from_sample(
            sample,
            started.elapsed(),
            self.error_rate.rate(),
            Utc::now(),
        );
        let alerts = self.record_snapshot(snapshot.clone());
        Ok(TickReport { snapshot, alerts })
    }

    /// Append a snapshot, evaluate it, and dispatch the resulting alerts.
    pub fn record_snapshot(&self, snapshot: HealthSnapshot) -> Vec<Alert> {
        let mut alerts = self.threshold_alerts(&snapshot);

        let window = {
            let mut history = self.history.write();
            history.push_back(snapshot.clone());
            while history.len() > self.config.history_cap {
                history.pop_front();
            }
            let skip = history.len().saturating_sub(self.config.trend_window);
            history.iter().skip(skip).cloned().collect::<Vec<_>>()
        };

        let trends = self.trend_alerts_for(&window, &snapshot);
        *self.trend_alerts.write() = trends.iter().map(|a| a.message.clone()).collect();
        alerts.extend(trends);

        if !alerts.is_empty() {
            self.stats
                .alerts_raised
                .fetch_add(alerts.len() as u64, Ordering::Relaxed);
            self.dispatch(&alerts);
        }
        alerts
    }

    fn threshold_alerts(&self, snapshot: &HealthSnapshot) -> Vec<Alert> {
        let t = &self.config.thresholds;
        let mut alerts = Vec::new();
        let mut push = |kind, message: String| {
            alerts.push(Alert {
                kind,
                message,
                snapshot: snapshot.clone(),
            })
        };

        if snapshot.cpu_pct > t.cpu_pct {
            push(
                AlertKind::CpuCritical,
                format!("High CPU usage: {:.1}%", snapshot.cpu_pct),
            );
        }
        if snapshot.mem_pct > t.memory_pct {
            push(
                AlertKind::MemoryCritical,
                format!("High memory usage: {:.1}%", snapshot.mem_pct),
            );
        }
        if snapshot.disk_pct > t.disk_pct {
            push(
                AlertKind::DiskCritical,
                format!("High disk usage: {:.1}%", snapshot.disk_pct),
            );
        }
        if snapshot.response_time_s > t.response_time_secs {
            push(
                AlertKind::SlowResponse,
                format!("Slow response time: {:.2}s", snapshot.response_time_s),
            );
        }
        if snapshot.error_rate > t.error_rate {
            push(
                AlertKind::HighErrorRate,
                format!("High error rate: {:.1}%", snapshot.error_rate * 100.0),
            );
        }
        alerts
    }

    fn trend_alerts_for(&self, window: &[HealthSnapshot], current: &HealthSnapshot) -> Vec<Alert> {
        let mut alerts = Vec::new();

        if window.len() >= CPU_TREND_MIN_SAMPLES
            && window.windows(2).all(|w| w[1].cpu_pct > w[0].cpu_pct)
        {
            alerts.push(Alert {
                kind: AlertKind::CpuTrendRising,
                message: format!(
                    "CPU usage steadily increasing over last {} samples",
                    window.len()
                ),
                snapshot: current.clone(),
            });
        }

        if window.len() >= self.config.trend_window {
            if let (Some(first), Some(last)) = (window.first(), window.last()) {
                let growth = last.mem_pct - first.mem_pct;
                if growth > MEMORY_LEAK_GROWTH_PCT {
                    alerts.push(Alert {
                        kind: AlertKind::MemoryLeakSuspected,
                        message: format!(
                            "Potential memory leak: memory grew {:.1} points over last {} samples",
                            growth,
                            window.len()
                        ),
                        snapshot: current.clone(),
                    });
                }
            }
        }
        alerts
    }

    fn dispatch(&self, alerts: &[Alert]) {
        let callbacks = self.callbacks.read().clone();
        for alert in alerts {
            warn!(kind = %alert.kind, message = %alert.message, "Health alert");
            for callback in &callbacks {
                if catch_unwind(AssertUnwindSafe(|| callback(alert))).is_err() {
                    error!(kind = %alert.kind, "Alert callback panicked");
                }
            }
        }
    }

    pub fn history(&self) -> Vec<HealthSnapshot> {
        self.history.read().iter().cloned().collect()
    }

    pub fn history_len(&self) -> usize {
        self.history.read().len()
    }

    pub fn latest(&self) -> Option<HealthSnapshot> {
        self.history.read().back().cloned()
    }

    pub fn get_health_summary(&self) -> HealthSummary {
        let monitoring_active = self.is_running();
        let history = self.history.read();
        let Some(current) = history.back().cloned() else {
            return HealthSummary::NoData { monitoring_active };
        };

        let skip = history.len().saturating_sub(self.config.trend_window);
        let recent: Vec<_> = history.iter().skip(skip).collect();
        let samples = recent.len();
        let avg_cpu_pct = recent.iter().map(|s| s.cpu_pct).sum::<f64>() / samples as f64;
        let avg_mem_pct = recent.iter().map(|s| s.mem_pct).sum::<f64>() / samples as f64;

        let status = if current.cpu_pct < HEALTHY_CEILING_PCT && current.mem_pct < HEALTHY_CEILING_PCT
        {
            HealthStatus::Healthy
        } else {
            HealthStatus::Warning
        };

        HealthSummary::Available(HealthReport {
            current,
            avg_cpu_pct,
            avg_mem_pct,
            samples,
            status,
            trend_alerts: self.trend_alerts.read().clone(),
            monitoring_active,
        })
    }

    pub fn stats(&self) -> MonitorStatsSummary {
        MonitorStatsSummary {
            ticks: self.stats.ticks.load(Ordering::Relaxed),
            sample_failures: self.stats.sample_failures.load(Ordering::Relaxed),
            alerts_raised: self.stats.alerts_raised.load(Ordering::Relaxed),
        }
    }
}
