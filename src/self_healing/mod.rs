//! Self-Healing System
//!
//! Autonomous health monitoring and recovery:
//! - Background sampling of host metrics with threshold and trend alerts
//! - Prioritized, de-duplicated, rate-limited recovery actions
//! - Manual optimization pass and recovery history
//! - Error diagnosis with per-category handlers

pub mod actions;
pub mod cleanup;
pub mod diagnosis;
pub mod metrics;
pub mod monitor;
pub mod scheduler;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::clock::{system_clock, SharedClock};
use crate::config::{Config, MonitorConfig, RecoveryConfig};
use crate::errors::MetricsError;

pub use actions::{
    ActionContext, ActionOutcome, ActionRegistry, MemoryReclaimer, ReclaimLevel,
    ReclaimerRegistry, RecoveryActionSpec, RecoveryExecutor,
};
pub use diagnosis::{ErrorCategory, ErrorDiagnosis, ErrorReport};
pub use metrics::{HealthSnapshot, MetricsSample, SystemMetricsProvider};
pub use monitor::{Alert, AlertKind, HealthMonitor, HealthSummary, TickReport};
pub use scheduler::{RecoveryAttemptRecord, RecoveryExecution, RecoveryScheduler, ScheduleReport};

/// Actions run by a manual optimization pass, in order.
const OPTIMIZATION_SEQUENCE: [&str; 4] = [
    actions::CLEAR_MEMORY_CACHE,
    actions::CLEANUP_TEMP_FILES,
    actions::OPTIMIZE_PERFORMANCE,
    actions::CLEANUP_OLD_LOGS,
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutonomyStatus {
    pub autonomy_enabled: bool,
    pub monitoring_active: bool,
    pub health_summary: HealthSummary,
    pub pending_queue_size: usize,
    pub action_history: BTreeMap<String, RecoveryAttemptRecord>,
    pub available_actions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationReport {
    pub executions: Vec<RecoveryExecution>,
    pub post_check: Option<HealthSnapshot>,
    pub post_check_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryHistory {
    pub records: BTreeMap<String, RecoveryAttemptRecord>,
    pub executions: Vec<RecoveryExecution>,
}

/// Facade over the monitor, scheduler and diagnosis registry.
pub struct SelfHealingSystem {
    monitor_config: MonitorConfig,
    monitor: Arc<HealthMonitor>,
    scheduler: Arc<RecoveryScheduler>,
    reclaimers: Arc<ReclaimerRegistry>,
    diagnosis: ErrorDiagnosis,
}

impl SelfHealingSystem {
    /// Build with the built-in action set.
    pub fn new(
        monitor_config: MonitorConfig,
        recovery_config: &RecoveryConfig,
        provider: Arc<dyn SystemMetricsProvider>,
        clock: SharedClock,
    ) -> Self {
        let reclaimers = Arc::new(ReclaimerRegistry::new());
        let registry = ActionRegistry::builtin(recovery_config, Arc::clone(&reclaimers));
        Self::with_registry(
            monitor_config,
            registry,
            reclaimers,
            recovery_config.autonomy_enabled,
            provider,
            clock,
        )
    }

    /// Build with a caller-supplied action registry.
    pub fn with_registry(
        monitor_config: MonitorConfig,
        registry: ActionRegistry,
        reclaimers: Arc<ReclaimerRegistry>,
        autonomy_enabled: bool,
        provider: Arc<dyn SystemMetricsProvider>,
        clock: SharedClock,
    ) -> Self {
        let monitor = Arc::new(HealthMonitor::new(monitor_config.clone(), provider));
        let scheduler = Arc::new(RecoveryScheduler::new(
            Arc::new(registry),
            clock,
            autonomy_enabled,
        ));

        let sched = Arc::clone(&scheduler);
        monitor.on_alert(move |alert| {
            sched.schedule(alert.kind, ActionContext::from_alert(alert));
        });

        Self {
            monitor_config,
            monitor,
            scheduler,
            reclaimers,
            diagnosis: ErrorDiagnosis::new(),
        }
    }

    pub fn from_config(config: &Config, provider: Arc<dyn SystemMetricsProvider>) -> Self {
        Self::new(
            config.monitor.clone(),
            &config.recovery,
            provider,
            system_clock(),
        )
    }

    /// Start background monitoring. Returns false if it was already running.
    pub fn start_monitoring(&self) -> bool {
        self.monitor.start(self.monitor_config.interval())
    }

    pub async fn stop_monitoring(&self) {
        self.monitor.stop().await;
    }

    /// Allow alerts to schedule recovery actions.
    pub fn enable_autonomy(&self) {
        self.scheduler.enable();
    }

    /// Stop alerts from scheduling recovery actions. Monitoring continues.
    pub fn disable_autonomy(&self) {
        self.scheduler.disable();
    }

    pub fn get_autonomy_status(&self) -> AutonomyStatus {
        AutonomyStatus {
            autonomy_enabled: self.scheduler.is_enabled(),
            monitoring_active: self.monitor.is_running(),
            health_summary: self.monitor.get_health_summary(),
            pending_queue_size: self.scheduler.pending_len(),
            action_history: self.scheduler.records(),
            available_actions: self.scheduler.available_actions(),
        }
    }

    /// Sample now, outside the background cadence. Alerts are handled as usual.
    pub fn force_health_check(&self) -> Result<TickReport, MetricsError> {
        info!("Forced health check");
        self.monitor.check_now()
    }

    /// Run the cleanup and optimization actions immediately, then re-check health.
    pub fn system_optimize(&self) -> OptimizationReport {
        info!("Running manual optimization pass");
        let mut executions = Vec::new();
        for name in OPTIMIZATION_SEQUENCE {
            match self
                .scheduler
                .run_now(name, ActionContext::manual("manual optimization"))
            {
                Ok(execution) => executions.push(execution),
                Err(e) => warn!(action = name, error = %e, "Optimization step unavailable"),
            }
        }

        let (post_check, post_check_error) = match self.monitor.check_now() {
            Ok(report) => (Some(report.snapshot), None),
            Err(e) => (None, Some(e.to_string())),
        };
        OptimizationReport {
            executions,
            post_check,
            post_check_error,
        }
    }

    pub fn recovery_history(&self) -> RecoveryHistory {
        RecoveryHistory {
            records: self.scheduler.records(),
            executions: self.scheduler.executions(),
        }
    }

    pub fn handle_error(&self, report: &ErrorReport) -> ActionOutcome {
        self.diagnosis.handle_error(report)
    }

    /// Feed one operation outcome into the error_rate metric.
    pub fn record_operation(&self, success: bool) {
        self.monitor.error_rate_tracker().record(success);
    }

    pub fn get_health_summary(&self) -> HealthSummary {
        self.monitor.get_health_summary()
    }

    pub fn reclaimers(&self) -> &Arc<ReclaimerRegistry> {
        &self.reclaimers
    }

    pub fn diagnosis(&self) -> &ErrorDiagnosis {
        &self.diagnosis
    }

    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    pub fn scheduler(&self) -> &Arc<RecoveryScheduler> {
        &self.scheduler
    }
}
