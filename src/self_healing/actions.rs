//! Recovery action registry and the built-in actions.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info};

use super::cleanup::{remove_stale_files, CleanupRule};
use super::metrics::{process_rss_bytes, HealthSnapshot};
use super::monitor::{Alert, AlertKind};
use crate::config::RecoveryConfig;
use crate::errors::RecoveryError;

pub const RESTART_PROCESS: &str = "restart_process";
pub const RESTART_SERVICE: &str = "restart_service";
pub const CLEAR_MEMORY_CACHE: &str = "clear_memory_cache";
pub const OPTIMIZE_CPU: &str = "optimize_cpu";
pub const CLEANUP_TEMP_FILES: &str = "cleanup_temp_files";
pub const CLEANUP_OLD_LOGS: &str = "cleanup_old_logs";
pub const OPTIMIZE_PERFORMANCE: &str = "optimize_performance";
pub const ROLLBACK_CHANGES: &str = "rollback_changes";

/// Recovery actions scheduled for an alert, in enqueue order.
pub fn actions_for_alert(kind: AlertKind) -> &'static [&'static str] {
    match kind {
        AlertKind::CpuCritical | AlertKind::CpuTrendRising => &[OPTIMIZE_CPU],
        AlertKind::MemoryCritical | AlertKind::MemoryLeakSuspected => &[CLEAR_MEMORY_CACHE],
        AlertKind::DiskCritical => &[CLEANUP_TEMP_FILES, CLEANUP_OLD_LOGS],
        AlertKind::SlowResponse => &[OPTIMIZE_PERFORMANCE],
        AlertKind::HighErrorRate => &[RESTART_SERVICE],
    }
}

/// Input handed to an executor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionContext {
    pub trigger: Option<AlertKind>,
    pub message: Option<String>,
    pub snapshot: Option<HealthSnapshot>,
    /// Run on request rather than from an alert
    pub manual: bool,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl ActionContext {
    pub fn from_alert(alert: &Alert) -> Self {
        Self {
            trigger: Some(alert.kind),
            message: Some(alert.message.clone()),
            snapshot: Some(alert.snapshot.clone()),
            manual: false,
            data: Map::new(),
        }
    }

    pub fn manual(reason: impl Into<String>) -> Self {
        Self {
            message: Some(reason.into()),
            manual: true,
            ..Default::default()
        }
    }
}

/// What an executor reports back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub success: bool,
    pub message: String,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl ActionOutcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            details: Map::new(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            details: Map::new(),
        }
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

/// A recovery action body. Returning `Err` counts as a failed attempt.
pub trait RecoveryExecutor: Send + Sync {
    fn execute(&self, ctx: &ActionContext) -> Result<ActionOutcome, RecoveryError>;
}

/// Static description of a recovery action.
#[derive(Clone)]
pub struct RecoveryActionSpec {
    pub name: String,
    /// Lower runs first
    pub priority: u8,
    /// Consecutive failed attempts before the action is considered exhausted
    pub max_attempts: u32,
    pub cooldown: Duration,
    pub executor: Arc<dyn RecoveryExecutor>,
}

impl RecoveryActionSpec {
    pub fn new(
        name: impl Into<String>,
        priority: u8,
        max_attempts: u32,
        cooldown_secs: u64,
        executor: Arc<dyn RecoveryExecutor>,
    ) -> Self {
        Self {
            name: name.into(),
            priority,
            max_attempts,
            cooldown: Duration::from_secs(cooldown_secs),
            executor,
        }
    }
}

impl std::fmt::Debug for RecoveryActionSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryActionSpec")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("max_attempts", &self.max_attempts)
            .field("cooldown", &self.cooldown)
            .finish_non_exhaustive()
    }
}

/// Name-keyed action table. Specs are immutable once registered.
#[derive(Debug, Default, Clone)]
pub struct ActionRegistry {
    specs: BTreeMap<String, Arc<RecoveryActionSpec>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, spec: RecoveryActionSpec) -> Result<(), RecoveryError> {
        if self.specs.contains_key(&spec.name) {
            return Err(RecoveryError::DuplicateAction(spec.name));
        }
        self.specs.insert(spec.name.clone(), Arc::new(spec));
        Ok(())
    }

    /// The built-in action set, with cooldown overrides from `config`.
    pub fn builtin(config: &RecoveryConfig, reclaimers: Arc<ReclaimerRegistry>) -> Self {
        let decline = |reason: &str| -> Arc<dyn RecoveryExecutor> {
            Arc::new(Decline {
                reason: reason.to_string(),
            })
        };
        let performance = |cpu_only: bool| -> Arc<dyn RecoveryExecutor> {
            Arc::new(PerformanceOptimization {
                reclaimers: Arc::clone(&reclaimers),
                lower_priority: config.lower_priority,
                cpu_only,
            })
        };

        let specs = vec![
            RecoveryActionSpec::new(
                RESTART_PROCESS,
                1,
                3,
                300,
                decline("Process restart requires an external supervisor"),
            ),
            RecoveryActionSpec::new(
                RESTART_SERVICE,
                1,
                3,
                300,
                decline("Service restart requires an external supervisor"),
            ),
            RecoveryActionSpec::new(
                CLEAR_MEMORY_CACHE,
                1,
                5,
                60,
                Arc::new(MemoryCleanup {
                    reclaimers: Arc::clone(&reclaimers),
                    passes: config.reclaim_passes.max(1),
                }),
            ),
            RecoveryActionSpec::new(OPTIMIZE_CPU, 2, 3, 120, performance(true)),
            RecoveryActionSpec::new(
                CLEANUP_TEMP_FILES,
                3,
                3,
                600,
                Arc::new(FileCleanup {
                    label: "temp",
                    dirs: config.temp_dirs.clone(),
                    rule: CleanupRule {
                        max_age: Duration::from_secs(config.temp_max_age_hours * 3600),
                        extension: None,
                        max_depth: config.scan_depth,
                    },
                }),
            ),
            RecoveryActionSpec::new(
                CLEANUP_OLD_LOGS,
                3,
                2,
                1800,
                Arc::new(FileCleanup {
                    label: "log",
                    dirs: config.log_dirs.clone(),
                    rule: CleanupRule {
                        max_age: Duration::from_secs(config.log_max_age_days * 86400),
                        extension: Some("log".to_string()),
                        max_depth: config.scan_depth,
                    },
                }),
            ),
            RecoveryActionSpec::new(OPTIMIZE_PERFORMANCE, 4, 3, 300, performance(false)),
            RecoveryActionSpec::new(
                ROLLBACK_CHANGES,
                6,
                1,
                1800,
                decline("Rollback is not automated"),
            ),
        ];

        let mut registry = Self::new();
        for mut spec in specs {
            if let Some(secs) = config.cooldowns.get(&spec.name) {
                spec.cooldown = Duration::from_secs(*secs);
            }
            // Names above are distinct, so registration cannot collide.
            let _ = registry.register(spec);
        }
        registry
    }

    pub fn get(&self, name: &str) -> Option<Arc<RecoveryActionSpec>> {
        self.specs.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.specs.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

// ============================================================================
// Memory reclaimers
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclaimLevel {
    /// Trim what can be rebuilt cheaply
    Light,
    /// Drop everything that is not required for correctness
    Full,
}

/// A component that can give memory back on request.
pub trait MemoryReclaimer: Send + Sync {
    fn name(&self) -> &str;

    /// Release memory; returns the number of items dropped.
    fn reclaim(&self, level: ReclaimLevel) -> Result<usize, RecoveryError>;
}

#[derive(Default)]
pub struct ReclaimerRegistry {
    reclaimers: RwLock<Vec<Arc<dyn MemoryReclaimer>>>,
}

impl ReclaimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, reclaimer: Arc<dyn MemoryReclaimer>) {
        self.reclaimers.write().push(reclaimer);
    }

    pub fn len(&self) -> usize {
        self.reclaimers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run every reclaimer once at `level`. Stops at the first failure.
    pub fn reclaim_all(&self, level: ReclaimLevel) -> Result<usize, RecoveryError> {
        // Cloned so a reclaimer may register another without deadlocking.
        let reclaimers = self.reclaimers.read().clone();
        let mut total = 0;
        for reclaimer in reclaimers {
            let freed = reclaimer.reclaim(level)?;
            debug!(reclaimer = reclaimer.name(), freed, "Reclaimer ran");
            total += freed;
        }
        Ok(total)
    }
}

// ============================================================================
// Built-in executors
// ============================================================================

/// Refuses to act; used for actions that need an external supervisor.
pub struct Decline {
    pub reason: String,
}

impl RecoveryExecutor for Decline {
    fn execute(&self, _ctx: &ActionContext) -> Result<ActionOutcome, RecoveryError> {
        Ok(ActionOutcome::failure(self.reason.clone()))
    }
}

/// Runs full reclaim passes and estimates freed bytes from process RSS.
pub struct MemoryCleanup {
    pub reclaimers: Arc<ReclaimerRegistry>,
    pub passes: u32,
}

impl RecoveryExecutor for MemoryCleanup {
    fn execute(&self, _ctx: &ActionContext) -> Result<ActionOutcome, RecoveryError> {
        let rss_before = process_rss_bytes();
        let mut items = 0;
        for _ in 0..self.passes {
            items += self.reclaimers.reclaim_all(ReclaimLevel::Full)?;
        }
        let rss_after = process_rss_bytes();
        let freed = match (rss_before, rss_after) {
            (Some(before), Some(after)) => before.saturating_sub(after),
            _ => 0,
        };

        info!(passes = self.passes, items, freed_bytes = freed, "Memory cleanup completed");
        Ok(ActionOutcome::success("Memory cleanup completed")
            .with_detail("passes", self.passes)
            .with_detail("items_reclaimed", items as u64)
            .with_detail("freed_bytes_estimate", freed)
            .with_detail("rss_before", json!(rss_before))
            .with_detail("rss_after", json!(rss_after)))
    }
}

/// Removes stale files under a fixed directory set.
pub struct FileCleanup {
    pub label: &'static str,
    pub dirs: Vec<PathBuf>,
    pub rule: CleanupRule,
}

impl RecoveryExecutor for FileCleanup {
    fn execute(&self, _ctx: &ActionContext) -> Result<ActionOutcome, RecoveryError> {
        let report = remove_stale_files(&self.dirs, &self.rule, SystemTime::now());
        info!(
            kind = self.label,
            files = report.files_removed,
            bytes = report.bytes_freed,
            skipped = report.skipped,
            "File cleanup completed"
        );
        Ok(ActionOutcome::success(format!(
            "Removed {} {} files ({} bytes)",
            report.files_removed, self.label, report.bytes_freed
        ))
        .with_detail("files_removed", report.files_removed)
        .with_detail("bytes_freed", report.bytes_freed)
        .with_detail("skipped", report.skipped)
        .with_detail("dirs_scanned", report.dirs_scanned as u64))
    }
}

/// Best-effort tuning: lower priority, then reclaim, then clear caches.
pub struct PerformanceOptimization {
    pub reclaimers: Arc<ReclaimerRegistry>,
    pub lower_priority: bool,
    /// Skip the cache clear, used for the cpu action
    pub cpu_only: bool,
}

impl RecoveryExecutor for PerformanceOptimization {
    fn execute(&self, _ctx: &ActionContext) -> Result<ActionOutcome, RecoveryError> {
        let mut steps: Vec<String> = Vec::new();

        if self.lower_priority {
            if lower_process_priority() {
                steps.push("priority_lowered".to_string());
            } else {
                debug!("Could not lower process priority");
            }
        }

        let light = self.reclaimers.reclaim_all(ReclaimLevel::Light)?;
        steps.push(format!("reclaim_pass({light})"));

        if !self.cpu_only {
            let full = self.reclaimers.reclaim_all(ReclaimLevel::Full)?;
            steps.push(format!("caches_cleared({full})"));
        }

        Ok(ActionOutcome::success(format!("Applied {} optimization steps", steps.len()))
            .with_detail("steps", json!(steps)))
    }
}

#[cfg(unix)]
fn lower_process_priority() -> bool {
    let pid = std::process::id().to_string();
    std::process::Command::new("renice")
        .args(["-n", "5", "-p", &pid])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn lower_process_priority() -> bool {
    false
}
