//! Unit tests for the self-healing system
//!
//! Tests cover:
//! - Health history and summaries
//! - Trend detection
//! - Recovery scheduling, cooldowns and isolation of failing actions
//! - The alert to recovery path through `SelfHealingSystem`

use botkeeper::clock::{ManualClock, SharedClock};
use botkeeper::config::{MonitorConfig, RecoveryConfig};
use botkeeper::errors::RecoveryError;
use botkeeper::self_healing::actions::{
    ActionContext, ActionOutcome, ActionRegistry, RecoveryActionSpec, RecoveryExecutor,
    CLEAR_MEMORY_CACHE,
};
use botkeeper::self_healing::metrics::{MetricsSample, ScriptedMetrics};
use botkeeper::self_healing::monitor::HealthMonitor;
use botkeeper::self_healing::scheduler::ScheduleDecision;
use botkeeper::self_healing::{
    AlertKind, HealthSnapshot, RecoveryScheduler, SelfHealingSystem, SystemMetricsProvider,
};
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn snapshot(cpu_pct: f64, mem_pct: f64) -> HealthSnapshot {
    HealthSnapshot {
        cpu_pct,
        mem_pct,
        disk_pct: 50.0,
        response_time_s: 0.01,
        error_rate: 0.0,
        timestamp: Utc::now(),
    }
}

fn quiet_recovery() -> RecoveryConfig {
    RecoveryConfig {
        temp_dirs: vec![],
        log_dirs: vec![],
        lower_priority: false,
        ..Default::default()
    }
}

struct Counting {
    runs: AtomicUsize,
    succeed: bool,
}

impl Counting {
    fn new(succeed: bool) -> Arc<Self> {
        Arc::new(Self {
            runs: AtomicUsize::new(0),
            succeed,
        })
    }

    fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

impl RecoveryExecutor for Counting {
    fn execute(&self, _ctx: &ActionContext) -> Result<ActionOutcome, RecoveryError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if self.succeed {
            Ok(ActionOutcome::success("done"))
        } else {
            Err(RecoveryError::ExecutorFailed {
                action: "flaky".into(),
                message: "boom".into(),
            })
        }
    }
}

// ============================================================================
// Health monitor
// ============================================================================

mod monitor_tests {
    use super::*;

    fn monitor(history_cap: usize) -> HealthMonitor {
        let config = MonitorConfig {
            history_cap,
            ..Default::default()
        };
        HealthMonitor::new(config, Arc::new(ScriptedMetrics::constant(10.0, 10.0, 10.0)))
    }

    #[test]
    fn test_empty_history_reports_no_data() {
        let m = monitor(100);
        let summary = m.get_health_summary();
        assert!(summary.is_no_data());
        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["state"], "no_data");
    }

    #[test]
    fn test_history_never_exceeds_cap() {
        let m = monitor(5);
        for i in 0..12 {
            m.record_snapshot(snapshot(10.0 + (i % 3) as f64, 20.0));
            assert!(m.history_len() <= 5);
        }
        assert_eq!(m.history_len(), 5);
    }

    #[test]
    fn test_rising_cpu_fires_trend_alert() {
        let m = monitor(100);
        let mut fired = false;
        for i in 0..10 {
            let alerts = m.record_snapshot(snapshot(10.0 + i as f64 * 3.0, 20.0));
            fired = alerts.iter().any(|a| a.kind == AlertKind::CpuTrendRising);
        }
        assert!(fired);
    }

    #[test]
    fn test_flat_cpu_does_not_fire_trend_alert() {
        let m = monitor(100);
        for _ in 0..10 {
            let alerts = m.record_snapshot(snapshot(40.0, 20.0));
            assert!(alerts.iter().all(|a| a.kind != AlertKind::CpuTrendRising));
        }
    }

    #[test]
    fn test_threshold_alert_and_summary() {
        let m = monitor(100);
        let alerts = m.record_snapshot(snapshot(95.0, 20.0));
        assert!(alerts.iter().any(|a| a.kind == AlertKind::CpuCritical));

        let summary = m.get_health_summary();
        let report = summary.report().unwrap();
        assert_eq!(report.samples, 1);
        assert_eq!(report.avg_cpu_pct, 95.0);
    }

    #[test]
    fn test_sampling_failure_is_reported() {
        let provider = ScriptedMetrics::new([Err(botkeeper::errors::MetricsError::Sampling(
            "no /proc".into(),
        ))]);
        let m = HealthMonitor::new(MonitorConfig::default(), Arc::new(provider));
        assert!(m.check_now().is_err());
        assert_eq!(m.history_len(), 0);
    }
}

// ============================================================================
// Recovery scheduler
// ============================================================================

mod scheduler_tests {
    use super::*;

    fn scheduler(specs: Vec<RecoveryActionSpec>) -> (RecoveryScheduler, Arc<ManualClock>) {
        let mut registry = ActionRegistry::new();
        for spec in specs {
            registry.register(spec).unwrap();
        }
        let clock = Arc::new(ManualClock::default());
        let shared: SharedClock = clock.clone();
        (RecoveryScheduler::new(Arc::new(registry), shared, true), clock)
    }

    #[test]
    fn test_repeat_within_cooldown_records_one_attempt() {
        let exec = Counting::new(true);
        let (s, _clock) = scheduler(vec![RecoveryActionSpec::new("a", 1, 3, 60, exec.clone())]);

        assert!(matches!(
            s.enqueue("a", ActionContext::manual("first")),
            ScheduleDecision::Queued { .. }
        ));
        s.drain();
        assert!(matches!(
            s.enqueue("a", ActionContext::manual("second")),
            ScheduleDecision::CoolingDown { .. }
        ));
        s.drain();

        assert_eq!(exec.runs(), 1);
        assert_eq!(s.record("a").unwrap().attempts, 1);
    }

    #[test]
    fn test_failing_action_does_not_block_others() {
        let bad = Counting::new(false);
        let good = Counting::new(true);
        let (s, _clock) = scheduler(vec![
            RecoveryActionSpec::new("bad", 1, 3, 60, bad.clone()),
            RecoveryActionSpec::new("good", 2, 3, 60, good.clone()),
        ]);

        s.enqueue("bad", ActionContext::manual("x"));
        s.enqueue("good", ActionContext::manual("x"));
        let executions = s.drain();

        assert_eq!(executions.len(), 2);
        assert_eq!(executions[0].action, "bad");
        assert!(!executions[0].success);
        assert!(executions[1].success);
        assert_eq!(bad.runs(), 1);
        assert_eq!(good.runs(), 1);
    }

    #[test]
    fn test_consecutive_failures_exhaust_action() {
        let bad = Counting::new(false);
        let (s, clock) = scheduler(vec![RecoveryActionSpec::new("bad", 1, 2, 10, bad.clone())]);

        for _ in 0..2 {
            s.enqueue("bad", ActionContext::manual("x"));
            s.drain();
            clock.advance_secs(11);
        }
        assert!(matches!(
            s.enqueue("bad", ActionContext::manual("x")),
            ScheduleDecision::Exhausted { .. }
        ));
        assert_eq!(bad.runs(), 2);
    }

    #[test]
    fn test_unknown_action_is_reported() {
        let (s, _clock) = scheduler(vec![]);
        assert!(matches!(
            s.enqueue("nope", ActionContext::manual("x")),
            ScheduleDecision::UnknownAction { .. }
        ));
    }
}

// ============================================================================
// Alert to recovery
// ============================================================================

mod system_tests {
    use super::*;

    fn system(provider: Arc<dyn SystemMetricsProvider>) -> (SelfHealingSystem, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let shared: SharedClock = clock.clone();
        let system =
            SelfHealingSystem::new(MonitorConfig::default(), &quiet_recovery(), provider, shared);
        (system, clock)
    }

    #[test]
    fn test_memory_cooldown_window() {
        let (sys, clock) = system(Arc::new(ScriptedMetrics::constant(10.0, 95.0, 10.0)));

        sys.force_health_check().unwrap();
        assert_eq!(sys.scheduler().record(CLEAR_MEMORY_CACHE).unwrap().attempts, 1);

        clock.advance_secs(10);
        sys.force_health_check().unwrap();
        assert_eq!(sys.scheduler().record(CLEAR_MEMORY_CACHE).unwrap().attempts, 1);

        clock.advance_secs(51);
        sys.force_health_check().unwrap();
        assert_eq!(sys.scheduler().record(CLEAR_MEMORY_CACHE).unwrap().attempts, 2);
    }

    #[test]
    fn test_disabled_autonomy_schedules_nothing() {
        let (sys, _clock) = system(Arc::new(ScriptedMetrics::constant(10.0, 95.0, 10.0)));
        sys.disable_autonomy();
        let report = sys.force_health_check().unwrap();
        assert!(!report.alerts.is_empty());
        assert!(sys.scheduler().record(CLEAR_MEMORY_CACHE).is_none());
        assert!(!sys.get_autonomy_status().autonomy_enabled);
    }

    #[test]
    fn test_optimize_runs_with_autonomy_off() {
        let provider = ScriptedMetrics::new([Ok(MetricsSample {
            cpu_pct: 20.0,
            mem_pct: 30.0,
            disk_pct: 40.0,
        })]);
        let (sys, _clock) = system(Arc::new(provider));
        sys.disable_autonomy();
        let report = sys.system_optimize();
        assert!(!report.executions.is_empty());
        assert!(report.post_check.is_some());
    }
}
