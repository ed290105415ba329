use botkeeper::config::MonitorConfig;
use botkeeper::orchestration::{AgentMetrics, CommandType};
use botkeeper::self_healing::metrics::ScriptedMetrics;
use botkeeper::self_healing::monitor::HealthMonitor;
use botkeeper::self_healing::HealthSnapshot;
use chrono::Utc;
use proptest::prelude::*;
use std::sync::Arc;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_success_rate_matches_counts(outcomes in prop::collection::vec(any::<bool>(), 1..200)) {
        let mut metrics = AgentMetrics::default();
        for ok in &outcomes {
            metrics.record(*ok, Utc::now());
        }
        let successes = outcomes.iter().filter(|ok| **ok).count() as u64;
        prop_assert_eq!(metrics.commands_executed, outcomes.len() as u64);
        prop_assert_eq!(metrics.successes + metrics.errors, metrics.commands_executed);
        prop_assert_eq!(metrics.successes, successes);
        let expected = successes as f64 / outcomes.len() as f64 * 100.0;
        prop_assert!((metrics.success_rate - expected).abs() < 1e-9);
    }

    #[test]
    fn prop_history_respects_cap(
        cap in 1usize..20,
        cpus in prop::collection::vec(0.0f64..100.0, 0..60),
    ) {
        let config = MonitorConfig { history_cap: cap, ..Default::default() };
        let monitor = HealthMonitor::new(config, Arc::new(ScriptedMetrics::constant(1.0, 1.0, 1.0)));
        for cpu in &cpus {
            monitor.record_snapshot(HealthSnapshot {
                cpu_pct: *cpu,
                mem_pct: 10.0,
                disk_pct: 10.0,
                response_time_s: 0.0,
                error_rate: 0.0,
                timestamp: Utc::now(),
            });
            prop_assert!(monitor.history_len() <= cap);
        }
        prop_assert_eq!(monitor.history_len(), cpus.len().min(cap));
    }

    #[test]
    fn prop_command_type_parse_is_total(name in "[a-z_]{0,24}") {
        let parsed = CommandType::from(name.as_str());
        if let CommandType::Other(raw) = &parsed {
            prop_assert_eq!(raw, &name);
        }
        let reparsed = CommandType::from(parsed.to_string());
        prop_assert_eq!(reparsed, parsed);
    }
}
