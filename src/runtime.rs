//! Process-level wiring of the director and the self-healing system.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

use crate::capabilities::{Capabilities, SysinfoMetrics, SystemMetricsProvider};
use crate::clock::{system_clock, SharedClock};
use crate::config::Config;
use crate::orchestration::{
    events::DeliveryError, BroadcastEvent, Command, CommandOutcome, Director, EventListener,
};
use crate::self_healing::{MemoryReclaimer, SelfHealingSystem};

/// Feeds agent-side command results into the error-rate metric.
struct OperationRecorder {
    healing: Arc<SelfHealingSystem>,
}

impl EventListener for OperationRecorder {
    fn deliver(&self, event: &BroadcastEvent) -> Result<(), DeliveryError> {
        if let BroadcastEvent::CommandResult { result, .. } = event {
            self.healing.record_operation(result.is_success());
        }
        Ok(())
    }
}

pub struct Runtime {
    config: Config,
    director: Arc<Director>,
    healing: Arc<SelfHealingSystem>,
    started_at: DateTime<Utc>,
    // Keeps the hub's weak reference alive.
    _recorder: Arc<dyn EventListener>,
}

impl Runtime {
    /// Host metrics from sysinfo, built-in analyzer and generator.
    pub fn new(config: Config) -> Self {
        let provider: Arc<dyn SystemMetricsProvider> =
            Arc::new(SysinfoMetrics::new(config.monitor.disk_path.clone()));
        let capabilities = Capabilities::builtin(Arc::clone(&provider));
        Self::with_parts(config, capabilities, system_clock())
    }

    pub fn with_parts(config: Config, capabilities: Capabilities, clock: SharedClock) -> Self {
        let provider = Arc::clone(&capabilities.metrics);
        let director = Director::with_clock(config.director.clone(), capabilities, clock.clone());
        let healing = Arc::new(SelfHealingSystem::new(
            config.monitor.clone(),
            &config.recovery,
            provider,
            clock.clone(),
        ));

        let reclaimer: Arc<dyn MemoryReclaimer> = director.clone();
        healing.reclaimers().register(reclaimer);

        let recorder: Arc<dyn EventListener> = Arc::new(OperationRecorder {
            healing: Arc::clone(&healing),
        });
        director.add_listener(&recorder);

        Self {
            config,
            director,
            healing,
            started_at: clock.now(),
            _recorder: recorder,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn director(&self) -> &Arc<Director> {
        &self.director
    }

    pub fn healing(&self) -> &Arc<SelfHealingSystem> {
        &self.healing
    }

    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds().max(0)
    }

    /// Run a command through the director and account for its outcome.
    pub async fn execute(&self, command: Command) -> CommandOutcome {
        let director_level = command.command_type.is_director_level();
        let outcome = self.director.execute(command).await;
        // A delegated command is counted when its agent reports back.
        if director_level || !outcome.is_success() {
            self.healing.record_operation(outcome.is_success());
        }
        outcome
    }

    /// Start the director's background loop and, if enabled, health monitoring.
    pub fn start(&self, monitor: bool) {
        self.director.start();
        if monitor {
            self.healing.start_monitoring();
        }
        info!(monitoring = monitor, "Runtime started");
    }

    pub async fn shutdown(&self) {
        self.healing.stop_monitoring().await;
        self.director.stop().await;
        info!("Runtime stopped");
    }
}
