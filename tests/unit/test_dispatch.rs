//! Unit tests for command dispatch
//!
//! Tests cover:
//! - Director-level commands and their outcomes
//! - Kind-based routing and explicit targets
//! - Swarm templates and lifecycle
//! - Metrics and history accounting
//! - Event delivery to listeners

use botkeeper::capabilities::Capabilities;
use botkeeper::clock::ManualClock;
use botkeeper::config::DirectorConfig;
use botkeeper::orchestration::{
    AgentKind, AgentStatus, BroadcastEvent, ChannelListener, Command, CommandOutcome, CommandType,
    Director, EventListener, OutcomeStatus,
};
use botkeeper::self_healing::metrics::ScriptedMetrics;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn director_with(config: DirectorConfig) -> Arc<Director> {
    Director::with_clock(
        config,
        Capabilities::builtin(Arc::new(ScriptedMetrics::constant(20.0, 30.0, 40.0))),
        Arc::new(ManualClock::default()),
    )
}

fn director() -> Arc<Director> {
    director_with(DirectorConfig {
        agent_poll_timeout_ms: 50,
        ..Default::default()
    })
}

fn subscribe(d: &Director) -> (Arc<dyn EventListener>, mpsc::Receiver<BroadcastEvent>) {
    let (listener, rx) = ChannelListener::new(256);
    let listener: Arc<dyn EventListener> = listener;
    d.add_listener(&listener);
    (listener, rx)
}

/// Wait for `n` command results and return them in arrival order.
async fn results(rx: &mut mpsc::Receiver<BroadcastEvent>, n: usize) -> Vec<CommandOutcome> {
    tokio::time::timeout(Duration::from_secs(3), async {
        let mut out = Vec::new();
        while out.len() < n {
            match rx.recv().await {
                Some(BroadcastEvent::CommandResult { result, .. }) => out.push(result),
                Some(_) => {}
                None => break,
            }
        }
        out
    })
    .await
    .unwrap()
}

// ============================================================================
// Director-level commands
// ============================================================================

mod director_tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_command_is_error_outcome() {
        let d = director();
        let outcome = d.execute(Command::new("frobnicate").with_id("c1")).await;
        assert_eq!(outcome.command_id, "c1");
        assert_eq!(outcome.status, OutcomeStatus::Error);
        assert!(outcome.message.unwrap().contains("frobnicate"));
    }

    #[tokio::test]
    async fn test_metrics_track_every_execution() {
        let d = director();
        for _ in 0..3 {
            d.execute(Command::new(CommandType::ListAgents)).await;
        }
        d.execute(Command::new("frobnicate")).await;

        let metrics = d.summary().metrics;
        assert_eq!(metrics.commands_executed, 4);
        assert_eq!(metrics.successes, 3);
        assert_eq!(metrics.errors, 1);
        assert!((metrics.success_rate - 75.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_create_agent_by_type() {
        let d = director();
        let outcome = d
            .execute(
                Command::new(CommandType::CreateAgent)
                    .with_param("type", "analyzer")
                    .with_param("name", "a1"),
            )
            .await;
        assert!(outcome.is_success());
        assert_eq!(outcome.data["agent"]["name"], json!("a1"));
        assert_eq!(outcome.data["agent"]["type"], json!("analyzer"));
        assert_eq!(d.agents().len(), 1);
    }

    #[tokio::test]
    async fn test_create_agent_rejects_unknown_type() {
        let d = director();
        let outcome = d
            .execute(Command::new(CommandType::CreateAgent).with_param("type", "wizard"))
            .await;
        assert!(!outcome.is_success());
        assert!(d.agents().is_empty());
    }

    #[tokio::test]
    async fn test_history_is_capped() {
        let d = director_with(DirectorConfig {
            history_limit: 3,
            agent_poll_timeout_ms: 50,
            ..Default::default()
        });
        for i in 0..7 {
            d.execute(Command::new(CommandType::ListSwarms).with_id(format!("h{i}")))
                .await;
            assert!(d.history().len() <= 3);
        }
        let ids: Vec<_> = d.history().into_iter().map(|e| e.command_id).collect();
        assert_eq!(ids, vec!["h4", "h5", "h6"]);
    }
}

// ============================================================================
// Agents
// ============================================================================

mod agent_tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_command_on_agent() {
        let d = director();
        let agent = d.create_agent(AgentKind::Analyzer, None);
        let outcome = agent.execute(&Command::new("generate_poem")).await;
        assert_eq!(outcome.status, OutcomeStatus::Error);
        assert_eq!(outcome.agent_id.as_deref(), Some(agent.id()));
        assert_eq!(agent.metrics().errors, 1);
    }

    #[tokio::test]
    async fn test_agent_metrics_after_n_commands() {
        let d = director();
        let agent = d.create_agent(AgentKind::Generator, None);
        for _ in 0..4 {
            assert!(agent.execute(&Command::new(CommandType::Ping)).await.is_success());
        }
        // Generators have no analyzer handler.
        agent.execute(&Command::new(CommandType::AnalyzeCode)).await;

        let metrics = agent.metrics();
        assert_eq!(metrics.commands_executed, 5);
        assert_eq!(metrics.successes, 4);
        assert!((metrics.success_rate - 80.0).abs() < 1e-9);
    }
}

// ============================================================================
// Routing
// ============================================================================

mod routing_tests {
    use super::*;

    #[tokio::test]
    async fn test_errored_agent_still_routable_and_restart_clears_error() {
        let d = director();
        let (_listener, mut rx) = subscribe(&d);
        let analyzer = d.create_agent(AgentKind::Analyzer, Some("A1".into()));
        analyzer.start().unwrap();

        d.execute(
            Command::new(CommandType::Configure)
                .with_param("config", "not an object")
                .with_target_agent(analyzer.id()),
        )
        .await;
        assert!(!results(&mut rx, 1).await[0].is_success());
        assert_eq!(analyzer.status(), AgentStatus::Error);

        let routed = d.execute(Command::new(CommandType::QualityCheck)).await;
        assert!(routed.is_success());
        assert_eq!(routed.data["delegated_to"], json!(analyzer.id()));
        results(&mut rx, 1).await;

        d.execute(
            Command::new(CommandType::Configure)
                .with_param("config", 3)
                .with_target_agent(analyzer.id()),
        )
        .await;
        results(&mut rx, 1).await;
        assert_eq!(analyzer.status(), AgentStatus::Error);

        let restarted = d
            .execute(Command::new(CommandType::StartAgent).with_param("agent_id", analyzer.id()))
            .await;
        assert!(restarted.is_success());
        assert_eq!(restarted.data["status"], json!("idle"));
        assert_eq!(analyzer.status(), AgentStatus::Idle);
        d.stop().await;
    }

    #[tokio::test]
    async fn test_unknown_command_does_not_block_routing() {
        let d = director();
        let (_listener, mut rx) = subscribe(&d);
        let analyzer = d.create_agent(AgentKind::Analyzer, Some("A1".into()));
        analyzer.start().unwrap();

        d.execute(Command::new("teleport").with_target_agent(analyzer.id()))
            .await;
        assert!(!results(&mut rx, 1).await[0].is_success());
        assert_eq!(analyzer.status(), AgentStatus::Idle);

        let routed = d.execute(Command::new(CommandType::AnalyzeCode)).await;
        assert!(routed.is_success());
        assert_eq!(routed.data["delegated_to"], json!(analyzer.id()));
        d.stop().await;
    }

    #[tokio::test]
    async fn test_generation_routes_to_generator() {
        let d = director();
        let analyzer = d.create_agent(AgentKind::Analyzer, Some("A1".into()));
        let generator = d.create_agent(AgentKind::Generator, Some("G1".into()));

        let outcome = d
            .execute(Command::new(CommandType::GenerateCode).with_param("name", "tidy"))
            .await;
        assert!(outcome.is_success());
        assert_eq!(outcome.data["delegated_to"], json!(generator.id()));
        assert_ne!(outcome.data["delegated_to"], json!(analyzer.id()));
    }

    #[tokio::test]
    async fn test_no_idle_agent_of_kind() {
        let d = director();
        d.create_agent(AgentKind::Analyzer, None);
        let outcome = d.execute(Command::new(CommandType::GenerateCode)).await;
        assert_eq!(outcome.status, OutcomeStatus::Error);
        assert!(outcome.message.unwrap().contains("No suitable agent"));
    }

    #[tokio::test]
    async fn test_explicit_missing_target() {
        let d = director();
        d.create_agent(AgentKind::Generator, None);
        let outcome = d
            .execute(Command::new(CommandType::GenerateCode).with_target_agent("ghost"))
            .await;
        assert_eq!(outcome.status, OutcomeStatus::Error);
        assert_eq!(outcome.message.as_deref(), Some("Agent ghost not found"));
    }

    #[tokio::test]
    async fn test_delegated_result_is_broadcast() {
        let d = director();
        let (listener, mut rx) = ChannelListener::new(64);
        let listener: Arc<dyn EventListener> = listener;
        d.add_listener(&listener);

        let agent = d.create_agent(AgentKind::Monitor, None);
        agent.start().unwrap();
        let outcome = d
            .execute(
                Command::new(CommandType::Ping)
                    .with_id("p1")
                    .with_target_agent(agent.id()),
            )
            .await;
        assert!(outcome.is_success());

        let result = tokio::time::timeout(Duration::from_secs(2), async {
            while let Some(event) = rx.recv().await {
                if let BroadcastEvent::CommandResult { result, .. } = event {
                    if result.command_id == "p1" {
                        return Some(result);
                    }
                }
            }
            None
        })
        .await
        .unwrap()
        .unwrap();

        assert!(result.is_success());
        assert_eq!(result.data["message"], json!("pong"));
        assert_eq!(result.agent_id.as_deref(), Some(agent.id()));
        d.stop().await;
    }
}

// ============================================================================
// Swarms
// ============================================================================

mod swarm_tests {
    use super::*;

    #[tokio::test]
    async fn test_unsupported_broadcast_leaves_members_routable() {
        let d = director();
        let (_listener, mut rx) = subscribe(&d);
        let swarm = d
            .create_swarm("review", Some("code_analysis"), Default::default())
            .unwrap();
        assert!(swarm.start_all().await.is_clean());

        let outcome = d
            .execute(
                Command::new(CommandType::BroadcastToSwarm)
                    .with_param("swarm_id", swarm.id())
                    .with_param("command_type", "generate_code"),
            )
            .await;
        assert_eq!(outcome.data["delivered"], json!(3));
        let replies = results(&mut rx, 3).await;
        assert_eq!(replies.len(), 3);
        assert!(replies.iter().all(|r| !r.is_success()));
        for member in swarm.members() {
            assert_eq!(member.status(), AgentStatus::Idle);
        }

        let analyze = d.execute(Command::new(CommandType::AnalyzeCode)).await;
        assert!(analyze.is_success());
        let health = d.execute(Command::new(CommandType::HealthCheck)).await;
        assert!(health.is_success());
        d.stop().await;
    }

    #[tokio::test]
    async fn test_code_analysis_template_members() {
        let d = director();
        let swarm = d.create_swarm("review", Some("code_analysis"), Default::default()).unwrap();
        let members = swarm.members();
        assert_eq!(members.len(), 3);
        assert_eq!(
            members.iter().filter(|a| a.kind() == AgentKind::Analyzer).count(),
            2
        );
        assert_eq!(
            members.iter().filter(|a| a.kind() == AgentKind::Monitor).count(),
            1
        );
        assert_eq!(d.agents().len(), 3);
    }

    #[tokio::test]
    async fn test_unknown_template_creates_nothing() {
        let d = director();
        let outcome = d
            .execute(Command::new(CommandType::CreateSwarm).with_param("template", "bogus"))
            .await;
        assert!(!outcome.is_success());
        assert!(d.swarm_snapshots().is_empty());
        assert!(d.agents().is_empty());
    }

    #[tokio::test]
    async fn test_start_then_stop_all_members() {
        let d = director();
        let swarm = d
            .create_swarm("svc", Some("full_service"), Default::default())
            .unwrap();

        let started = swarm.start_all().await;
        assert!(started.is_clean());
        assert_eq!(started.succeeded, 5);
        assert!(swarm.members().iter().all(|a| a.is_running()));

        let stopped = swarm.stop_all().await;
        assert!(stopped.is_clean());
        for member in swarm.members() {
            assert!(!member.is_running());
            assert_eq!(member.status(), AgentStatus::Stopped);
        }
        assert_eq!(swarm.status(), AgentStatus::Stopped);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_member() {
        let d = director();
        let swarm = d
            .create_swarm("gen", Some("code_generation"), Default::default())
            .unwrap();
        let outcome = d
            .execute(
                Command::new(CommandType::BroadcastToSwarm)
                    .with_param("swarm_id", swarm.id())
                    .with_param("command_type", "ping"),
            )
            .await;
        assert!(outcome.is_success());
        assert_eq!(outcome.data["delivered"], json!(3));
    }

    #[tokio::test]
    async fn test_broadcast_rejects_director_commands() {
        let d = director();
        let swarm = d.create_swarm("s", None, Default::default()).unwrap();
        let outcome = d
            .execute(
                Command::new(CommandType::BroadcastToSwarm)
                    .with_param("swarm_id", swarm.id())
                    .with_param("command_type", "create_agent"),
            )
            .await;
        assert!(!outcome.is_success());
    }
}
