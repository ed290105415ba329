//! The director: registry of agents and swarms, and the single entry point
//! for commands.
//!
//! Director-level commands (creation, lifecycle, listings, swarm broadcast)
//! are handled in place. Everything else is delegated to one agent's queue:
//! the explicit target when given, otherwise the first idle agent of the kind
//! the command type prefers, or failing that the first one in error.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::agent::{Agent, AgentEnv, AgentKind, AgentMetrics, AgentSnapshot, AgentStatus};
use super::command::{Command, CommandOutcome, CommandType};
use super::events::{BroadcastEvent, EventHub, EventListener};
use super::swarm::{self, Swarm, SwarmSnapshot};
use crate::capabilities::Capabilities;
use crate::clock::{system_clock, SharedClock};
use crate::config::DirectorConfig;
use crate::errors::{DispatchError, RecoveryError};
use crate::observability::telemetry::track_command_execution;
use crate::self_healing::{MemoryReclaimer, ReclaimLevel};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectorSummary {
    pub id: String,
    pub status: AgentStatus,
    pub created_at: DateTime<Utc>,
    pub uptime_secs: i64,
    pub metrics: AgentMetrics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStatus {
    Executing,
    Completed,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub seq: u64,
    pub command_id: String,
    pub command_type: CommandType,
    pub status: HistoryStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Full system status, as returned by `get_status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectorStatus {
    pub director: DirectorSummary,
    pub agent_count: usize,
    pub swarm_count: usize,
    pub agents: Vec<AgentSnapshot>,
    pub swarms: Vec<SwarmSnapshot>,
    pub templates: Vec<String>,
    pub history_len: usize,
    pub listeners: usize,
}

type Background = (oneshot::Sender<()>, JoinHandle<()>);

pub struct Director {
    id: String,
    created_at: DateTime<Utc>,
    config: DirectorConfig,
    env: AgentEnv,
    agents: RwLock<Vec<Arc<Agent>>>,
    swarms: RwLock<Vec<Arc<Swarm>>>,
    history: Mutex<VecDeque<HistoryEntry>>,
    next_seq: AtomicU64,
    status: RwLock<AgentStatus>,
    metrics: Mutex<AgentMetrics>,
    background: Mutex<Option<Background>>,
}

impl Director {
    pub fn new(config: DirectorConfig, capabilities: Capabilities) -> Arc<Self> {
        Self::with_clock(config, capabilities, system_clock())
    }

    pub fn with_clock(
        config: DirectorConfig,
        capabilities: Capabilities,
        clock: SharedClock,
    ) -> Arc<Self> {
        let env = AgentEnv {
            capabilities,
            hub: Arc::new(EventHub::new()),
            poll_timeout: config.agent_poll_timeout(),
            clock,
        };
        Arc::new(Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: env.clock.now(),
            config,
            env,
            agents: RwLock::new(Vec::new()),
            swarms: RwLock::new(Vec::new()),
            history: Mutex::new(VecDeque::new()),
            next_seq: AtomicU64::new(0),
            status: RwLock::new(AgentStatus::Idle),
            metrics: Mutex::new(AgentMetrics::default()),
            background: Mutex::new(None),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn hub(&self) -> &Arc<EventHub> {
        &self.env.hub
    }

    pub fn listener_buffer(&self) -> usize {
        self.config.listener_buffer
    }

    pub fn add_listener(&self, listener: &Arc<dyn EventListener>) {
        self.env.hub.subscribe(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn EventListener>) {
        self.env.hub.unsubscribe(listener);
    }

    // ========================================================================
    // Command entry point
    // ========================================================================

    /// Execute or delegate one command. Never fails: errors come back as outcomes.
    pub async fn execute(&self, command: Command) -> CommandOutcome {
        let seq = self.begin_history(&command);
        let command_type = command.command_type.to_string();
        let result = track_command_execution(
            &command_type,
            &command.command_id,
            || self.dispatch(&command),
            |r: &Result<Value, DispatchError>| r.is_ok(),
        )
        .await;

        self.finish_history(seq, &result);
        self.metrics
            .lock()
            .record(result.is_ok(), self.env.clock.now());
        if command.command_type.is_director_level() && result.is_ok() {
            self.publish_status();
        }
        CommandOutcome::from_result(command.command_id, result)
    }

    async fn dispatch(&self, command: &Command) -> Result<Value, DispatchError> {
        if command.command_type.is_director_level() {
            self.handle_director_command(command).await
        } else {
            self.delegate(command)
        }
    }

    async fn handle_director_command(&self, command: &Command) -> Result<Value, DispatchError> {
        match &command.command_type {
            CommandType::CreateAgent => {
                let kind: AgentKind = command
                    .str_param(&["type", "agent_type", "bot_type"])?
                    .parse()?;
                let name = command.opt_str_param(&["name"])?.map(str::to_string);
                let agent = self.create_agent(kind, name);
                Ok(json!({
                    "message": format!("Agent {} created", agent.name()),
                    "agent": agent.snapshot(),
                }))
            }
            CommandType::CreateSwarm => {
                let name = match command.opt_str_param(&["name"])? {
                    Some(name) => name.to_string(),
                    None => format!("swarm_{}", self.swarms.read().len() + 1),
                };
                let template = command.opt_str_param(&["template"])?;
                let config = command
                    .opt_object_param("config")?
                    .cloned()
                    .unwrap_or_default();
                let swarm = self.create_swarm(&name, template, config)?;
                Ok(json!({
                    "message": format!("Swarm {} created", swarm.name()),
                    "swarm": swarm.snapshot(),
                }))
            }
            CommandType::StartAgent => {
                let agent = self.require_agent(Self::agent_id_param(command)?)?;
                agent.start()?;
                Ok(json!({ "agent_id": agent.id(), "status": agent.status() }))
            }
            CommandType::StopAgent => {
                let agent = self.require_agent(Self::agent_id_param(command)?)?;
                agent.stop().await;
                Ok(json!({ "agent_id": agent.id(), "status": agent.status() }))
            }
            CommandType::StartSwarm => {
                let swarm = self.require_swarm(Self::swarm_id_param(command)?)?;
                to_json(&swarm.start_all().await)
            }
            CommandType::StopSwarm => {
                let swarm = self.require_swarm(Self::swarm_id_param(command)?)?;
                to_json(&swarm.stop_all().await)
            }
            CommandType::GetStatus => to_json(&self.status()),
            CommandType::ListAgents => Ok(json!({ "agents": self.agent_snapshots() })),
            CommandType::ListSwarms => Ok(json!({ "swarms": self.swarm_snapshots() })),
            CommandType::BroadcastToSwarm => {
                let swarm = self.require_swarm(Self::swarm_id_param(command)?)?;
                let inner_type = CommandType::from(command.str_param(&["command_type"])?);
                if inner_type.is_director_level() {
                    return Err(DispatchError::InvalidParameter {
                        name: "command_type".to_string(),
                        reason: format!("{inner_type} cannot be broadcast to agents"),
                    });
                }
                let parameters = command
                    .opt_object_param("parameters")?
                    .cloned()
                    .unwrap_or_default();
                let inner = Command::new(inner_type)
                    .with_params(parameters)
                    .with_priority(command.priority)
                    .with_target_swarm(swarm.id());
                let delivered = swarm.broadcast(&inner);
                Ok(json!({
                    "swarm_id": swarm.id(),
                    "command_id": inner.command_id,
                    "delivered": delivered,
                }))
            }
            other => Err(DispatchError::UnknownCommand(other.to_string())),
        }
    }

    fn agent_id_param(command: &Command) -> Result<&str, DispatchError> {
        match command.opt_str_param(&["agent_id", "bot_id"])? {
            Some(id) => Ok(id),
            None => command
                .target_agent
                .as_deref()
                .ok_or_else(|| DispatchError::MissingParameter("agent_id".to_string())),
        }
    }

    fn swarm_id_param(command: &Command) -> Result<&str, DispatchError> {
        match command.opt_str_param(&["swarm_id"])? {
            Some(id) => Ok(id),
            None => command
                .target_swarm
                .as_deref()
                .ok_or_else(|| DispatchError::MissingParameter("swarm_id".to_string())),
        }
    }

    /// Route an agent-level command to a queue.
    fn delegate(&self, command: &Command) -> Result<Value, DispatchError> {
        let agent = match &command.target_agent {
            Some(target) => self.require_agent(target)?,
            None => {
                let no_agent = || DispatchError::NoSuitableAgent(command.command_type.to_string());
                let kind = command.command_type.preferred_agent_kind().ok_or_else(no_agent)?;
                let agents = self.agents.read();
                let first_in = |status: AgentStatus| {
                    agents
                        .iter()
                        .find(|a| a.kind() == kind && a.status() == status)
                        .cloned()
                };
                // An agent in Error leaves it on its next success.
                first_in(AgentStatus::Idle)
                    .or_else(|| first_in(AgentStatus::Error))
                    .ok_or_else(no_agent)?
            }
        };

        agent.enqueue(command.clone())?;
        debug!(
            command_id = %command.command_id,
            agent_id = %agent.id(),
            "Command delegated"
        );
        Ok(json!({
            "message": format!("Command delegated to {}", agent.name()),
            "delegated_to": agent.id(),
            "agent_name": agent.name(),
        }))
    }

    // ========================================================================
    // Registry
    // ========================================================================

    pub fn create_agent(&self, kind: AgentKind, name: Option<String>) -> Arc<Agent> {
        let agent = Agent::new(kind, name, self.env.clone());
        self.agents.write().push(Arc::clone(&agent));
        info!(agent_id = %agent.id(), name = %agent.name(), kind = %kind, "Agent created");
        self.env
            .hub
            .publish(&BroadcastEvent::bot_event(agent.id(), "created", agent.describe()));
        agent
    }

    pub fn create_swarm(
        &self,
        name: &str,
        template: Option<&str>,
        config: Map<String, Value>,
    ) -> Result<Arc<Swarm>, DispatchError> {
        let spec = template
            .map(|t| swarm::template(t).ok_or_else(|| DispatchError::UnknownTemplate(t.to_string())))
            .transpose()?;

        let swarm = Arc::new(Swarm::new(
            name,
            template.map(str::to_string),
            config,
            self.env.clock.now(),
        ));
        if let Some(spec) = spec {
            for (kind, count) in spec.members {
                for i in 0..*count {
                    let agent = self.create_agent(*kind, Some(swarm::member_name(name, *kind, i)));
                    swarm.add_agent(agent);
                }
            }
        }
        self.swarms.write().push(Arc::clone(&swarm));
        info!(swarm_id = %swarm.id(), name, members = swarm.len(), "Swarm created");
        Ok(swarm)
    }

    pub fn agent(&self, id: &str) -> Option<Arc<Agent>> {
        self.agents.read().iter().find(|a| a.id() == id).cloned()
    }

    pub fn swarm(&self, id: &str) -> Option<Arc<Swarm>> {
        self.swarms.read().iter().find(|s| s.id() == id).cloned()
    }

    fn require_agent(&self, id: &str) -> Result<Arc<Agent>, DispatchError> {
        self.agent(id)
            .ok_or_else(|| DispatchError::AgentNotFound(id.to_string()))
    }

    fn require_swarm(&self, id: &str) -> Result<Arc<Swarm>, DispatchError> {
        self.swarm(id)
            .ok_or_else(|| DispatchError::SwarmNotFound(id.to_string()))
    }

    pub fn agents(&self) -> Vec<Arc<Agent>> {
        self.agents.read().clone()
    }

    pub fn agent_snapshots(&self) -> Vec<AgentSnapshot> {
        self.agents.read().iter().map(|a| a.snapshot()).collect()
    }

    pub fn swarm_snapshots(&self) -> Vec<SwarmSnapshot> {
        self.swarms.read().iter().map(|s| s.snapshot()).collect()
    }

    /// Drop agents that have been stopped for at least the configured TTL.
    pub fn reap_stopped_agents(&self) -> Vec<String> {
        let Some(ttl_secs) = self.config.agent_ttl_secs else {
            return Vec::new();
        };
        let ttl = chrono::Duration::seconds(ttl_secs as i64);
        let now = self.env.clock.now();

        let mut reaped = Vec::new();
        self.agents.write().retain(|agent| {
            let expired = agent.status() == AgentStatus::Stopped
                && agent.stopped_at().is_some_and(|at| now - at >= ttl);
            if expired {
                reaped.push(agent.id().to_string());
            }
            !expired
        });

        if !reaped.is_empty() {
            for swarm in self.swarms.read().iter() {
                for id in &reaped {
                    swarm.remove_agent(id);
                }
            }
            for id in &reaped {
                info!(agent_id = %id, "Removed stopped agent");
                self.env
                    .hub
                    .publish(&BroadcastEvent::bot_event(id, "removed", Value::Null));
            }
        }
        reaped
    }

    // ========================================================================
    // Status
    // ========================================================================

    pub fn summary(&self) -> DirectorSummary {
        DirectorSummary {
            id: self.id.clone(),
            status: *self.status.read(),
            created_at: self.created_at,
            uptime_secs: (self.env.clock.now() - self.created_at).num_seconds(),
            metrics: self.metrics.lock().clone(),
        }
    }

    pub fn status(&self) -> DirectorStatus {
        let agents = self.agent_snapshots();
        let swarms = self.swarm_snapshots();
        DirectorStatus {
            director: self.summary(),
            agent_count: agents.len(),
            swarm_count: swarms.len(),
            agents,
            swarms,
            templates: swarm::template_names()
                .into_iter()
                .map(str::to_string)
                .collect(),
            history_len: self.history.lock().len(),
            listeners: self.env.hub.listener_count(),
        }
    }

    pub fn status_event(&self) -> BroadcastEvent {
        BroadcastEvent::StatusUpdate {
            agent_count: self.agents.read().len(),
            swarm_count: self.swarms.read().len(),
            director: self.summary(),
            timestamp: Utc::now(),
        }
    }

    pub fn publish_status(&self) -> usize {
        self.env.hub.publish(&self.status_event())
    }

    // ========================================================================
    // History
    // ========================================================================

    fn begin_history(&self, command: &Command) -> u64 {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let mut history = self.history.lock();
        history.push_back(HistoryEntry {
            seq,
            command_id: command.command_id.clone(),
            command_type: command.command_type.clone(),
            status: HistoryStatus::Executing,
            started_at: self.env.clock.now(),
            finished_at: None,
            result: None,
            error: None,
        });
        while history.len() > self.config.history_limit {
            history.pop_front();
        }
        seq
    }

    fn finish_history(&self, seq: u64, result: &Result<Value, DispatchError>) {
        let mut history = self.history.lock();
        // Already evicted if the cap was hit while this command ran.
        let Some(entry) = history.iter_mut().rev().find(|e| e.seq == seq) else {
            return;
        };
        entry.finished_at = Some(self.env.clock.now());
        match result {
            Ok(value) => {
                entry.status = HistoryStatus::Completed;
                entry.result = Some(value.clone());
            }
            Err(e) => {
                entry.status = HistoryStatus::Error;
                entry.error = Some(e.to_string());
            }
        }
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.history.lock().iter().cloned().collect()
    }

    // ========================================================================
    // Background loop
    // ========================================================================

    /// Start periodic status broadcasts and agent reaping.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut background = self.background.lock();
        if background.is_some() {
            return false;
        }
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(Self::background_loop(
            Arc::downgrade(self),
            self.config.status_interval(),
            stop_rx,
        ));
        *background = Some((stop_tx, handle));
        *self.status.write() = AgentStatus::Active;
        info!(director_id = %self.id, "Director started");
        true
    }

    async fn background_loop(
        director: std::sync::Weak<Self>,
        period: Duration,
        mut stop_rx: oneshot::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = &mut stop_rx => break,
                _ = ticker.tick() => {
                    let Some(director) = director.upgrade() else { break };
                    director.publish_status();
                    director.reap_stopped_agents();
                }
            }
        }
    }

    /// Stop the background loop and every agent.
    pub async fn stop(&self) {
        let background = self.background.lock().take();
        if let Some((stop_tx, handle)) = background {
            let _ = stop_tx.send(());
            if tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .is_err()
            {
                warn!(director_id = %self.id, "Director loop did not exit in time");
            }
        }

        let swarms: Vec<Arc<Swarm>> = self.swarms.read().clone();
        join_all(swarms.iter().map(|s| s.stop_all())).await;
        let agents = self.agents();
        join_all(agents.iter().map(|a| a.stop())).await;

        *self.status.write() = AgentStatus::Stopped;
        info!(director_id = %self.id, "Director stopped");
    }
}

impl MemoryReclaimer for Director {
    fn name(&self) -> &str {
        "director_history"
    }

    fn reclaim(&self, level: ReclaimLevel) -> Result<usize, RecoveryError> {
        let keep = match level {
            ReclaimLevel::Light => self.config.history_keep_on_reclaim,
            ReclaimLevel::Full => 0,
        };
        let mut history = self.history.lock();
        let excess = history.len().saturating_sub(keep);
        let mut removed = 0;
        // Oldest first; in-flight entries stay so they can still be completed.
        history.retain(|entry| {
            if removed < excess && entry.status != HistoryStatus::Executing {
                removed += 1;
                false
            } else {
                true
            }
        });
        Ok(removed)
    }
}

impl std::fmt::Debug for Director {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Director")
            .field("id", &self.id)
            .field("agents", &self.agents.read().len())
            .field("swarms", &self.swarms.read().len())
            .finish_non_exhaustive()
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, DispatchError> {
    serde_json::to_value(value).map_err(|e| DispatchError::Handler(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::orchestration::events::ChannelListener;
    use crate::self_healing::metrics::ScriptedMetrics;
    use tokio::sync::mpsc;

    fn capabilities() -> Capabilities {
        Capabilities::builtin(Arc::new(ScriptedMetrics::constant(10.0, 10.0, 10.0)))
    }

    fn config() -> DirectorConfig {
        DirectorConfig {
            agent_poll_timeout_ms: 50,
            ..Default::default()
        }
    }

    fn director() -> Arc<Director> {
        Director::new(config(), capabilities())
    }

    fn listen(d: &Director) -> (Arc<dyn EventListener>, mpsc::Receiver<BroadcastEvent>) {
        let (listener, rx) = ChannelListener::new(64);
        let listener: Arc<dyn EventListener> = listener;
        d.add_listener(&listener);
        (listener, rx)
    }

    async fn create(d: &Director, kind: &str, name: &str) -> String {
        let out = d
            .execute(
                Command::new(CommandType::CreateAgent)
                    .with_param("type", kind)
                    .with_param("name", name),
            )
            .await;
        assert!(out.is_success(), "{:?}", out.message);
        out.data["agent"]["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_create_agent_and_list() {
        let d = director();
        let id = create(&d, "analyzer", "a1").await;
        let out = d.execute(Command::new(CommandType::ListAgents)).await;
        let agents = out.data["agents"].as_array().unwrap();
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0]["id"], json!(id));
        assert_eq!(agents[0]["type"], json!("analyzer"));
        assert_eq!(agents[0]["status"], json!("idle"));
    }

    #[tokio::test]
    async fn test_create_agent_rejects_bad_type() {
        let d = director();
        let out = d
            .execute(Command::new(CommandType::CreateAgent).with_param("type", "wizard"))
            .await;
        assert!(!out.is_success());
        let out = d.execute(Command::new(CommandType::CreateAgent)).await;
        assert_eq!(out.message.as_deref(), Some("Missing required parameter 'type'"));
    }

    #[tokio::test]
    async fn test_delegation_by_preferred_kind() {
        let d = director();
        create(&d, "analyzer", "a1").await;
        let g1 = create(&d, "generator", "g1").await;
        let out = d
            .execute(Command::new(CommandType::GenerateCode).with_param("name", "x"))
            .await;
        assert!(out.is_success());
        assert_eq!(out.data["delegated_to"], json!(g1));
    }

    #[tokio::test]
    async fn test_delegation_without_candidate() {
        let d = director();
        create(&d, "analyzer", "a1").await;
        let out = d.execute(Command::new(CommandType::HealthCheck)).await;
        assert!(!out.is_success());
        assert_eq!(
            out.message.as_deref(),
            Some("No suitable agent found for command health_check")
        );

        let out = d.execute(Command::new(CommandType::Ping)).await;
        assert!(!out.is_success());
    }

    #[tokio::test]
    async fn test_explicit_target_missing_is_error() {
        let d = director();
        create(&d, "generator", "g1").await;
        let out = d
            .execute(Command::new(CommandType::GenerateCode).with_target_agent("ghost"))
            .await;
        assert_eq!(out.message.as_deref(), Some("Agent ghost not found"));
    }

    #[tokio::test]
    async fn test_unknown_command_reported_by_agent() {
        let d = director();
        let (_listener, mut rx) = listen(&d);
        let id = create(&d, "custom", "c1").await;
        d.execute(Command::new(CommandType::StartAgent).with_param("agent_id", id.clone()))
            .await;

        let out = d
            .execute(Command::new("teleport").with_id("t1").with_target_agent(id))
            .await;
        assert!(out.is_success());

        let result = loop {
            let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            if let BroadcastEvent::CommandResult { result, .. } = event {
                break result;
            }
        };
        assert_eq!(result.command_id, "t1");
        assert_eq!(result.message.as_deref(), Some("Unknown command type: teleport"));
        d.stop().await;
    }

    #[tokio::test]
    async fn test_status_update_after_director_command() {
        let d = director();
        let (_listener, mut rx) = listen(&d);
        create(&d, "monitor", "m1").await;

        let mut saw_status = false;
        while let Ok(event) = rx.try_recv() {
            if let BroadcastEvent::StatusUpdate { agent_count, .. } = event {
                assert_eq!(agent_count, 1);
                saw_status = true;
            }
        }
        assert!(saw_status);
    }

    #[tokio::test]
    async fn test_template_swarm() {
        let d = director();
        let out = d
            .execute(
                Command::new(CommandType::CreateSwarm)
                    .with_param("name", "alpha")
                    .with_param("template", "code_analysis"),
            )
            .await;
        assert!(out.is_success());
        assert_eq!(out.data["swarm"]["member_count"], json!(3));

        let mut names: Vec<String> = d.agents().iter().map(|a| a.name().to_string()).collect();
        names.sort();
        assert_eq!(
            names,
            vec!["alpha_analyzer_1", "alpha_analyzer_2", "alpha_monitor_1"]
        );

        let out = d
            .execute(
                Command::new(CommandType::CreateSwarm)
                    .with_param("name", "beta")
                    .with_param("template", "nope"),
            )
            .await;
        assert_eq!(out.message.as_deref(), Some("Unknown swarm template: nope"));
    }

    #[tokio::test]
    async fn test_swarm_lifecycle_and_broadcast() {
        let d = director();
        let swarm = d.create_swarm("s", Some("full_service"), Map::new()).unwrap();
        let swarm_id = swarm.id().to_string();

        let out = d
            .execute(Command::new(CommandType::StartSwarm).with_param("swarm_id", swarm_id.clone()))
            .await;
        assert_eq!(out.data["succeeded"], json!(5));

        let out = d
            .execute(
                Command::new(CommandType::BroadcastToSwarm)
                    .with_param("swarm_id", swarm_id.clone())
                    .with_param("command_type", "ping"),
            )
            .await;
        assert_eq!(out.data["delivered"], json!(5));

        d.execute(Command::new(CommandType::StopSwarm).with_target_swarm(swarm_id))
            .await;
        assert!(d.agents().iter().all(|a| a.status() == AgentStatus::Stopped));
    }

    #[tokio::test]
    async fn test_broadcast_to_empty_swarm() {
        let d = director();
        let swarm = d.create_swarm("empty", None, Map::new()).unwrap();
        let out = d
            .execute(
                Command::new(CommandType::BroadcastToSwarm)
                    .with_param("swarm_id", swarm.id())
                    .with_param("command_type", "ping"),
            )
            .await;
        assert!(out.is_success());
        assert_eq!(out.data["delivered"], json!(0));
    }

    #[tokio::test]
    async fn test_missing_swarm_and_agent() {
        let d = director();
        let out = d
            .execute(Command::new(CommandType::StartSwarm).with_param("swarm_id", "nope"))
            .await;
        assert_eq!(out.message.as_deref(), Some("Swarm nope not found"));
        let out = d.execute(Command::new(CommandType::StopAgent)).await;
        assert_eq!(
            out.message.as_deref(),
            Some("Missing required parameter 'agent_id'")
        );
    }

    #[tokio::test]
    async fn test_history_is_capped_and_settled() {
        let d = Director::new(
            DirectorConfig {
                history_limit: 5,
                ..config()
            },
            capabilities(),
        );
        for _ in 0..8 {
            d.execute(Command::new(CommandType::ListAgents)).await;
        }
        d.execute(Command::new("bogus")).await;

        let history = d.history();
        assert_eq!(history.len(), 5);
        assert_eq!(history.last().unwrap().status, HistoryStatus::Error);
        assert!(history[..4]
            .iter()
            .all(|e| e.status == HistoryStatus::Completed));
        assert_eq!(history[0].seq, 4);
    }

    #[tokio::test]
    async fn test_reap_stopped_agents_after_ttl() {
        let clock = Arc::new(ManualClock::default());
        let d = Director::with_clock(
            DirectorConfig {
                agent_ttl_secs: Some(60),
                ..config()
            },
            capabilities(),
            clock.clone(),
        );
        let swarm = d.create_swarm("s", Some("code_generation"), Map::new()).unwrap();
        let victim = swarm.members()[0].clone();
        victim.start().unwrap();
        victim.stop().await;

        clock.advance_secs(30);
        assert!(d.reap_stopped_agents().is_empty());
        clock.advance_secs(31);
        assert_eq!(d.reap_stopped_agents(), vec![victim.id().to_string()]);
        assert!(d.agent(victim.id()).is_none());
        assert!(!swarm.contains(victim.id()));
        assert_eq!(d.agents().len(), 2);
    }

    #[tokio::test]
    async fn test_reaping_disabled_by_default() {
        let d = director();
        let agent = d.create_agent(AgentKind::Custom, None);
        agent.stop().await;
        assert!(d.reap_stopped_agents().is_empty());
    }

    #[tokio::test]
    async fn test_reclaim_trims_history() {
        let d = Director::new(
            DirectorConfig {
                history_keep_on_reclaim: 2,
                ..config()
            },
            capabilities(),
        );
        for _ in 0..6 {
            d.execute(Command::new(CommandType::ListSwarms)).await;
        }
        assert_eq!(d.reclaim(ReclaimLevel::Light).unwrap(), 4);
        assert_eq!(d.history().len(), 2);
        assert_eq!(d.reclaim(ReclaimLevel::Full).unwrap(), 2);
        assert!(d.history().is_empty());
    }

    #[tokio::test]
    async fn test_background_loop_publishes_status() {
        let d = Director::new(
            DirectorConfig {
                status_interval_secs: 1,
                ..config()
            },
            capabilities(),
        );
        let (_listener, mut rx) = listen(&d);
        assert!(d.start());
        assert!(!d.start());

        let event = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.kind(), "status_update");
        d.stop().await;
        assert_eq!(d.summary().status, AgentStatus::Stopped);
    }
}
