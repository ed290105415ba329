//! Worker agents.
//!
//! Each agent owns a FIFO command queue drained by one background task. The
//! task polls with a timeout so it notices a stop request promptly, and every
//! command runs behind a panic boundary so one bad handler cannot take the
//! worker down.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::command::{Command, CommandOutcome};
use super::events::{BroadcastEvent, EventHub};
use super::handlers::{handler_table, HandlerTable};
use crate::capabilities::Capabilities;
use crate::clock::SharedClock;
use crate::errors::{panic_message, DispatchError};
use crate::observability::telemetry::record_state_transition;

/// Agent specialization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    /// Coordinator
    Director,
    /// Static code analysis and quality gates
    Analyzer,
    /// Code and test generation
    Generator,
    /// Host health checks
    Monitor,
    /// Text classification and rewriting
    Executor,
    /// Only the base command set
    #[default]
    Custom,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Director => "director",
            Self::Analyzer => "analyzer",
            Self::Generator => "generator",
            Self::Monitor => "monitor",
            Self::Executor => "executor",
            Self::Custom => "custom",
        }
    }
}

impl FromStr for AgentKind {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "director" => Ok(Self::Director),
            "analyzer" => Ok(Self::Analyzer),
            "generator" => Ok(Self::Generator),
            "monitor" => Ok(Self::Monitor),
            "executor" => Ok(Self::Executor),
            "custom" => Ok(Self::Custom),
            other => Err(DispatchError::InvalidParameter {
                name: "type".to_string(),
                reason: format!("unknown agent type '{other}'"),
            }),
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    #[default]
    Idle,
    Starting,
    Active,
    Stopping,
    Stopped,
    Error,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Active => "active",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-agent execution counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub commands_executed: u64,
    pub successes: u64,
    pub errors: u64,
    /// Percentage; 100 before any command has run.
    pub success_rate: f64,
    pub last_activity: Option<DateTime<Utc>>,
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self {
            commands_executed: 0,
            successes: 0,
            errors: 0,
            success_rate: 100.0,
            last_activity: None,
        }
    }
}

impl AgentMetrics {
    pub fn record(&mut self, success: bool, at: DateTime<Utc>) {
        self.commands_executed += 1;
        if success {
            self.successes += 1;
        } else {
            self.errors += 1;
        }
        self.success_rate = self.successes as f64 / self.commands_executed as f64 * 100.0;
        self.last_activity = Some(at);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: AgentKind,
    pub status: AgentStatus,
    pub created_at: DateTime<Utc>,
    pub uptime_secs: i64,
    pub is_running: bool,
    pub queued: usize,
    pub metrics: AgentMetrics,
    pub config: Map<String, Value>,
}

/// Everything an agent borrows from its owner.
#[derive(Clone)]
pub struct AgentEnv {
    pub capabilities: Capabilities,
    pub hub: Arc<EventHub>,
    pub clock: SharedClock,
    pub poll_timeout: Duration,
}

pub struct Agent {
    id: String,
    name: String,
    kind: AgentKind,
    created_at: DateTime<Utc>,
    status: RwLock<AgentStatus>,
    stopped_at: RwLock<Option<DateTime<Utc>>>,
    metrics: Mutex<AgentMetrics>,
    config: RwLock<Map<String, Value>>,
    handlers: HandlerTable,
    env: AgentEnv,
    queue_tx: mpsc::UnboundedSender<Command>,
    queue_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Command>>,
    queued: AtomicU64,
    running: AtomicBool,
    generation: AtomicU64,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Agent {
    pub fn new(kind: AgentKind, name: Option<String>, env: AgentEnv) -> Arc<Self> {
        let id = uuid::Uuid::new_v4().to_string();
        let name = name.unwrap_or_else(|| format!("{}_{}", kind, &id[..8]));
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let handlers = handler_table(kind);
        Arc::new(Self {
            created_at: env.clock.now(),
            id,
            name,
            kind,
            status: RwLock::new(AgentStatus::Idle),
            stopped_at: RwLock::new(None),
            metrics: Mutex::new(AgentMetrics::default()),
            config: RwLock::new(Map::new()),
            handlers,
            env,
            queue_tx,
            queue_rx: tokio::sync::Mutex::new(queue_rx),
            queued: AtomicU64::new(0),
            running: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            worker: Mutex::new(None),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> AgentKind {
        self.kind
    }

    pub fn status(&self) -> AgentStatus {
        *self.status.read()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stopped_at(&self) -> Option<DateTime<Utc>> {
        *self.stopped_at.read()
    }

    pub fn metrics(&self) -> AgentMetrics {
        self.metrics.lock().clone()
    }

    pub fn config(&self) -> Map<String, Value> {
        self.config.read().clone()
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.env.capabilities
    }

    pub fn supports(&self, command: &super::command::CommandType) -> bool {
        self.handlers.contains_key(command)
    }

    /// Merge entries into the agent's configuration. Returns the updated keys.
    pub fn configure(&self, entries: Map<String, Value>) -> Vec<String> {
        let keys: Vec<String> = entries.keys().cloned().collect();
        self.config.write().extend(entries);
        keys
    }

    pub fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            kind: self.kind,
            status: self.status(),
            created_at: self.created_at,
            uptime_secs: (self.env.clock.now() - self.created_at).num_seconds(),
            is_running: self.is_running(),
            queued: self.queued.load(Ordering::Relaxed) as usize,
            metrics: self.metrics(),
            config: self.config(),
        }
    }

    pub(crate) fn set_status(&self, to: AgentStatus) {
        let from = std::mem::replace(&mut *self.status.write(), to);
        if from != to {
            record_state_transition(&self.id, from.as_str(), to.as_str());
        }
    }

    /// Move to `to` only from one of `from`.
    fn transition(&self, from: &[AgentStatus], to: AgentStatus) -> bool {
        let previous = {
            let mut status = self.status.write();
            if !from.contains(&*status) {
                return false;
            }
            std::mem::replace(&mut *status, to)
        };
        if previous != to {
            record_state_transition(&self.id, previous.as_str(), to.as_str());
        }
        true
    }

    /// Start the processing loop. Starting a running agent is a no-op unless it
    /// is in `Error`, which moves it back to `Idle`.
    pub fn start(self: &Arc<Self>) -> Result<(), DispatchError> {
        let current = self.status();
        if current == AgentStatus::Stopping {
            return Err(DispatchError::InvalidStateTransition {
                from: current.to_string(),
                to: AgentStatus::Starting.to_string(),
            });
        }
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // A restart of a running agent clears a handler fault.
            if self.transition(&[AgentStatus::Error], AgentStatus::Idle) {
                info!(agent_id = %self.id, "Agent restarted from error");
                self.env
                    .hub
                    .publish(&BroadcastEvent::bot_event(&self.id, "started", Value::Null));
            } else {
                debug!(agent_id = %self.id, "Agent already running");
            }
            return Ok(());
        }

        self.set_status(AgentStatus::Starting);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = tokio::spawn(Arc::clone(self).run_loop(generation));
        *self.worker.lock() = Some(handle);
        *self.stopped_at.write() = None;
        self.set_status(AgentStatus::Idle);

        info!(agent_id = %self.id, name = %self.name, kind = %self.kind, "Agent started");
        self.env
            .hub
            .publish(&BroadcastEvent::bot_event(&self.id, "started", Value::Null));
        Ok(())
    }

    /// Flag the loop to exit without waiting for it. Safe from inside a handler.
    pub fn request_stop(&self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        if !was_running && self.status() == AgentStatus::Stopped {
            return;
        }
        self.set_status(AgentStatus::Stopping);
        self.set_status(AgentStatus::Stopped);
        *self.stopped_at.write() = Some(self.env.clock.now());

        info!(agent_id = %self.id, "Agent stopped");
        self.env
            .hub
            .publish(&BroadcastEvent::bot_event(&self.id, "stopped", Value::Null));
    }

    /// Stop and wait (bounded) for the loop to exit.
    pub async fn stop(&self) {
        self.request_stop();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            let grace = self.env.poll_timeout + Duration::from_millis(500);
            if tokio::time::timeout(grace, handle).await.is_err() {
                warn!(agent_id = %self.id, "Agent loop did not exit within {:?}", grace);
            }
        }
    }

    /// Append a command to the queue. Accepted even while stopped.
    pub fn enqueue(&self, command: Command) -> Result<(), DispatchError> {
        self.queue_tx
            .send(command)
            .map_err(|_| DispatchError::QueueClosed(self.id.clone()))?;
        self.queued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn is_current(&self, generation: u64) -> bool {
        self.running.load(Ordering::SeqCst) && self.generation.load(Ordering::SeqCst) == generation
    }

    async fn run_loop(self: Arc<Self>, generation: u64) {
        // A previous loop still winding down keeps the receiver until it exits.
        let mut rx = self.queue_rx.lock().await;
        debug!(agent_id = %self.id, generation, "Agent loop running");

        while self.is_current(generation) {
            match tokio::time::timeout(self.env.poll_timeout, rx.recv()).await {
                Ok(Some(command)) => {
                    self.queued.fetch_sub(1, Ordering::Relaxed);
                    self.process(command).await;
                }
                Ok(None) => break,
                Err(_) => {}
            }
        }
        debug!(agent_id = %self.id, generation, "Agent loop exited");
    }

    async fn process(&self, command: Command) {
        self.transition(&[AgentStatus::Idle, AgentStatus::Error], AgentStatus::Active);
        let result = self.run(&command).await;
        // Only a fault inside a registered handler leaves the agent in Error.
        // A stop issued mid-command wins over the result.
        let next = match &result {
            Err(e) if is_handler_fault(e) => AgentStatus::Error,
            _ => AgentStatus::Idle,
        };
        self.transition(&[AgentStatus::Active], next);
        let outcome = CommandOutcome::from_result(command.command_id.clone(), result)
            .with_agent(self.id.clone());
        self.env
            .hub
            .publish(&BroadcastEvent::command_result(outcome));
    }

    /// Run one command through its handler and update the counters.
    pub async fn execute(&self, command: &Command) -> CommandOutcome {
        let result = self.run(command).await;
        CommandOutcome::from_result(command.command_id.clone(), result).with_agent(self.id.clone())
    }

    async fn run(&self, command: &Command) -> Result<Value, DispatchError> {
        let result = match self.handlers.get(&command.command_type) {
            None => Err(DispatchError::UnknownCommand(command.command_type.to_string())),
            Some(handler) => {
                let handler = Arc::clone(handler);
                match AssertUnwindSafe(handler.handle(self, command))
                    .catch_unwind()
                    .await
                {
                    Ok(result) => result,
                    Err(panic) => Err(DispatchError::HandlerPanicked(panic_message(
                        panic.as_ref(),
                    ))),
                }
            }
        };

        self.metrics
            .lock()
            .record(result.is_ok(), self.env.clock.now());
        match &result {
            Ok(_) => debug!(
                agent_id = %self.id,
                command_id = %command.command_id,
                command_type = %command.command_type,
                "Command completed"
            ),
            Err(e) => warn!(
                agent_id = %self.id,
                command_id = %command.command_id,
                command_type = %command.command_type,
                error = %e,
                "Command failed"
            ),
        }
        result
    }

    /// Bot event for a handler to surface extra information.
    pub fn emit(&self, event: &str, data: Value) {
        self.env
            .hub
            .publish(&BroadcastEvent::bot_event(&self.id, event, data));
    }

    pub(crate) fn describe(&self) -> Value {
        json!({
            "agent_id": self.id,
            "name": self.name,
            "type": self.kind,
        })
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

/// An error raised by a registered handler, as opposed to a command the
/// agent has no handler for.
fn is_handler_fault(error: &DispatchError) -> bool {
    !matches!(error, DispatchError::UnknownCommand(_))
}
