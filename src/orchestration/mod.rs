//! Command dispatch
//!
//! The director, its worker agents and swarms:
//! - Typed commands with structured outcomes
//! - Per-agent FIFO queues drained by background loops
//! - Kind-based delegation of agent-level commands
//! - Swarm templates and broadcast
//! - Non-blocking event fan-out to listeners

pub mod agent;
pub mod command;
pub mod director;
pub mod events;
pub mod handlers;
pub mod swarm;

pub use agent::{Agent, AgentKind, AgentMetrics, AgentSnapshot, AgentStatus};
pub use command::{Command, CommandOutcome, CommandType, OutcomeStatus};
pub use director::{Director, DirectorStatus, DirectorSummary, HistoryEntry, HistoryStatus};
pub use events::{BroadcastEvent, ChannelListener, EventHub, EventListener};
pub use swarm::{Swarm, SwarmReport, SwarmSnapshot};
