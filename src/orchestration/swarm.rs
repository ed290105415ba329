//! Swarms
//!
//! Named groups of agents that are started, stopped and addressed together.
//! Built-in templates describe common member mixes.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

use super::agent::{Agent, AgentKind, AgentStatus};
use super::command::Command;

/// Member mix of a built-in swarm.
#[derive(Debug, Clone, Copy)]
pub struct SwarmTemplate {
    pub name: &'static str,
    pub members: &'static [(AgentKind, usize)],
}

impl SwarmTemplate {
    pub fn size(&self) -> usize {
        self.members.iter().map(|(_, n)| n).sum()
    }
}

const TEMPLATES: [SwarmTemplate; 3] = [
    SwarmTemplate {
        name: "code_analysis",
        members: &[(AgentKind::Analyzer, 2), (AgentKind::Monitor, 1)],
    },
    SwarmTemplate {
        name: "code_generation",
        members: &[(AgentKind::Generator, 2), (AgentKind::Analyzer, 1)],
    },
    SwarmTemplate {
        name: "full_service",
        members: &[
            (AgentKind::Analyzer, 2),
            (AgentKind::Generator, 2),
            (AgentKind::Monitor, 1),
        ],
    },
];

pub fn template(name: &str) -> Option<SwarmTemplate> {
    TEMPLATES.iter().find(|t| t.name == name).copied()
}

pub fn template_names() -> Vec<&'static str> {
    TEMPLATES.iter().map(|t| t.name).collect()
}

/// Name for the `index`-th (0-based) member of `kind` in a templated swarm.
pub fn member_name(swarm: &str, kind: AgentKind, index: usize) -> String {
    format!("{}_{}_{}", swarm, kind, index + 1)
}

/// Outcome of starting or stopping every member.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SwarmReport {
    pub swarm_id: String,
    pub succeeded: usize,
    /// (agent id, error)
    pub failures: Vec<(String, String)>,
}

impl SwarmReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmSnapshot {
    pub id: String,
    pub name: String,
    pub template: Option<String>,
    pub status: AgentStatus,
    pub created_at: DateTime<Utc>,
    pub member_count: usize,
    pub members: Vec<String>,
    pub config: Map<String, Value>,
}

pub struct Swarm {
    id: String,
    name: String,
    template: Option<String>,
    created_at: DateTime<Utc>,
    config: Map<String, Value>,
    members: RwLock<Vec<Arc<Agent>>>,
    status: RwLock<AgentStatus>,
}

impl Swarm {
    pub fn new(
        name: impl Into<String>,
        template: Option<String>,
        config: Map<String, Value>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            template,
            created_at,
            config,
            members: RwLock::new(Vec::new()),
            status: RwLock::new(AgentStatus::Idle),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> AgentStatus {
        *self.status.read()
    }

    /// Add a member. Returns false if it is already in the swarm.
    pub fn add_agent(&self, agent: Arc<Agent>) -> bool {
        let mut members = self.members.write();
        if members.iter().any(|m| m.id() == agent.id()) {
            return false;
        }
        members.push(agent);
        true
    }

    pub fn remove_agent(&self, agent_id: &str) -> bool {
        let mut members = self.members.write();
        let before = members.len();
        members.retain(|m| m.id() != agent_id);
        members.len() != before
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.members.read().iter().any(|m| m.id() == agent_id)
    }

    pub fn members(&self) -> Vec<Arc<Agent>> {
        self.members.read().clone()
    }

    pub fn member_ids(&self) -> Vec<String> {
        self.members.read().iter().map(|m| m.id().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }

    /// Start every member. A member that fails does not stop the others; the
    /// swarm ends in `Error` when none started.
    pub async fn start_all(&self) -> SwarmReport {
        let members = self.members();
        let results = join_all(members.iter().map(|agent| async move {
            (agent.id().to_string(), agent.start())
        }))
        .await;

        let mut report = SwarmReport {
            swarm_id: self.id.clone(),
            ..Default::default()
        };
        for (agent_id, result) in results {
            match result {
                Ok(()) => report.succeeded += 1,
                Err(e) => {
                    warn!(swarm_id = %self.id, agent_id = %agent_id, error = %e, "Swarm member failed to start");
                    report.failures.push((agent_id, e.to_string()));
                }
            }
        }
        let status = if report.succeeded == 0 && !members.is_empty() {
            AgentStatus::Error
        } else {
            AgentStatus::Active
        };
        *self.status.write() = status;
        info!(swarm_id = %self.id, started = report.succeeded, status = %status, "Swarm started");
        report
    }

    /// Stop every member and wait for their loops to exit.
    pub async fn stop_all(&self) -> SwarmReport {
        let members = self.members();
        join_all(members.iter().map(|agent| agent.stop())).await;
        *self.status.write() = AgentStatus::Stopped;
        info!(swarm_id = %self.id, stopped = members.len(), "Swarm stopped");
        SwarmReport {
            swarm_id: self.id.clone(),
            succeeded: members.len(),
            failures: Vec::new(),
        }
    }

    /// Enqueue a per-member copy of `command`. Returns how many were accepted.
    pub fn broadcast(&self, command: &Command) -> usize {
        self.members()
            .iter()
            .filter(|agent| match agent.enqueue(command.derive_for(agent.id())) {
                Ok(()) => true,
                Err(e) => {
                    warn!(swarm_id = %self.id, agent_id = %agent.id(), error = %e, "Broadcast delivery failed");
                    false
                }
            })
            .count()
    }

    pub fn snapshot(&self) -> SwarmSnapshot {
        SwarmSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            template: self.template.clone(),
            status: self.status(),
            created_at: self.created_at,
            member_count: self.len(),
            members: self.member_ids(),
            config: self.config.clone(),
        }
    }
}

impl std::fmt::Debug for Swarm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Swarm")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("members", &self.len())
            .finish_non_exhaustive()
    }
}
