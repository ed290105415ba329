//! Commands and their outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::convert::Infallible;
use std::str::FromStr;

use super::agent::AgentKind;
use crate::errors::DispatchError;

/// Every command the dispatcher understands, plus a fallback for anything else.
///
/// Unknown strings are kept as [`CommandType::Other`] so the receiving agent
/// can report them instead of the request failing to parse.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CommandType {
    // Director level
    CreateAgent,
    CreateSwarm,
    StartAgent,
    StopAgent,
    StartSwarm,
    StopSwarm,
    GetStatus,
    ListAgents,
    ListSwarms,
    BroadcastToSwarm,
    // Every agent
    Ping,
    Status,
    Shutdown,
    Configure,
    // Specializations
    AnalyzeCode,
    QualityCheck,
    GenerateCode,
    CreateTests,
    HealthCheck,
    MonitorSystem,
    DetectAiText,
    HumanizeText,
    Other(String),
}

impl CommandType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::CreateAgent => "create_agent",
            Self::CreateSwarm => "create_swarm",
            Self::StartAgent => "start_agent",
            Self::StopAgent => "stop_agent",
            Self::StartSwarm => "start_swarm",
            Self::StopSwarm => "stop_swarm",
            Self::GetStatus => "get_status",
            Self::ListAgents => "list_agents",
            Self::ListSwarms => "list_swarms",
            Self::BroadcastToSwarm => "broadcast_to_swarm",
            Self::Ping => "ping",
            Self::Status => "status",
            Self::Shutdown => "shutdown",
            Self::Configure => "configure",
            Self::AnalyzeCode => "analyze_code",
            Self::QualityCheck => "quality_check",
            Self::GenerateCode => "generate_code",
            Self::CreateTests => "create_tests",
            Self::HealthCheck => "health_check",
            Self::MonitorSystem => "monitor_system",
            Self::DetectAiText => "detect_ai_text",
            Self::HumanizeText => "humanize_text",
            Self::Other(s) => s,
        }
    }

    /// Handled by the director itself rather than delegated.
    pub fn is_director_level(&self) -> bool {
        matches!(
            self,
            Self::CreateAgent
                | Self::CreateSwarm
                | Self::StartAgent
                | Self::StopAgent
                | Self::StartSwarm
                | Self::StopSwarm
                | Self::GetStatus
                | Self::ListAgents
                | Self::ListSwarms
                | Self::BroadcastToSwarm
        )
    }

    /// Agent kind that untargeted commands of this type are routed to.
    pub fn preferred_agent_kind(&self) -> Option<AgentKind> {
        match self {
            Self::AnalyzeCode | Self::QualityCheck => Some(AgentKind::Analyzer),
            Self::GenerateCode | Self::CreateTests => Some(AgentKind::Generator),
            Self::HealthCheck | Self::MonitorSystem => Some(AgentKind::Monitor),
            Self::DetectAiText | Self::HumanizeText => Some(AgentKind::Executor),
            _ => None,
        }
    }
}

impl FromStr for CommandType {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "create_agent" | "create_bot" => Self::CreateAgent,
            "create_swarm" => Self::CreateSwarm,
            "start_agent" | "start_bot" => Self::StartAgent,
            "stop_agent" | "stop_bot" => Self::StopAgent,
            "start_swarm" => Self::StartSwarm,
            "stop_swarm" => Self::StopSwarm,
            "get_status" => Self::GetStatus,
            "list_agents" | "list_bots" => Self::ListAgents,
            "list_swarms" => Self::ListSwarms,
            "broadcast_to_swarm" => Self::BroadcastToSwarm,
            "ping" => Self::Ping,
            "status" => Self::Status,
            "shutdown" => Self::Shutdown,
            "configure" => Self::Configure,
            "analyze_code" => Self::AnalyzeCode,
            "quality_check" => Self::QualityCheck,
            "generate_code" => Self::GenerateCode,
            "create_tests" => Self::CreateTests,
            "health_check" => Self::HealthCheck,
            "monitor_system" => Self::MonitorSystem,
            "detect_ai_text" => Self::DetectAiText,
            "humanize_text" => Self::HumanizeText,
            other => Self::Other(other.to_string()),
        })
    }
}

impl From<String> for CommandType {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(t) => t,
            Err(never) => match never {},
        }
    }
}

impl From<&str> for CommandType {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<CommandType> for String {
    fn from(t: CommandType) -> Self {
        t.as_str().to_string()
    }
}

impl std::fmt::Display for CommandType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn new_command_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_priority() -> u8 {
    5
}

/// A unit of work submitted to the director.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    #[serde(default = "new_command_id")]
    pub command_id: String,
    pub command_type: CommandType,
    #[serde(default, alias = "target_bot")]
    pub target_agent: Option<String>,
    #[serde(default)]
    pub target_swarm: Option<String>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default = "default_priority")]
    pub priority: u8,
}

impl Command {
    pub fn new(command_type: impl Into<CommandType>) -> Self {
        Self {
            command_id: new_command_id(),
            command_type: command_type.into(),
            target_agent: None,
            target_swarm: None,
            parameters: Map::new(),
            timestamp: Utc::now(),
            priority: default_priority(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.command_id = id.into();
        self
    }

    pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }

    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.parameters.extend(params);
        self
    }

    pub fn with_target_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.target_agent = Some(agent_id.into());
        self
    }

    pub fn with_target_swarm(mut self, swarm_id: impl Into<String>) -> Self {
        self.target_swarm = Some(swarm_id.into());
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Copy for one swarm member: fresh id, same type and parameters.
    pub fn derive_for(&self, agent_id: &str) -> Self {
        Self {
            command_id: format!("{}_{}", self.command_id, agent_id),
            target_agent: Some(agent_id.to_string()),
            timestamp: Utc::now(),
            ..self.clone()
        }
    }

    pub fn param(&self, name: &str) -> Option<&Value> {
        self.parameters.get(name)
    }

    /// String parameter under any of `names`, first match wins.
    pub fn opt_str_param(&self, names: &[&str]) -> Result<Option<&str>, DispatchError> {
        for name in names {
            match self.parameters.get(*name) {
                None | Some(Value::Null) => continue,
                Some(Value::String(s)) => return Ok(Some(s.as_str())),
                Some(_) => {
                    return Err(DispatchError::InvalidParameter {
                        name: (*name).to_string(),
                        reason: "expected a string".to_string(),
                    })
                }
            }
        }
        Ok(None)
    }

    pub fn str_param(&self, names: &[&str]) -> Result<&str, DispatchError> {
        self.opt_str_param(names)?.ok_or_else(|| {
            DispatchError::MissingParameter(names.first().copied().unwrap_or("").to_string())
        })
    }

    pub fn opt_u64_param(&self, name: &str) -> Result<Option<u64>, DispatchError> {
        match self.parameters.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v.as_u64().map(Some).ok_or_else(|| DispatchError::InvalidParameter {
                name: name.to_string(),
                reason: "expected a non-negative integer".to_string(),
            }),
        }
    }

    pub fn opt_object_param(&self, name: &str) -> Result<Option<&Map<String, Value>>, DispatchError> {
        match self.parameters.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Object(map)) => Ok(Some(map)),
            Some(_) => Err(DispatchError::InvalidParameter {
                name: name.to_string(),
                reason: "expected an object".to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Error,
}

/// Structured result of a command. Failures are values, never panics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub command_id: String,
    pub status: OutcomeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

impl CommandOutcome {
    pub fn success(command_id: impl Into<String>, data: Value) -> Self {
        Self {
            command_id: command_id.into(),
            status: OutcomeStatus::Success,
            message: None,
            data,
            agent_id: None,
        }
    }

    pub fn error(command_id: impl Into<String>, error: &DispatchError) -> Self {
        Self {
            command_id: command_id.into(),
            status: OutcomeStatus::Error,
            message: Some(error.to_string()),
            data: Value::Null,
            agent_id: None,
        }
    }

    pub fn from_result(command_id: impl Into<String>, result: Result<Value, DispatchError>) -> Self {
        match result {
            Ok(data) => Self::success(command_id, data),
            Err(e) => Self::error(command_id, &e),
        }
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}
