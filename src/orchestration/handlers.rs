//! Command handlers, grouped by agent kind.
//!
//! Every agent answers the base set (ping, status, shutdown, configure);
//! specializations add their own handlers on top.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::agent::{Agent, AgentKind};
use super::command::{Command, CommandType};
use crate::capabilities::{GenerationRequest, MetricsSample, ParaphraseOptions};
use crate::errors::DispatchError;

/// Minimum score for `quality_check` when the command does not supply one.
pub const DEFAULT_QUALITY_THRESHOLD: f64 = 70.0;

const MAX_MONITOR_SAMPLES: u64 = 10;
const MAX_MONITOR_INTERVAL_MS: u64 = 5_000;

#[async_trait]
pub trait CommandHandler: Send + Sync {
    fn command(&self) -> CommandType;
    async fn handle(&self, agent: &Agent, command: &Command) -> Result<Value, DispatchError>;
}

pub type HandlerTable = HashMap<CommandType, Arc<dyn CommandHandler>>;

fn register(table: &mut HandlerTable, handler: Arc<dyn CommandHandler>) {
    table.insert(handler.command(), handler);
}

/// Handlers an agent of `kind` answers.
pub fn handler_table(kind: AgentKind) -> HandlerTable {
    let mut table = HandlerTable::new();
    register(&mut table, Arc::new(Ping));
    register(&mut table, Arc::new(Status));
    register(&mut table, Arc::new(Shutdown));
    register(&mut table, Arc::new(Configure));

    match kind {
        AgentKind::Analyzer => {
            register(&mut table, Arc::new(AnalyzeCode));
            register(&mut table, Arc::new(QualityCheck));
        }
        AgentKind::Generator => {
            register(&mut table, Arc::new(GenerateCode));
            register(&mut table, Arc::new(CreateTests));
        }
        AgentKind::Monitor => {
            register(&mut table, Arc::new(HealthCheck));
            register(&mut table, Arc::new(MonitorSystem));
        }
        AgentKind::Executor => {
            register(&mut table, Arc::new(DetectAiText));
            register(&mut table, Arc::new(HumanizeText));
        }
        AgentKind::Director | AgentKind::Custom => {}
    }
    table
}

fn handler_error(e: anyhow::Error) -> DispatchError {
    DispatchError::Handler(format!("{e:#}"))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Value, DispatchError> {
    serde_json::to_value(value).map_err(|e| DispatchError::Handler(e.to_string()))
}

// ============================================================================
// Base set
// ============================================================================

pub struct Ping;

#[async_trait]
impl CommandHandler for Ping {
    fn command(&self) -> CommandType {
        CommandType::Ping
    }

    async fn handle(&self, agent: &Agent, _command: &Command) -> Result<Value, DispatchError> {
        Ok(json!({
            "message": "pong",
            "agent_id": agent.id(),
            "timestamp": Utc::now(),
        }))
    }
}

pub struct Status;

#[async_trait]
impl CommandHandler for Status {
    fn command(&self) -> CommandType {
        CommandType::Status
    }

    async fn handle(&self, agent: &Agent, _command: &Command) -> Result<Value, DispatchError> {
        to_json(&agent.snapshot())
    }
}

pub struct Shutdown;

#[async_trait]
impl CommandHandler for Shutdown {
    fn command(&self) -> CommandType {
        CommandType::Shutdown
    }

    async fn handle(&self, agent: &Agent, _command: &Command) -> Result<Value, DispatchError> {
        // Runs on the agent's own loop, so it must not wait for that loop.
        agent.request_stop();
        Ok(json!({ "message": "Shutting down", "agent_id": agent.id() }))
    }
}

/// Merges `config` (or, if absent, all parameters) into the agent's settings.
pub struct Configure;

#[async_trait]
impl CommandHandler for Configure {
    fn command(&self) -> CommandType {
        CommandType::Configure
    }

    async fn handle(&self, agent: &Agent, command: &Command) -> Result<Value, DispatchError> {
        let entries: Map<String, Value> = match command.opt_object_param("config")? {
            Some(config) => config.clone(),
            None => command.parameters.clone(),
        };
        let updated = agent.configure(entries);
        Ok(json!({ "updated": updated, "config": agent.config() }))
    }
}

// ============================================================================
// Analyzer
// ============================================================================

pub struct AnalyzeCode;

#[async_trait]
impl CommandHandler for AnalyzeCode {
    fn command(&self) -> CommandType {
        CommandType::AnalyzeCode
    }

    async fn handle(&self, agent: &Agent, command: &Command) -> Result<Value, DispatchError> {
        let path = command.str_param(&["path", "file_path"])?;
        let report = agent
            .capabilities()
            .analyzer
            .analyze(Path::new(path))
            .await
            .map_err(handler_error)?;
        to_json(&report)
    }
}

pub struct QualityCheck;

#[async_trait]
impl CommandHandler for QualityCheck {
    fn command(&self) -> CommandType {
        CommandType::QualityCheck
    }

    async fn handle(&self, agent: &Agent, command: &Command) -> Result<Value, DispatchError> {
        let path = command.str_param(&["path", "file_path"])?;
        let threshold = match command.param("threshold") {
            None | Some(Value::Null) => DEFAULT_QUALITY_THRESHOLD,
            Some(v) => v.as_f64().ok_or_else(|| DispatchError::InvalidParameter {
                name: "threshold".to_string(),
                reason: "expected a number".to_string(),
            })?,
        };

        let report = agent
            .capabilities()
            .analyzer
            .analyze(Path::new(path))
            .await
            .map_err(handler_error)?;
        Ok(json!({
            "path": report.path,
            "quality_score": report.quality_score,
            "threshold": threshold,
            "passed": report.quality_score >= threshold,
            "issues": report.issues,
        }))
    }
}

// ============================================================================
// Generator
// ============================================================================

fn generation_request(command: &Command, kind: &str) -> Result<GenerationRequest, DispatchError> {
    Ok(GenerationRequest {
        kind: kind.to_string(),
        name: command.str_param(&["name", "target"])?.to_string(),
        language: command
            .opt_str_param(&["language"])?
            .unwrap_or("rust")
            .to_string(),
        description: command
            .opt_str_param(&["description"])?
            .map(str::to_string),
    })
}

async fn generate(agent: &Agent, request: GenerationRequest) -> Result<Value, DispatchError> {
    let code = agent
        .capabilities()
        .generator
        .generate(&request)
        .await
        .map_err(handler_error)?;
    Ok(json!({
        "code": code,
        "name": request.name,
        "kind": request.kind,
        "language": request.language,
    }))
}

pub struct GenerateCode;

#[async_trait]
impl CommandHandler for GenerateCode {
    fn command(&self) -> CommandType {
        CommandType::GenerateCode
    }

    async fn handle(&self, agent: &Agent, command: &Command) -> Result<Value, DispatchError> {
        let kind = command.opt_str_param(&["kind"])?.unwrap_or("function");
        generate(agent, generation_request(command, kind)?).await
    }
}

pub struct CreateTests;

#[async_trait]
impl CommandHandler for CreateTests {
    fn command(&self) -> CommandType {
        CommandType::CreateTests
    }

    async fn handle(&self, agent: &Agent, command: &Command) -> Result<Value, DispatchError> {
        generate(agent, generation_request(command, "test")?).await
    }
}

// ============================================================================
// Monitor
// ============================================================================

async fn take_sample(agent: &Agent) -> Result<MetricsSample, DispatchError> {
    let provider = Arc::clone(&agent.capabilities().metrics);
    tokio::task::spawn_blocking(move || provider.sample())
        .await
        .map_err(|e| DispatchError::Handler(format!("sampling task failed: {e}")))?
        .map_err(|e| DispatchError::Handler(e.to_string()))
}

fn health_label(sample: &MetricsSample) -> &'static str {
    if sample.cpu_pct < 80.0 && sample.mem_pct < 80.0 {
        "healthy"
    } else {
        "warning"
    }
}

pub struct HealthCheck;

#[async_trait]
impl CommandHandler for HealthCheck {
    fn command(&self) -> CommandType {
        CommandType::HealthCheck
    }

    async fn handle(&self, agent: &Agent, _command: &Command) -> Result<Value, DispatchError> {
        let sample = take_sample(agent).await?;
        Ok(json!({
            "status": health_label(&sample),
            "cpu_pct": sample.cpu_pct,
            "mem_pct": sample.mem_pct,
            "disk_pct": sample.disk_pct,
            "timestamp": Utc::now(),
        }))
    }
}

fn mean(samples: &[MetricsSample], field: impl Fn(&MetricsSample) -> f64) -> f64 {
    samples.iter().map(field).sum::<f64>() / samples.len().max(1) as f64
}

fn peak(samples: &[MetricsSample], field: impl Fn(&MetricsSample) -> f64) -> f64 {
    samples.iter().map(field).fold(0.0, f64::max)
}

/// Takes `samples` readings `interval_ms` apart and reports averages and peaks.
pub struct MonitorSystem;

#[async_trait]
impl CommandHandler for MonitorSystem {
    fn command(&self) -> CommandType {
        CommandType::MonitorSystem
    }

    async fn handle(&self, agent: &Agent, command: &Command) -> Result<Value, DispatchError> {
        let count = command
            .opt_u64_param("samples")?
            .unwrap_or(3)
            .clamp(1, MAX_MONITOR_SAMPLES) as usize;
        let interval_ms = command
            .opt_u64_param("interval_ms")?
            .unwrap_or(200)
            .min(MAX_MONITOR_INTERVAL_MS);
        let interval = Duration::from_millis(interval_ms);

        let mut samples = Vec::with_capacity(count);
        for i in 0..count {
            if i > 0 {
                tokio::time::sleep(interval).await;
            }
            samples.push(take_sample(agent).await?);
        }

        Ok(json!({
            "samples": samples.len(),
            "interval_ms": interval_ms,
            "average": {
                "cpu_pct": mean(&samples, |s| s.cpu_pct),
                "mem_pct": mean(&samples, |s| s.mem_pct),
                "disk_pct": mean(&samples, |s| s.disk_pct),
            },
            "peak": {
                "cpu_pct": peak(&samples, |s| s.cpu_pct),
                "mem_pct": peak(&samples, |s| s.mem_pct),
                "disk_pct": peak(&samples, |s| s.disk_pct),
            },
        }))
    }
}

// ============================================================================
// Executor
// ============================================================================

pub struct DetectAiText;

#[async_trait]
impl CommandHandler for DetectAiText {
    fn command(&self) -> CommandType {
        CommandType::DetectAiText
    }

    async fn handle(&self, agent: &Agent, command: &Command) -> Result<Value, DispatchError> {
        let classifier = agent.capabilities().classifier.as_ref().ok_or_else(|| {
            DispatchError::Unsupported {
                command: self.command().to_string(),
                reason: "no text classifier configured".to_string(),
            }
        })?;
        let text = command.str_param(&["text"])?;
        let verdict = classifier.classify(text).await.map_err(handler_error)?;
        Ok(json!({
            "label": verdict.label,
            "score": verdict.score,
            "text_length": text.chars().count(),
        }))
    }
}

pub struct HumanizeText;

#[async_trait]
impl CommandHandler for HumanizeText {
    fn command(&self) -> CommandType {
        CommandType::HumanizeText
    }

    async fn handle(&self, agent: &Agent, command: &Command) -> Result<Value, DispatchError> {
        let paraphraser = agent.capabilities().paraphraser.as_ref().ok_or_else(|| {
            DispatchError::Unsupported {
                command: self.command().to_string(),
                reason: "no paraphraser configured".to_string(),
            }
        })?;
        let text = command.str_param(&["text"])?;
        let options: ParaphraseOptions = match command.opt_object_param("options")? {
            Some(raw) => serde_json::from_value(Value::Object(raw.clone())).map_err(|e| {
                DispatchError::InvalidParameter {
                    name: "options".to_string(),
                    reason: e.to_string(),
                }
            })?,
            None => ParaphraseOptions::default(),
        };
        let variants = paraphraser
            .paraphrase(text, &options)
            .await
            .map_err(handler_error)?;
        Ok(json!({
            "original_length": text.chars().count(),
            "variants": variants,
        }))
    }
}
