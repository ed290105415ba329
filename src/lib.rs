//! Botkeeper
//!
//! A director that owns a registry of worker agents and swarms and routes
//! commands to them, next to a self-healing system that samples host health
//! and runs rate-limited recovery actions.
//!
//! - **Dispatch**: typed commands, per-agent FIFO queues, kind-based delegation
//! - **Swarms**: templates, lifecycle, broadcast
//! - **Events**: non-blocking fan-out to WebSocket and in-process listeners
//! - **Self-healing**: threshold and trend alerts, prioritized recovery queue,
//!   per-action cooldowns and attempt limits, error diagnosis
//!
//! # Quick Start
//!
//! ```ignore
//! use botkeeper::{config::Config, orchestration::{Command, CommandType}, runtime::Runtime};
//!
//! let runtime = Runtime::new(Config::load(None)?);
//! runtime.start(true);
//! let outcome = runtime
//!     .execute(Command::new(CommandType::CreateAgent).with_param("type", "analyzer"))
//!     .await;
//! ```

pub mod api;
pub mod capabilities;
pub mod cli;
pub mod clock;
pub mod config;
pub mod errors;
pub mod observability;
pub mod orchestration;
pub mod runtime;
pub mod self_healing;
