//! Observability module
//!
//! Structured logging setup and span helpers shared by every subsystem.

pub mod telemetry;
