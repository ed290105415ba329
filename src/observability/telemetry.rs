//! Telemetry & Observability
//!
//! Structured logging for the monitor, scheduler and dispatcher.
//! Features:
//! - Compact text or JSON output on stderr
//! - `RUST_LOG` takes precedence over the configured filter
//! - Command execution spans with timing and outcome
//! - Log-injection safe rendering of client supplied strings

use std::sync::Once;
use std::time::Instant;
use tracing::{info_span, warn, Instrument};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogFormat;

/// Sanitize a string for safe log output by escaping control characters.
/// Prevents log injection where clients embed newlines to forge log entries.
pub fn sanitize_for_log(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\x1b' => out.push_str("\\e"),
            '\x00' => out.push_str("\\0"),
            c if c.is_control() => out.push_str(&format!("\\u{:04x}", c as u32)),
            _ => out.push(c),
        }
    }
    out
}

/// Initialize the global subscriber. `RUST_LOG` wins over `filter`.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_tracing(filter: &str, format: LogFormat) {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let directive = std::env::var("RUST_LOG").unwrap_or_else(|_| filter.to_string());
        let filter_layer =
            EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"));

        let registry = tracing_subscriber::registry().with(filter_layer);
        let _ = match format {
            LogFormat::Text => registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(false)
                        .with_thread_ids(false)
                        .with_level(true)
                        .compact()
                        .with_writer(std::io::stderr),
                )
                .try_init(),
            LogFormat::Json => registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_current_span(true)
                        .with_writer(std::io::stderr),
                )
                .try_init(),
        };
    });
}

/// Run `f` inside a `command.execute` span, recording duration and outcome.
///
/// `is_success` inspects the output so callers that return outcome values
/// rather than `Result`s still get the `success` field filled in.
pub async fn track_command_execution<F, Fut, T>(
    command_type: &str,
    command_id: &str,
    f: F,
    is_success: impl FnOnce(&T) -> bool,
) -> T
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = T>,
{
    let start = Instant::now();
    let safe_type = sanitize_for_log(command_type);
    let safe_id = sanitize_for_log(command_id);
    let span = info_span!(
        "command.execute",
        command_type = safe_type.as_str(),
        command_id = safe_id.as_str(),
        duration_ms = tracing::field::Empty,
        success = tracing::field::Empty,
    );

    let output = f().instrument(span.clone()).await;

    let duration = start.elapsed().as_millis() as u64;
    let ok = is_success(&output);
    span.record("duration_ms", duration);
    span.record("success", ok);
    span.in_scope(|| {
        if ok {
            tracing::debug!(duration_ms = duration, "Command completed");
        } else {
            warn!(duration_ms = duration, "Command failed");
        }
    });
    output
}

/// Record an agent state transition.
pub fn record_state_transition(agent_id: &str, from: &str, to: &str) {
    tracing::debug!(
        agent_id = %sanitize_for_log(agent_id),
        from = from,
        to = to,
        "Agent state transition"
    );
}

/// Initialize tracing for tests with a simple subscriber
#[cfg(test)]
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
