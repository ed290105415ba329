//! Botkeeper command line.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::api;
use crate::capabilities::SysinfoMetrics;
use crate::config::{Config, LogFormat};
use crate::observability::telemetry::init_tracing;
use crate::runtime::Runtime;
use crate::self_healing::{OptimizationReport, SelfHealingSystem, TickReport};

#[derive(Parser, Debug)]
#[command(name = "botkeeper")]
#[command(about = "Agent command dispatcher with a self-healing host monitor")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file path
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Debug logging (overrides logging.filter)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long, value_enum, global = true)]
    log_format: Option<LogFormat>,
}

/// Output format for one-shot commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the director, the health monitor and the HTTP/WebSocket server (default)
    Serve {
        /// Listen address, e.g. 127.0.0.1:8765
        #[arg(long, value_name = "ADDR")]
        bind: Option<String>,

        /// Do not start background health monitoring
        #[arg(long)]
        no_monitor: bool,
    },

    /// Take one health sample and print it
    Health {
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Run the cleanup and optimization actions once
    Optimize {
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut config =
        Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }
    let filter = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.filter.clone()
    };
    init_tracing(&filter, config.logging.format);

    match cli.command.unwrap_or(Commands::Serve {
        bind: None,
        no_monitor: false,
    }) {
        Commands::Serve { bind, no_monitor } => serve(config, bind, !no_monitor).await,
        Commands::Health { format } => health(config, format).await,
        Commands::Optimize { format } => optimize(config, format).await,
    }
}

async fn serve(mut config: Config, bind: Option<String>, monitor: bool) -> Result<()> {
    if let Some(bind) = bind {
        config.server.bind = bind;
    }
    let addr = config.server.bind.clone();

    let runtime = Arc::new(Runtime::new(config));
    runtime.start(monitor);

    let app = api::router(Arc::clone(&runtime));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(addr = %addr, "Listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error");
    runtime.shutdown().await;
    served
}

/// One-shot healing system with autonomy off, so checks never trigger actions.
fn one_shot_healing(config: &Config) -> Arc<SelfHealingSystem> {
    let provider = Arc::new(SysinfoMetrics::new(config.monitor.disk_path.clone()));
    let healing = SelfHealingSystem::from_config(config, provider);
    healing.disable_autonomy();
    Arc::new(healing)
}

async fn health(config: Config, format: OutputFormat) -> Result<()> {
    let healing = one_shot_healing(&config);
    let report = tokio::task::spawn_blocking(move || healing.force_health_check())
        .await
        .context("Health check task failed")??;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print!("{}", render_tick(&report)),
    }
    Ok(())
}

async fn optimize(config: Config, format: OutputFormat) -> Result<()> {
    let healing = one_shot_healing(&config);
    let report = tokio::task::spawn_blocking(move || healing.system_optimize())
        .await
        .context("Optimization task failed")?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print!("{}", render_optimization(&report)),
    }
    Ok(())
}

fn render_tick(report: &TickReport) -> String {
    let s = &report.snapshot;
    let mut out = format!(
        "CPU     {:>6.1}%\nMemory  {:>6.1}%\nDisk    {:>6.1}%\n",
        s.cpu_pct, s.mem_pct, s.disk_pct
    );
    if report.alerts.is_empty() {
        out.push_str("No alerts\n");
    } else {
        for alert in &report.alerts {
            out.push_str(&format!("! {}: {}\n", alert.kind, alert.message));
        }
    }
    out
}

fn render_optimization(report: &OptimizationReport) -> String {
    let mut out = String::new();
    for execution in &report.executions {
        let mark = if execution.success { "ok" } else { "failed" };
        out.push_str(&format!(
            "{:<22} {:<6} {}\n",
            execution.action, mark, execution.message
        ));
    }
    match (&report.post_check, &report.post_check_error) {
        (Some(s), _) => out.push_str(&format!(
            "After: CPU {:.1}%  Memory {:.1}%  Disk {:.1}%\n",
            s.cpu_pct, s.mem_pct, s.disk_pct
        )),
        (None, Some(e)) => out.push_str(&format!("After: health check failed: {e}\n")),
        (None, None) => {}
    }
    out
}

/// Resolves on Ctrl-C or, on unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
    }
}
