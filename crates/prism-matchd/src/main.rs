//! # prism-matchd
//!
//! Matchmaker server binary — wires the engine, the node control listener
//! and the HTTP/WebSocket edges together and runs until interrupted.
//!
//! Exit codes: 0 on a clean shutdown, 1 on an unrecoverable startup or
//! shutdown error.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use prism_core::{EventBus, SystemClock};
use prism_engine::{
    run_health_loop, run_sweep_loop, CheckOutcome, HealthSupervisor, Matchmaker, MatchmakerConfig,
};
use prism_server::websocket::event_bridge::{bus_channel, EventBridge};
use prism_server::{Config, MatchmakerServer};
use prism_wire::NodeListener;

/// Interval between stale-node and session sweeps.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Prism matchmaker server.
#[derive(Parser, Debug)]
#[command(name = "prism-matchd", about = "Prism matchmaker server")]
struct Cli {
    /// Path to the JSON config file.
    #[arg(long, default_value = "prism.json")]
    config: PathBuf,

    /// Host to bind for all listeners.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Override the HTTP API port.
    #[arg(long)]
    http_port: Option<u16>,

    /// Override the node control protocol port.
    #[arg(long)]
    matchmaker_port: Option<u16>,
}

fn init_tracing(log_to_file: bool) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if log_to_file {
        let appender = tracing_appender::rolling::daily("logs", "prism-matchd.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
            .init();
        Some(guard)
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
        None
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("fatal: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let _log_guard = init_tracing(config.log_to_file);

    match run(cli, config).await {
        Ok(()) => {
            info!("shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = format!("{e:#}"), "fatal error");
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(&cli.config).context("loading config")?;
    if let Some(port) = cli.http_port {
        config.http_port = port;
    }
    if let Some(port) = cli.matchmaker_port {
        config.matchmaker_port = port;
    }

    let production = std::env::var("PRISM_ENV").is_ok_and(|v| v == "production");
    config.validate(production).context("validating config")?;
    Ok(config)
}

async fn run(cli: Cli, config: Config) -> Result<()> {
    info!(
        http_port = config.http_port,
        matchmaker_port = config.matchmaker_port,
        "starting prism matchmaker"
    );

    let metrics_handle = prism_server::metrics::install_recorder();

    // Engine, bus and supervisor.
    let bus = EventBus::new();
    let events = bus_channel(&bus, 256);
    let engine = Arc::new(Matchmaker::new(
        MatchmakerConfig {
            session_timeout_ms: config.session_timeout_ms,
            ..Default::default()
        },
        Arc::new(SystemClock::new()),
        bus.clone(),
    ));
    let health = Arc::new(HealthSupervisor::new(bus));
    register_default_checks(&health, &engine);

    let health_interval = Duration::from_millis(config.health_check_interval_ms.max(1_000));
    let enable_webserver = config.enable_webserver;
    let matchmaker_bind = format!("{}:{}", cli.host, config.matchmaker_port);

    let server = MatchmakerServer::new(config, engine.clone(), health.clone(), metrics_handle);
    let coordinator = server.shutdown().clone();
    let cancel = coordinator.token();

    // Event bridge: engine events → WebSocket pushes.
    let bridge = EventBridge::new(
        events.subscribe(),
        server.broadcast().clone(),
        engine.clone(),
        cancel.clone(),
    );
    coordinator.register_task(tokio::spawn(bridge.run()));

    // Node control protocol listener.
    let node_listener = NodeListener::new(engine.clone(), matchmaker_bind);
    let (node_addr, node_handle) = node_listener
        .listen(cancel.clone())
        .await
        .context("binding node control listener")?;
    info!(addr = %node_addr, "node control protocol listening");
    coordinator.register_task(node_handle);

    // Periodic sweeps and health evaluation.
    coordinator.register_task(tokio::spawn(run_sweep_loop(
        engine.clone(),
        SWEEP_INTERVAL,
        cancel.clone(),
    )));
    coordinator.register_task(tokio::spawn(run_health_loop(
        health.clone(),
        health_interval,
        cancel.clone(),
    )));

    // Client-facing HTTP + WebSocket server.
    if enable_webserver {
        let (http_addr, http_handle) = server
            .listen(&cli.host)
            .await
            .context("binding http server")?;
        info!(addr = %http_addr, "http api listening");
        coordinator.register_task(http_handle);
    } else {
        info!("webserver disabled by config");
    }

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("interrupt received, shutting down");

    // Final notice to connected clients, then drain everything.
    server.announce_shutdown().await;
    coordinator.graceful_shutdown(vec![], None).await;

    Ok(())
}

/// Built-in checks: engine registry pressure and session store size.
fn register_default_checks(health: &HealthSupervisor, engine: &Arc<Matchmaker>) {
    {
        let engine = engine.clone();
        health.register("matchmaker", move || {
            let stats = engine.stats();
            async move {
                let details = json!({
                    "totalNodes": stats.total_nodes,
                    "eligibleNodes": stats.eligible_nodes,
                    "queueLength": stats.queue_length,
                });
                // Clients waiting with nothing to serve them is a degraded
                // fleet, not a broken matchmaker.
                if stats.queue_length > 0 && stats.eligible_nodes == 0 {
                    CheckOutcome::degraded(details)
                } else {
                    CheckOutcome::healthy(details)
                }
            }
        });
    }
    {
        let engine = engine.clone();
        health.register("sessions", move || {
            let stats = engine.stats();
            async move {
                CheckOutcome::healthy(json!({ "sessionCount": stats.session_count }))
            }
        });
    }
}
