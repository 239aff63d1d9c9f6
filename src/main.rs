use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mcp_pulse::aggregate::{Aggregator, DualHealthResult, HealthStatus};
use mcp_pulse::config::{HealthFileConfig, ServerConfig};
use mcp_pulse::orchestrator::HealthCheckEngine;

#[derive(Parser)]
#[command(name = "pulse")]
#[command(about = "Dual MCP/REST health checks with aggregated scoring")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to healthcheck.toml (searches upward from the cwd when omitted)
    #[arg(long, env = "PULSE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Check every configured server once
    Check {
        /// Only check this server
        #[arg(long)]
        server: Option<String>,
        /// Shared deadline in seconds, overriding per-leg timeouts
        #[arg(long)]
        timeout: Option<u64>,
        /// Retries per failed server, with exponential backoff
        #[arg(long, default_value_t = 0)]
        retries: u32,
        /// Emit results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check continuously on an interval, routing through the circuit breaker
    Watch {
        /// Seconds between rounds
        #[arg(long, default_value_t = 30)]
        interval: u64,
        /// Emit each round as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show circuit breaker states after one probing round
    Status {
        #[arg(long)]
        json: bool,
    },
    /// One aggregated fleet summary
    Summary {
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    if config.servers.is_empty() {
        bail!("no servers configured; add [[servers]] entries to healthcheck.toml");
    }

    let engine = Arc::new(HealthCheckEngine::new(
        config.engine.clone().unwrap_or_default(),
        config.aggregation.clone().unwrap_or_default(),
        config.circuit.clone().unwrap_or_default(),
    ));

    match cli.command {
        Commands::Check {
            server,
            timeout,
            retries,
            json,
        } => {
            let servers = select_servers(&config.servers, server.as_deref())?;
            let results =
                run_check(&engine, &servers, timeout.map(Duration::from_secs), retries).await;
            render_results(&results, json)?;
            if results.iter().any(|r| !r.overall_success) {
                std::process::exit(1);
            }
        }
        Commands::Watch { interval, json } => {
            run_watch(&engine, &config.servers, Duration::from_secs(interval), json).await?;
        }
        Commands::Status { json } => {
            for server in &config.servers {
                let _ = engine
                    .perform_health_check_with_circuit_breaker(server, None)
                    .await;
            }
            let states = engine.circuit_states().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&states)?);
            } else {
                for state in states {
                    println!(
                        "{}: overall {} (mcp {} after {} failures, rest {} after {} failures)",
                        state.server_name,
                        state.overall_state,
                        state.mcp_state,
                        state.mcp_consecutive_failures,
                        state.rest_state,
                        state.rest_consecutive_failures,
                    );
                }
            }
        }
        Commands::Summary { json } => {
            let results = engine.check_multiple_servers_dual(&config.servers, None).await;
            let summary = Aggregator::create_aggregation_summary(&results);
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!(
                    "{} servers: {} healthy, {} degraded, {} unhealthy, {} unknown",
                    summary.total,
                    summary.healthy,
                    summary.degraded,
                    summary.unhealthy,
                    summary.unknown
                );
                println!(
                    "avg score {:.2}, avg response {:.0}ms, mcp {:.0}%, rest {:.0}%, combined {:.0}%",
                    summary.average_health_score,
                    summary.average_response_time_ms,
                    summary.mcp_success_rate * 100.0,
                    summary.rest_success_rate * 100.0,
                    summary.combined_success_rate * 100.0,
                );
            }
            if summary.unhealthy > 0 {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<HealthFileConfig> {
    match path {
        Some(path) => Ok(HealthFileConfig::load_from_path(path)?),
        None => match HealthFileConfig::load()? {
            Some(config) => Ok(config),
            None => bail!("no healthcheck.toml found in the current directory or its parents"),
        },
    }
}

fn select_servers(servers: &[ServerConfig], filter: Option<&str>) -> Result<Vec<ServerConfig>> {
    match filter {
        None => Ok(servers.to_vec()),
        Some(name) => {
            let matched: Vec<ServerConfig> = servers
                .iter()
                .filter(|s| s.server_name == name)
                .cloned()
                .collect();
            if matched.is_empty() {
                bail!("no configured server named '{}'", name);
            }
            Ok(matched)
        }
    }
}

async fn run_check(
    engine: &Arc<HealthCheckEngine>,
    servers: &[ServerConfig],
    timeout: Option<Duration>,
    retries: u32,
) -> Vec<DualHealthResult> {
    if retries == 0 {
        return engine.check_multiple_servers_dual(servers, timeout).await;
    }
    let mut results = Vec::with_capacity(servers.len());
    for server in servers {
        results.push(
            engine
                .health_check_with_retry_backoff(server, retries, Duration::from_millis(500), 2.0)
                .await,
        );
    }
    results
}

async fn run_watch(
    engine: &Arc<HealthCheckEngine>,
    servers: &[ServerConfig],
    interval: Duration,
    json: bool,
) -> Result<()> {
    println!(
        "Watching {} servers every {}s. Ctrl-C to stop.",
        servers.len(),
        interval.as_secs()
    );
    loop {
        let mut results = Vec::with_capacity(servers.len());
        for server in servers {
            results.push(
                engine
                    .perform_health_check_with_circuit_breaker(server, None)
                    .await,
            );
        }
        render_results(&results, json)?;

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                engine.shutdown().await;
                return Ok(());
            }
        }
    }
}

fn render_results(results: &[DualHealthResult], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(results)?);
        return Ok(());
    }
    for result in results {
        println!(
            "{} {} [{}] score {:.2} ({:.0}ms)",
            status_mark(result.overall_status),
            result.server_name,
            result.overall_status,
            result.health_score,
            result.combined_response_time_ms,
        );
        render_leg("mcp", result.mcp_result.is_some(), result.mcp_success, result.mcp_error_message.as_deref());
        render_leg("rest", result.rest_result.is_some(), result.rest_success, result.rest_error_message.as_deref());
    }
    Ok(())
}

fn render_leg(name: &str, ran: bool, success: bool, error: Option<&str>) {
    if !ran {
        println!("  - {}: disabled", name);
    } else if success {
        println!("  - {}: ✓", name);
    } else {
        println!("  - {}: ✗ {}", name, error.unwrap_or("failed"));
    }
}

fn status_mark(status: HealthStatus) -> &'static str {
    match status {
        HealthStatus::Healthy => "✓",
        HealthStatus::Degraded => "~",
        HealthStatus::Unhealthy => "✗",
        HealthStatus::Unknown => "?",
    }
}
