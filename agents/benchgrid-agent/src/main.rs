//! BenchGrid Agent Entry Point
//!
//! This is the main entry point for the BenchGrid agent binary.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use benchgrid_agent::api::manager::ApiClientManager;
use benchgrid_agent::api::rest::RestClient;
use benchgrid_agent::api::service::ApiService;
use benchgrid_agent::cli::config::Config;
use benchgrid_agent::coordination::background::BackgroundHeartbeat;
use benchgrid_agent::coordination::state::{AgentIdentity, Role};

#[derive(Parser)]
#[command(name = "benchgrid-agent")]
#[command(author, version, about = "BenchGrid Agent - Coordination agent for distributed benchmark runs")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/agent.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the agent
    Start,
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Start => {
            start_agent(&cli.config).await?;
        }
        Commands::Version => {
            show_version();
        }
    }

    Ok(())
}

async fn start_agent(config_path: &PathBuf) -> Result<()> {
    info!("Starting BenchGrid agent...");

    // Load configuration; fall back to defaults when the file is absent.
    let config = if config_path.exists() {
        Config::load(config_path)?
    } else {
        info!(path = %config_path.display(), "No config file found, using defaults");
        Config::default_config()
    };

    let identity = match &config.agent_id {
        Some(agent_id) => AgentIdentity::new(agent_id, config.role, &config.ip_address),
        None => AgentIdentity::from_hostname(config.role, &config.ip_address),
    };
    info!(agent_id = %identity.agent_id, role = %identity.role, "Agent identity resolved");

    // Shared transport and client cache for everything this process calls.
    let rest = RestClient::new().context("Failed to initialize HTTP transport")?;
    let manager = Arc::new(
        ApiClientManager::new(rest)
            .with_ports(config.api.port, config.api.role_ports.clone())
            .with_proxy_chunk_size(config.proxy.chunk_size),
    );

    // Restricted environments route blob and telemetry traffic through a
    // proxy endpoint; absent a URL that traffic is disabled.
    if let Some(proxy_url) = &config.proxy.url {
        let url = reqwest::Url::parse(proxy_url)
            .with_context(|| format!("Invalid proxy URL: {}", proxy_url))?;
        let proxy = manager.get_or_create_proxy_client("proxy", &url);
        info!(url = %proxy_url, chunk_size = proxy.chunk_size(), "Proxy endpoint configured");
    }

    let cancel = CancellationToken::new();

    // Host the control-plane API for peers.
    let service = ApiService::new();
    let listener = TcpListener::bind(("0.0.0.0", config.api.port))
        .await
        .with_context(|| format!("Failed to bind control-plane port {}", config.api.port))?;

    // Server-role agents accept work as soon as the service is up; the
    // workload executor publishes its own readiness through state slots.
    if config.role == Role::Server {
        service.set_online(true);
    }

    let serve_service = service.clone();
    let serve_cancel = cancel.clone();
    let server = tokio::spawn(async move { serve_service.serve(listener, serve_cancel).await });

    // Watchdog on the agent's own control plane: probe failures are logged
    // so a wedged service is visible long before a peer times out on us.
    let local_client = manager.get_or_create_api_client_for_url(
        "local",
        &format!("http://127.0.0.1:{}", config.api.port),
    );
    let heartbeat = BackgroundHeartbeat::start(local_client, config.heartbeat_interval(), &cancel);

    info!(port = config.api.port, "Agent running, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received, stopping agent");
    cancel.cancel();
    heartbeat.stop().await;

    server
        .await
        .context("Control-plane service task panicked")?
        .context("Control-plane service failed")?;

    Ok(())
}

fn show_version() {
    println!("benchgrid-agent {}", env!("CARGO_PKG_VERSION"));
}
