//! WolfKube - Coordinator-less Kubernetes Bootstrap
//!
//! Node agent: advertises the node on the ledger, takes part in role
//! scheduling and bootstraps the assigned Kubernetes role.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wolfkube::agent::{check_distro, Agent};
use wolfkube::config::WolfKubeConfig;
use wolfkube::id::NodeIdentity;
use wolfkube::ledger::HttpLedger;
use wolfkube::net::SystemAddresses;
use wolfkube::service::{DryRunServiceManager, ServiceManager, SystemManager};

/// WolfKube - Coordinator-less Kubernetes Bootstrap
#[derive(Parser)]
#[command(name = "wolfkube")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/wolfkube/config.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent loop
    Start,

    /// Run a single tick and exit
    Tick {
        /// Record service changes instead of applying them
        #[arg(long)]
        dry_run: bool,
    },

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "wolfkube.toml")]
        output: PathBuf,

        /// Ledger network identifier
        #[arg(long, default_value = "wolfkube")]
        network_id: String,
    },

    /// Validate configuration file
    Validate,

    /// Print this node's ledger UUID
    Uuid,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start => {
            let config = load_config(&cli.config, cli.log_level.as_deref())?;
            run_start(config).await
        }
        Commands::Tick { dry_run } => {
            let config = load_config(&cli.config, cli.log_level.as_deref())?;
            run_tick(config, dry_run).await
        }
        Commands::Init { output, network_id } => run_init(output, network_id),
        Commands::Validate => run_validate(&cli.config),
        Commands::Uuid => {
            let config = load_config(&cli.config, cli.log_level.as_deref())?;
            println!("{}", NodeIdentity::new(&config).resolve()?);
            Ok(())
        }
    }
}

/// Load the configuration and initialize logging from it
fn load_config(path: &Path, log_level: Option<&str>) -> anyhow::Result<WolfKubeConfig> {
    let config = WolfKubeConfig::from_file(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;
    init_logging(log_level.unwrap_or(&config.logging.level), &config.logging.format);
    Ok(config)
}

/// Initialize logging
fn init_logging(level: &str, format: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn build_agent(config: WolfKubeConfig, dry_run: bool) -> anyhow::Result<Agent> {
    let node_id = NodeIdentity::new(&config)
        .resolve()
        .context("failed to resolve node UUID")?;
    let ledger = HttpLedger::new(&config.ledger).context("failed to create ledger client")?;

    let services: Arc<dyn ServiceManager> = if dry_run {
        Arc::new(DryRunServiceManager::new(&config.node.root_dir))
    } else {
        let manager = SystemManager::new(&config.node.root_dir);
        tracing::info!("Service manager: {:?}", manager.init_system());
        Arc::new(manager)
    };

    tracing::info!("Node UUID: {}", node_id);
    tracing::info!("Ledger: {} ({})", config.ledger.api_address, config.ledger.network_id);

    Ok(Agent::new(
        config,
        node_id,
        Arc::new(ledger),
        services,
        Arc::new(SystemAddresses),
    ))
}

/// Run the agent loop
async fn run_start(config: WolfKubeConfig) -> anyhow::Result<()> {
    tracing::info!("Starting WolfKube agent");

    if !nix::unistd::Uid::effective().is_root() {
        tracing::warn!("Not running as root, service management will likely fail");
    }

    let agent = build_agent(config, false)?;
    agent.run().await?;

    tracing::info!("WolfKube agent stopped");
    Ok(())
}

/// Run one tick and print what happened
async fn run_tick(config: WolfKubeConfig, dry_run: bool) -> anyhow::Result<()> {
    let mut agent = build_agent(config, dry_run)?;
    let report = agent.tick().await?;

    println!("Node:        {}", agent.node_id());
    println!("Leadership:  {:?}", report.leadership);
    println!("Decision:    {:?}", report.decision);
    println!(
        "Role:        {}",
        report.role.map(|r| r.to_string()).unwrap_or_else(|| "(unassigned)".into())
    );
    println!("Bootstrap:   {:?}", report.bootstrap);
    Ok(())
}

/// Initialize a new configuration file
fn run_init(output: PathBuf, network_id: String) -> anyhow::Result<()> {
    let config_content = format!(r#"# WolfKube Configuration
# Generated configuration file

[node]
# id = "node-1"                  # defaults to /etc/machine-id
state_dir = "/var/lib/wolfkube"

[ledger]
api_address = "http://127.0.0.1:8080"
network_id = "{network_id}"
request_timeout_secs = 10
active_window_secs = 300
advertise_window_secs = 900

[p2p]
# role = "auto"                  # or control-plane, worker, ...
minimum_nodes = 2
dynamic_roles = false
interface = "edgevpn0"
use_vpn_with_kubernetes = true

[p2p.auto]
enable = true

[p2p.auto.ha]
enable = false
# master_nodes = 2
# external_db = "postgres://user:pass@db:5432/k3s"

[k3s]
args = []

[k3s_agent]
args = []

[kubevip]
enable = false
# eip = "192.168.1.100"

[agent]
tick_interval_secs = 30
settle_delay_secs = 30
# distro = "k3s"

[logging]
level = "info"
format = "pretty"
"#);

    if output.exists() {
        anyhow::bail!("{} already exists", output.display());
    }
    std::fs::write(&output, config_content)
        .with_context(|| format!("failed to write {}", output.display()))?;
    println!("Created configuration file: {}", output.display());
    Ok(())
}

/// Validate configuration file
fn run_validate(config_path: &Path) -> anyhow::Result<()> {
    match WolfKubeConfig::from_file(config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Ledger:        {} ({})", config.ledger.api_address, config.ledger.network_id);
            println!(
                "  Role:          {}",
                config.static_role().map(|r| r.to_string()).unwrap_or_else(|| "auto".into())
            );
            println!("  Minimum Nodes: {}", config.minimum_nodes());
            println!(
                "  HA:            {}",
                match config.ha_target() {
                    Some(n) => format!("enabled ({} replicas)", n),
                    None if config.ha_enabled() => "enabled".to_string(),
                    None => "disabled".to_string(),
                }
            );
            match check_distro(Arc::new(config)) {
                Ok(name) => println!("  Distro:        {}", name),
                Err(e) => println!("  Distro:        {} (will retry at runtime)", e),
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e.into())
        }
    }
}
