//! WolfKubeCtl - Command line tool for managing WolfKube clusters
//!
//! Usage:
//!   wolfkubectl role list              - Show nodes and their roles
//!   wolfkubectl role set <uuid> <role> - Assign a role by hand
//!   wolfkubectl get-kubeconfig         - Print the cluster kubeconfig
//!   wolfkubectl uuid                   - Print this node's UUID
//!   wolfkubectl check-config           - Check the configuration file

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use wolfkube::config::WolfKubeConfig;
use wolfkube::distro::{decode_kubeconfig, select_distro};
use wolfkube::id::NodeIdentity;
use wolfkube::ledger::{HttpLedger, Ledger};
use wolfkube::net::{resolve_self_ip, AddressSource, SystemAddresses};
use wolfkube::role::{
    Role, CONTROL_PLANE_BUCKET, CONTROL_PLANE_IP_KEY, IP_BUCKET, KUBECONFIG_BUCKET, KUBECONFIG_KEY,
    LEADER_BUCKET, LEADER_KEY, ROLE_BUCKET,
};

/// WolfKube Cluster Control Tool
#[derive(Parser)]
#[command(name = "wolfkubectl")]
#[command(about = "Control and inspect WolfKube clusters", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "/etc/wolfkube/config.toml")]
    config: PathBuf,

    /// Ledger API endpoint (overrides config)
    #[arg(short, long)]
    endpoint: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect or change role assignments
    Role {
        #[command(subcommand)]
        what: RoleSubcommand,
    },
    /// Print the kubeconfig published by the control plane
    GetKubeconfig,
    /// Print this node's ledger UUID
    Uuid,
    /// Check configuration file for errors
    CheckConfig {
        /// Path to config file to check (defaults to --config path)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum RoleSubcommand {
    /// List advertising nodes and their roles
    List,
    /// Assign a role to a node
    Set {
        /// Node UUID
        uuid: String,
        /// Role tag (control-plane, control-plane/ha, worker, ...)
        role: String,
    },
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Role { what } => match what {
            RoleSubcommand::List => role_list(&cli).await,
            RoleSubcommand::Set { uuid, role } => role_set(&cli, uuid, role).await,
        },
        Commands::GetKubeconfig => get_kubeconfig(&cli).await,
        Commands::Uuid => print_uuid(&cli.config),
        Commands::CheckConfig { file } => {
            let config_path = file.clone().unwrap_or_else(|| cli.config.clone());
            check_config(&config_path)
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Config from disk, or defaults when the file is missing
fn load_config(path: &Path) -> Result<WolfKubeConfig, Box<dyn std::error::Error>> {
    if path.exists() {
        Ok(WolfKubeConfig::from_file(path)?)
    } else {
        Ok(WolfKubeConfig::default())
    }
}

fn ledger(cli: &Cli) -> Result<HttpLedger, Box<dyn std::error::Error>> {
    let mut config = load_config(&cli.config)?;
    if let Some(endpoint) = &cli.endpoint {
        config.ledger.api_address = endpoint.clone();
    }
    Ok(HttpLedger::new(&config.ledger)?)
}

// ============ Roles ============

async fn role_list(cli: &Cli) -> CliResult {
    let ledger = ledger(cli)?;

    let roles = ledger.entries(ROLE_BUCKET).await?;
    let ips = ledger.entries(IP_BUCKET).await?;
    let advertising: BTreeSet<String> = ledger.advertising_nodes().await?.into_iter().collect();
    let active: BTreeSet<String> = ledger.active_nodes().await?.into_iter().collect();
    let leader = ledger.get(LEADER_BUCKET, LEADER_KEY).await?;

    let nodes: BTreeSet<&String> = roles.keys().chain(advertising.iter()).collect();

    println!();
    println!("\x1b[1;36m{:<40} {:<28} {:<16} {}\x1b[0m", "UUID", "ROLE", "IP", "STATUS");
    println!("{}", "─".repeat(96));

    for node in nodes {
        let role = roles.get(node).map(String::as_str).unwrap_or("-");
        let ip = ips.get(node).map(String::as_str).unwrap_or("-");
        let status = if active.contains(node) {
            "\x1b[32mactive\x1b[0m"
        } else if advertising.contains(node) {
            "\x1b[33madvertising\x1b[0m"
        } else {
            "\x1b[31mgone\x1b[0m"
        };
        let marker = if leader.as_deref() == Some(node.as_str()) { " ★" } else { "" };
        println!("{:<40} {:<28} {:<16} {}{}", node, role, ip, status, marker);
    }

    println!();
    Ok(())
}

async fn role_set(cli: &Cli, uuid: &str, role: &str) -> CliResult {
    let role: Role = role.parse()?;
    let ledger = ledger(cli)?;

    ledger.set(ROLE_BUCKET, uuid, role.tag()).await?;
    println!("\x1b[1;32m✓\x1b[0m {} is now {}", uuid, role);
    Ok(())
}

// ============ Kubeconfig ============

async fn get_kubeconfig(cli: &Cli) -> CliResult {
    let ledger = ledger(cli)?;

    let encoded = ledger
        .get(KUBECONFIG_BUCKET, KUBECONFIG_KEY)
        .await?
        .ok_or("no kubeconfig published yet")?;
    let control_plane_ip = ledger.get(CONTROL_PLANE_BUCKET, CONTROL_PLANE_IP_KEY).await?;

    print!("{}", decode_kubeconfig(&encoded, control_plane_ip.as_deref())?);
    Ok(())
}

// ============ Identity ============

fn print_uuid(config_path: &Path) -> CliResult {
    let config = load_config(config_path)?;
    println!("{}", NodeIdentity::new(&config).resolve()?);
    Ok(())
}

// ============ Config Check ============

fn check_config(path: &Path) -> CliResult {
    println!();
    println!("\x1b[1;36m╔══════════════════════════════════════════════════════════════╗\x1b[0m");
    println!("\x1b[1;36m║\x1b[0m             \x1b[1;37mWolfKube Configuration Check\x1b[0m                     \x1b[1;36m║\x1b[0m");
    println!("\x1b[1;36m╚══════════════════════════════════════════════════════════════╝\x1b[0m");
    println!();

    if !path.exists() {
        println!("\x1b[1;31m✗ ERROR:\x1b[0m Config file not found: {}", path.display());
        return Ok(());
    }
    println!("\x1b[1;32m✓\x1b[0m Config file: {}", path.display());

    let config = match WolfKubeConfig::from_file(path) {
        Ok(c) => c,
        Err(e) => {
            println!("\x1b[1;31m✗ ERROR:\x1b[0m {}", e);
            return Ok(());
        }
    };
    println!("\x1b[1;32m✓\x1b[0m Config file is valid");

    let mut warnings = Vec::new();

    match config.static_role() {
        Some(role) => println!("\x1b[1;32m✓\x1b[0m Static role: {}", role),
        None => println!("\x1b[1;32m✓\x1b[0m Role: auto"),
    }

    if config.static_role().is_none() && !config.p2p.auto.enable {
        warnings.push("[p2p] no role and auto assignment disabled: this node will never bootstrap".to_string());
    }

    if config.ha_enabled() && config.ha_target().is_none() {
        warnings.push("[p2p.auto.ha] enabled without master_nodes: no HA replicas will be scheduled".to_string());
    }

    if let Some(target) = config.ha_target() {
        if config.minimum_nodes() < target + 1 {
            warnings.push(format!(
                "[p2p] minimum_nodes {} is below the HA width {} plus the cluster-init node",
                config.minimum_nodes(),
                target
            ));
        }
    }

    if config.p2p.dynamic_roles {
        warnings.push("[p2p] dynamic_roles evicts roles of nodes that stop advertising".to_string());
    }

    let addresses = SystemAddresses;
    match resolve_self_ip(&config, &addresses) {
        Some(ip) => println!("\x1b[1;32m✓\x1b[0m Node IP: {}", ip),
        None => warnings.push(format!(
            "[p2p] interface {} has no address yet",
            config.p2p.interface
        )),
    }
    if let Some(iface) = addresses.first_interface() {
        println!("\x1b[1;32m✓\x1b[0m First interface: {}", iface);
    }

    match select_distro(std::sync::Arc::new(config.clone())) {
        Ok(distro) => match distro.binary() {
            Some(bin) => println!("\x1b[1;32m✓\x1b[0m Distro: {} ({})", distro.name(), bin.display()),
            None => warnings.push(format!("{} selected but its binary was not found", distro.name())),
        },
        Err(e) => warnings.push(e.to_string()),
    }

    println!();
    if warnings.is_empty() {
        println!("\x1b[1;32m✓ No problems found\x1b[0m");
    } else {
        for w in &warnings {
            println!("\x1b[1;33m⚠ WARNING:\x1b[0m {}", w);
        }
    }
    println!();

    Ok(())
}
