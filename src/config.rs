//! WolfKube Configuration
//!
//! This module provides configuration structures for the WolfKube
//! node agent. Every section is optional; an empty file yields a node
//! that joins the ledger on localhost and lets the scheduler pick its role.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::role::{Role, StaticRole};

/// Main WolfKube configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WolfKubeConfig {
    /// Node-specific configuration
    #[serde(default)]
    pub node: NodeConfig,

    /// Gossiped ledger client configuration
    #[serde(default)]
    pub ledger: LedgerConfig,

    /// Role assignment configuration
    #[serde(default)]
    pub p2p: P2pConfig,

    /// k3s server options
    #[serde(default)]
    pub k3s: DistroConfig,

    /// k3s agent options
    #[serde(default, alias = "k3s-agent")]
    pub k3s_agent: DistroConfig,

    /// k0s controller options
    #[serde(default)]
    pub k0s: DistroConfig,

    /// k0s worker options
    #[serde(default, alias = "k0s-worker")]
    pub k0s_worker: DistroConfig,

    /// kube-vip virtual IP configuration
    #[serde(default)]
    pub kubevip: KubeVipConfig,

    /// Agent loop configuration
    #[serde(default)]
    pub agent: AgentConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique node identifier (defaults to the machine id)
    #[serde(default)]
    pub id: Option<String>,

    /// Directory for local agent state
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Filesystem prefix for distro paths (tokens, env files, manifests)
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    /// Bootstrap sentinel path (defaults to `<state_dir>/deployed`)
    #[serde(default)]
    pub sentinel: Option<PathBuf>,
}

/// Ledger client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// REST API of the local gossip daemon
    #[serde(default = "default_ledger_api")]
    pub api_address: String,

    /// Network identifier, used to namespace buckets
    #[serde(default = "default_network_id")]
    pub network_id: String,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// A peer whose last ping is younger than this counts as active
    #[serde(default = "default_active_window")]
    pub active_window_secs: u64,

    /// A peer whose last ping is older than this stops advertising
    #[serde(default = "default_advertise_window")]
    pub advertise_window_secs: u64,
}

/// Role assignment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct P2pConfig {
    /// Static role override (a role tag, or "auto")
    #[serde(default)]
    pub role: Option<String>,

    /// Minimum advertising nodes before roles are scheduled (0 = 2)
    #[serde(default)]
    pub minimum_nodes: usize,

    /// Evict roles of nodes that stopped advertising
    #[serde(default)]
    pub dynamic_roles: bool,

    /// Cluster network interface
    #[serde(default = "default_interface")]
    pub interface: String,

    /// Route Kubernetes traffic over the cluster network interface
    #[serde(default = "default_true")]
    pub use_vpn_with_kubernetes: bool,

    /// Automatic role assignment
    #[serde(default)]
    pub auto: AutoConfig,
}

/// Automatic role assignment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoConfig {
    /// Run the leader election and scheduler on this node
    #[serde(default = "default_true")]
    pub enable: bool,

    /// HA control plane
    #[serde(default)]
    pub ha: HaConfig,
}

/// HA control plane configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HaConfig {
    /// Enable an HA control plane
    #[serde(default)]
    pub enable: bool,

    /// Number of control-plane replicas beyond the cluster-init node
    #[serde(default)]
    pub master_nodes: Option<usize>,

    /// External datastore endpoint
    #[serde(default)]
    pub external_db: Option<String>,
}

/// Per-distro service options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DistroConfig {
    /// Explicitly enable this service
    #[serde(default)]
    pub enabled: bool,

    /// Extra environment for the service
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Replace the generated environment instead of merging
    #[serde(default)]
    pub replace_env: bool,

    /// Extra arguments for the service
    #[serde(default)]
    pub args: Vec<String>,

    /// Replace the generated arguments instead of appending
    #[serde(default)]
    pub replace_args: bool,

    /// Enable the embedded registry mirror (k3s server only)
    #[serde(default)]
    pub embedded_registry: bool,
}

/// kube-vip configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KubeVipConfig {
    /// Deploy kube-vip on control-plane nodes
    #[serde(default)]
    pub enable: bool,

    /// Elastic/virtual IP to advertise as the control-plane address
    #[serde(default)]
    pub eip: Option<String>,

    /// Interface kube-vip binds to
    #[serde(default)]
    pub interface: Option<String>,

    /// RBAC manifest URL
    #[serde(default)]
    pub manifest_url: Option<String>,

    /// Extra `kube-vip manifest` arguments
    #[serde(default)]
    pub args: Vec<String>,
}

/// Agent loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Seconds between ticks
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    /// Seconds to wait after each propagation burst
    #[serde(default = "default_settle_delay")]
    pub settle_delay_secs: u64,

    /// Directories searched for distro binaries (relative to root_dir)
    #[serde(default = "default_bin_dirs")]
    pub bin_dirs: Vec<PathBuf>,

    /// Explicit distro selection (k3s, k0s)
    #[serde(default)]
    pub distro: Option<String>,

    /// Shell command run before a bootstrap
    #[serde(default)]
    pub before_hook: Option<String>,

    /// Shell command run after a successful bootstrap
    #[serde(default)]
    pub after_hook: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/lib/wolfkube")
}

fn default_root_dir() -> PathBuf {
    PathBuf::from("/")
}

fn default_ledger_api() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_network_id() -> String {
    "wolfkube".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_active_window() -> u64 {
    300
}

fn default_advertise_window() -> u64 {
    900
}

fn default_interface() -> String {
    "edgevpn0".to_string()
}

fn default_true() -> bool {
    true
}

fn default_tick_interval() -> u64 {
    30
}

fn default_settle_delay() -> u64 {
    30
}

fn default_bin_dirs() -> Vec<PathBuf> {
    vec![PathBuf::from("usr/bin"), PathBuf::from("usr/local/bin")]
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: None,
            state_dir: default_state_dir(),
            root_dir: default_root_dir(),
            sentinel: None,
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            api_address: default_ledger_api(),
            network_id: default_network_id(),
            request_timeout_secs: default_request_timeout(),
            active_window_secs: default_active_window(),
            advertise_window_secs: default_advertise_window(),
        }
    }
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            role: None,
            minimum_nodes: 0,
            dynamic_roles: false,
            interface: default_interface(),
            use_vpn_with_kubernetes: true,
            auto: AutoConfig::default(),
        }
    }
}

impl Default for AutoConfig {
    fn default() -> Self {
        Self {
            enable: true,
            ha: HaConfig::default(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            settle_delay_secs: default_settle_delay(),
            bin_dirs: default_bin_dirs(),
            distro: None,
            before_hook: None,
            after_hook: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl WolfKubeConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: WolfKubeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if let Some(role) = &self.p2p.role {
            role.parse::<StaticRole>()
                .map_err(|_| crate::Error::Config(format!("invalid p2p.role specified: '{}'", role)))?;
        }

        if self.ledger.api_address.is_empty() {
            return Err(crate::Error::Config("ledger.api_address cannot be empty".into()));
        }

        if self.ledger.network_id.is_empty() {
            return Err(crate::Error::Config("ledger.network_id cannot be empty".into()));
        }

        if self.ledger.advertise_window_secs < self.ledger.active_window_secs {
            return Err(crate::Error::Config(
                "ledger.advertise_window_secs must be at least ledger.active_window_secs".into(),
            ));
        }

        if self.agent.tick_interval_secs == 0 {
            return Err(crate::Error::Config("agent.tick_interval_secs must be positive".into()));
        }

        if let Some(distro) = &self.agent.distro {
            if distro != "k3s" && distro != "k0s" {
                return Err(crate::Error::Config(format!("unknown agent.distro '{}'", distro)));
            }
        }

        if self.p2p.auto.ha.master_nodes.is_some() && !self.p2p.auto.ha.enable {
            return Err(crate::Error::Config(
                "p2p.auto.ha.master_nodes requires p2p.auto.ha.enable".into(),
            ));
        }

        Ok(())
    }

    /// Statically configured role, if any (`auto` counts as none)
    pub fn static_role(&self) -> Option<Role> {
        match self.p2p.role.as_deref()?.parse::<StaticRole>().ok()? {
            StaticRole::Fixed(role) => Some(role),
            StaticRole::Auto => None,
        }
    }

    /// Minimum advertising nodes before scheduling
    pub fn minimum_nodes(&self) -> usize {
        if self.p2p.minimum_nodes == 0 {
            2
        } else {
            self.p2p.minimum_nodes
        }
    }

    /// Whether an HA control plane is requested
    pub fn ha_enabled(&self) -> bool {
        self.p2p.auto.ha.enable
    }

    /// Target number of `control-plane/ha` nodes
    pub fn ha_target(&self) -> Option<usize> {
        if self.ha_enabled() {
            self.p2p.auto.ha.master_nodes
        } else {
            None
        }
    }

    /// External datastore endpoint, if configured
    pub fn external_db(&self) -> Option<&str> {
        self.p2p.auto.ha.external_db.as_deref().filter(|s| !s.is_empty())
    }

    /// Get the state directory path
    pub fn state_dir(&self) -> &PathBuf {
        &self.node.state_dir
    }

    /// Get the sentinel path
    pub fn sentinel_path(&self) -> PathBuf {
        self.node
            .sentinel
            .clone()
            .unwrap_or_else(|| self.node.state_dir.join("deployed"))
    }

    /// Resolve a system path under the configured root directory
    pub fn root_path(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        self.node
            .root_dir
            .join(path.strip_prefix("/").unwrap_or(path))
    }

    /// Get tick interval as Duration
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.agent.tick_interval_secs)
    }

    /// Get propagation settling delay as Duration
    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.agent.settle_delay_secs)
    }

    /// Get ledger request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.ledger.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[node]
id = "node-1"
state_dir = "/var/lib/wolfkube"

[ledger]
api_address = "http://127.0.0.1:8080"
network_id = "lab"

[p2p]
role = "master"
minimum_nodes = 3
dynamic_roles = true

[p2p.auto.ha]
enable = true
master_nodes = 2

[k3s]
args = ["--disable=traefik"]
env = { K3S_KUBECONFIG_MODE = "0644" }

[agent]
tick_interval_secs = 10
settle_delay_secs = 5
"#;

        let config = WolfKubeConfig::from_str(toml).unwrap();
        assert_eq!(config.node.id.as_deref(), Some("node-1"));
        assert_eq!(config.static_role(), Some(Role::ControlPlane));
        assert_eq!(config.minimum_nodes(), 3);
        assert_eq!(config.ha_target(), Some(2));
        assert!(config.p2p.dynamic_roles);
        assert_eq!(config.k3s.args, vec!["--disable=traefik".to_string()]);
        assert_eq!(config.tick_interval(), Duration::from_secs(10));
        assert_eq!(config.sentinel_path(), PathBuf::from("/var/lib/wolfkube/deployed"));
    }

    #[test]
    fn test_empty_config_defaults() {
        let config = WolfKubeConfig::from_str("").unwrap();
        assert_eq!(config.minimum_nodes(), 2);
        assert!(config.p2p.auto.enable);
        assert!(!config.ha_enabled());
        assert_eq!(config.ha_target(), None);
        assert_eq!(config.static_role(), None);
        assert_eq!(config.p2p.interface, "edgevpn0");
        assert_eq!(config.settle_delay(), Duration::from_secs(30));
    }

    #[test]
    fn test_auto_role_is_not_static() {
        let config = WolfKubeConfig::from_str("[p2p]\nrole = \"auto\"\n").unwrap();
        assert_eq!(config.static_role(), None);
    }

    #[test]
    fn test_invalid_role_rejected() {
        let err = WolfKubeConfig::from_str("[p2p]\nrole = \"invalid\"\n").unwrap_err();
        assert!(err.to_string().contains("invalid p2p.role specified"));
    }

    #[test]
    fn test_advertise_window_bounds() {
        let config = WolfKubeConfig::default();
        assert!(config.ledger.advertise_window_secs >= config.ledger.active_window_secs);

        let toml = r#"
[ledger]
active_window_secs = 300
advertise_window_secs = 60
"#;
        let err = WolfKubeConfig::from_str(toml).unwrap_err();
        assert!(err.to_string().contains("advertise_window_secs"));
    }

    #[test]
    fn test_invalid_distro_rejected() {
        assert!(WolfKubeConfig::from_str("[agent]\ndistro = \"microk8s\"\n").is_err());
    }

    #[test]
    fn test_root_path() {
        let mut config = WolfKubeConfig::default();
        config.node.root_dir = PathBuf::from("/tmp/root");
        assert_eq!(
            config.root_path("/etc/rancher/k3s/k3s.yaml"),
            PathBuf::from("/tmp/root/etc/rancher/k3s/k3s.yaml")
        );
    }
}
