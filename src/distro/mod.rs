//! Kubernetes Distributions
//!
//! A [`Distro`] renders the service configuration for one Kubernetes
//! distribution and publishes its join material. The distro is picked
//! once per process, from configuration or from the binaries present.

pub mod k0s;
pub mod k3s;

pub use k0s::K0s;
pub use k3s::K3s;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::config::{DistroConfig, WolfKubeConfig};
use crate::error::{Error, Result};
use crate::ledger::Ledger;
use crate::role::Role;

/// Everything a distro needs to know about the local node this tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDescriptor {
    /// Ledger UUID of the node
    pub uuid: String,
    /// Assigned role
    pub role: Role,
    /// Address the node is reached at (virtual IP or cluster network)
    pub ip: String,
    /// Interface Kubernetes binds to
    pub iface: Option<String>,
    /// Address of `iface`
    pub iface_ip: Option<String>,
}

impl NodeDescriptor {
    /// Control-plane replica joining an existing cluster-init node
    pub fn is_ha_join(&self) -> bool {
        self.role.is_ha_join()
    }

    /// Node that initializes the cluster datastore
    pub fn is_cluster_init(&self) -> bool {
        self.role == Role::ControlPlaneClusterInit
    }
}

/// Join material read from the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinInfo {
    /// Join token, trailing newlines trimmed
    pub token: String,
    /// Address of the control plane to join
    pub control_plane_ip: String,
}

impl JoinInfo {
    pub fn new(token: &str, control_plane_ip: &str) -> Self {
        Self {
            token: token.trim_end_matches('\n').to_string(),
            control_plane_ip: control_plane_ip.to_string(),
        }
    }
}

/// Strategy for one Kubernetes distribution
#[async_trait]
pub trait Distro: Send + Sync {
    /// Distro name (`k3s`, `k0s`)
    fn name(&self) -> &'static str;

    /// Path of the distro binary, if installed
    fn binary(&self) -> Option<PathBuf>;

    /// Subcommand the service runs for `role`
    fn subcommand(&self, role: Role) -> &'static str;

    /// OS service running `role`
    fn service_name(&self, role: Role) -> &'static str;

    /// Ledger bucket holding the join token `role` consumes
    fn token_bucket(&self, role: Role) -> &'static str;

    /// Service environment
    fn generate_env(&self, node: &NodeDescriptor, join: Option<&JoinInfo>) -> BTreeMap<String, String>;

    /// Service arguments
    async fn generate_args(&self, node: &NodeDescriptor, join: Option<&JoinInfo>) -> Result<Vec<String>>;

    /// Prepare the token an HA replica joins with
    async fn setup_ha_token(&self, node: &NodeDescriptor, join: Option<&JoinInfo>) -> Result<()>;

    /// Prepare a worker to join `join.control_plane_ip`
    async fn setup_worker(&self, join: &JoinInfo) -> Result<()>;

    /// Publish tokens and kubeconfig
    async fn propagate_data(&self, ledger: &dyn Ledger) -> Result<()>;
}

/// Locate `name` in the configured binary directories
pub fn find_binary(config: &WolfKubeConfig, name: &str) -> Option<PathBuf> {
    config
        .agent
        .bin_dirs
        .iter()
        .map(|dir| config.root_path(dir).join(name))
        .find(|path| path.is_file())
}

/// Pick the distro for this node
///
/// An explicit `agent.distro` wins, then an enabled distro section, then
/// whichever binary is installed (k3s first).
pub fn select_distro(config: Arc<WolfKubeConfig>) -> Result<Arc<dyn Distro>> {
    let name = match config.agent.distro.as_deref() {
        Some(name) => name.to_string(),
        None if config.k3s.enabled || config.k3s_agent.enabled => "k3s".to_string(),
        None if config.k0s.enabled || config.k0s_worker.enabled => "k0s".to_string(),
        None if find_binary(&config, "k3s").is_some() => "k3s".to_string(),
        None if find_binary(&config, "k0s").is_some() => "k0s".to_string(),
        None => return Err(Error::NoDistro),
    };

    tracing::info!("Using Kubernetes distro {}", name);

    match name.as_str() {
        "k3s" => Ok(Arc::new(K3s::new(config))),
        "k0s" => Ok(Arc::new(K0s::new(config))),
        other => Err(Error::Config(format!("unknown distro '{}'", other))),
    }
}

/// Decode a published kubeconfig and point it at the control plane
pub fn decode_kubeconfig(encoded: &str, control_plane_ip: Option<&str>) -> Result<String> {
    let raw = URL_SAFE_NO_PAD.decode(encoded.trim())?;
    let kubeconfig = String::from_utf8_lossy(&raw).into_owned();
    Ok(match control_plane_ip {
        Some(ip) => kubeconfig.replace("127.0.0.1", ip),
        None => kubeconfig,
    })
}

/// Apply a section's `replace_env` / `env` on top of generated values
pub(crate) fn merge_env(
    mut env: BTreeMap<String, String>,
    section: &DistroConfig,
) -> BTreeMap<String, String> {
    if section.replace_env {
        return section.env.clone();
    }
    env.extend(section.env.iter().map(|(k, v)| (k.clone(), v.clone())));
    env
}

/// Apply a section's `replace_args` / `args` on top of generated values
pub(crate) fn merge_args(mut args: Vec<String>, section: &DistroConfig) -> Vec<String> {
    if section.replace_args {
        return section.args.clone();
    }
    args.extend(section.args.iter().cloned());
    args
}
