//! k3s
//!
//! `k3s server` for control-plane roles, `k3s agent` for workers. Control
//! planes and workers join with the same node token.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use super::{find_binary, merge_args, merge_env, Distro, JoinInfo, NodeDescriptor};
use crate::config::WolfKubeConfig;
use crate::error::{Error, Result};
use crate::ledger::Ledger;
use crate::role::{Role, KUBECONFIG_BUCKET, KUBECONFIG_KEY, NODE_TOKEN_BUCKET, TOKEN_KEY};

/// Token file written by a running k3s server
pub const NODE_TOKEN_PATH: &str = "var/lib/rancher/k3s/server/node-token";
/// Admin kubeconfig written by a running k3s server
pub const KUBECONFIG_PATH: &str = "etc/rancher/k3s/k3s.yaml";

/// The k3s distribution
pub struct K3s {
    config: Arc<WolfKubeConfig>,
}

impl K3s {
    pub fn new(config: Arc<WolfKubeConfig>) -> Self {
        Self { config }
    }

    fn control_plane_args(&self, node: &NodeDescriptor, join: Option<&JoinInfo>) -> Result<Vec<String>> {
        let config = &self.config;
        let mut args = Vec::new();

        if config.p2p.use_vpn_with_kubernetes {
            args.push(format!("--flannel-iface={}", config.p2p.interface));
        }

        if config.kubevip.enable {
            args.push(format!("--tls-san={}", node.ip));
            if let Some(iface_ip) = &node.iface_ip {
                args.push(format!("--node-ip={}", iface_ip));
            }
        }

        if config.k3s.embedded_registry {
            args.push("--embedded-registry".to_string());
        }

        if let Some(db) = config.external_db() {
            args.push(format!("--datastore-endpoint={}", db));
        }

        if node.is_ha_join() {
            let join = join.ok_or_else(|| {
                Error::Internal("HA control plane rendered without join information".into())
            })?;
            args.push(format!("--server=https://{}:6443", join.control_plane_ip));
        }

        // --cluster-init switches the embedded datastore to etcd, which an
        // external datastore replaces
        if node.is_cluster_init() && config.external_db().is_none() {
            args.push("--cluster-init".to_string());
        }

        Ok(merge_args(args, &config.k3s))
    }

    fn worker_args(&self, node: &NodeDescriptor) -> Vec<String> {
        let config = &self.config;
        let mut args = vec!["--with-node-id".to_string(), format!("--node-ip={}", node.ip)];

        if config.p2p.use_vpn_with_kubernetes {
            args.push(format!("--flannel-iface={}", config.p2p.interface));
        }

        merge_args(args, &config.k3s_agent)
    }
}

#[async_trait]
impl Distro for K3s {
    fn name(&self) -> &'static str {
        "k3s"
    }

    fn binary(&self) -> Option<PathBuf> {
        find_binary(&self.config, "k3s")
    }

    fn subcommand(&self, role: Role) -> &'static str {
        if role.is_control_plane() {
            "server"
        } else {
            "agent"
        }
    }

    fn service_name(&self, role: Role) -> &'static str {
        if role.is_control_plane() {
            "k3s"
        } else {
            "k3s-agent"
        }
    }

    fn token_bucket(&self, _role: Role) -> &'static str {
        NODE_TOKEN_BUCKET
    }

    fn generate_env(&self, node: &NodeDescriptor, join: Option<&JoinInfo>) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();

        if node.role.is_control_plane() {
            if let (true, Some(join)) = (node.is_ha_join(), join) {
                env.insert("K3S_TOKEN".to_string(), join.token.clone());
            }
            return merge_env(env, &self.config.k3s);
        }

        if let Some(join) = join {
            env.insert(
                "K3S_URL".to_string(),
                format!("https://{}:6443", join.control_plane_ip),
            );
            env.insert("K3S_TOKEN".to_string(), join.token.clone());
        }
        merge_env(env, &self.config.k3s_agent)
    }

    async fn generate_args(&self, node: &NodeDescriptor, join: Option<&JoinInfo>) -> Result<Vec<String>> {
        if node.role.is_control_plane() {
            self.control_plane_args(node, join)
        } else {
            Ok(self.worker_args(node))
        }
    }

    async fn setup_ha_token(&self, _node: &NodeDescriptor, _join: Option<&JoinInfo>) -> Result<()> {
        // HA replicas join with the node token passed through K3S_TOKEN
        Ok(())
    }

    async fn setup_worker(&self, _join: &JoinInfo) -> Result<()> {
        Ok(())
    }

    async fn propagate_data(&self, ledger: &dyn Ledger) -> Result<()> {
        let token = tokio::fs::read_to_string(self.config.root_path(NODE_TOKEN_PATH)).await?;
        let token = token.trim_end_matches('\n');
        if !token.is_empty() {
            if let Err(e) = ledger.set(NODE_TOKEN_BUCKET, TOKEN_KEY, token).await {
                tracing::error!("Failed to publish node token: {}", e);
            }
        }

        let kubeconfig = tokio::fs::read(self.config.root_path(KUBECONFIG_PATH)).await?;
        if !kubeconfig.is_empty() {
            let encoded = URL_SAFE_NO_PAD.encode(&kubeconfig);
            if let Err(e) = ledger.set(KUBECONFIG_BUCKET, KUBECONFIG_KEY, &encoded).await {
                tracing::error!("Failed to publish kubeconfig: {}", e);
            }
        }

        Ok(())
    }
}
