//! k0s
//!
//! `k0s controller` for control-plane roles, `k0s worker` for workers.
//! Controllers publish separate controller and worker tokens.

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
use crate::role::{
    Role, CONTROLLER_TOKEN_BUCKET, KUBECONFIG_BUCKET, KUBECONFIG_KEY, TOKEN_KEY, WORKER_TOKEN_BUCKET,
};
use crate::service::run_command;

/// Generated controller configuration
pub const CONFIG_PATH: &str = "etc/k0s/k0s.yaml";
/// Token file read by `k0s worker`
pub const TOKEN_PATH: &str = "etc/k0s/token";

/// The k0s distribution
pub struct K0s {
    config: Arc<WolfKubeConfig>,
}

impl K0s {
    pub fn new(config: Arc<WolfKubeConfig>) -> Self {
        Self { config }
    }

    /// Reject setups k0s cannot run yet
    fn check_supported(&self, node: &NodeDescriptor) -> Result<()> {
        let unsupported = |feature: &str| Err(Error::Unsupported(feature.to_string(), "k0s".to_string()));

        if !self.config.p2p.use_vpn_with_kubernetes {
            return unsupported("Having a VPN but not using it for Kubernetes");
        }
        if self.config.kubevip.enable {
            return unsupported("KubeVIP");
        }
        if self.config.external_db().is_some() {
            return unsupported("ExternalDB");
        }
        if node.is_ha_join() {
            return unsupported("HA");
        }
        Ok(())
    }

    fn k0s(&self) -> Result<String> {
        self.binary()
            .map(|p| p.display().to_string())
            .ok_or_else(|| Error::BinaryNotFound("k0s".into()))
    }

    async fn create_token(&self, k0s: &str, role: &str) -> Result<String> {
        let token = run_command(k0s, &["token", "create", &format!("--role={}", role)]).await?;
        Ok(token.trim_end_matches('\n').to_string())
    }
}

/// Point the generated config at `ip` and move kube-proxy metrics off 8080,
/// which the ledger API listens on
pub fn rewrite_controller_config(config: &str, ip: &str) -> String {
    config
        .lines()
        .map(|line| {
            let trimmed = line.trim_start();
            let indent = &line[..line.len() - trimmed.len()];
            if trimmed.starts_with("address: ") {
                format!("{}address: {}", indent, ip)
            } else if trimmed == "metricsPort: 8080" {
                format!("{}metricsPort: 9090", indent)
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
        + "\n"
}

#[async_trait]
impl Distro for K0s {
    fn name(&self) -> &'static str {
        "k0s"
    }

    fn binary(&self) -> Option<PathBuf> {
        find_binary(&self.config, "k0s")
    }

    fn subcommand(&self, role: Role) -> &'static str {
        if role.is_control_plane() {
            "controller"
        } else {
            "worker"
        }
    }

    fn service_name(&self, role: Role) -> &'static str {
        if role.is_control_plane() {
            "k0scontroller"
        } else {
            "k0sworker"
        }
    }

    fn token_bucket(&self, role: Role) -> &'static str {
        if role.is_control_plane() {
            CONTROLLER_TOKEN_BUCKET
        } else {
            WORKER_TOKEN_BUCKET
        }
    }

    fn generate_env(&self, node: &NodeDescriptor, join: Option<&JoinInfo>) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();

        if !node.role.is_control_plane() {
            return merge_env(env, &self.config.k0s_worker);
        }

        if let (true, Some(join)) = (node.is_ha_join(), join) {
            env.insert("K0S_TOKEN".to_string(), join.token.clone());
        }
        merge_env(env, &self.config.k0s)
    }

    async fn generate_args(&self, node: &NodeDescriptor, _join: Option<&JoinInfo>) -> Result<Vec<String>> {
        if !node.role.is_control_plane() {
            let token_file = self.config.root_path(TOKEN_PATH);
            let args = vec![format!("--token-file {}", token_file.display())];
            return Ok(merge_args(args, &self.config.k0s_worker));
        }

        self.check_supported(node)?;

        let k0s = self.k0s()?;
        let generated = run_command(&k0s, &["config", "create"]).await?;
        let config_path = self.config.root_path(CONFIG_PATH);
        if let Some(parent) = config_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&config_path, rewrite_controller_config(&generated, &node.ip)).await?;

        let args = vec![format!("--config {}", config_path.display())];
        Ok(merge_args(args, &self.config.k0s))
    }

    async fn setup_ha_token(&self, node: &NodeDescriptor, _join: Option<&JoinInfo>) -> Result<()> {
        self.check_supported(node)
    }

    async fn setup_worker(&self, join: &JoinInfo) -> Result<()> {
        let path = self.config.root_path(TOKEN_PATH);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &join.token).await?;
        Ok(())
    }

    async fn propagate_data(&self, ledger: &dyn Ledger) -> Result<()> {
        let k0s = self.k0s()?;

        for (role, bucket) in [("controller", CONTROLLER_TOKEN_BUCKET), ("worker", WORKER_TOKEN_BUCKET)] {
            match self.create_token(&k0s, role).await {
                Ok(token) if !token.is_empty() => {
                    if let Err(e) = ledger.set(bucket, TOKEN_KEY, &token).await {
                        tracing::error!("Failed to publish {} token: {}", role, e);
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!("Failed to create {} token: {}", role, e),
            }
        }

        let kubeconfig = run_command(&k0s, &["kubeconfig", "admin"]).await?;
        if !kubeconfig.is_empty() {
            let encoded = URL_SAFE_NO_PAD.encode(kubeconfig.as_bytes());
            if let Err(e) = ledger.set(KUBECONFIG_BUCKET, KUBECONFIG_KEY, &encoded).await {
                tracing::error!("Failed to publish kubeconfig: {}", e);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(role: Role) -> NodeDescriptor {
        NodeDescriptor {
            uuid: "node-a".into(),
            role,
            ip: "10.1.0.5".into(),
            iface: None,
            iface_ip: None,
        }
    }

    #[test]
    fn test_rewrite_controller_config() {
        let generated = "spec:\n  api:\n    address: 192.168.1.2\n    port: 6443\n  network:\n    kubeProxy:\n      metricsPort: 8080\n";
        let out = rewrite_controller_config(generated, "10.1.0.5");
        assert!(out.contains("    address: 10.1.0.5\n"));
        assert!(out.contains("      metricsPort: 9090\n"));
        assert!(out.contains("    port: 6443\n"));
    }

    #[tokio::test]
    async fn test_unsupported_features() {
        let mut config = WolfKubeConfig::default();
        config.kubevip.enable = true;
        let distro = K0s::new(Arc::new(config));

        let err = distro.generate_args(&node(Role::ControlPlane), None).await.unwrap_err();
        assert_eq!(err.to_string(), "KubeVIP is not yet supported with k0s");

        let distro = K0s::new(Arc::new(WolfKubeConfig::default()));
        let err = distro
            .setup_ha_token(&node(Role::ControlPlaneHa), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported(..)));
    }

    #[tokio::test]
    async fn test_worker_token_file_and_args() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = WolfKubeConfig::default();
        config.node.root_dir = dir.path().to_path_buf();
        config.k0s_worker.args = vec!["--labels=zone=a".into()];
        let distro = K0s::new(Arc::new(config));

        distro.setup_worker(&JoinInfo::new("tok\n", "10.1.0.1")).await.unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join(TOKEN_PATH)).unwrap(), "tok");

        let args = distro.generate_args(&node(Role::Worker), None).await.unwrap();
        assert_eq!(
            args,
            vec![
                format!("--token-file {}", dir.path().join(TOKEN_PATH).display()),
                "--labels=zone=a".to_string(),
            ]
        );
        assert_eq!(distro.token_bucket(Role::Worker), WORKER_TOKEN_BUCKET);
        assert_eq!(distro.token_bucket(Role::ControlPlane), CONTROLLER_TOKEN_BUCKET);
        assert_eq!(distro.service_name(Role::ControlPlane), "k0scontroller");
    }

    #[tokio::test]
    async fn test_controller_requires_binary() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = WolfKubeConfig::default();
        config.node.root_dir = dir.path().to_path_buf();
        let distro = K0s::new(Arc::new(config));

        let err = distro.generate_args(&node(Role::ControlPlane), None).await.unwrap_err();
        assert!(matches!(err, Error::BinaryNotFound(_)));
    }
}
