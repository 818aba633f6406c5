//! kube-vip
//!
//! Renders the kube-vip daemonset into the k3s auto-deploy manifests
//! directory so the control plane is reachable on a floating address.

use std::path::PathBuf;
use std::time::Duration;

use crate::config::WolfKubeConfig;
use crate::error::{Error, Result};
use crate::service::run_command;

/// Default RBAC manifest
pub const DEFAULT_MANIFEST_URL: &str = "https://kube-vip.io/manifests/rbac.yaml";
/// k3s auto-deploy manifests directory
pub const MANIFESTS_DIR: &str = "var/lib/rancher/k3s/server/manifests";

/// Arguments for `kube-vip manifest daemonset`
pub fn manifest_args(iface: &str, ip: &str, extra: &[String]) -> Vec<String> {
    let mut args: Vec<String> = [
        "manifest",
        "daemonset",
        "--interface",
        iface,
        "--address",
        ip,
        "--inCluster",
        "--taint",
        "--controlplane",
        "--arp",
        "--leaderElection",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    args.extend(extra.iter().cloned());
    args
}

/// Deploys kube-vip manifests on a control-plane node
pub struct KubeVip<'a> {
    config: &'a WolfKubeConfig,
}

impl<'a> KubeVip<'a> {
    pub fn new(config: &'a WolfKubeConfig) -> Self {
        Self { config }
    }

    fn manifests_dir(&self) -> PathBuf {
        self.config.root_path(MANIFESTS_DIR)
    }

    /// Write the RBAC manifest and the daemonset, replacing earlier renders
    async fn write_manifests(&self, rbac: &[u8], daemonset: &str) -> Result<PathBuf> {
        let dir = self.manifests_dir();
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join("kubevipmanifest.yaml"), rbac).await?;

        let path = dir.join("kubevip.yaml");
        tokio::fs::write(&path, daemonset).await?;
        Ok(path)
    }

    /// Download the RBAC manifest and render the daemonset
    pub async fn deploy(&self, iface: &str, ip: &str) -> Result<()> {
        let url = self
            .config
            .kubevip
            .manifest_url
            .as_deref()
            .unwrap_or(DEFAULT_MANIFEST_URL);
        tracing::info!("Downloading kube-vip manifest from {}", url);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        let rbac = client.get(url).send().await?.error_for_status()?.bytes().await?;

        let args = manifest_args(iface, ip, &self.config.kubevip.args);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let manifest = run_command("kube-vip", &args).await.map_err(|e| Error::Command {
            command: "kube-vip manifest daemonset".into(),
            reason: e.to_string(),
        })?;

        let path = self.write_manifests(&rbac, &manifest).await?;
        tracing::info!("kube-vip configured for {} on {} ({})", ip, iface, path.display());
        Ok(())
    }
}
