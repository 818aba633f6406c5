//! Node Bootstrap
//!
//! Per-node state machines that drive a node from "role assigned" to
//! "Kubernetes service running". They are re-entrant: every tick starts
//! from the top, waits on whatever precondition is still missing and
//! short-circuits once the sentinel exists.

mod control_plane;
mod envfile;
mod sentinel;
mod worker;

pub use envfile::{render_env, write_env};
pub use sentinel::Sentinel;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;

use crate::config::WolfKubeConfig;
use crate::distro::Distro;
use crate::error::Result;
use crate::ledger::Ledger;
use crate::net::AddressSource;
use crate::role::{Role, ROLE_BUCKET};
use crate::service::ServiceManager;

/// Precondition a bootstrap is waiting on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitReason {
    /// The node has no address on the cluster network yet
    AwaitingIp,
    /// HA replica waiting for the cluster-init token and address
    AwaitingPeerInfo,
    /// Worker waiting for `control-plane/ip`
    AwaitingControlPlaneIp,
    /// Worker waiting for a join token
    AwaitingJoinToken,
}

impl fmt::Display for WaitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WaitReason::AwaitingIp => "waiting for a node IP",
            WaitReason::AwaitingPeerInfo => "waiting for control plane token and IP",
            WaitReason::AwaitingControlPlaneIp => "waiting for control plane IP",
            WaitReason::AwaitingJoinToken => "waiting for join token",
        };
        f.write_str(s)
    }
}

/// Result of one bootstrap pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// Nothing to do yet, retry next tick
    Waiting(WaitReason),
    /// Sentinel found, at most data was re-published
    AlreadyConfigured,
    /// The service was configured and started this pass
    Configured,
}

/// Hook stages around a bootstrap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStage {
    Before,
    After,
}

impl HookStage {
    fn as_str(&self) -> &'static str {
        match self {
            HookStage::Before => "before",
            HookStage::After => "after",
        }
    }
}

/// Everything a bootstrap pass needs, threaded through explicitly
pub struct BootstrapContext {
    pub config: Arc<WolfKubeConfig>,
    pub uuid: String,
    pub ledger: Arc<dyn Ledger>,
    pub distro: Arc<dyn Distro>,
    pub services: Arc<dyn ServiceManager>,
    pub addresses: Arc<dyn AddressSource>,
    pub sentinel: Sentinel,
    pub settle_delay: Duration,
}

impl BootstrapContext {
    pub fn new(
        config: Arc<WolfKubeConfig>,
        uuid: impl Into<String>,
        ledger: Arc<dyn Ledger>,
        distro: Arc<dyn Distro>,
        services: Arc<dyn ServiceManager>,
        addresses: Arc<dyn AddressSource>,
    ) -> Self {
        let sentinel = Sentinel::new(config.sentinel_path());
        let settle_delay = config.settle_delay();
        Self {
            config,
            uuid: uuid.into(),
            ledger,
            distro,
            services,
            addresses,
            sentinel,
            settle_delay,
        }
    }

    /// Publish a statically configured role so the scheduler sees it
    pub async fn publish_static_role(&self) -> Result<()> {
        if let Some(role) = self.config.static_role() {
            tracing::info!("Publishing configured role {}", role);
            self.ledger.set(ROLE_BUCKET, &self.uuid, role.tag()).await?;
        }
        Ok(())
    }

    /// Run the configured hook for `stage`; failures are only logged
    pub async fn run_hook(&self, stage: HookStage, role: Role) {
        let hook = match stage {
            HookStage::Before => self.config.agent.before_hook.as_deref(),
            HookStage::After => self.config.agent.after_hook.as_deref(),
        };
        let Some(hook) = hook.filter(|h| !h.trim().is_empty()) else {
            return;
        };

        tracing::info!("Running {} bootstrap hook", stage.as_str());
        let result = Command::new("sh")
            .args(["-c", hook])
            .env("WOLFKUBE_STAGE", stage.as_str())
            .env("WOLFKUBE_ROLE", role.tag())
            .env("WOLFKUBE_UUID", &self.uuid)
            .status()
            .await;

        match result {
            Ok(status) if status.success() => {}
            Ok(status) => tracing::warn!("{} hook exited with {}", stage.as_str(), status),
            Err(e) => tracing::warn!("Failed to run {} hook: {}", stage.as_str(), e),
        }
    }

    /// Give the ledger time to broadcast the last burst of writes
    async fn settle(&self) {
        if !self.settle_delay.is_zero() {
            tracing::debug!("Settling for {:?}", self.settle_delay);
            tokio::time::sleep(self.settle_delay).await;
        }
    }
}

/// Drive the bootstrap for this node's assigned role
pub async fn bootstrap(ctx: &BootstrapContext, role: Role) -> Result<BootstrapOutcome> {
    let outcome = match role {
        Role::Worker => worker::run(ctx).await?,
        role => control_plane::run(ctx, role).await?,
    };

    if let BootstrapOutcome::Waiting(reason) = outcome {
        tracing::debug!("Bootstrap of {} is {}", role, reason);
    }
    Ok(outcome)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::distro::k3s::{KUBECONFIG_PATH, NODE_TOKEN_PATH};
    use crate::distro::K3s;
    use crate::ledger::MemoryLedger;
    use crate::net::StaticAddresses;
    use crate::service::DryRunServiceManager;

    /// A scratch root with a fake k3s install, a shared ledger and a
    /// recording service manager
    pub struct Fixture {
        pub dir: tempfile::TempDir,
        pub ledger: MemoryLedger,
        pub services: DryRunServiceManager,
    }

    impl Fixture {
        pub fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            std::fs::create_dir_all(dir.path().join("usr/bin")).unwrap();
            std::fs::write(dir.path().join("usr/bin/k3s"), "").unwrap();
            let services = DryRunServiceManager::new(dir.path());
            Self {
                dir,
                ledger: MemoryLedger::new(),
                services,
            }
        }

        pub fn config(&self) -> WolfKubeConfig {
            let mut config = WolfKubeConfig::default();
            config.node.root_dir = self.dir.path().to_path_buf();
            config.node.state_dir = self.dir.path().join("state");
            config.agent.settle_delay_secs = 0;
            config
        }

        /// Files a running k3s server leaves behind
        pub fn install_server_files(&self) {
            let token = self.dir.path().join(NODE_TOKEN_PATH);
            std::fs::create_dir_all(token.parent().unwrap()).unwrap();
            std::fs::write(token, "K10secret::server:abc\n").unwrap();

            let kubeconfig = self.dir.path().join(KUBECONFIG_PATH);
            std::fs::create_dir_all(kubeconfig.parent().unwrap()).unwrap();
            std::fs::write(kubeconfig, "server: https://127.0.0.1:6443\n").unwrap();
        }

        pub fn context(&self, config: WolfKubeConfig, uuid: &str, addresses: StaticAddresses) -> BootstrapContext {
            let config = Arc::new(config);
            BootstrapContext::new(
                config.clone(),
                uuid,
                Arc::new(self.ledger.clone()),
                Arc::new(K3s::new(config)),
                Arc::new(self.services.clone()),
                Arc::new(addresses),
            )
        }

        pub fn read(&self, path: &str) -> String {
            std::fs::read_to_string(self.dir.path().join(path)).unwrap()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::Fixture;
    use super::*;
    use crate::net::StaticAddresses;

    #[tokio::test]
    async fn test_publish_static_role() {
        let fixture = Fixture::new();
        let mut config = fixture.config();
        config.p2p.role = Some("master".into());
        let ctx = fixture.context(config, "node-a", StaticAddresses::new());

        ctx.publish_static_role().await.unwrap();
        assert_eq!(
            fixture.ledger.get(ROLE_BUCKET, "node-a").await.unwrap().as_deref(),
            Some("control-plane")
        );
    }

    #[tokio::test]
    async fn test_auto_role_is_not_published() {
        let fixture = Fixture::new();
        let mut config = fixture.config();
        config.p2p.role = Some("auto".into());
        let ctx = fixture.context(config, "node-a", StaticAddresses::new());

        ctx.publish_static_role().await.unwrap();
        assert!(fixture.ledger.writes().await.is_empty());
    }

    #[tokio::test]
    async fn test_hooks_run_and_failures_are_ignored() {
        let fixture = Fixture::new();
        let marker = fixture.dir.path().join("hook-ran");
        let mut config = fixture.config();
        config.agent.before_hook = Some(format!("echo $WOLFKUBE_ROLE > {}", marker.display()));
        config.agent.after_hook = Some("exit 1".into());
        let ctx = fixture.context(config, "node-a", StaticAddresses::new());

        ctx.run_hook(HookStage::Before, Role::Worker).await;
        ctx.run_hook(HookStage::After, Role::Worker).await;

        assert_eq!(std::fs::read_to_string(marker).unwrap().trim(), "worker");
    }
}
