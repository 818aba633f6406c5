//! Node Agent
//!
//! The per-node loop. Every tick advertises the node, resolves leadership,
//! runs the scheduler when leading, and then drives this node's own
//! bootstrap from whatever role the ledger holds for it.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::time::{interval, MissedTickBehavior};

use crate::bootstrap::{bootstrap, BootstrapContext, BootstrapOutcome};
use crate::config::WolfKubeConfig;
use crate::distro::{select_distro, Distro};
use crate::error::Result;
use crate::ledger::{apply_ops, Ledger};
use crate::net::AddressSource;
use crate::role::{Role, ROLE_BUCKET};
use crate::service::ServiceManager;
use crate::state::{ClusterSnapshot, LeaderElector, Leadership, RoleScheduler, ScheduleDecision, SchedulerConfig};

/// What happened during one tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Leadership outcome, when auto assignment is enabled
    pub leadership: Option<Leadership>,
    /// Scheduler decision, when this node led
    pub decision: Option<ScheduleDecision>,
    /// This node's role as read after scheduling
    pub role: Option<Role>,
    /// Bootstrap outcome, when a role was assigned
    pub bootstrap: Option<BootstrapOutcome>,
}

/// Node agent
pub struct Agent {
    config: Arc<WolfKubeConfig>,
    node_id: String,
    ledger: Arc<dyn Ledger>,
    services: Arc<dyn ServiceManager>,
    addresses: Arc<dyn AddressSource>,
    elector: LeaderElector,
    scheduler: RoleScheduler,
    distro: Option<Arc<dyn Distro>>,
    rng: StdRng,
}

impl Agent {
    /// Create a new agent
    pub fn new(
        config: WolfKubeConfig,
        node_id: String,
        ledger: Arc<dyn Ledger>,
        services: Arc<dyn ServiceManager>,
        addresses: Arc<dyn AddressSource>,
    ) -> Self {
        let scheduler = RoleScheduler::new(SchedulerConfig::from_config(&config, node_id.clone()));
        Self {
            config: Arc::new(config),
            elector: LeaderElector::new(node_id.clone()),
            node_id,
            ledger,
            services,
            addresses,
            scheduler,
            distro: None,
            rng: StdRng::from_entropy(),
        }
    }

    /// Use a fixed random source for scheduler tie-breaks
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    /// Use a fixed distro instead of detecting one
    pub fn with_distro(mut self, distro: Arc<dyn Distro>) -> Self {
        self.distro = Some(distro);
        self
    }

    /// This node's ID
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// The distro, picked on first use and kept for the process lifetime
    fn distro(&mut self) -> Result<Arc<dyn Distro>> {
        if let Some(distro) = &self.distro {
            return Ok(distro.clone());
        }
        let distro = select_distro(self.config.clone())?;
        self.distro = Some(distro.clone());
        Ok(distro)
    }

    /// Run one tick to completion
    ///
    /// A scheduling failure does not stop this node's own bootstrap; it is
    /// returned after the bootstrap pass.
    pub async fn tick(&mut self) -> Result<TickReport> {
        let mut report = TickReport::default();

        self.ledger.advertise(&self.node_id).await?;
        let snapshot = ClusterSnapshot::read(self.ledger.as_ref()).await?;

        let mut schedule_error = None;
        if self.config.p2p.auto.enable {
            let leadership = self.elector.resolve(self.ledger.as_ref(), &snapshot).await?;
            if leadership.is_leader() {
                match self.scheduler.plan(&snapshot, &mut self.rng) {
                    Ok(plan) => {
                        log_decision(&self.node_id, &plan.decision);
                        apply_ops(self.ledger.as_ref(), &plan.ops).await?;
                        report.decision = Some(plan.decision);
                    }
                    Err(e) => {
                        tracing::error!("<{}> scheduling failed: {}", self.node_id, e);
                        schedule_error = Some(e);
                    }
                }
            }
            report.leadership = Some(leadership);
        }

        report.role = self.own_role().await?;
        if let Some(role) = report.role {
            let ctx = BootstrapContext::new(
                self.config.clone(),
                self.node_id.clone(),
                self.ledger.clone(),
                self.distro()?,
                self.services.clone(),
                self.addresses.clone(),
            );
            report.bootstrap = Some(bootstrap(&ctx, role).await?);
        }

        match schedule_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// Configured role, else the one the ledger holds for this node
    async fn own_role(&self) -> Result<Option<Role>> {
        if let Some(role) = self.config.static_role() {
            return Ok(Some(role));
        }

        let Some(tag) = self.ledger.get(ROLE_BUCKET, &self.node_id).await? else {
            tracing::debug!("<{}> no role assigned yet", self.node_id);
            return Ok(None);
        };
        Role::from_tag(&tag)
    }

    /// Tick until interrupted. Tick errors are logged and retried on the
    /// next tick.
    pub async fn run(mut self) -> Result<()> {
        let mut ticker = interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            "Agent {} started, ticking every {:?}",
            self.node_id,
            self.config.tick_interval()
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(report) => tracing::debug!("Tick: {:?}", report),
                        Err(e) if e.is_transient() => tracing::warn!("Tick failed: {}", e),
                        Err(e) if e.is_topology() => tracing::warn!("Cluster not ready: {}", e),
                        Err(e) => tracing::error!("Tick failed: {}", e),
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Received shutdown signal");
                    break;
                }
            }
        }

        Ok(())
    }
}

fn log_decision(node_id: &str, decision: &ScheduleDecision) {
    match decision {
        ScheduleDecision::NotEnoughNodes { have, need } => {
            tracing::info!("<{}> not enough nodes to schedule ({} of {})", node_id, have, need);
        }
        ScheduleDecision::Evict(nodes) => {
            tracing::info!("<{}> evicting roles of departed nodes {:?}", node_id, nodes);
        }
        ScheduleDecision::AssignControlPlane { node, role } => {
            tracing::info!("<{}> assigning {} to {}", node_id, role, node);
        }
        ScheduleDecision::AssignHa(node) => {
            tracing::info!("<{}> assigning control-plane/ha to {}", node_id, node);
        }
        ScheduleDecision::AssignWorkers(nodes) => {
            tracing::info!("<{}> assigning worker to {:?}", node_id, nodes);
        }
        ScheduleDecision::Waiting => tracing::debug!("<{}> nothing assignable yet", node_id),
        ScheduleDecision::Idle => tracing::debug!("<{}> all nodes have roles", node_id),
    }
}

/// Name of the distro this host would run
pub fn check_distro(config: Arc<WolfKubeConfig>) -> Result<&'static str> {
    Ok(select_distro(config)?.name())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::distro::k3s::{KUBECONFIG_PATH, NODE_TOKEN_PATH};
    use crate::ledger::MemoryLedger;
    use crate::net::StaticAddresses;
    use crate::role::{CONTROL_PLANE_BUCKET, CONTROL_PLANE_IP_KEY};
    use crate::service::DryRunServiceManager;
    use std::path::Path;

    fn node_root(base: &Path, id: &str) -> std::path::PathBuf {
        let root = base.join(id);
        std::fs::create_dir_all(root.join("usr/bin")).unwrap();
        std::fs::write(root.join("usr/bin/k3s"), "").unwrap();

        let token = root.join(NODE_TOKEN_PATH);
        std::fs::create_dir_all(token.parent().unwrap()).unwrap();
        std::fs::write(token, format!("token-of-{}\n", id)).unwrap();
        let kubeconfig = root.join(KUBECONFIG_PATH);
        std::fs::create_dir_all(kubeconfig.parent().unwrap()).unwrap();
        std::fs::write(kubeconfig, "server: https://127.0.0.1:6443\n").unwrap();
        root
    }

    fn agent(base: &Path, id: &str, ip: &str, ledger: &MemoryLedger, tweak: impl Fn(&mut WolfKubeConfig)) -> Agent {
        let root = node_root(base, id);
        let mut config = WolfKubeConfig::default();
        config.node.root_dir = root.clone();
        config.node.state_dir = root.join("state");
        config.agent.settle_delay_secs = 0;
        tweak(&mut config);

        Agent::new(
            config,
            id.to_string(),
            Arc::new(ledger.clone()),
            Arc::new(DryRunServiceManager::new(&root)),
            Arc::new(StaticAddresses::new().with("edgevpn0", ip)),
        )
        .with_rng(StdRng::seed_from_u64(7))
    }

    async fn roles(ledger: &MemoryLedger) -> Vec<String> {
        ledger.entries(ROLE_BUCKET).await.unwrap().into_values().collect()
    }

    #[tokio::test]
    async fn test_three_nodes_converge() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = MemoryLedger::new();
        let mut agents: Vec<Agent> = ["a", "b", "c"]
            .iter()
            .enumerate()
            .map(|(i, id)| agent(dir.path(), id, &format!("10.1.0.{}", i + 1), &ledger, |_| {}))
            .collect();

        for _ in 0..8 {
            for agent in agents.iter_mut() {
                agent.tick().await.unwrap();
            }
        }

        let mut roles = roles(&ledger).await;
        roles.sort();
        assert_eq!(roles, vec!["control-plane", "worker", "worker"]);

        for id in ["a", "b", "c"] {
            assert!(dir.path().join(id).join("state/deployed").exists(), "{} not bootstrapped", id);
        }
        assert!(ledger
            .get(CONTROL_PLANE_BUCKET, CONTROL_PLANE_IP_KEY)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_leader_claims_before_scheduling() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = MemoryLedger::with_nodes(["a", "b"]);
        let mut a = agent(dir.path(), "a", "10.1.0.1", &ledger, |_| {});
        let mut b = agent(dir.path(), "b", "10.1.0.2", &ledger, |_| {});

        let first_a = a.tick().await.unwrap();
        let first_b = b.tick().await.unwrap();
        assert!(first_a.decision.is_none());
        assert!(first_b.decision.is_none());
        assert!(roles(&ledger).await.is_empty());

        let claimer = if first_a.leadership == Some(Leadership::Claim) { &mut a } else { &mut b };
        let report = claimer.tick().await.unwrap();
        assert!(matches!(
            report.decision,
            Some(ScheduleDecision::AssignControlPlane { .. })
        ));
    }

    #[tokio::test]
    async fn test_auto_disabled_without_static_role_is_inert() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = MemoryLedger::with_nodes(["a", "b"]);
        let mut a = agent(dir.path(), "a", "10.1.0.1", &ledger, |c| c.p2p.auto.enable = false);

        let report = a.tick().await.unwrap();
        assert_eq!(report, TickReport::default());
        assert!(ledger.writes().await.is_empty());
    }

    #[tokio::test]
    async fn test_static_control_plane_bootstraps_alone() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = MemoryLedger::new();
        let mut a = agent(dir.path(), "a", "10.1.0.1", &ledger, |c| {
            c.p2p.role = Some("master".into());
        });

        let report = a.tick().await.unwrap();
        assert_eq!(report.role, Some(Role::ControlPlane));
        assert_eq!(report.bootstrap, Some(BootstrapOutcome::Configured));
        assert_eq!(roles(&ledger).await, vec!["control-plane"]);
    }

    #[tokio::test]
    async fn test_ha_target_unreachable_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = MemoryLedger::new();
        let ha = |c: &mut WolfKubeConfig| {
            c.p2p.auto.ha.enable = true;
            c.p2p.auto.ha.master_nodes = Some(3);
        };
        let mut agents = vec![
            agent(dir.path(), "a", "10.1.0.1", &ledger, ha),
            agent(dir.path(), "b", "10.1.0.2", &ledger, ha),
        ];

        let mut unreachable = 0;
        for _ in 0..6 {
            for agent in agents.iter_mut() {
                if let Err(e) = agent.tick().await {
                    assert!(matches!(e, Error::HaTargetUnreachable { have: 1, want: 3 }));
                    unreachable += 1;
                }
            }
        }

        assert!(unreachable > 0);
        let mut roles = roles(&ledger).await;
        roles.sort();
        assert_eq!(roles, vec!["control-plane/cluster-init", "control-plane/ha"]);
    }

    #[tokio::test]
    async fn test_no_distro_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = MemoryLedger::new();
        let mut a = agent(dir.path(), "a", "10.1.0.1", &ledger, |c| {
            c.p2p.role = Some("worker".into());
        });
        std::fs::remove_file(dir.path().join("a/usr/bin/k3s")).unwrap();

        assert!(matches!(a.tick().await, Err(Error::NoDistro)));
        assert!(check_distro(a.config.clone()).is_err());
    }
}
