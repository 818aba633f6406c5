//! Role Scheduler
//!
//! Runs only on the resolved leader. Each call looks at a fresh snapshot
//! and makes at most one ordering-relevant decision: evict departed nodes,
//! place the cluster-init control plane, grow the HA control plane by one,
//! or hand out worker roles. The next decision is made on a later tick,
//! after the previous write had time to propagate.

use rand::Rng;

use crate::config::WolfKubeConfig;
use crate::error::{Error, Result};
use crate::ledger::LedgerOp;
use crate::role::{Role, ROLE_BUCKET};
use crate::state::ClusterSnapshot;

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// This node's ID
    pub node_id: String,
    /// Minimum advertising nodes before anything is scheduled
    pub minimum_nodes: usize,
    /// HA control plane requested
    pub ha_enabled: bool,
    /// Target number of `control-plane/ha` nodes
    pub ha_target: Option<usize>,
    /// Evict roles of nodes that stopped advertising
    pub dynamic_roles: bool,
    /// This node has a statically configured role and is never scheduled
    pub has_static_role: bool,
}

impl SchedulerConfig {
    /// Build from the agent configuration
    pub fn from_config(config: &WolfKubeConfig, node_id: String) -> Self {
        Self {
            node_id,
            minimum_nodes: config.minimum_nodes(),
            ha_enabled: config.ha_enabled(),
            ha_target: config.ha_target(),
            dynamic_roles: config.p2p.dynamic_roles,
            has_static_role: config.static_role().is_some(),
        }
    }
}

/// What the scheduler decided this tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleDecision {
    /// Too few advertising nodes
    NotEnoughNodes { have: usize, need: usize },
    /// Role entries of departed nodes are removed
    Evict(Vec<String>),
    /// A node becomes the cluster-init control plane
    AssignControlPlane { node: String, role: Role },
    /// A node joins the HA control plane
    AssignHa(String),
    /// The remaining unassigned nodes become workers
    AssignWorkers(Vec<String>),
    /// Unassigned nodes exist but none may be picked yet
    Waiting,
    /// Every advertising node has a role
    Idle,
}

/// Decision plus the ledger writes that carry it out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulePlan {
    pub decision: ScheduleDecision,
    pub ops: Vec<LedgerOp>,
}

impl SchedulePlan {
    fn without_ops(decision: ScheduleDecision) -> Self {
        Self {
            decision,
            ops: Vec::new(),
        }
    }
}

/// Leader-only role assignment
pub struct RoleScheduler {
    config: SchedulerConfig,
}

impl RoleScheduler {
    /// Create a new scheduler
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    /// Get the scheduler configuration
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Tag used for the cluster-init node
    fn control_plane_role(&self) -> Role {
        if self.config.ha_enabled {
            Role::ControlPlaneClusterInit
        } else {
            Role::ControlPlane
        }
    }

    /// Plan this tick's role changes. Pure: the random source is injected
    /// and the returned ops are not applied.
    pub fn plan<R: Rng>(&self, snapshot: &ClusterSnapshot, rng: &mut R) -> Result<SchedulePlan> {
        let have = snapshot.advertising.len();
        if have < self.config.minimum_nodes {
            return Ok(SchedulePlan::without_ops(ScheduleDecision::NotEnoughNodes {
                have,
                need: self.config.minimum_nodes,
            }));
        }

        // Evict first and stop, so the next decision sees pruned membership
        if self.config.dynamic_roles {
            let departed = snapshot.departed();
            if !departed.is_empty() {
                let ops = departed.iter().map(|n| LedgerOp::delete(ROLE_BUCKET, n)).collect();
                return Ok(SchedulePlan {
                    decision: ScheduleDecision::Evict(departed),
                    ops,
                });
            }
        }

        let unassigned = snapshot.unassigned();
        let candidates: Vec<String> = unassigned
            .iter()
            .filter(|n| !(self.config.has_static_role && **n == self.config.node_id))
            .cloned()
            .collect();

        let control_plane_present = snapshot.count_roles(|r| r.is_cluster_init()) > 0;

        if !control_plane_present && !unassigned.is_empty() {
            let selected = match candidates.len() {
                0 => return Ok(SchedulePlan::without_ops(ScheduleDecision::Waiting)),
                1 => candidates[0].clone(),
                n => candidates[rng.gen_range(0..n)].clone(),
            };
            let role = self.control_plane_role();
            return Ok(SchedulePlan {
                ops: vec![LedgerOp::set(ROLE_BUCKET, &selected, role.tag())],
                decision: ScheduleDecision::AssignControlPlane { node: selected, role },
            });
        }

        if let Some(want) = self.config.ha_target.filter(|_| self.config.ha_enabled) {
            let have = snapshot.count_roles(|r| r == Role::ControlPlaneHa);
            if have < want {
                if let Some(node) = candidates.first() {
                    return Ok(SchedulePlan {
                        ops: vec![LedgerOp::set(ROLE_BUCKET, node, Role::ControlPlaneHa.tag())],
                        decision: ScheduleDecision::AssignHa(node.clone()),
                    });
                }
                if unassigned.is_empty() {
                    return Err(Error::HaTargetUnreachable { have, want });
                }
                return Ok(SchedulePlan::without_ops(ScheduleDecision::Waiting));
            }
        }

        if candidates.is_empty() {
            let decision = if unassigned.is_empty() {
                ScheduleDecision::Idle
            } else {
                ScheduleDecision::Waiting
            };
            return Ok(SchedulePlan::without_ops(decision));
        }

        let ops = candidates
            .iter()
            .map(|n| LedgerOp::set(ROLE_BUCKET, n, Role::Worker.tag()))
            .collect();
        Ok(SchedulePlan {
            decision: ScheduleDecision::AssignWorkers(candidates),
            ops,
        })
    }
}
