//! Leader Election
//!
//! Claim-and-verify leadership over the `auto/leader` ledger key. Every
//! node computes the same nominal leader from the advertising set; the
//! nominal leader claims the key when it is empty or stale, and only acts
//! as leader once it reads its own claim back on a later tick.

use crate::error::Result;
use crate::ledger::{apply_ops, Ledger, LedgerOp};
use crate::role::{LEADER_BUCKET, LEADER_KEY};
use crate::state::ClusterSnapshot;

/// Outcome of leadership resolution for one tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Leadership {
    /// This node holds the claim and may schedule
    Leader,
    /// This node is the nominal leader and must claim the key; it will
    /// not act until the claim is read back
    Claim,
    /// Another node leads (or nobody has claimed yet)
    Follower { leader: Option<String> },
}

impl Leadership {
    /// Whether the scheduler may run this tick
    pub fn is_leader(&self) -> bool {
        matches!(self, Leadership::Leader)
    }

    /// Ledger writes this outcome requires
    pub fn ops(&self, node_id: &str) -> Vec<LedgerOp> {
        match self {
            Leadership::Claim => vec![LedgerOp::set(LEADER_BUCKET, LEADER_KEY, node_id)],
            _ => Vec::new(),
        }
    }
}

/// Deterministic nominal leader: the node with the highest CRC32 of its
/// id, ties broken by the id itself. Depends only on the set, not order.
pub fn nominal_leader<S: AsRef<str>>(advertising: &[S]) -> Option<&str> {
    advertising
        .iter()
        .map(|n| n.as_ref())
        .filter(|n| !n.is_empty())
        .max_by(|a, b| {
            crc32fast::hash(a.as_bytes())
                .cmp(&crc32fast::hash(b.as_bytes()))
                .then_with(|| a.cmp(b))
        })
}

/// Decide this node's leadership from the snapshot
pub fn resolve_leadership(node_id: &str, snapshot: &ClusterSnapshot) -> Leadership {
    let claim = snapshot.leader.as_deref();
    let claim_is_live = claim.map(|l| snapshot.is_advertising(l)).unwrap_or(false);

    if !claim_is_live && nominal_leader(&snapshot.advertising) == Some(node_id) {
        return Leadership::Claim;
    }

    if claim == Some(node_id) {
        return Leadership::Leader;
    }

    Leadership::Follower {
        leader: claim.map(str::to_string),
    }
}

/// Applies leadership decisions for one node
pub struct LeaderElector {
    /// This node's ID
    node_id: String,
}

impl LeaderElector {
    /// Create a new elector
    pub fn new(node_id: String) -> Self {
        Self { node_id }
    }

    /// Resolve leadership and write the claim if needed
    pub async fn resolve(&self, ledger: &dyn Ledger, snapshot: &ClusterSnapshot) -> Result<Leadership> {
        let leadership = resolve_leadership(&self.node_id, snapshot);

        match &leadership {
            Leadership::Claim => {
                apply_ops(ledger, &leadership.ops(&self.node_id)).await?;
                tracing::info!("<{}> announcing ourselves as leader, backing off", self.node_id);
            }
            Leadership::Leader => {
                tracing::debug!("<{}> holding leadership", self.node_id);
            }
            Leadership::Follower { leader } => {
                tracing::debug!(
                    "<{}> not a leader, leader is '{}'",
                    self.node_id,
                    leader.as_deref().unwrap_or("")
                );
            }
        }

        Ok(leadership)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedger;
    use std::collections::BTreeMap;

    fn nodes(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("node-{}", i)).collect()
    }

    #[test]
    fn test_nominal_leader_is_order_independent() {
        let mut set = nodes(7);
        let first = nominal_leader(&set).map(str::to_string);
        set.reverse();
        assert_eq!(nominal_leader(&set).map(str::to_string), first);
        assert!(first.is_some());
    }

    #[test]
    fn test_nominal_leader_empty() {
        let empty: Vec<String> = Vec::new();
        assert_eq!(nominal_leader(&empty), None);
    }

    #[test]
    fn test_nominal_leader_stable_in_subsets() {
        let set = nodes(5);
        let leader = nominal_leader(&set).unwrap().to_string();
        let without_other: Vec<String> = set.iter().filter(|n| **n != leader).take(3).cloned().collect();
        let mut with_leader = without_other.clone();
        with_leader.push(leader.clone());
        // The leader still has the max hash in any subset containing it
        assert_eq!(nominal_leader(&with_leader), Some(leader.as_str()));
    }

    #[test]
    fn test_nominal_leader_claims_empty_key() {
        let set = nodes(3);
        let leader = nominal_leader(&set).unwrap().to_string();
        let snapshot = ClusterSnapshot::new(set.clone(), BTreeMap::new(), None);

        assert_eq!(resolve_leadership(&leader, &snapshot), Leadership::Claim);
        for other in set.iter().filter(|n| **n != leader) {
            assert_eq!(
                resolve_leadership(other, &snapshot),
                Leadership::Follower { leader: None }
            );
        }
    }

    #[test]
    fn test_stale_claim_is_superseded() {
        let set = nodes(3);
        let leader = nominal_leader(&set).unwrap().to_string();
        let snapshot = ClusterSnapshot::new(set, BTreeMap::new(), Some("vanished".to_string()));
        assert_eq!(resolve_leadership(&leader, &snapshot), Leadership::Claim);
    }

    #[test]
    fn test_live_claim_is_sticky() {
        let set = nodes(3);
        let nominal = nominal_leader(&set).unwrap().to_string();
        let holder = set.iter().find(|n| **n != nominal).unwrap().clone();
        let snapshot = ClusterSnapshot::new(set, BTreeMap::new(), Some(holder.clone()));

        assert_eq!(resolve_leadership(&holder, &snapshot), Leadership::Leader);
        assert_eq!(
            resolve_leadership(&nominal, &snapshot),
            Leadership::Follower { leader: Some(holder) }
        );
    }

    #[tokio::test]
    async fn test_claim_then_lead_on_next_tick() {
        let set = nodes(4);
        let ledger = MemoryLedger::with_nodes(set.clone());
        let leader = nominal_leader(&set).unwrap().to_string();
        let elector = LeaderElector::new(leader.clone());

        let snapshot = ClusterSnapshot::read(&ledger).await.unwrap();
        assert_eq!(elector.resolve(&ledger, &snapshot).await.unwrap(), Leadership::Claim);

        let snapshot = ClusterSnapshot::read(&ledger).await.unwrap();
        assert_eq!(snapshot.leader.as_deref(), Some(leader.as_str()));
        assert!(elector.resolve(&ledger, &snapshot).await.unwrap().is_leader());
    }

    #[tokio::test]
    async fn test_single_claim_persists_across_ticks() {
        let set = nodes(5);
        let ledger = MemoryLedger::with_nodes(set.clone());
        let electors: Vec<LeaderElector> = set.iter().cloned().map(LeaderElector::new).collect();

        for _ in 0..4 {
            for elector in &electors {
                let snapshot = ClusterSnapshot::read(&ledger).await.unwrap();
                elector.resolve(&ledger, &snapshot).await.unwrap();
            }
        }

        let claims: Vec<_> = ledger
            .writes()
            .await
            .into_iter()
            .filter(|op| matches!(op, LedgerOp::Set { bucket, .. } if bucket == LEADER_BUCKET))
            .collect();
        assert_eq!(claims.len(), 1);

        let snapshot = ClusterSnapshot::read(&ledger).await.unwrap();
        assert_eq!(snapshot.leader.as_deref(), nominal_leader(&set));
    }
}
