//! Cluster Snapshot
//!
//! A consistent-enough local view of membership and role assignments,
//! read fresh from the ledger on every tick and never cached across ticks.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::Result;
use crate::ledger::Ledger;
use crate::role::{Role, LEADER_BUCKET, LEADER_KEY, ROLE_BUCKET};

/// Membership, role map and leader claim as seen by one node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterSnapshot {
    /// Nodes that announced presence (sorted, unique)
    pub advertising: Vec<String>,
    /// Nodes currently reachable (sorted, unique)
    pub active: Vec<String>,
    /// Raw role tags by node, including nodes no longer advertising
    pub roles: BTreeMap<String, String>,
    /// Current `auto/leader` claim
    pub leader: Option<String>,
}

impl ClusterSnapshot {
    /// Build a snapshot from in-memory parts
    pub fn new<I, S>(advertising: I, roles: BTreeMap<String, String>, leader: Option<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let advertising = normalize(advertising);
        Self {
            active: advertising.clone(),
            advertising,
            roles: roles.into_iter().filter(|(_, v)| !v.is_empty()).collect(),
            leader: leader.filter(|l| !l.is_empty()),
        }
    }

    /// Read a snapshot from the ledger
    pub async fn read(ledger: &dyn Ledger) -> Result<Self> {
        let advertising = normalize(ledger.advertising_nodes().await?);
        let active = normalize(ledger.active_nodes().await?);
        let roles = ledger.entries(ROLE_BUCKET).await?;
        let leader = ledger.get(LEADER_BUCKET, LEADER_KEY).await?;

        Ok(Self {
            advertising,
            active,
            roles,
            leader,
        })
    }

    /// Whether a node is currently advertising
    pub fn is_advertising(&self, node: &str) -> bool {
        self.advertising.binary_search_by(|n| n.as_str().cmp(node)).is_ok()
    }

    /// Parsed role of a node; unknown tags are reported as unassigned
    pub fn role_of(&self, node: &str) -> Option<Role> {
        let tag = self.roles.get(node)?;
        match Role::from_tag(tag) {
            Ok(role) => role,
            Err(e) => {
                tracing::warn!("Ignoring role of {}: {}", node, e);
                None
            }
        }
    }

    /// Advertising nodes without a role entry, in sorted order
    pub fn unassigned(&self) -> Vec<String> {
        self.advertising
            .iter()
            .filter(|n| !self.roles.contains_key(n.as_str()))
            .cloned()
            .collect()
    }

    /// Nodes holding a role entry that stopped advertising
    pub fn departed(&self) -> Vec<String> {
        self.roles
            .keys()
            .filter(|n| !self.is_advertising(n))
            .cloned()
            .collect()
    }

    /// Number of role entries parsing to the given predicate
    pub fn count_roles(&self, pred: impl Fn(Role) -> bool) -> usize {
        self.roles
            .values()
            .filter_map(|tag| Role::from_tag(tag).ok().flatten())
            .filter(|r| pred(*r))
            .count()
    }
}

fn normalize<I, S>(nodes: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    nodes
        .into_iter()
        .map(Into::into)
        .filter(|n: &String| !n.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedger;

    #[tokio::test]
    async fn test_read_from_ledger() {
        let ledger = MemoryLedger::with_nodes(["c", "a", "b"]);
        ledger.set(ROLE_BUCKET, "a", "master").await.unwrap();
        ledger.set(ROLE_BUCKET, "gone", "worker").await.unwrap();
        ledger.set(LEADER_BUCKET, LEADER_KEY, "b").await.unwrap();

        let snapshot = ClusterSnapshot::read(&ledger).await.unwrap();
        assert_eq!(snapshot.advertising, vec!["a", "b", "c"]);
        assert_eq!(snapshot.leader.as_deref(), Some("b"));
        assert_eq!(snapshot.role_of("a"), Some(Role::ControlPlane));
        assert_eq!(snapshot.unassigned(), vec!["b", "c"]);
        assert_eq!(snapshot.departed(), vec!["gone"]);
    }

    #[test]
    fn test_unknown_tag_counts_as_assigned_but_unparsed() {
        let roles = BTreeMap::from([("a".to_string(), "banana".to_string())]);
        let snapshot = ClusterSnapshot::new(["a", "b"], roles, None);
        assert_eq!(snapshot.role_of("a"), None);
        assert_eq!(snapshot.unassigned(), vec!["b"]);
        assert_eq!(snapshot.count_roles(|_| true), 0);
    }

    #[test]
    fn test_empty_leader_is_none() {
        let snapshot = ClusterSnapshot::new(["a"], BTreeMap::new(), Some(String::new()));
        assert_eq!(snapshot.leader, None);
    }
}
