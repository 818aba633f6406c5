//! In-Process Ledger
//!
//! A ledger held entirely in memory. Clones share the same store, so a
//! single instance can stand in for the gossip network between several
//! simulated agents. Membership is controlled explicitly.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::ledger::{Ledger, LedgerOp};

#[derive(Default)]
struct Store {
    buckets: BTreeMap<String, BTreeMap<String, String>>,
    advertising: BTreeSet<String>,
    active: BTreeSet<String>,
    writes: Vec<LedgerOp>,
    fail_writes: bool,
}

/// Shared in-memory ledger
#[derive(Clone, Default)]
pub struct MemoryLedger {
    store: Arc<RwLock<Store>>,
}

impl MemoryLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a ledger where the given nodes are advertising and active
    pub fn with_nodes<I, S>(nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let nodes: BTreeSet<String> = nodes.into_iter().map(Into::into).collect();
        let store = Store {
            advertising: nodes.clone(),
            active: nodes,
            ..Store::default()
        };
        Self {
            store: Arc::new(RwLock::new(store)),
        }
    }

    /// Drop a node from both membership views
    pub async fn remove_member(&self, node: &str) {
        let mut store = self.store.write().await;
        store.advertising.remove(node);
        store.active.remove(node);
    }

    /// Make subsequent writes fail (simulates a broken transport)
    pub async fn fail_writes(&self, fail: bool) {
        self.store.write().await.fail_writes = fail;
    }

    /// All writes observed so far, in order
    pub async fn writes(&self) -> Vec<LedgerOp> {
        self.store.read().await.writes.clone()
    }

    /// Forget the write log
    pub async fn clear_writes(&self) {
        self.store.write().await.writes.clear();
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<String>> {
        let store = self.store.read().await;
        Ok(store
            .buckets
            .get(bucket)
            .and_then(|b| b.get(key))
            .filter(|v| !v.is_empty())
            .cloned())
    }

    async fn set(&self, bucket: &str, key: &str, value: &str) -> Result<()> {
        let mut store = self.store.write().await;
        if store.fail_writes {
            return Err(Error::Ledger(format!("write to {}/{} rejected", bucket, key)));
        }
        store
            .buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        store.writes.push(LedgerOp::set(bucket, key, value));
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        let mut store = self.store.write().await;
        if store.fail_writes {
            return Err(Error::Ledger(format!("delete of {}/{} rejected", bucket, key)));
        }
        if let Some(b) = store.buckets.get_mut(bucket) {
            b.remove(key);
        }
        store.writes.push(LedgerOp::delete(bucket, key));
        Ok(())
    }

    async fn entries(&self, bucket: &str) -> Result<BTreeMap<String, String>> {
        let store = self.store.read().await;
        Ok(store
            .buckets
            .get(bucket)
            .map(|b| {
                b.iter()
                    .filter(|(_, v)| !v.is_empty())
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn advertising_nodes(&self) -> Result<Vec<String>> {
        Ok(self.store.read().await.advertising.iter().cloned().collect())
    }

    async fn active_nodes(&self) -> Result<Vec<String>> {
        Ok(self.store.read().await.active.iter().cloned().collect())
    }

    async fn advertise(&self, uuid: &str) -> Result<()> {
        let mut store = self.store.write().await;
        store.advertising.insert(uuid.to_string());
        store.active.insert(uuid.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_clones_share_state() {
        let a = MemoryLedger::new();
        let b = a.clone();

        a.set("role", "n1", "worker").await.unwrap();
        assert_eq!(b.get("role", "n1").await.unwrap().as_deref(), Some("worker"));

        b.advertise("n2").await.unwrap();
        assert_eq!(a.advertising_nodes().await.unwrap(), vec!["n2".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_values_are_absent() {
        let ledger = MemoryLedger::new();
        ledger.set("role", "n1", "").await.unwrap();
        assert_eq!(ledger.get("role", "n1").await.unwrap(), None);
        assert!(ledger.entries("role").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_membership_control() {
        let ledger = MemoryLedger::with_nodes(["a", "b", "c"]);
        ledger.remove_member("b").await;
        assert_eq!(
            ledger.advertising_nodes().await.unwrap(),
            vec!["a".to_string(), "c".to_string()]
        );
        assert_eq!(ledger.active_nodes().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failing_writes() {
        let ledger = MemoryLedger::new();
        ledger.fail_writes(true).await;
        assert!(ledger.set("role", "n1", "worker").await.is_err());
        assert!(ledger.writes().await.is_empty());
    }
}
