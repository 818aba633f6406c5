//! Ledger Module
//!
//! The gossiped, eventually-consistent key/value store shared by every
//! node. The protocol only relies on last-write-wins `get`/`set`/`delete`
//! and on the membership views derived from presence pings.

mod http;
mod memory;

pub use http::HttpLedger;
pub use memory::MemoryLedger;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;

use crate::error::Result;

/// Client view of the shared ledger
///
/// Reads return the latest locally known value and may be stale; writes
/// propagate to peers asynchronously. Empty values are reported as absent.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Read `bucket/key`
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<String>>;

    /// Write `bucket/key`
    async fn set(&self, bucket: &str, key: &str, value: &str) -> Result<()>;

    /// Remove `bucket/key`
    async fn delete(&self, bucket: &str, key: &str) -> Result<()>;

    /// All non-empty entries of a bucket
    async fn entries(&self, bucket: &str) -> Result<BTreeMap<String, String>>;

    /// Peers that announced their presence
    async fn advertising_nodes(&self) -> Result<Vec<String>>;

    /// Peers currently confirmed reachable
    async fn active_nodes(&self) -> Result<Vec<String>>;

    /// Announce this node's presence
    async fn advertise(&self, uuid: &str) -> Result<()>;
}

/// An intended ledger write, produced by the pure tick planners
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerOp {
    /// Write a value
    Set {
        bucket: String,
        key: String,
        value: String,
    },
    /// Remove a key
    Delete { bucket: String, key: String },
}

impl LedgerOp {
    /// Build a set operation
    pub fn set(bucket: &str, key: &str, value: impl Into<String>) -> Self {
        LedgerOp::Set {
            bucket: bucket.to_string(),
            key: key.to_string(),
            value: value.into(),
        }
    }

    /// Build a delete operation
    pub fn delete(bucket: &str, key: &str) -> Self {
        LedgerOp::Delete {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }
}

impl fmt::Display for LedgerOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerOp::Set { bucket, key, value } => write!(f, "set {}/{} = {}", bucket, key, value),
            LedgerOp::Delete { bucket, key } => write!(f, "delete {}/{}", bucket, key),
        }
    }
}

/// Execute planned operations in order, stopping at the first failure
pub async fn apply_ops(ledger: &dyn Ledger, ops: &[LedgerOp]) -> Result<()> {
    for op in ops {
        match op {
            LedgerOp::Set { bucket, key, value } => ledger.set(bucket, key, value).await?,
            LedgerOp::Delete { bucket, key } => ledger.delete(bucket, key).await?,
        }
        tracing::debug!("Ledger: {}", op);
    }
    Ok(())
}
