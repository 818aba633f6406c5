//! HTTP Ledger Client
//!
//! Talks to the REST API of the local gossip daemon. Buckets are
//! namespaced by the network id so several clusters can share one daemon.
//!
//! Endpoints:
//!   GET    /api/ledger/{bucket}              - bucket contents (JSON object)
//!   GET    /api/ledger/{bucket}/{key}        - single value (JSON string)
//!   PUT    /api/ledger/{bucket}/{key}/{val}  - write
//!   DELETE /api/ledger/{bucket}/{key}        - delete
//!
//! Membership is derived from the `ping` bucket. A node advertises while its
//! RFC3339 ping is younger than the advertise window, and is active while the
//! ping is younger than the (shorter) active window. Pings are never deleted,
//! so a vanished node drops out once its last ping ages past the window.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{StatusCode, Url};

use crate::config::LedgerConfig;
use crate::error::{Error, Result};
use crate::ledger::Ledger;
use crate::role::PING_BUCKET;

/// Ledger client backed by the gossip daemon's HTTP API
pub struct HttpLedger {
    client: reqwest::Client,
    base: Url,
    network_id: String,
    active_window: chrono::Duration,
    advertise_window: chrono::Duration,
}

impl HttpLedger {
    /// Create a new client from configuration
    pub fn new(config: &LedgerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        let address = if config.api_address.contains("://") {
            config.api_address.clone()
        } else {
            format!("http://{}", config.api_address)
        };
        let base = Url::parse(&address)
            .map_err(|e| Error::Config(format!("invalid ledger.api_address '{}': {}", address, e)))?;

        Ok(Self {
            client,
            base,
            network_id: config.network_id.clone(),
            active_window: chrono::Duration::seconds(config.active_window_secs as i64),
            advertise_window: chrono::Duration::seconds(config.advertise_window_secs as i64),
        })
    }

    /// Bucket name as stored by the daemon
    fn namespaced(&self, bucket: &str) -> String {
        format!("{}-{}", self.network_id, bucket)
    }

    /// Build an API URL from path segments
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| Error::Config(format!("ledger API address {} cannot be a base", self.base)))?
            .pop_if_empty()
            .extend(["api", "ledger"])
            .extend(segments);
        Ok(url)
    }

    fn check(status: StatusCode, what: &str) -> Result<()> {
        if status.is_success() {
            Ok(())
        } else {
            Err(Error::Ledger(format!("{} returned {}", what, status)))
        }
    }

    /// Pings keyed by node, with unparsable timestamps dropped
    async fn pings(&self) -> Result<BTreeMap<String, DateTime<Utc>>> {
        let raw = self.entries(PING_BUCKET).await?;
        Ok(raw
            .into_iter()
            .filter_map(|(node, stamp)| {
                DateTime::parse_from_rfc3339(&stamp)
                    .ok()
                    .map(|t| (node, t.with_timezone(&Utc)))
            })
            .collect())
    }

    /// Nodes whose last ping is younger than `window`
    async fn pinged_within(&self, window: chrono::Duration) -> Result<Vec<String>> {
        let cutoff = Utc::now() - window;
        Ok(self
            .pings()
            .await?
            .into_iter()
            .filter(|(_, seen)| *seen > cutoff)
            .map(|(node, _)| node)
            .collect())
    }
}

#[async_trait]
impl Ledger for HttpLedger {
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<String>> {
        let url = self.url(&[&self.namespaced(bucket), key])?;
        let response = self.client.get(url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::check(response.status(), &format!("get {}/{}", bucket, key))?;

        let value: serde_json::Value = response.json().await?;
        Ok(match value {
            serde_json::Value::String(s) if !s.is_empty() => Some(s),
            serde_json::Value::Null => None,
            serde_json::Value::String(_) => None,
            other => Some(other.to_string()),
        })
    }

    async fn set(&self, bucket: &str, key: &str, value: &str) -> Result<()> {
        let url = self.url(&[&self.namespaced(bucket), key, value])?;
        let response = self.client.put(url).send().await?;
        Self::check(response.status(), &format!("set {}/{}", bucket, key))
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        let url = self.url(&[&self.namespaced(bucket), key])?;
        let response = self.client.delete(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::check(response.status(), &format!("delete {}/{}", bucket, key))
    }

    async fn entries(&self, bucket: &str) -> Result<BTreeMap<String, String>> {
        let url = self.url(&[&self.namespaced(bucket)])?;
        let response = self.client.get(url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(BTreeMap::new());
        }
        Self::check(response.status(), &format!("list {}", bucket))?;

        let raw: BTreeMap<String, serde_json::Value> = response.json().await?;
        Ok(raw
            .into_iter()
            .filter_map(|(k, v)| match v {
                serde_json::Value::String(s) if !s.is_empty() => Some((k, s)),
                serde_json::Value::String(_) | serde_json::Value::Null => None,
                other => Some((k, other.to_string())),
            })
            .collect())
    }

    async fn advertising_nodes(&self) -> Result<Vec<String>> {
        self.pinged_within(self.advertise_window).await
    }

    async fn active_nodes(&self) -> Result<Vec<String>> {
        self.pinged_within(self.active_window).await
    }

    async fn advertise(&self, uuid: &str) -> Result<()> {
        self.set(PING_BUCKET, uuid, &Utc::now().to_rfc3339()).await
    }
}
