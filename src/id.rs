//! Node Identity
//!
//! The UUID a node uses on the ledger. Resolution order:
//! - `node.id` from configuration
//! - the machine id (`/etc/machine-id` under the root directory)
//! - a UUIDv4 generated once and persisted in the state directory

use std::path::PathBuf;

use uuid::Uuid;

use crate::config::WolfKubeConfig;
use crate::error::Result;

/// Machine id path, relative to the root directory
pub const MACHINE_ID_PATH: &str = "etc/machine-id";
/// File holding the generated UUID, inside the state directory
pub const UUID_FILE: &str = "uuid";

/// Resolves the node's ledger UUID
pub struct NodeIdentity<'a> {
    config: &'a WolfKubeConfig,
}

impl<'a> NodeIdentity<'a> {
    pub fn new(config: &'a WolfKubeConfig) -> Self {
        Self { config }
    }

    fn uuid_path(&self) -> PathBuf {
        self.config.state_dir().join(UUID_FILE)
    }

    /// Resolve the UUID, generating and persisting one if needed
    pub fn resolve(&self) -> Result<String> {
        if let Some(id) = self.config.node.id.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            return Ok(id.to_string());
        }

        if let Some(id) = read_trimmed(&self.config.root_path(MACHINE_ID_PATH)) {
            return Ok(id);
        }

        let path = self.uuid_path();
        if let Some(id) = read_trimmed(&path) {
            return Ok(id);
        }

        let id = Uuid::new_v4().to_string();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, &id)?;
        tracing::info!("Generated node UUID {}", id);
        Ok(id)
    }
}

fn read_trimmed(path: &std::path::Path) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    let content = content.trim();
    if content.is_empty() {
        None
    } else {
        Some(content.to_string())
    }
}
