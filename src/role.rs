//! Node Roles
//!
//! Role tags as stored on the ledger under the `role` bucket, plus the
//! bucket/key names shared by the scheduler and the bootstrap machines.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Ledger bucket holding one role tag per node
pub const ROLE_BUCKET: &str = "role";
/// Ledger bucket holding each node's cluster network address
pub const IP_BUCKET: &str = "ip";
/// Ledger bucket used for membership pings
pub const PING_BUCKET: &str = "ping";
/// Bucket and key of the leader claim (`auto/leader`)
pub const LEADER_BUCKET: &str = "auto";
pub const LEADER_KEY: &str = "leader";
/// Bucket and key of the address workers and HA peers dial
pub const CONTROL_PLANE_BUCKET: &str = "control-plane";
pub const CONTROL_PLANE_IP_KEY: &str = "ip";
/// Published kubeconfig (`kubeconfig/control-plane`)
pub const KUBECONFIG_BUCKET: &str = "kubeconfig";
pub const KUBECONFIG_KEY: &str = "control-plane";
/// Join tokens all live under the `token` key of their bucket
pub const TOKEN_KEY: &str = "token";
pub const NODE_TOKEN_BUCKET: &str = "nodetoken";
pub const WORKER_TOKEN_BUCKET: &str = "workertoken";
pub const CONTROLLER_TOKEN_BUCKET: &str = "controllertoken";

/// Role a node plays in the Kubernetes cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Single control-plane node (no HA)
    ControlPlane,
    /// Control-plane node that initializes the datastore for HA peers
    ControlPlaneClusterInit,
    /// Control-plane replica joining the cluster-init node
    ControlPlaneHa,
    /// Worker node
    Worker,
}

impl Role {
    /// Canonical tag written to the ledger
    pub fn tag(&self) -> &'static str {
        match self {
            Role::ControlPlane => "control-plane",
            Role::ControlPlaneClusterInit => "control-plane/cluster-init",
            Role::ControlPlaneHa => "control-plane/ha",
            Role::Worker => "worker",
        }
    }

    /// Parse a ledger tag, accepting the legacy `master*` aliases.
    /// An empty tag means "unassigned" and yields `None`.
    pub fn from_tag(tag: &str) -> Result<Option<Role>> {
        let role = match tag.trim() {
            "" => return Ok(None),
            "control-plane" | "master" => Role::ControlPlane,
            "control-plane/cluster-init" | "master/clusterinit" => Role::ControlPlaneClusterInit,
            "control-plane/ha" | "master/ha" => Role::ControlPlaneHa,
            "worker" => Role::Worker,
            other => return Err(Error::InvalidRole(other.to_string())),
        };
        Ok(Some(role))
    }

    /// Whether this role runs a control-plane service
    pub fn is_control_plane(&self) -> bool {
        !matches!(self, Role::Worker)
    }

    /// Whether this role owns cluster initialization
    pub fn is_cluster_init(&self) -> bool {
        matches!(self, Role::ControlPlane | Role::ControlPlaneClusterInit)
    }

    /// Whether this role joins an existing control plane
    pub fn is_ha_join(&self) -> bool {
        matches!(self, Role::ControlPlaneHa)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Role::from_tag(s)?.ok_or_else(|| Error::InvalidRole(s.to_string()))
    }
}

/// A statically configured role (`p2p.role`), which may also be `auto`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaticRole {
    /// Let the scheduler decide
    Auto,
    /// Fixed by configuration
    Fixed(Role),
}

impl FromStr for StaticRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim() == "auto" {
            return Ok(StaticRole::Auto);
        }
        Ok(StaticRole::Fixed(s.parse()?))
    }
}
