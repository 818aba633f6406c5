//! WolfKube - Coordinator-less Kubernetes Bootstrap
//!
//! Turns independently booting machines that share only a gossiped,
//! eventually-consistent key/value ledger into a Kubernetes cluster.
//! Every node runs the same agent; the cluster converges on one control
//! plane, optional HA replicas and workers through repeated, idempotent
//! ticks over the shared ledger.
//!
//! # Architecture
//!
//! Each tick a node advertises itself, resolves leadership with a
//! claim-and-verify protocol on `auto/leader`, and, when leading, lets
//! the role scheduler make at most one ordering-relevant assignment.
//! Every node then drives its own bootstrap state machine from the role
//! the ledger holds for it.
//!
//! # Features
//!
//! - Deterministic leader pick with a one-tick claim back-off
//! - Role scheduling with HA sizing and dead-node eviction
//! - k3s and k0s strategies, systemd and OpenRC services
//! - Join material propagation (tokens, kubeconfig, control-plane IP)
//! - Optional kube-vip virtual IP
//! - In-memory ledger for multi-node simulation

pub mod agent;
pub mod bootstrap;
pub mod config;
pub mod distro;
pub mod error;
pub mod id;
pub mod kubevip;
pub mod ledger;
pub mod net;
pub mod role;
pub mod service;
pub mod state;

pub use config::WolfKubeConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::agent::{Agent, TickReport};
    pub use crate::bootstrap::{BootstrapContext, BootstrapOutcome, WaitReason};
    pub use crate::config::WolfKubeConfig;
    pub use crate::distro::{Distro, JoinInfo, NodeDescriptor};
    pub use crate::error::{Error, Result};
    pub use crate::ledger::{HttpLedger, Ledger, LedgerOp, MemoryLedger};
    pub use crate::role::Role;
    pub use crate::state::{ClusterSnapshot, LeaderElector, Leadership, RoleScheduler};
}
