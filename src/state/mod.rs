//! State Management Module
//!
//! Everything the leader derives from the ledger on each tick: the
//! cluster snapshot, leader election and role scheduling. The planners in
//! here are pure and return the ledger writes they intend to make.

mod snapshot;
pub mod election;
pub mod scheduler;

pub use snapshot::ClusterSnapshot;
pub use election::{nominal_leader, resolve_leadership, LeaderElector, Leadership};
pub use scheduler::{RoleScheduler, ScheduleDecision, SchedulePlan, SchedulerConfig};
