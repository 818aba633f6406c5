//! WolfKube Error Types

use thiserror::Error;

/// Result type alias for WolfKube operations
pub type Result<T> = std::result::Result<T, Error>;

/// WolfKube error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Invalid role '{0}'")]
    InvalidRole(String),

    // Ledger errors
    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Ledger request failed: {0}")]
    Http(#[from] reqwest::Error),

    // Scheduling errors
    #[error("Not enough nodes for HA control plane: {have} control-plane/ha of {want} and no unassigned nodes left")]
    HaTargetUnreachable { have: usize, want: usize },

    // Distro errors
    #[error("No Kubernetes distribution found")]
    NoDistro,

    #[error("No {0} binary found")]
    BinaryNotFound(String),

    #[error("{0} is not yet supported with {1}")]
    Unsupported(String, String),

    // Service errors
    #[error("Service {service} failed to {action}: {reason}")]
    Service {
        service: String,
        action: String,
        reason: String,
    },

    #[error("Command `{command}` failed: {reason}")]
    Command { command: String, reason: String },

    // Encoding errors
    #[error("Decode error: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if this error is an infrastructure failure that the next tick
    /// may recover from on its own
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Ledger(_)
                | Error::Http(_)
                | Error::Service { .. }
                | Error::Command { .. }
                | Error::Io(_)
        )
    }

    /// Check if this error stems from cluster topology or configuration
    pub fn is_topology(&self) -> bool {
        matches!(
            self,
            Error::Config(_)
                | Error::InvalidRole(_)
                | Error::HaTargetUnreachable { .. }
                | Error::NoDistro
                | Error::BinaryNotFound(_)
                | Error::Unsupported(..)
        )
    }
}
