//! Error types for a rolling upgrade run
//!
//! Every variant aborts the run. They are classified so the binary can map
//! them to exit codes and so callers can tell a slow cluster from lost data:
//! - **Permanent**: configuration errors detected before any node starts
//! - **Timeout**: membership did not converge within the verifier budget
//! - **Data loss**: the probe record changed or disappeared

use std::time::Duration;
use thiserror::Error;

use crate::client::{ClientError, ClusterSnapshot};
use crate::config::ConfigError;
use crate::driver::DriverError;

/// Error variants for a rolling upgrade run
#[derive(Error, Debug)]
pub enum UpgradeError {
    // ============================================
    // Permanent Errors (detected before any node starts)
    // ============================================
    /// Invalid versions, node count or settings
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    // ============================================
    // Convergence Errors
    // ============================================
    /// Baseline cluster did not report the expected member count
    #[error(
        "Node count does not match: {last_seen} didn't have {expected} members (site {site})"
    )]
    MembershipMismatch {
        site: String,
        expected: usize,
        last_seen: ClusterSnapshot,
    },

    /// A new node never joined in time
    #[error(
        "Servers did not cluster within {}s, assuming error (site {site}, expected {expected}, servers are only {last_seen})",
        timeout.as_secs()
    )]
    ClusterFormationTimeout {
        site: String,
        expected: usize,
        last_seen: ClusterSnapshot,
        timeout: Duration,
    },

    /// The cluster did not shrink back after a node was stopped
    #[error(
        "Servers did not shut down properly within {}s, assuming error (site {site}, expected {expected}, servers are {last_seen})",
        timeout.as_secs()
    )]
    ClusterShrinkTimeout {
        site: String,
        expected: usize,
        last_seen: ClusterSnapshot,
        timeout: Duration,
    },

    // ============================================
    // Data Loss
    // ============================================
    /// Probe value read back differs from the value written at run start
    #[error(
        "Remote cache returned {} instead of {expected} for key {key} (site {site})",
        actual.as_deref().unwrap_or("nothing")
    )]
    DataIntegrity {
        site: String,
        key: String,
        expected: String,
        actual: Option<String>,
    },

    // ============================================
    // Collaborator Errors
    // ============================================
    /// Node start, stop or export failed
    #[error("Node lifecycle error: {0}")]
    Lifecycle(#[from] DriverError),

    /// Probe or topology request failed outright
    #[error("Data client error: {0}")]
    Client(#[from] ClientError),

    // ============================================
    // Internal Errors
    // ============================================
    /// Step issued out of order
    #[error("Invalid transition from {from} on {event}: {reason}")]
    InvalidTransition {
        from: String,
        event: String,
        reason: String,
    },

    /// The run panicked; resources were still released
    #[error("Run aborted: {0}")]
    Aborted(String),
}

impl UpgradeError {
    /// Returns true if membership failed to converge within the budget
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            UpgradeError::ClusterFormationTimeout { .. } | UpgradeError::ClusterShrinkTimeout { .. }
        )
    }

    /// Returns true if this error was detected before any node started
    pub fn is_permanent(&self) -> bool {
        matches!(self, UpgradeError::Configuration(_))
    }

    /// Returns true if the probe record was lost or changed
    pub fn is_data_loss(&self) -> bool {
        matches!(self, UpgradeError::DataIntegrity { .. })
    }

    /// Short, stable name used for metrics labels and reports
    pub fn kind(&self) -> &'static str {
        match self {
            UpgradeError::Configuration(_) => "configuration",
            UpgradeError::MembershipMismatch { .. } => "membership_mismatch",
            UpgradeError::ClusterFormationTimeout { .. } => "cluster_formation_timeout",
            UpgradeError::ClusterShrinkTimeout { .. } => "cluster_shrink_timeout",
            UpgradeError::DataIntegrity { .. } => "data_integrity",
            UpgradeError::Lifecycle(_) => "lifecycle",
            UpgradeError::Client(_) => "client",
            UpgradeError::InvalidTransition { .. } => "invalid_transition",
            UpgradeError::Aborted(_) => "aborted",
        }
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            UpgradeError::Configuration(_) => 2,
            UpgradeError::MembershipMismatch { .. }
            | UpgradeError::ClusterFormationTimeout { .. }
            | UpgradeError::ClusterShrinkTimeout { .. } => 3,
            UpgradeError::DataIntegrity { .. } => 4,
            UpgradeError::Lifecycle(_) | UpgradeError::Client(_) => 5,
            UpgradeError::InvalidTransition { .. } | UpgradeError::Aborted(_) => 1,
        }
    }
}

/// Result type for upgrade operations
pub type UpgradeResult<T> = std::result::Result<T, UpgradeError>;
