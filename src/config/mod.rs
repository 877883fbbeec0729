//! Run configuration: version references, tunables and validation

pub mod settings;
pub mod validation;
pub mod version;

use std::path::PathBuf;

use thiserror::Error;

pub use settings::{Credentials, ProbeSettings, RunSettings, ServerSettings, VerifierSettings};
pub use validation::{MAX_NODES, MIN_NODES, validate_configuration};
pub use version::{DIRECTORY_PREFIX, IMAGE_PREFIX, VersionReference};

/// Name of the first (and, without cross-site, only) site
pub const PRIMARY_SITE: &str = "site1";

/// Name of the second site in cross-site runs
pub const BACKUP_SITE: &str = "site2";

/// Invalid command line or settings values
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("to and from version {0} cannot be the same!")]
    SameVersion(VersionReference),

    #[error("node count {count} is outside the supported range {min}..={max}")]
    InvalidNodeCount { count: usize, min: usize, max: usize },

    #[error("invalid version reference '{value}': {reason}")]
    InvalidVersion { value: String, reason: &'static str },

    #[error("invalid setting {field}: {reason}")]
    InvalidSetting { field: &'static str, reason: String },

    #[error("failed to read settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Immutable description of one rolling upgrade run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpgradeConfiguration {
    pub version_from: VersionReference,
    pub version_to: VersionReference,
    /// Nodes per site, rolled over one at a time
    pub node_count: usize,
    /// Transport stack the nodes cluster with
    pub cluster_protocol: String,
    /// Run two independent sites instead of one
    pub xsite: bool,
    /// Old/new node pairs share a persisted data volume
    pub shared_data_mount: bool,
    pub settings: RunSettings,
}

impl UpgradeConfiguration {
    /// Configuration with the command line defaults
    pub fn new(version_from: VersionReference, version_to: VersionReference) -> Self {
        Self {
            version_from,
            version_to,
            node_count: 3,
            cluster_protocol: "tcp".to_string(),
            xsite: false,
            shared_data_mount: true,
            settings: RunSettings::default(),
        }
    }

    /// Sites taking part in the run, in processing order
    pub fn sites(&self) -> Vec<String> {
        if self.xsite {
            vec![PRIMARY_SITE.to_string(), BACKUP_SITE.to_string()]
        } else {
            vec![PRIMARY_SITE.to_string()]
        }
    }
}
