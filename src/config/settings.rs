//! Run tunables loaded from an optional YAML file
//!
//! Every field has a default matching the server test driver, so an empty
//! file (or no file at all) yields a working configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Tunables for a rolling upgrade run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RunSettings {
    /// Convergence wait budget and poll interval
    pub verifier: VerifierSettings,
    /// Name of the replicated test collection
    pub cache_name: String,
    /// Sentinel record written once and re-read on every poll
    pub probe: ProbeSettings,
    /// Credentials of the server admin user
    pub credentials: Credentials,
    /// Container engine and server image layout
    pub server: ServerSettings,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            verifier: VerifierSettings::default(),
            cache_name: "rolling-upgrade".to_string(),
            probe: ProbeSettings::default(),
            credentials: Credentials::default(),
            server: ServerSettings::default(),
        }
    }
}

impl RunSettings {
    /// Load settings from a YAML file; missing fields fall back to defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse settings from a YAML document
    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
    }
}

/// Bounded convergence wait used after every topology change
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VerifierSettings {
    pub timeout_seconds: u64,
    pub poll_interval_seconds: u64,
}

impl Default for VerifierSettings {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            poll_interval_seconds: 5,
        }
    }
}

impl VerifierSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProbeSettings {
    pub key: String,
    pub value: String,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            key: "foo".to_string(),
            value: "bar".to_string(),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            username: "admin".to_string(),
            password: "strongPassword".to_string(),
        }
    }
}

// Keep the password out of logs
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Container engine and server image layout
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerSettings {
    /// Container engine binary (`docker` or `podman`)
    pub engine: String,
    /// Repository used for release identifiers
    pub image_repository: String,
    /// Base tag for images built from local directories (`-from`/`-to` appended)
    pub snapshot_image: String,
    /// Image the snapshot build starts from
    pub snapshot_base_image: String,
    /// Network all nodes of a run attach to
    pub network: String,
    /// Client endpoint port
    pub port: u16,
    /// Server installation root inside the node
    pub server_home: String,
    /// How long a node may take to report ready
    pub startup_timeout_seconds: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            engine: "docker".to_string(),
            image_repository: "quay.io/infinispan/server".to_string(),
            snapshot_image: "localhost/infinispan/server-snapshot".to_string(),
            snapshot_base_image: "registry.access.redhat.com/ubi9/openjdk-17-runtime".to_string(),
            network: "rolling-upgrade".to_string(),
            port: 11222,
            server_home: "/opt/infinispan/server".to_string(),
            startup_timeout_seconds: 120,
        }
    }
}

impl ServerSettings {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_seconds)
    }

    /// Path of a named file set (e.g. `log`, `data`) inside a node
    pub fn fileset_path(&self, fileset: &str) -> String {
        format!("{}/{}", self.server_home.trim_end_matches('/'), fileset)
    }
}
