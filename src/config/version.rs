//! Version references for the "from" and "to" sides of a rolling upgrade
//!
//! A version is given on the command line in one of three forms:
//! - a bare release identifier (`15.0.3.Final`), pulled from the server image repository
//! - `image://<name>` for an image already present in the local container engine
//! - `file://<path>` for a local server distribution, built into an ephemeral image per run
//!
//! The string is parsed exactly once into a [`VersionReference`]; drivers never
//! sniff prefixes again.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Prefix selecting a local container image
pub const IMAGE_PREFIX: &str = "image://";

/// Prefix selecting a local server directory
pub const DIRECTORY_PREFIX: &str = "file://";

/// A server version to run, resolved once at configuration time
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum VersionReference {
    /// Named release published in the server image repository
    Release(String),
    /// Image available to the local container engine
    Image(String),
    /// Local server distribution directory
    Directory(PathBuf),
}

impl VersionReference {
    /// Returns true if running this version requires building an ephemeral image
    pub fn is_ephemeral(&self) -> bool {
        matches!(self, VersionReference::Directory(_))
    }

    /// Short, filesystem and container-name safe label for this version.
    ///
    /// Directory references are trimmed down to the directory name.
    pub fn label(&self) -> String {
        let raw = match self {
            VersionReference::Release(id) => id.clone(),
            VersionReference::Image(name) => name.rsplit('/').next().unwrap_or(name).to_string(),
            VersionReference::Directory(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.to_string_lossy().to_string()),
        };
        sanitize_label(&raw)
    }

    /// Local directory backing this version, if any
    pub fn directory(&self) -> Option<&Path> {
        match self {
            VersionReference::Directory(path) => Some(path),
            _ => None,
        }
    }
}

impl FromStr for VersionReference {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(ConfigError::InvalidVersion {
                value: s.to_string(),
                reason: "version reference is empty",
            });
        }

        if let Some(image) = trimmed.strip_prefix(IMAGE_PREFIX) {
            if image.is_empty() {
                return Err(ConfigError::InvalidVersion {
                    value: s.to_string(),
                    reason: "image reference has no image name",
                });
            }
            return Ok(VersionReference::Image(image.to_string()));
        }

        if let Some(dir) = trimmed.strip_prefix(DIRECTORY_PREFIX) {
            if dir.is_empty() {
                return Err(ConfigError::InvalidVersion {
                    value: s.to_string(),
                    reason: "directory reference has no path",
                });
            }
            return Ok(VersionReference::Directory(PathBuf::from(dir)));
        }

        if trimmed.contains("://") {
            return Err(ConfigError::InvalidVersion {
                value: s.to_string(),
                reason: "unsupported scheme, expected image:// or file://",
            });
        }

        Ok(VersionReference::Release(trimmed.to_string()))
    }
}

impl fmt::Display for VersionReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionReference::Release(id) => write!(f, "{}", id),
            VersionReference::Image(name) => write!(f, "{}{}", IMAGE_PREFIX, name),
            VersionReference::Directory(path) => write!(f, "{}{}", DIRECTORY_PREFIX, path.display()),
        }
    }
}

/// Replace anything outside `[A-Za-z0-9._-]` with `-`
fn sanitize_label(raw: &str) -> String {
    let label: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    if label.is_empty() {
        "unknown".to_string()
    } else {
        label
    }
}
