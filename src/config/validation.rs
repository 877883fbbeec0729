//! Validation of an upgrade configuration before any node is started

use crate::config::{ConfigError, UpgradeConfiguration};

/// Minimum number of nodes per site
pub const MIN_NODES: usize = 1;

/// Maximum number of nodes per site (arbitrary limit for a local container engine)
pub const MAX_NODES: usize = 32;

/// Validate the configuration
pub fn validate_configuration(config: &UpgradeConfiguration) -> Result<(), ConfigError> {
    validate_versions(config)?;
    validate_node_count(config.node_count)?;
    validate_protocol(&config.cluster_protocol)?;
    validate_verifier(config)?;
    Ok(())
}

fn validate_versions(config: &UpgradeConfiguration) -> Result<(), ConfigError> {
    if config.version_from == config.version_to {
        return Err(ConfigError::SameVersion(config.version_to.clone()));
    }
    Ok(())
}

fn validate_node_count(count: usize) -> Result<(), ConfigError> {
    if !(MIN_NODES..=MAX_NODES).contains(&count) {
        return Err(ConfigError::InvalidNodeCount {
            count,
            min: MIN_NODES,
            max: MAX_NODES,
        });
    }
    Ok(())
}

fn validate_protocol(protocol: &str) -> Result<(), ConfigError> {
    if protocol.trim().is_empty() || protocol.contains(char::is_whitespace) {
        return Err(ConfigError::InvalidSetting {
            field: "clusterProtocol",
            reason: format!("'{}' is not a valid transport stack name", protocol),
        });
    }
    Ok(())
}

fn validate_verifier(config: &UpgradeConfiguration) -> Result<(), ConfigError> {
    let verifier = &config.settings.verifier;
    if verifier.poll_interval_seconds == 0 {
        return Err(ConfigError::InvalidSetting {
            field: "verifier.pollIntervalSeconds",
            reason: "must be greater than zero".to_string(),
        });
    }
    if verifier.timeout_seconds == 0 {
        return Err(ConfigError::InvalidSetting {
            field: "verifier.timeoutSeconds",
            reason: "must be greater than zero".to_string(),
        });
    }
    if verifier.poll_interval_seconds > verifier.timeout_seconds {
        tracing::warn!(
            "Poll interval {}s exceeds timeout {}s, only one poll will run per convergence wait",
            verifier.poll_interval_seconds,
            verifier.timeout_seconds
        );
    }
    Ok(())
}
