//! Command line surface

use std::path::PathBuf;

use clap::{ArgAction, Parser};

use crate::config::{ConfigError, RunSettings, UpgradeConfiguration, VersionReference};
use crate::controller::failure::{FailureHandlers, LogExporter, PauseForAcknowledgement};

#[derive(Parser, Debug)]
#[command(name = "rolling-upgrade")]
#[command(
    about = "Rolls a replicated cache cluster from one server version to another, node by node",
    long_about = None
)]
pub struct Cli {
    /// Old version to migrate from: a release at the image repository,
    /// image://<local image> or file://<server directory>
    #[arg(value_name = "VERSION_FROM")]
    pub version_from: VersionReference,

    /// New version to migrate to, in the same forms as VERSION_FROM
    #[arg(value_name = "VERSION_TO")]
    pub version_to: VersionReference,

    /// How many nodes to start up and roll over
    #[arg(short = 'n', long = "nodes", default_value_t = 3)]
    pub node_count: usize,

    /// Enables cross-site rolling upgrade (two independent sites)
    #[arg(short = 'x', long, default_value_t = false)]
    pub xsite: bool,

    /// Cluster transport stack
    #[arg(short = 'p', long, default_value = "tcp")]
    pub protocol: String,

    /// Export server log files when the run fails
    #[arg(short = 'd', long, default_value_t = false)]
    pub dump_logs: bool,

    /// Wait for enter before releasing nodes when the run fails
    #[arg(short = 'w', long, default_value_t = false)]
    pub wait: bool,

    /// Old and new node pairs share a persisted data volume
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub shared_data_mount: bool,

    /// Directory server log files are exported to
    #[arg(long, default_value = ".")]
    pub log_dir: PathBuf,

    /// YAML file with run settings
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Write Prometheus metrics to this file when the run ends
    #[arg(long, value_name = "FILE")]
    pub metrics_file: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl Cli {
    /// Build the run configuration, loading settings if a file was given
    pub fn configuration(&self) -> Result<UpgradeConfiguration, ConfigError> {
        let settings = match &self.config {
            Some(path) => RunSettings::load(path)?,
            None => RunSettings::default(),
        };
        Ok(UpgradeConfiguration {
            version_from: self.version_from.clone(),
            version_to: self.version_to.clone(),
            node_count: self.node_count,
            cluster_protocol: self.protocol.clone(),
            xsite: self.xsite,
            shared_data_mount: self.shared_data_mount,
            settings,
        })
    }

    /// Failure handlers selected on the command line: export first, then pause
    pub fn failure_handlers(&self) -> FailureHandlers {
        let mut handlers = FailureHandlers::new();
        if self.dump_logs {
            handlers = handlers.push(LogExporter::new(self.log_dir.clone()));
        }
        if self.wait {
            handlers = handlers.push(PauseForAcknowledgement::stdin());
        }
        handlers
    }

    /// Default log filter directive
    pub fn log_directive(&self) -> &'static str {
        if self.verbose {
            "rolling_upgrade=debug"
        } else {
            "rolling_upgrade=info"
        }
    }
}
