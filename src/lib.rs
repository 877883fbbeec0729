pub mod cli;
pub mod client;
pub mod config;
pub mod controller;
pub mod driver;
pub mod metrics;

pub use client::{ClientConnector, ClientError, ClusterSnapshot, DataClient, ProbeRecord};
pub use config::{ConfigError, RunSettings, UpgradeConfiguration, VersionReference};
pub use controller::{
    ClusterVerifier, FailureHandler, FailureHandlers, UpgradeError, UpgradeOrchestrator,
    UpgradeReport, UpgradeResult, generate_run_id,
};
pub use driver::{ClusterDriver, ClusterHandle, ClusterSpec, DriverError, NodeHandle, RunSide};
pub use metrics::RunMetrics;
