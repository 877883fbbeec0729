//! Rolling upgrade orchestration
//!
//! The orchestrator stands up the old-version cluster, then replaces its
//! members one at a time with new-version nodes, verifying membership and the
//! probe record after every topology change.
//!
//! ## Overview
//!
//! 1. Validate the configuration
//! 2. Start `nodeCount` old-version nodes per site, create the test cache and
//!    write the probe record
//! 3. Check the baseline membership
//! 4. For each iteration: start one new node, wait for `nodeCount + 1`
//!    members, stop old node `nodeCount - i - 1`, wait for `nodeCount`
//! 5. On failure run the failure handler
//! 6. Release every node and per-run artifact, exactly once, on every path
//!
//! Sites of a cross-site run are processed one after the other within each
//! step.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::client::{ClientConnector, ClientError, CollectionDefinition, ProbeRecord};
use crate::config::{UpgradeConfiguration, validate_configuration};
use crate::controller::cleanup::{CleanupReport, release_run};
use crate::controller::clock::{Clock, TokioClock};
use crate::controller::context::{RunContext, SiteRun};
use crate::controller::error::{UpgradeError, UpgradeResult};
use crate::controller::failure::FailureHandler;
use crate::controller::state_machine::RollingEvent;
use crate::controller::verifier::{ClusterVerifier, Convergence};
use crate::driver::{ClusterDriver, ClusterHandle, ClusterSpec, DriverError, RunSide};
use crate::metrics::RunMetrics;

/// Unique, container-name safe identifier for a run
pub fn generate_run_id() -> String {
    let suffix: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();
    format!("ru-{}-{}", Utc::now().format("%Y%m%d%H%M%S"), suffix)
}

/// One node left running at the end of a successful run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeReport {
    pub index: usize,
    pub name: String,
    pub address: String,
    pub version: String,
}

/// Outcome of one site
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SiteReport {
    pub site: String,
    /// Completed add/remove iterations
    pub iterations: usize,
    /// Live members when the loop finished
    pub final_members: usize,
    pub nodes: Vec<NodeReport>,
}

impl SiteReport {
    fn from_site(site: &SiteRun) -> Self {
        let nodes: Vec<NodeReport> = site
            .handles()
            .flat_map(|h| h.live_nodes())
            .map(|n| NodeReport {
                index: n.index,
                name: n.name.clone(),
                address: n.address.clone(),
                version: n.version.to_string(),
            })
            .collect();
        Self {
            site: site.name().to_string(),
            iterations: site.state().iterations(),
            final_members: nodes.len(),
            nodes,
        }
    }
}

/// Summary of a successful run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpgradeReport {
    pub run_id: String,
    pub version_from: String,
    pub version_to: String,
    pub node_count: usize,
    pub sites: Vec<SiteReport>,
    pub elapsed_seconds: f64,
}

/// Drives a rolling upgrade across one or two sites
pub struct UpgradeOrchestrator {
    config: UpgradeConfiguration,
    from_driver: Arc<dyn ClusterDriver>,
    to_driver: Arc<dyn ClusterDriver>,
    connector: Arc<dyn ClientConnector>,
    clock: Arc<dyn Clock>,
    failure_handler: Option<Box<dyn FailureHandler>>,
    metrics: Arc<RunMetrics>,
    run_id: String,
}

impl UpgradeOrchestrator {
    pub fn new(
        config: UpgradeConfiguration,
        from_driver: Arc<dyn ClusterDriver>,
        to_driver: Arc<dyn ClusterDriver>,
        connector: Arc<dyn ClientConnector>,
    ) -> Self {
        Self {
            config,
            from_driver,
            to_driver,
            connector,
            clock: Arc::new(TokioClock),
            failure_handler: None,
            metrics: Arc::new(RunMetrics::new()),
            run_id: generate_run_id(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_failure_handler(mut self, handler: impl FailureHandler + 'static) -> Self {
        self.failure_handler = Some(Box::new(handler));
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<RunMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn config(&self) -> &UpgradeConfiguration {
        &self.config
    }

    /// Run the upgrade, releasing every resource before returning.
    ///
    /// The error returned is always the one that aborted the run; failure
    /// handler and cleanup errors are only logged.
    #[instrument(skip(self), fields(run_id = %self.run_id, from = %self.config.version_from, to = %self.config.version_to))]
    pub async fn perform_upgrade(&self) -> UpgradeResult<UpgradeReport> {
        let started = self.clock.now();
        let mut sites: Vec<SiteRun> = self
            .config
            .sites()
            .into_iter()
            .map(|name| SiteRun::new(name, self.config.node_count))
            .collect();

        let outcome = match AssertUnwindSafe(self.drive(&mut sites)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(UpgradeError::Aborted(panic_message(panic.as_ref()))),
        };

        if let Err(error) = &outcome {
            error!(kind = error.kind(), "Rolling upgrade failed: {}", error);
            for site in sites.iter_mut() {
                site.state.fail(error);
            }
            self.run_failure_handler(error, &sites).await;
        }

        let cleanup = self.cleanup(&mut sites).await;
        if !cleanup.is_clean() {
            warn!(failures = cleanup.failures, "Cleanup did not complete cleanly");
        }

        let elapsed = self.clock.now().saturating_duration_since(started);
        match outcome {
            Ok(sites) => {
                self.metrics.record_outcome("success");
                let report = UpgradeReport {
                    run_id: self.run_id.clone(),
                    version_from: self.config.version_from.to_string(),
                    version_to: self.config.version_to.to_string(),
                    node_count: self.config.node_count,
                    sites,
                    elapsed_seconds: elapsed.as_secs_f64(),
                };
                info!(elapsed_seconds = report.elapsed_seconds, "Rolling upgrade completed");
                Ok(report)
            }
            Err(error) => {
                self.metrics.record_outcome(error.kind());
                Err(error)
            }
        }
    }

    async fn drive(&self, sites: &mut [SiteRun]) -> UpgradeResult<Vec<SiteReport>> {
        validate_configuration(&self.config)?;
        for site in sites.iter_mut() {
            site.state.apply(RollingEvent::ConfigurationValidated)?;
        }

        info!(
            "Rolling upgrade from: {} to {} with {} nodes",
            self.config.version_from, self.config.version_to, self.config.node_count
        );

        for site in sites.iter_mut() {
            self.form_source(site).await?;
        }

        for iteration in 0..self.config.node_count {
            for site in sites.iter_mut() {
                self.replace_node(site, iteration).await?;
            }
        }

        for site in sites.iter_mut() {
            site.state.apply(RollingEvent::AllNodesReplaced)?;
        }

        Ok(sites.iter().map(SiteReport::from_site).collect())
    }

    /// Start the old-version cluster, seed it and check its membership
    async fn form_source(&self, site: &mut SiteRun) -> UpgradeResult<()> {
        let node_count = self.config.node_count;
        let version = &self.config.version_from;
        info!(site = %site.name, version = %version, "Starting {} node to version {}", node_count, version);

        let spec = self.cluster_spec(&site.name, RunSide::From, node_count);
        // Registered before starting so cleanup sees partially started clusters
        let handle = site.from.insert(ClusterHandle::new(spec, version.clone()));
        let slots: Vec<usize> = (0..node_count).collect();
        let result = self.from_driver.start_nodes(handle, &slots).await;
        self.record_started(handle, 0);
        result?;

        let address = handle
            .live_nodes()
            .next()
            .map(|n| n.address.clone())
            .ok_or_else(|| DriverError::MissingAddress {
                name: format!("{} node 0", site.name),
            })?;

        debug!(site = %site.name, address = %address, "Connecting data client");
        let mut client = self.connector.connect(&address).await?;

        let probe = self.probe();
        info!(site = %site.name, "Adding cache");
        client
            .create_collection(&CollectionDefinition::replicated(&probe.collection))
            .await?;
        info!(site = %site.name, "Inserting value");
        client.put(&probe.collection, &probe.key, &probe.value).await?;

        let snapshot = client.topology(&probe.collection).await?;
        site.client = Some(client);
        info!(site = %site.name, observed = snapshot.member_count(), "Servers are: {}", snapshot);

        if snapshot.member_count() != node_count {
            return Err(UpgradeError::MembershipMismatch {
                site: site.name.clone(),
                expected: node_count,
                last_seen: snapshot,
            });
        }
        site.state.apply(RollingEvent::BaselineVerified)?;
        Ok(())
    }

    /// One loop iteration: add a new node, then remove an old one
    async fn replace_node(&self, site: &mut SiteRun, iteration: usize) -> UpgradeResult<()> {
        let node_count = self.config.node_count;
        let slot = node_count - iteration - 1;

        let version_to = &self.config.version_to;
        info!(site = %site.name, version = %version_to, iteration, "Starting 1 node to version {}", version_to);
        let spec = self.cluster_spec(&site.name, RunSide::To, node_count + 1);
        let handle = site
            .to
            .get_or_insert_with(|| ClusterHandle::new(spec, version_to.clone()));
        let before = handle.nodes().len();
        let result = self.to_driver.add_node(handle, slot).await;
        self.record_started(handle, before);
        result?;
        site.state.apply(RollingEvent::NewNodeStarted)?;

        let timeout = self.verifier().timeout();
        match self.verify(site, node_count + 1).await? {
            Convergence::Converged { .. } => site.state.apply(RollingEvent::JoinConverged)?,
            Convergence::TimedOut { last_seen, .. } => {
                info!(site = %site.name, "Servers are only: {}", last_seen);
                return Err(UpgradeError::ClusterFormationTimeout {
                    site: site.name.clone(),
                    expected: node_count + 1,
                    last_seen,
                    timeout,
                });
            }
        }

        let version_from = &self.config.version_from;
        info!(site = %site.name, version = %version_from, index = slot, "Shutting down 1 node from version: {}", version_from);
        let from = site.from.as_mut().ok_or_else(|| UpgradeError::InvalidTransition {
            from: site.state.phase().to_string(),
            event: RollingEvent::OldNodeStopped.to_string(),
            reason: "old-version cluster was never started".to_string(),
        })?;
        self.from_driver.stop_node(from, slot).await?;
        self.metrics.record_node_stopped(&site.name, &RunSide::From.to_string());
        site.state.apply(RollingEvent::OldNodeStopped)?;

        match self.verify(site, node_count).await? {
            Convergence::Converged { .. } => site.state.apply(RollingEvent::ShrinkConverged)?,
            Convergence::TimedOut { last_seen, .. } => {
                return Err(UpgradeError::ClusterShrinkTimeout {
                    site: site.name.clone(),
                    expected: node_count,
                    last_seen,
                    timeout,
                });
            }
        }
        Ok(())
    }

    async fn verify(&self, site: &mut SiteRun, expected: usize) -> UpgradeResult<Convergence> {
        let client = site.client.as_deref_mut().ok_or_else(|| {
            ClientError::Unavailable(format!("no data client for site {}", site.name))
        })?;
        let convergence = self
            .verifier()
            .await_members(&site.name, client, &self.probe(), expected)
            .await?;
        self.metrics.record_convergence(
            &site.name,
            convergence.polls(),
            convergence.elapsed().as_secs_f64(),
        );
        Ok(convergence)
    }

    async fn run_failure_handler(&self, error: &UpgradeError, sites: &[SiteRun]) {
        let Some(handler) = self.failure_handler.as_ref() else {
            return;
        };
        let ctx = RunContext {
            config: &self.config,
            run_id: &self.run_id,
            sites,
            from_driver: self.from_driver.as_ref(),
            to_driver: self.to_driver.as_ref(),
        };
        match AssertUnwindSafe(handler.on_failure(error, &ctx)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failure handler failed: {}", e),
            Err(panic) => error!("Failure handler panicked: {}", panic_message(panic.as_ref())),
        }
    }

    async fn cleanup(&self, sites: &mut [SiteRun]) -> CleanupReport {
        let release = release_run(sites, self.from_driver.as_ref(), self.to_driver.as_ref());
        match AssertUnwindSafe(release).catch_unwind().await {
            Ok(report) => report,
            Err(panic) => {
                error!("Cleanup panicked: {}", panic_message(panic.as_ref()));
                CleanupReport {
                    nodes_released: 0,
                    failures: 1,
                }
            }
        }
    }

    fn cluster_spec(&self, site: &str, side: RunSide, expected_members: usize) -> ClusterSpec {
        ClusterSpec {
            site: site.to_string(),
            side,
            protocol: self.config.cluster_protocol.clone(),
            expected_members,
            shared_data_mount: self.config.shared_data_mount,
        }
    }

    fn verifier(&self) -> ClusterVerifier {
        ClusterVerifier::new(&self.config.settings.verifier, self.clock.clone())
    }

    fn probe(&self) -> ProbeRecord {
        let settings = &self.config.settings;
        ProbeRecord {
            collection: settings.cache_name.clone(),
            key: settings.probe.key.clone(),
            value: settings.probe.value.clone(),
        }
    }

    fn record_started(&self, handle: &ClusterHandle, before: usize) {
        let side = handle.side().to_string();
        for _ in before..handle.nodes().len() {
            self.metrics.record_node_started(handle.site(), &side);
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
