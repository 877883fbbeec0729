//! Prometheus metrics for a rolling upgrade run
//!
//! The registry is encoded in the text exposition format once the run ends
//! and written to a file; there is no scrape endpoint.

use std::path::Path;

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;

/// Labels for per-node lifecycle counters
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct NodeLabels {
    pub site: String,
    pub side: String,
}

impl prometheus_client::encoding::EncodeLabelSet for NodeLabels {
    fn encode(
        &self,
        encoder: &mut prometheus_client::encoding::LabelSetEncoder,
    ) -> Result<(), std::fmt::Error> {
        use prometheus_client::encoding::EncodeLabel;
        ("site", self.site.as_str()).encode(encoder.encode_label())?;
        ("side", self.side.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for verifier metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct SiteLabels {
    pub site: String,
}

impl prometheus_client::encoding::EncodeLabelSet for SiteLabels {
    fn encode(
        &self,
        encoder: &mut prometheus_client::encoding::LabelSetEncoder,
    ) -> Result<(), std::fmt::Error> {
        use prometheus_client::encoding::EncodeLabel;
        ("site", self.site.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for run outcomes
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct OutcomeLabels {
    pub outcome: String,
}

impl prometheus_client::encoding::EncodeLabelSet for OutcomeLabels {
    fn encode(
        &self,
        encoder: &mut prometheus_client::encoding::LabelSetEncoder,
    ) -> Result<(), std::fmt::Error> {
        use prometheus_client::encoding::EncodeLabel;
        ("outcome", self.outcome.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Metrics collected over one run
pub struct RunMetrics {
    /// Nodes started per site and side
    pub nodes_started: Family<NodeLabels, Counter>,
    /// Nodes stopped per site and side
    pub nodes_stopped: Family<NodeLabels, Counter>,
    /// Verifier polls per site
    pub verifier_polls: Family<SiteLabels, Counter>,
    /// Time spent waiting for membership to converge
    pub convergence_seconds: Family<SiteLabels, Histogram>,
    /// Runs by outcome (`success` or the error kind)
    pub runs_total: Family<OutcomeLabels, Counter>,

    registry: Registry,
}

impl Default for RunMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RunMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let nodes_started = Family::<NodeLabels, Counter>::default();
        registry.register(
            "rolling_upgrade_nodes_started",
            "Number of server nodes started",
            nodes_started.clone(),
        );

        let nodes_stopped = Family::<NodeLabels, Counter>::default();
        registry.register(
            "rolling_upgrade_nodes_stopped",
            "Number of server nodes stopped during the rolling loop",
            nodes_stopped.clone(),
        );

        let verifier_polls = Family::<SiteLabels, Counter>::default();
        registry.register(
            "rolling_upgrade_verifier_polls",
            "Number of membership polls issued by the verifier",
            verifier_polls.clone(),
        );

        let convergence_seconds = Family::<SiteLabels, Histogram>::new_with_constructor(|| {
            Histogram::new(exponential_buckets(0.5, 2.0, 8))
        });
        registry.register(
            "rolling_upgrade_convergence_seconds",
            "Time until cluster membership converged in seconds",
            convergence_seconds.clone(),
        );

        let runs_total = Family::<OutcomeLabels, Counter>::default();
        registry.register(
            "rolling_upgrade_runs",
            "Number of rolling upgrade runs by outcome",
            runs_total.clone(),
        );

        Self {
            nodes_started,
            nodes_stopped,
            verifier_polls,
            convergence_seconds,
            runs_total,
            registry,
        }
    }

    pub fn record_node_started(&self, site: &str, side: &str) {
        self.nodes_started
            .get_or_create(&NodeLabels {
                site: site.to_string(),
                side: side.to_string(),
            })
            .inc();
    }

    pub fn record_node_stopped(&self, site: &str, side: &str) {
        self.nodes_stopped
            .get_or_create(&NodeLabels {
                site: site.to_string(),
                side: side.to_string(),
            })
            .inc();
    }

    /// Record one finished convergence wait
    pub fn record_convergence(&self, site: &str, polls: usize, elapsed_secs: f64) {
        let labels = SiteLabels {
            site: site.to_string(),
        };
        self.verifier_polls
            .get_or_create(&labels)
            .inc_by(u64::try_from(polls).unwrap_or(u64::MAX));
        self.convergence_seconds
            .get_or_create(&labels)
            .observe(elapsed_secs);
    }

    pub fn record_outcome(&self, outcome: &str) {
        self.runs_total
            .get_or_create(&OutcomeLabels {
                outcome: outcome.to_string(),
            })
            .inc();
    }

    /// Encode metrics to Prometheus text format
    ///
    /// Returns an empty string if encoding fails.
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if let Err(e) = encode(&mut buffer, &self.registry) {
            tracing::error!("Failed to encode metrics: {}", e);
            return String::new();
        }
        buffer
    }

    /// Write the text exposition to `path`
    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, self.encode())
    }
}
