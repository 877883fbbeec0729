//! Bounded convergence wait used after every topology change
//!
//! Each poll first reads the probe record back. A value that differs from the
//! one written at run start fails the run immediately and is never retried.
//! Only then is membership compared with the expected size.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::client::{ClusterSnapshot, DataClient, ProbeRecord};
use crate::config::VerifierSettings;
use crate::controller::clock::Clock;
use crate::controller::error::{UpgradeError, UpgradeResult};

/// Outcome of a convergence wait that did not hit a fatal error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Convergence {
    Converged {
        snapshot: ClusterSnapshot,
        polls: usize,
        elapsed: Duration,
    },
    TimedOut {
        last_seen: ClusterSnapshot,
        polls: usize,
        elapsed: Duration,
    },
}

impl Convergence {
    pub fn is_converged(&self) -> bool {
        matches!(self, Convergence::Converged { .. })
    }

    pub fn polls(&self) -> usize {
        match self {
            Convergence::Converged { polls, .. } | Convergence::TimedOut { polls, .. } => *polls,
        }
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            Convergence::Converged { elapsed, .. } | Convergence::TimedOut { elapsed, .. } => {
                *elapsed
            }
        }
    }
}

/// Polls a cluster until it reports the expected membership
pub struct ClusterVerifier {
    timeout: Duration,
    poll_interval: Duration,
    clock: Arc<dyn Clock>,
}

impl ClusterVerifier {
    pub fn new(settings: &VerifierSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            timeout: settings.timeout(),
            poll_interval: settings.poll_interval(),
            clock,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wait until `expected` distinct members are reported.
    ///
    /// Polls while the elapsed time is below the budget; a poll that starts
    /// before the budget runs out is always evaluated.
    pub async fn await_members(
        &self,
        site: &str,
        client: &mut dyn DataClient,
        probe: &ProbeRecord,
        expected: usize,
    ) -> UpgradeResult<Convergence> {
        let begin = self.clock.now();
        let mut polls = 0;
        let mut last_seen = ClusterSnapshot::default();

        loop {
            let elapsed = self.clock.now().saturating_duration_since(begin);
            if elapsed >= self.timeout {
                info!(
                    site,
                    expected,
                    observed = last_seen.member_count(),
                    "Improper shutdown detected, servers are: {}",
                    last_seen
                );
                return Ok(Convergence::TimedOut {
                    last_seen,
                    polls,
                    elapsed,
                });
            }

            polls += 1;
            debug!(site, expected, poll = polls, "Attempting remote call to ensure cluster formed properly");

            let value = client.get(&probe.collection, &probe.key).await?;
            if !probe.matches(value.as_deref()) {
                return Err(UpgradeError::DataIntegrity {
                    site: site.to_string(),
                    key: probe.key.clone(),
                    expected: probe.value.clone(),
                    actual: value,
                });
            }

            last_seen = client.topology(&probe.collection).await?;
            if last_seen.member_count() == expected {
                info!(site, expected, polls, "Servers are: {}", last_seen);
                return Ok(Convergence::Converged {
                    snapshot: last_seen,
                    polls,
                    elapsed,
                });
            }

            debug!(
                site,
                expected,
                observed = last_seen.member_count(),
                "Membership not converged yet"
            );
            self.clock.sleep(self.poll_interval).await;
        }
    }
}
