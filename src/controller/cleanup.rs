//! Release of every resource a run created
//!
//! Runs exactly once per run, after any failure handler. Nothing here returns
//! an error: failures are logged and counted so the original run outcome is
//! what the caller sees.

use tracing::{debug, info, warn};

use crate::controller::context::SiteRun;
use crate::driver::{ClusterDriver, ClusterHandle};

/// What cleanup did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    /// Nodes that were still running when cleanup started
    pub nodes_released: usize,
    /// Release steps that failed
    pub failures: usize,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failures == 0
    }
}

/// Stop every remaining node of every site, then delete per-run artifacts.
///
/// Every site is visited even when releasing an earlier one fails.
pub async fn release_run(
    sites: &mut [SiteRun],
    from_driver: &dyn ClusterDriver,
    to_driver: &dyn ClusterDriver,
) -> CleanupReport {
    let mut report = CleanupReport::default();

    for site in sites.iter_mut() {
        // Close the data connection before its members go away
        site.client = None;

        if let Some(handle) = site.from.as_mut() {
            release_handle(handle, from_driver, &mut report).await;
        }
        if let Some(handle) = site.to.as_mut() {
            release_handle(handle, to_driver, &mut report).await;
        }
    }

    for (driver, side) in [(from_driver, "from"), (to_driver, "to")] {
        if let Err(e) = driver.release_artifacts().await {
            warn!(side, "Failed to release run artifacts: {}", e);
            report.failures += 1;
        }
    }

    info!(
        nodes = report.nodes_released,
        failures = report.failures,
        "Released run resources"
    );
    report
}

async fn release_handle(
    handle: &mut ClusterHandle,
    driver: &dyn ClusterDriver,
    report: &mut CleanupReport,
) {
    let running = handle.live_count();
    debug!(
        site = %handle.site(),
        version = %handle.version(),
        running,
        "Stopping cluster"
    );
    match driver.release_cluster(handle).await {
        Ok(()) => report.nodes_released += running,
        Err(e) => {
            warn!(
                site = %handle.site(),
                version = %handle.version(),
                "Failed to stop cluster: {}",
                e
            );
            report.nodes_released += running.saturating_sub(handle.live_count());
            report.failures += 1;
        }
    }
}
