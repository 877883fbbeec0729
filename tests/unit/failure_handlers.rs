//! Failure handlers wired into full runs

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use rolling_upgrade::UpgradeError;
use rolling_upgrade::controller::{
    FailureHandler, FailureHandlers, HookError, LogExporter, PauseForAcknowledgement, RunContext,
};
use rolling_upgrade::driver::RunSide;

use crate::common::*;

/// Records how many nodes were running whenever it is invoked
struct Observer {
    sim: SimulatedCluster,
    calls: Arc<AtomicUsize>,
    running_at_call: Arc<AtomicUsize>,
}

#[async_trait]
impl FailureHandler for Observer {
    async fn on_failure(&self, _error: &UpgradeError, ctx: &RunContext<'_>) -> Result<(), HookError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let live: usize = ctx.handles().iter().map(|(h, _)| h.live_count()).sum();
        // Panics here are swallowed by the orchestrator, so report a mismatch as a bogus count
        let running = self.sim.running_nodes();
        self.running_at_call
            .store(if live == running { live } else { usize::MAX }, Ordering::SeqCst);
        Ok(())
    }
}

struct Failing;

#[async_trait]
impl FailureHandler for Failing {
    async fn on_failure(&self, _error: &UpgradeError, _ctx: &RunContext<'_>) -> Result<(), HookError> {
        Err(HookError::Export { failed: 1, total: 1 })
    }
}

struct Panicking;

#[async_trait]
impl FailureHandler for Panicking {
    async fn on_failure(&self, _error: &UpgradeError, _ctx: &RunContext<'_>) -> Result<(), HookError> {
        panic!("handler blew up");
    }
}

fn join_never() -> SimulatedCluster {
    SimulatedCluster::new().with_faults(Faults {
        join_never: true,
        ..Faults::default()
    })
}

// =============================================================================
// Invocation
// =============================================================================

mod invocation_tests {
    use super::*;

    #[tokio::test]
    async fn test_handler_sees_nodes_before_cleanup() {
        let sim = join_never();
        let calls = Arc::new(AtomicUsize::new(0));
        let running = Arc::new(AtomicUsize::new(0));
        let observer = Observer {
            sim: sim.clone(),
            calls: calls.clone(),
            running_at_call: running.clone(),
        };

        sim.orchestrator(config(3))
            .with_failure_handler(observer)
            .perform_upgrade()
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // Three old nodes plus the one that never joined
        assert_eq!(running.load(Ordering::SeqCst), 4);
        assert_eq!(sim.running_nodes(), 0);
    }

    #[tokio::test]
    async fn test_handler_not_invoked_on_success() {
        let sim = SimulatedCluster::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let observer = Observer {
            sim: sim.clone(),
            calls: calls.clone(),
            running_at_call: Arc::new(AtomicUsize::new(0)),
        };

        sim.orchestrator(config(2))
            .with_failure_handler(observer)
            .perform_upgrade()
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_handler_invoked_for_configuration_errors() {
        let sim = SimulatedCluster::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let running = Arc::new(AtomicUsize::new(0));
        let observer = Observer {
            sim: sim.clone(),
            calls: calls.clone(),
            running_at_call: running.clone(),
        };

        sim.orchestrator(same_version_config())
            .with_failure_handler(observer)
            .perform_upgrade()
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(running.load(Ordering::SeqCst), 0);
    }
}

// =============================================================================
// Handler failures never replace the run error
// =============================================================================

mod handler_failure_tests {
    use super::*;

    #[tokio::test]
    async fn test_failing_handler_keeps_original_error() {
        let sim = join_never();
        let err = sim
            .orchestrator(config(2))
            .with_failure_handler(Failing)
            .perform_upgrade()
            .await
            .unwrap_err();

        assert!(matches!(err, UpgradeError::ClusterFormationTimeout { .. }));
        assert_eq!(sim.running_nodes(), 0);
        assert_eq!(sim.artifacts_released(RunSide::From), 1);
    }

    #[tokio::test]
    async fn test_panicking_handler_keeps_original_error() {
        let sim = join_never();
        let err = sim
            .orchestrator(config(2))
            .with_failure_handler(Panicking)
            .perform_upgrade()
            .await
            .unwrap_err();

        assert!(matches!(err, UpgradeError::ClusterFormationTimeout { .. }));
        assert_eq!(sim.running_nodes(), 0);
        assert_eq!(sim.artifacts_released(RunSide::To), 1);
    }

    #[tokio::test]
    async fn test_export_failure_keeps_original_error() {
        let logs = tempfile::tempdir().unwrap();
        let sim = SimulatedCluster::new().with_faults(Faults {
            shrink_never: true,
            fail_export: true,
            ..Faults::default()
        });

        let err = sim
            .orchestrator(config(2))
            .with_failure_handler(LogExporter::new(logs.path()))
            .perform_upgrade()
            .await
            .unwrap_err();

        assert!(matches!(err, UpgradeError::ClusterShrinkTimeout { .. }));
        assert!(!sim.events().iter().any(SimEvent::is_export));
        assert_eq!(sim.running_nodes(), 0);
    }

    #[tokio::test]
    async fn test_handlers_run_in_order_past_failures() {
        let logs = tempfile::tempdir().unwrap();
        let sim = join_never();
        let calls = Arc::new(AtomicUsize::new(0));
        let handlers = FailureHandlers::new()
            .push(Failing)
            .push(LogExporter::new(logs.path()))
            .push(PauseForAcknowledgement::new(&b"\n"[..]))
            .push(Observer {
                sim: sim.clone(),
                calls: calls.clone(),
                running_at_call: Arc::new(AtomicUsize::new(0)),
            });

        let err = sim
            .orchestrator(config(1))
            .with_failure_handler(handlers)
            .perform_upgrade()
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // One old node and one new node exported
        let exported = sim.events().iter().filter(|e| e.is_export()).count();
        assert_eq!(exported, 2);
        assert_eq!(sim.running_nodes(), 0);
    }
}
