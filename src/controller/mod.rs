pub mod cleanup;
pub mod clock;
pub mod context;
pub mod error;
pub mod failure;
pub mod orchestrator;
pub mod state_machine;
pub mod verifier;

pub use cleanup::{CleanupReport, release_run};
pub use clock::{Clock, ManualClock, TokioClock};
pub use context::{RunContext, SiteRun};
pub use error::{UpgradeError, UpgradeResult};
pub use failure::{FailureHandler, FailureHandlers, HookError, LogExporter, PauseForAcknowledgement};
pub use orchestrator::{NodeReport, SiteReport, UpgradeOrchestrator, UpgradeReport, generate_run_id};
pub use state_machine::{RollingEvent, RollingPhase, RollingState, RollingStateMachine};
pub use verifier::{ClusterVerifier, Convergence};
