//! Hooks run on an aborted run before resources are released
//!
//! Handlers see the still-running nodes through a [`RunContext`]. Their own
//! failures are logged by the orchestrator and never replace the run error.

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Stdin};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::controller::context::RunContext;
use crate::controller::error::UpgradeError;

/// File set exported from every node on failure
pub const LOG_FILESET: &str = "log";

/// Errors raised by failure handlers
#[derive(Error, Debug)]
pub enum HookError {
    #[error("log export failed for {failed} of {total} nodes")]
    Export { failed: usize, total: usize },

    #[error("failed to read acknowledgement: {0}")]
    Input(#[from] std::io::Error),

    #[error("{} failure handlers failed: {}", .0.len(), join(.0))]
    Multiple(Vec<HookError>),
}

fn join(errors: &[HookError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Invoked once on an aborted run, before cleanup
#[async_trait]
pub trait FailureHandler: Send + Sync {
    async fn on_failure(
        &self,
        error: &UpgradeError,
        ctx: &RunContext<'_>,
    ) -> Result<(), HookError>;
}

/// Copies the log directory of every node of every handle to a local directory
pub struct LogExporter {
    destination: PathBuf,
    fileset: String,
}

impl LogExporter {
    pub fn new(destination: impl Into<PathBuf>) -> Self {
        Self {
            destination: destination.into(),
            fileset: LOG_FILESET.to_string(),
        }
    }

    pub fn with_fileset(mut self, fileset: impl Into<String>) -> Self {
        self.fileset = fileset.into();
        self
    }
}

#[async_trait]
impl FailureHandler for LogExporter {
    async fn on_failure(
        &self,
        _error: &UpgradeError,
        ctx: &RunContext<'_>,
    ) -> Result<(), HookError> {
        let mut total = 0;
        let mut failed = 0;
        for (handle, driver) in ctx.handles() {
            for node in handle.nodes() {
                total += 1;
                info!(
                    site = %handle.site(),
                    version = %handle.version(),
                    index = node.index,
                    "Writing server log files from {} to {}",
                    handle.version(),
                    node.index
                );
                if let Err(e) = driver
                    .export_files(handle, node.index, &self.fileset, &self.destination)
                    .await
                {
                    warn!(node = %node.name, "Failed to export {} files: {}", self.fileset, e);
                    failed += 1;
                }
            }
        }
        if failed > 0 {
            return Err(HookError::Export { failed, total });
        }
        Ok(())
    }
}

/// Blocks until one line is read, leaving nodes up for inspection
pub struct PauseForAcknowledgement<R> {
    input: Mutex<R>,
}

impl<R> PauseForAcknowledgement<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    pub fn new(input: R) -> Self {
        Self {
            input: Mutex::new(input),
        }
    }
}

impl PauseForAcknowledgement<BufReader<Stdin>> {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

#[async_trait]
impl<R> FailureHandler for PauseForAcknowledgement<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn on_failure(
        &self,
        _error: &UpgradeError,
        ctx: &RunContext<'_>,
    ) -> Result<(), HookError> {
        info!(
            run_id = ctx.run_id,
            nodes = ctx.node_count(),
            "Waiting for user to press enter to shutdown server nodes"
        );
        let mut line = String::new();
        self.input.lock().await.read_line(&mut line).await?;
        Ok(())
    }
}

/// Runs handlers in order, continuing past failures
#[derive(Default)]
pub struct FailureHandlers {
    handlers: Vec<Box<dyn FailureHandler>>,
}

impl FailureHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, handler: impl FailureHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[async_trait]
impl FailureHandler for FailureHandlers {
    async fn on_failure(
        &self,
        error: &UpgradeError,
        ctx: &RunContext<'_>,
    ) -> Result<(), HookError> {
        let mut errors = Vec::new();
        for handler in &self.handlers {
            if let Err(e) = handler.on_failure(error, ctx).await {
                warn!("Failure handler failed: {}", e);
                errors.push(e);
            }
        }
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(HookError::Multiple(errors)),
        }
    }
}
