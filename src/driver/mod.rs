//! Node lifecycle capability and the handles it hands out
//!
//! A [`ClusterDriver`] starts and stops server nodes of one version. The
//! orchestrator owns the resulting [`ClusterHandle`]s; the driver only ever
//! mutates a handle it is given, so nodes that came up before a failure are
//! always visible to cleanup.

pub mod container;

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

use crate::config::VersionReference;

pub use container::ContainerDriver;

/// Which side of the upgrade a cluster belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RunSide {
    From,
    To,
}

impl fmt::Display for RunSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunSide::From => write!(f, "from"),
            RunSide::To => write!(f, "to"),
        }
    }
}

/// Errors raised while starting, stopping or inspecting nodes
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("failed to spawn {engine}: {source}")]
    Spawn {
        engine: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` failed ({status}): {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("node {index} not found in {site} cluster ({side})")]
    UnknownNode {
        site: String,
        side: RunSide,
        index: usize,
    },

    #[error("node {name} exited before becoming ready")]
    NodeExited { name: String },

    #[error("node {name} not ready after {timeout:?}")]
    StartupTimeout {
        name: String,
        timeout: std::time::Duration,
    },

    #[error("node {name} has no network address")]
    MissingAddress { name: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Running/stopped status of a node
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeStatus {
    Running,
    Stopped,
}

/// One server process or container. Never reused once stopped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeHandle {
    pub index: usize,
    pub version: VersionReference,
    /// Engine-level identifier (container name)
    pub name: String,
    /// Network address clients connect to
    pub address: String,
    /// Persisted data slot shared with the node it replaces
    pub data_slot: usize,
    status: NodeStatus,
}

impl NodeHandle {
    pub fn new(
        index: usize,
        version: VersionReference,
        name: impl Into<String>,
        address: impl Into<String>,
        data_slot: usize,
    ) -> Self {
        Self {
            index,
            version,
            name: name.into(),
            address: address.into(),
            data_slot,
            status: NodeStatus::Running,
        }
    }

    pub fn status(&self) -> NodeStatus {
        self.status
    }

    pub fn is_running(&self) -> bool {
        self.status == NodeStatus::Running
    }

    pub fn mark_stopped(&mut self) {
        self.status = NodeStatus::Stopped;
    }
}

/// What a driver needs to know to start nodes for one site
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterSpec {
    pub site: String,
    pub side: RunSide,
    /// Transport stack identifier
    pub protocol: String,
    /// Membership size the started nodes should expect to join
    pub expected_members: usize,
    pub shared_data_mount: bool,
}

/// The nodes of one version within one site
#[derive(Clone, Debug)]
pub struct ClusterHandle {
    spec: ClusterSpec,
    version: VersionReference,
    nodes: Vec<NodeHandle>,
}

impl ClusterHandle {
    pub fn new(spec: ClusterSpec, version: VersionReference) -> Self {
        Self {
            spec,
            version,
            nodes: Vec::new(),
        }
    }

    pub fn spec(&self) -> &ClusterSpec {
        &self.spec
    }

    pub fn site(&self) -> &str {
        &self.spec.site
    }

    pub fn side(&self) -> RunSide {
        self.spec.side
    }

    pub fn version(&self) -> &VersionReference {
        &self.version
    }

    /// Every node ever started in this cluster, running or not
    pub fn nodes(&self) -> &[NodeHandle] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> Option<&NodeHandle> {
        self.nodes.iter().find(|n| n.index == index)
    }

    pub fn node_mut(&mut self, index: usize) -> Option<&mut NodeHandle> {
        self.nodes.iter_mut().find(|n| n.index == index)
    }

    pub fn live_nodes(&self) -> impl Iterator<Item = &NodeHandle> {
        self.nodes.iter().filter(|n| n.is_running())
    }

    pub fn live_count(&self) -> usize {
        self.live_nodes().count()
    }

    /// Address of the node at `index`, if it is still running
    pub fn address(&self, index: usize) -> Option<&str> {
        self.node(index)
            .filter(|n| n.is_running())
            .map(|n| n.address.as_str())
    }

    /// Index the next started node receives
    pub fn next_index(&self) -> usize {
        self.nodes.len()
    }

    /// Register a freshly started node
    pub fn push(&mut self, node: NodeHandle) {
        self.nodes.push(node);
    }

    pub(crate) fn unknown_node(&self, index: usize) -> DriverError {
        DriverError::UnknownNode {
            site: self.spec.site.clone(),
            side: self.spec.side,
            index,
        }
    }
}

/// Node lifecycle operations for one server version
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterDriver: Send + Sync {
    /// Start one node per entry of `data_slots`, registering each in `handle`
    /// as soon as it is up.
    async fn start_nodes(
        &self,
        handle: &mut ClusterHandle,
        data_slots: &[usize],
    ) -> Result<(), DriverError>;

    /// Add a single node to an already started cluster, returning its index
    async fn add_node(&self, handle: &mut ClusterHandle, data_slot: usize) -> Result<usize, DriverError> {
        let index = handle.next_index();
        self.start_nodes(handle, &[data_slot]).await?;
        Ok(index)
    }

    /// Stop the node at `index`. Stopping a stopped node is a no-op.
    async fn stop_node(&self, handle: &mut ClusterHandle, index: usize) -> Result<(), DriverError>;

    /// Copy a named file set (e.g. `log`) from a node into `destination`,
    /// returning the directory it was written to.
    async fn export_files(
        &self,
        handle: &ClusterHandle,
        index: usize,
        fileset: &str,
        destination: &Path,
    ) -> Result<PathBuf, DriverError>;

    /// Stop every remaining node of the cluster.
    ///
    /// Keeps going after a failed stop and reports the first error.
    async fn release_cluster(&self, handle: &mut ClusterHandle) -> Result<(), DriverError> {
        let running: Vec<usize> = handle.live_nodes().map(|n| n.index).collect();
        let mut first_error = None;
        for index in running {
            if let Err(e) = self.stop_node(handle, index).await {
                tracing::warn!(site = %handle.site(), index, "Failed to stop node: {}", e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Delete per-run artifacts such as ephemeral images
    async fn release_artifacts(&self) -> Result<(), DriverError>;
}
