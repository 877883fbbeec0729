use crate::client::DataClient;
use crate::config::UpgradeConfiguration;
use crate::controller::state_machine::RollingState;
use crate::driver::{ClusterDriver, ClusterHandle};

/// Everything the orchestrator owns for one site
pub struct SiteRun {
    pub(crate) name: String,
    /// Old-version cluster, present once its first node was requested
    pub(crate) from: Option<ClusterHandle>,
    /// New-version cluster, created on the first loop iteration
    pub(crate) to: Option<ClusterHandle>,
    pub(crate) state: RollingState,
    /// Connection held open for the whole run
    pub(crate) client: Option<Box<dyn DataClient>>,
}

impl SiteRun {
    pub fn new(name: impl Into<String>, node_count: usize) -> Self {
        Self {
            name: name.into(),
            from: None,
            to: None,
            state: RollingState::new(node_count),
            client: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn from(&self) -> Option<&ClusterHandle> {
        self.from.as_ref()
    }

    pub fn to(&self) -> Option<&ClusterHandle> {
        self.to.as_ref()
    }

    pub fn state(&self) -> &RollingState {
        &self.state
    }

    /// Both handles of the site, old version first
    pub fn handles(&self) -> impl Iterator<Item = &ClusterHandle> {
        self.from.iter().chain(self.to.iter())
    }
}

/// Read-only view of a run handed to failure handlers
pub struct RunContext<'a> {
    pub config: &'a UpgradeConfiguration,
    pub run_id: &'a str,
    pub sites: &'a [SiteRun],
    pub from_driver: &'a dyn ClusterDriver,
    pub to_driver: &'a dyn ClusterDriver,
}

impl<'a> RunContext<'a> {
    /// Every cluster handle of every site, paired with the driver that owns it
    pub fn handles(&self) -> Vec<(&'a ClusterHandle, &'a dyn ClusterDriver)> {
        let mut handles = Vec::new();
        for site in self.sites {
            if let Some(from) = site.from.as_ref() {
                handles.push((from, self.from_driver));
            }
            if let Some(to) = site.to.as_ref() {
                handles.push((to, self.to_driver));
            }
        }
        handles
    }

    /// Nodes ever started across the run
    pub fn node_count(&self) -> usize {
        self.handles().iter().map(|(h, _)| h.nodes().len()).sum()
    }
}
