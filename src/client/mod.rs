//! Data access capability used to seed and verify a cluster

pub mod rest;

use std::collections::BTreeSet;
use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

pub use rest::{RestConnector, RestDataClient};

/// Declarative definition of a cache replicated on every member
pub const REPLICATED_CACHE_DEFINITION: &str = "<replicated-cache></replicated-cache>";

/// Errors talking to a cluster member
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{operation} returned HTTP {status}: {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error("malformed topology response: {0}")]
    MalformedTopology(String),

    #[error("no cluster member reachable (tried {})", tried.join(", "))]
    NoReachableMember { tried: Vec<String> },

    #[error("client unavailable: {0}")]
    Unavailable(String),
}

/// A collection to create before seeding
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectionDefinition {
    pub name: String,
    pub definition: String,
}

impl CollectionDefinition {
    pub fn replicated(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            definition: REPLICATED_CACHE_DEFINITION.to_string(),
        }
    }
}

/// Sentinel record written once at run start and never changed
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeRecord {
    pub collection: String,
    pub key: String,
    pub value: String,
}

impl ProbeRecord {
    /// A read is intact only when it returns exactly the written value
    pub fn matches(&self, actual: Option<&str>) -> bool {
        actual == Some(self.value.as_str())
    }
}

/// Point-in-time view of cluster membership.
///
/// Membership only: the distribution endpoint does not report segment
/// ownership, and convergence is judged on member count alone.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClusterSnapshot {
    members: BTreeSet<String>,
}

impl ClusterSnapshot {
    pub fn from_addresses<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            members: addresses.into_iter().map(Into::into).collect(),
        }
    }

    /// Number of distinct member addresses
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(String::as_str)
    }
}

impl fmt::Display for ClusterSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, address) in self.members.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", address)?;
        }
        write!(f, "]")
    }
}

/// Keyed access and topology queries against a live cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DataClient: Send + Sync {
    async fn create_collection(&mut self, collection: &CollectionDefinition) -> Result<(), ClientError>;

    async fn put(&mut self, collection: &str, key: &str, value: &str) -> Result<(), ClientError>;

    /// `None` when the key is absent
    async fn get(&mut self, collection: &str, key: &str) -> Result<Option<String>, ClientError>;

    async fn topology(&mut self, collection: &str) -> Result<ClusterSnapshot, ClientError>;
}

/// Opens a [`DataClient`] against one member address
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClientConnector: Send + Sync {
    async fn connect(&self, address: &str) -> Result<Box<dyn DataClient>, ClientError>;
}
