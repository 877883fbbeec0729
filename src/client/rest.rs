//! HTTP data client against the server's `/rest/v2` endpoint
//!
//! The client remembers every member it has seen in a topology response and
//! moves on to the next one when the current member stops answering.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::client::{ClientConnector, ClientError, ClusterSnapshot, CollectionDefinition, DataClient};
use crate::config::{Credentials, RunSettings};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Creates [`RestDataClient`]s sharing one connection pool
#[derive(Clone)]
pub struct RestConnector {
    http: reqwest::Client,
    credentials: Credentials,
    port: u16,
}

impl RestConnector {
    pub fn new(settings: &RunSettings) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            credentials: settings.credentials.clone(),
            port: settings.server.port,
        })
    }
}

#[async_trait]
impl ClientConnector for RestConnector {
    async fn connect(&self, address: &str) -> Result<Box<dyn DataClient>, ClientError> {
        debug!(address, port = self.port, "Connecting data client");
        Ok(Box::new(RestDataClient {
            http: self.http.clone(),
            credentials: self.credentials.clone(),
            port: self.port,
            endpoints: vec![address.to_string()],
            current: 0,
        }))
    }
}

/// REST client with member failover
pub struct RestDataClient {
    http: reqwest::Client,
    credentials: Credentials,
    port: u16,
    endpoints: Vec<String>,
    current: usize,
}

/// One entry of a cache distribution response
#[derive(Debug, Deserialize)]
struct DistributionEntry {
    node_name: String,
    #[serde(default)]
    node_addresses: Vec<String>,
}

impl RestDataClient {
    /// Hosts this client may fail over to
    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    fn base_url(&self, host: &str) -> String {
        if host.contains(':') && !host.starts_with('[') {
            format!("http://[{}]:{}/rest/v2", host, self.port)
        } else {
            format!("http://{}:{}/rest/v2", host, self.port)
        }
    }

    /// Send a request to the current member, rotating through known members
    /// on connection failures
    async fn send<F>(&mut self, build: F) -> Result<Response, ClientError>
    where
        F: Fn(&reqwest::Client, &str) -> RequestBuilder + Send + Sync,
    {
        let total = self.endpoints.len();
        let mut tried = Vec::with_capacity(total);
        for attempt in 0..total {
            let position = (self.current + attempt) % total;
            let Some(host) = self.endpoints.get(position).cloned() else {
                continue;
            };
            let request = build(&self.http, &self.base_url(&host))
                .basic_auth(&self.credentials.username, Some(&self.credentials.password));
            match request.send().await {
                Ok(response) => {
                    if position != self.current {
                        debug!(host = %host, "Failed over to another cluster member");
                        self.current = position;
                    }
                    return Ok(response);
                }
                Err(e) if e.is_connect() || e.is_timeout() => {
                    warn!(host = %host, "Cluster member unreachable: {}", e);
                    tried.push(host);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(ClientError::NoReachableMember { tried })
    }

    fn learn(&mut self, hosts: impl IntoIterator<Item = String>) {
        for host in hosts {
            if !self.endpoints.contains(&host) {
                debug!(host = %host, "Learned cluster member");
                self.endpoints.push(host);
            }
        }
    }
}

async fn expect_success(operation: &'static str, response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Status {
        operation,
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl DataClient for RestDataClient {
    async fn create_collection(&mut self, collection: &CollectionDefinition) -> Result<(), ClientError> {
        let path = format!("caches/{}", collection.name);
        let body = collection.definition.clone();
        let response = self
            .send(|http, base| {
                http.post(format!("{}/{}", base, path))
                    .header(reqwest::header::CONTENT_TYPE, "application/xml")
                    .body(body.clone())
            })
            .await?;
        expect_success("create cache", response).await?;
        Ok(())
    }

    async fn put(&mut self, collection: &str, key: &str, value: &str) -> Result<(), ClientError> {
        let path = format!("caches/{}/{}", collection, key);
        let response = self
            .send(|http, base| {
                http.put(format!("{}/{}", base, path))
                    .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=UTF-8")
                    .body(value.to_string())
            })
            .await?;
        expect_success("put", response).await?;
        Ok(())
    }

    async fn get(&mut self, collection: &str, key: &str) -> Result<Option<String>, ClientError> {
        let path = format!("caches/{}/{}", collection, key);
        let response = self
            .send(|http, base| {
                http.get(format!("{}/{}", base, path))
                    .header(reqwest::header::ACCEPT, "text/plain")
            })
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = expect_success("get", response).await?;
        Ok(Some(response.text().await?))
    }

    async fn topology(&mut self, collection: &str) -> Result<ClusterSnapshot, ClientError> {
        let path = format!("caches/{}?action=distribution", collection);
        let response = self
            .send(|http, base| http.get(format!("{}/{}", base, path)))
            .await?;
        let response = expect_success("distribution", response).await?;
        let raw = response.text().await?;
        let entries = parse_distribution(&raw)?;

        self.learn(entries.iter().filter_map(|e| e.node_addresses.first()).map(|a| host_of(a)));
        Ok(snapshot_from(&entries))
    }
}

fn parse_distribution(raw: &str) -> Result<Vec<DistributionEntry>, ClientError> {
    serde_json::from_str(raw).map_err(|e| ClientError::MalformedTopology(e.to_string()))
}

/// Members keyed by their first transport address, or node name if none
fn snapshot_from(entries: &[DistributionEntry]) -> ClusterSnapshot {
    ClusterSnapshot::from_addresses(entries.iter().map(|e| {
        e.node_addresses
            .first()
            .cloned()
            .unwrap_or_else(|| e.node_name.clone())
    }))
}

/// Strip the transport port from `host:port` / `[v6]:port`
fn host_of(address: &str) -> String {
    if let Some(rest) = address.strip_prefix('[') {
        if let Some((host, _)) = rest.split_once(']') {
            return host.to_string();
        }
    }
    match address.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => {
            host.to_string()
        }
        _ => address.to_string(),
    }
}
