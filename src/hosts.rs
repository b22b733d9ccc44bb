/*!
 * Hosts, host groups, and the directory lookup interface
 *
 * A host is a named machine with a network address and a set of named
 * endpoints. The endpoint named "ssh" carries the controller's management
 * traffic and must resolve to exactly one (address, port) pair; the optional
 * endpoint named "worker" carries the port workers listen on for each other.
 */

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{Result, TetherError};

/// Endpoint name used for SSH access.
pub const SSH_ENDPOINT: &str = "ssh";

/// Endpoint name used for the worker-to-worker listen port.
pub const WORKER_ENDPOINT: &str = "worker";

/// Listen port used when a host does not name a worker endpoint.
pub const DEFAULT_WORKER_PORT: u16 = 7070;

/// A named service endpoint on a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub name: String,
    /// Public or virtual IP the endpoint is reachable on
    pub address: String,
    pub port: u16,
}

/// A named machine with its endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub name: String,
    /// Address on the workers' native network
    pub address: String,
    #[serde(default, rename = "endpoint")]
    pub endpoints: Vec<Endpoint>,
}

impl Host {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            endpoints: Vec::new(),
        }
    }

    pub fn with_endpoint(
        mut self,
        name: impl Into<String>,
        address: impl Into<String>,
        port: u16,
    ) -> Self {
        self.endpoints.push(Endpoint {
            name: name.into(),
            address: address.into(),
            port,
        });
        self
    }

    /// Look up a named endpoint, returning its (address, port).
    pub fn endpoint(&self, name: &str) -> Option<(String, u16)> {
        self.endpoints
            .iter()
            .find(|e| e.name == name)
            .map(|e| (e.address.clone(), e.port))
    }

    /// Resolve the SSH endpoint. The host must expose exactly one endpoint
    /// named "ssh"; zero or several make it unusable for this protocol.
    pub fn ssh_endpoint(&self) -> Result<(String, u16)> {
        let mut matches = self.endpoints.iter().filter(|e| e.name == SSH_ENDPOINT);
        match (matches.next(), matches.next()) {
            (Some(endpoint), None) => Ok((endpoint.address.clone(), endpoint.port)),
            (None, _) => Err(TetherError::NoSshEndpoint {
                host: self.name.clone(),
                candidates: 0,
            }),
            (Some(_), Some(_)) => Err(TetherError::NoSshEndpoint {
                host: self.name.clone(),
                candidates: 2 + matches.count(),
            }),
        }
    }

    /// Port workers on this host listen on for each other.
    pub fn worker_port(&self) -> u16 {
        self.endpoint(WORKER_ENDPOINT)
            .map(|(_, port)| port)
            .unwrap_or(DEFAULT_WORKER_PORT)
    }
}

/// A named collection of hosts that can reach each other over the native
/// network. Read-only to the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostGroup {
    pub name: String,
    #[serde(default, rename = "host")]
    pub hosts: Vec<Host>,
}

/// Directory lookup interface consumed by the backend facade.
pub trait HostDirectory: Send + Sync {
    /// List the hosts of a named group.
    fn list_hosts(&self, group: &str) -> Result<Vec<Host>>;
}

/// Directory backed by a fixed table, typically loaded from a TOML file.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    groups: Vec<HostGroup>,
}

#[derive(Debug, Deserialize)]
struct DirectoryFile {
    #[serde(default, rename = "group")]
    groups: Vec<HostGroup>,
}

impl StaticDirectory {
    pub fn new(groups: Vec<HostGroup>) -> Self {
        Self { groups }
    }

    /// Load a directory from a TOML file of `[[group]]` tables.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            TetherError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let file: DirectoryFile = toml::from_str(&contents)?;
        Ok(Self::new(file.groups))
    }
}

impl HostDirectory for StaticDirectory {
    fn list_hosts(&self, group: &str) -> Result<Vec<Host>> {
        self.groups
            .iter()
            .find(|g| g.name == group)
            .map(|g| g.hosts.clone())
            .ok_or_else(|| TetherError::Config(format!("unknown host group '{}'", group)))
    }
}
