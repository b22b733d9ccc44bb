/*!
 * Backend facade
 *
 * The stable contract the rest of the system drives: list the hosts of a
 * group, deploy to a host, verify a deployed hash, call on a host, spawn on
 * a host. Each operation opens its own session and channel, so the facade
 * needs no synchronization; the only shared state is the read-only
 * connection parameters and group name.
 */

use std::sync::Arc;

use tracing::info;

use crate::config::ConnectionParameters;
use crate::deploy::{self, DEFAULT_EXECUTABLE_MODE};
use crate::error::{Result, TetherError};
use crate::hosts::{Host, HostDirectory};
use crate::protocol::{self, CallChannel};
use crate::remote::NodeSettings;
use crate::session::{CommandChannel, SshSession};
use crate::task::TaskDescriptor;

pub struct Backend {
    parameters: ConnectionParameters,
    group: String,
    directory: Arc<dyn HostDirectory>,
}

impl Backend {
    pub fn new(
        parameters: ConnectionParameters,
        group: impl Into<String>,
        directory: Arc<dyn HostDirectory>,
    ) -> Self {
        Self {
            parameters,
            group: group.into(),
            directory,
        }
    }

    pub fn parameters(&self) -> &ConnectionParameters {
        &self.parameters
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// List the hosts of the configured group.
    pub fn hosts(&self) -> Result<Vec<Host>> {
        self.directory.list_hosts(&self.group)
    }

    /// Find one host of the group by name.
    pub fn host(&self, name: &str) -> Result<Host> {
        self.hosts()?
            .into_iter()
            .find(|h| h.name == name)
            .ok_or_else(|| {
                TetherError::Config(format!(
                    "host '{}' is not in group '{}'",
                    name, self.group
                ))
            })
    }

    /// Copy the configured executable to the host, mode 0700.
    pub fn deploy(&self, host: &Host) -> Result<u64> {
        let session = self.session(host)?;
        let size = deploy::copy_executable(
            &session,
            &self.parameters.local_path,
            &self.parameters.remote_path,
            DEFAULT_EXECUTABLE_MODE,
        )?;
        info!(host = %host.name, size, "executable deployed");
        Ok(size)
    }

    /// Check whether the host's deployed executable matches the local one.
    pub fn verify(&self, host: &Host) -> Result<bool> {
        let session = self.session(host)?;
        deploy::verify_remote_hash(
            &session,
            &self.parameters.local_path,
            &self.parameters.remote_path,
        )
    }

    /// Fire-and-forget: start the described task on the host and return once
    /// the bootstrap frames are flushed and the channel closed.
    pub fn spawn(&self, host: &Host, descriptor: &TaskDescriptor) -> Result<()> {
        let session = self.session(host)?;
        protocol::spawn(
            &session,
            &self.parameters,
            descriptor,
            &self.node_settings(host),
        )
    }

    /// Run the described task on the host, paired with a local computation
    /// that owns the channel until it returns.
    pub fn call<T, F>(&self, host: &Host, descriptor: &TaskDescriptor, body: F) -> Result<T>
    where
        F: FnOnce(&mut CallChannel<'_, CommandChannel>) -> Result<T>,
    {
        let session = self.session(host)?;
        protocol::call(
            &session,
            &self.parameters,
            descriptor,
            &self.node_settings(host),
            body,
        )
    }

    fn session(&self, host: &Host) -> Result<SshSession> {
        SshSession::connect(host, &self.parameters.identity)
    }

    pub(crate) fn node_settings(&self, host: &Host) -> NodeSettings {
        NodeSettings::new(host.address.clone(), host.worker_port(), self.group.clone())
    }
}
