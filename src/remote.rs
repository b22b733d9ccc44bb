/*!
 * Worker-side bootstrap
 *
 * The deployed executable's half of the wire contract. A freshly opened
 * command channel carries exactly two untagged frames (the task descriptor,
 * then the connection parameters) before any application traffic. `serve`
 * reads both, reconstructs the task through the registry, and runs it with a
 * context that talks to the controller over an injected reader/writer pair
 * rather than a process-wide stream, so tests can substitute the transport.
 */

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

use tracing::{debug, warn};

use crate::config::ConnectionParameters;
use crate::error::Result;
use crate::task::{TaskDescriptor, TaskRegistry};
use crate::wire::{self, FrameFlag};

/// Settings for the worker's own network node, handed through the bootstrap
/// command line. The node runtime itself lives outside this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSettings {
    /// Address the worker should listen on
    pub host: String,
    /// Port the worker should listen on
    pub port: u16,
    /// Group the worker belongs to
    pub group: String,
    /// Detach after bootstrap instead of staying coupled to the channel
    pub background: bool,
}

impl NodeSettings {
    pub fn new(host: impl Into<String>, port: u16, group: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            group: group.into(),
            background: false,
        }
    }

    pub fn background(mut self) -> Self {
        self.background = true;
        self
    }
}

/// What a running task sees: the channel back to the controller, plus the
/// decoded parameters and node settings.
pub struct RemoteContext<'a> {
    reader: &'a mut dyn Read,
    writer: &'a mut dyn Write,
    parameters: ConnectionParameters,
    node: NodeSettings,
}

impl<'a> RemoteContext<'a> {
    pub fn new(
        reader: &'a mut dyn Read,
        writer: &'a mut dyn Write,
        parameters: ConnectionParameters,
        node: NodeSettings,
    ) -> Self {
        Self {
            reader,
            writer,
            parameters,
            node,
        }
    }

    pub fn parameters(&self) -> &ConnectionParameters {
        &self.parameters
    }

    pub fn node(&self) -> &NodeSettings {
        &self.node
    }

    /// Read one untagged frame sent by the controller.
    pub fn receive_raw(&mut self) -> Result<Vec<u8>> {
        wire::read_frame(self.reader)
    }

    /// Read one untagged frame and decode its value.
    pub fn receive<T: DeserializeOwned>(&mut self) -> Result<T> {
        Ok(bincode::deserialize(&self.receive_raw()?)?)
    }

    /// Send one normal reply frame with a pre-serialized payload.
    pub fn reply_raw(&mut self, payload: &[u8]) -> Result<()> {
        wire::write_tagged_frame(self.writer, FrameFlag::Value, payload)
    }

    /// Send one normal reply frame.
    pub fn reply<T: Serialize>(&mut self, value: &T) -> Result<()> {
        self.reply_raw(&bincode::serialize(value)?)
    }

    /// Flag an error to the controller. The description is raised there as a
    /// remote failure.
    pub fn fail(&mut self, description: &str) -> Result<()> {
        wire::write_tagged_frame(
            self.writer,
            FrameFlag::Error,
            &bincode::serialize(description)?,
        )
    }
}

/// Run one task over the injected transport: read the descriptor and the
/// parameters in the fixed wire order, dispatch through the registry, and
/// make sure a handler failure is observed on both ends: flagged to the
/// controller as an error frame and propagated to this process's exit status.
pub fn serve<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    registry: &TaskRegistry,
    node: NodeSettings,
) -> Result<()> {
    let descriptor = TaskDescriptor::decode(&wire::read_frame(reader)?)?;
    let parameters = ConnectionParameters::from_blob(&wire::read_frame(reader)?)?;

    debug!(
        task = descriptor.key(),
        group = %node.group,
        port = node.port,
        background = node.background,
        "remote bootstrap complete"
    );

    let mut ctx = RemoteContext::new(reader, writer, parameters, node);
    match registry.run(&descriptor, &mut ctx) {
        Ok(()) => Ok(()),
        Err(err) => {
            let description = err.to_string();
            if let Err(flag_err) = ctx.fail(&description) {
                warn!(error = %flag_err, "could not flag task failure to the controller");
            }
            Err(err)
        }
    }
}
