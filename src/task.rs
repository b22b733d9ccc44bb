/*!
 * Task descriptors and the remote task registry
 *
 * A descriptor is an opaque handle to "code to run remotely plus its static
 * argument": a stable string key naming the task and the bincode-encoded
 * argument bytes. Both sides build an identical registry at startup; the
 * remote bootstrap reconstructs the task by key lookup, so no code is ever
 * serialized.
 */

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::{Result, TetherError};
use crate::remote::RemoteContext;

/// Key of the builtin echo task: reads one frame, replies with it verbatim.
pub const ECHO_TASK: &str = "echo";

/// Serialized handle to a remote computation and its argument. Produced once
/// per invocation and transmitted exactly once, before any framed traffic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    key: String,
    argument: Vec<u8>,
}

impl TaskDescriptor {
    /// Build a descriptor for the task registered under `key`, capturing its
    /// static argument.
    pub fn new<T: Serialize>(key: impl Into<String>, argument: &T) -> Result<Self> {
        Ok(Self {
            key: key.into(),
            argument: bincode::serialize(argument)?,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Decode the static argument.
    pub fn argument<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(bincode::deserialize(&self.argument)?)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

type TaskHandler =
    Box<dyn Fn(&TaskDescriptor, &mut RemoteContext<'_>) -> Result<()> + Send + Sync>;

/// Mapping from stable task keys to handler functions. The controller and the
/// deployed executable must register the same keys.
#[derive(Default)]
pub struct TaskRegistry {
    handlers: HashMap<String, TaskHandler>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the builtin tasks registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(ECHO_TASK, echo_task);
        registry
    }

    pub fn register<F>(&mut self, key: impl Into<String>, handler: F)
    where
        F: Fn(&TaskDescriptor, &mut RemoteContext<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.handlers.insert(key.into(), Box::new(handler));
    }

    pub fn contains(&self, key: &str) -> bool {
        self.handlers.contains_key(key)
    }

    /// Dispatch a descriptor to its handler. An unregistered key is a
    /// protocol violation: the two sides' registries have diverged.
    pub fn run(&self, descriptor: &TaskDescriptor, ctx: &mut RemoteContext<'_>) -> Result<()> {
        match self.handlers.get(descriptor.key()) {
            Some(handler) => handler(descriptor, ctx),
            None => Err(TetherError::Protocol(format!(
                "unknown task key '{}'",
                descriptor.key()
            ))),
        }
    }
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        keys.sort_unstable();
        f.debug_struct("TaskRegistry").field("keys", &keys).finish()
    }
}

fn echo_task(_descriptor: &TaskDescriptor, ctx: &mut RemoteContext<'_>) -> Result<()> {
    let frame = ctx.receive_raw()?;
    ctx.reply_raw(&frame)
}
