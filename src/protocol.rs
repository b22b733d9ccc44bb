/*!
 * Remote task protocol: the call/spawn handshake
 *
 * Both modes share one wire contract on a freshly opened command channel:
 * the serialized task descriptor, then the connection-parameters blob, each
 * as one untagged frame, before any application traffic. Spawn sends EOF and
 * disengages; call hands the still-open channel to the local computation for
 * typed request/reply traffic until it returns. Either way the channel is
 * torn down on every exit path, and a non-zero remote exit status fails the
 * operation even when every frame was read cleanly.
 */

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

use tracing::debug;

use crate::config::ConnectionParameters;
use crate::error::{Result, TetherError};
use crate::remote::NodeSettings;
use crate::session::{CommandStream, SshSession};
use crate::task::TaskDescriptor;
use crate::wire::{self, FrameFlag};

/// Build the bootstrap command line the deployed executable must parse:
/// `<remote_path> run --host <addr> --port <port> --group <name>
/// [--background]`. Paths and group names must be free of shell
/// metacharacters; the line is not quoted.
pub fn bootstrap_command(remote_path: &Path, node: &NodeSettings) -> String {
    let mut command = format!(
        "{} run --host {} --port {} --group {}",
        remote_path.display(),
        node.host,
        node.port,
        node.group
    );
    if node.background {
        command.push_str(" --background");
    }
    command
}

/// The local computation's handle on the open channel during a call.
///
/// Strictly sequential: each `send`/`receive` blocks until its bytes have
/// moved. Exactly one of these exists per channel, for the lifetime of the
/// local computation.
pub struct CallChannel<'a, C: CommandStream + ?Sized> {
    channel: &'a mut C,
}

impl<'a, C: CommandStream + ?Sized> CallChannel<'a, C> {
    /// Send one value to the remote task as an untagged frame.
    pub fn send<T: Serialize>(&mut self, value: &T) -> Result<()> {
        self.send_raw(&bincode::serialize(value)?)
    }

    pub fn send_raw(&mut self, payload: &[u8]) -> Result<()> {
        wire::write_frame(self.channel, payload)
    }

    /// Receive one tagged frame. A normal frame decodes to the value; an
    /// error frame decodes to a description and is raised as a remote
    /// failure instead of returning.
    pub fn receive<T: DeserializeOwned>(&mut self) -> Result<T> {
        Ok(bincode::deserialize(&self.receive_raw()?)?)
    }

    pub fn receive_raw(&mut self) -> Result<Vec<u8>> {
        match wire::read_tagged_frame(self.channel)? {
            (FrameFlag::Value, payload) => Ok(payload),
            (FrameFlag::Error, payload) => {
                let description: String = bincode::deserialize(&payload)?;
                Err(TetherError::Remote(description))
            }
        }
    }
}

/// Write the two bootstrap frames in the fixed wire order.
fn write_bootstrap<C: CommandStream + ?Sized>(
    channel: &mut C,
    descriptor: &TaskDescriptor,
    parameters: &ConnectionParameters,
) -> Result<()> {
    wire::write_frame(channel, &descriptor.encode()?)?;
    wire::write_frame(channel, &parameters.to_blob()?)?;
    Ok(())
}

/// Spawn mode over an already-open channel: push the bootstrap frames, send
/// EOF, discard remaining output, and gate on the exit status. Returns as
/// soon as the channel is closed; the remote task's lifetime is its own.
pub fn spawn_over<C: CommandStream + ?Sized>(
    channel: &mut C,
    descriptor: &TaskDescriptor,
    parameters: &ConnectionParameters,
) -> Result<()> {
    write_bootstrap(channel, descriptor, parameters)?;
    channel.send_eof()?;
    let output = channel.drain()?;
    let status = channel.finish()?;

    if status != 0 {
        return Err(TetherError::NonZeroExit {
            status,
            output: String::from_utf8_lossy(&output).into_owned(),
        });
    }

    debug!(task = descriptor.key(), "spawn complete");
    Ok(())
}

/// Call mode over an already-open channel: push the bootstrap frames, then
/// run the local computation with the channel as its message transport. The
/// channel is torn down when the computation returns, on success or failure;
/// a non-zero exit status after a successful computation fails the call.
pub fn call_over<C, T, F>(
    channel: &mut C,
    descriptor: &TaskDescriptor,
    parameters: &ConnectionParameters,
    body: F,
) -> Result<T>
where
    C: CommandStream + ?Sized,
    F: FnOnce(&mut CallChannel<'_, C>) -> Result<T>,
{
    write_bootstrap(channel, descriptor, parameters)?;

    let mut call = CallChannel {
        channel: &mut *channel,
    };
    let outcome = body(&mut call);

    match outcome {
        Ok(value) => {
            // Close as soon as the computation returns; the exit status is
            // captured at that point.
            match channel.finish()? {
                0 => {
                    debug!(task = descriptor.key(), "call complete");
                    Ok(value)
                }
                status => Err(TetherError::NonZeroExit {
                    status,
                    output: String::new(),
                }),
            }
        }
        Err(err) => {
            // Teardown still happens; the computation's failure wins.
            let _ = channel.finish();
            Err(err)
        }
    }
}

/// Spawn mode against a host session. The background flag is forced on: the
/// remote task outlives the channel by contract.
pub fn spawn(
    session: &SshSession,
    parameters: &ConnectionParameters,
    descriptor: &TaskDescriptor,
    node: &NodeSettings,
) -> Result<()> {
    let node = node.clone().background();
    let command = bootstrap_command(&parameters.remote_path, &node);
    let mut channel = session.command_channel(&command)?;
    spawn_over(&mut channel, descriptor, parameters)
}

/// Call mode against a host session.
pub fn call<T, F>(
    session: &SshSession,
    parameters: &ConnectionParameters,
    descriptor: &TaskDescriptor,
    node: &NodeSettings,
    body: F,
) -> Result<T>
where
    F: FnOnce(&mut CallChannel<'_, crate::session::CommandChannel>) -> Result<T>,
{
    let mut node = node.clone();
    node.background = false;
    let command = bootstrap_command(&parameters.remote_path, &node);
    let mut channel = session.command_channel(&command)?;
    call_over(&mut channel, descriptor, parameters, body)
}
