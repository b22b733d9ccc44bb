/*!
 * SSH session transport
 *
 * One session per target host: connect, authenticate, open command channels,
 * stream bytes in both directions. Teardown is scoped: the session
 * disconnects and channels close on every exit path, normal or not, via
 * `Drop`. The transport never retries; failures propagate to the caller.
 */

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::path::Path;

use tracing::{debug, warn};

use crate::config::SshIdentity;
use crate::error::{Result, TetherError};
use crate::hosts::Host;

/// A command channel as the protocol layer sees it: raw byte I/O plus the
/// explicit EOF/drain/exit-status lifecycle. `CommandChannel` is the real
/// implementation; tests substitute their own transport.
pub trait CommandStream: Read + Write {
    /// Signal that no more bytes will be written to the remote stdin.
    fn send_eof(&mut self) -> Result<()>;

    /// Read remaining remote output until the channel reaches EOF.
    fn drain(&mut self) -> Result<Vec<u8>>;

    /// Close the channel and report the remote process's exit status.
    fn finish(&mut self) -> Result<i32>;
}

/// An authenticated SSH session to one host.
pub struct SshSession {
    session: ssh2::Session,
    host: String,
}

impl SshSession {
    /// Open an authenticated session to the host's SSH endpoint.
    pub fn connect(host: &Host, identity: &SshIdentity) -> Result<Self> {
        let (address, port) = host.ssh_endpoint()?;

        let tcp = TcpStream::connect((address.as_str(), port)).map_err(|e| {
            TetherError::Connect {
                host: host.name.clone(),
                message: format!("tcp connect to {}:{} failed: {}", address, port, e),
            }
        })?;

        let mut session = ssh2::Session::new().map_err(|e| TetherError::Connect {
            host: host.name.clone(),
            message: format!("session init failed: {}", e.message()),
        })?;
        session.set_tcp_stream(tcp);
        session.handshake().map_err(|e| TetherError::Connect {
            host: host.name.clone(),
            message: format!("handshake failed: {}", e.message()),
        })?;

        if let Some(known_hosts) = &identity.known_hosts {
            check_known_host(&session, &host.name, &address, port, known_hosts)?;
        }

        session
            .userauth_pubkey_file(
                &identity.username,
                identity.public_key.as_deref(),
                &identity.private_key,
                identity.passphrase(),
            )
            .map_err(|e| TetherError::Auth {
                host: host.name.clone(),
                message: e.message().to_string(),
            })?;
        if !session.authenticated() {
            return Err(TetherError::Auth {
                host: host.name.clone(),
                message: "public key not accepted".to_string(),
            });
        }

        debug!(
            host = %host.name,
            %address,
            port,
            user = %identity.username,
            "ssh session established"
        );

        Ok(Self {
            session,
            host: host.name.clone(),
        })
    }

    /// Open a new channel on the session and start executing `command_line`
    /// as a remote process.
    pub fn command_channel(&self, command_line: &str) -> Result<CommandChannel> {
        let mut channel = self
            .session
            .channel_session()
            .map_err(|e| self.channel_fault("channel open", e))?;
        channel
            .exec(command_line)
            .map_err(|e| self.channel_fault("exec", e))?;

        debug!(host = %self.host, command = command_line, "command channel opened");

        Ok(CommandChannel {
            channel,
            finished: false,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub(crate) fn raw(&self) -> &ssh2::Session {
        &self.session
    }

    fn channel_fault(&self, context: &str, err: ssh2::Error) -> TetherError {
        TetherError::Protocol(format!("{} on '{}': {}", context, self.host, err.message()))
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        let _ = self.session.disconnect(None, "closing session", None);
    }
}

/// Accept-new host key policy: a changed key refuses the session, an unknown
/// host is accepted with a warning.
fn check_known_host(
    session: &ssh2::Session,
    host_name: &str,
    address: &str,
    port: u16,
    path: &Path,
) -> Result<()> {
    use ssh2::{CheckResult, KnownHostFileKind};

    let auth_fault = |message: String| TetherError::Auth {
        host: host_name.to_string(),
        message,
    };

    let mut known_hosts = session
        .known_hosts()
        .map_err(|e| auth_fault(format!("known-hosts init failed: {}", e.message())))?;
    if path.exists() {
        known_hosts
            .read_file(path, KnownHostFileKind::OpenSSH)
            .map_err(|e| {
                auth_fault(format!(
                    "could not read {}: {}",
                    path.display(),
                    e.message()
                ))
            })?;
    }

    let (key, _) = session
        .host_key()
        .ok_or_else(|| auth_fault("server presented no host key".to_string()))?;

    match known_hosts.check_port(address, port, key) {
        CheckResult::Match => Ok(()),
        CheckResult::NotFound => {
            warn!(host = host_name, %address, port, "host key not in known hosts, accepting");
            Ok(())
        }
        CheckResult::Mismatch => Err(auth_fault("host key mismatch against known hosts".to_string())),
        CheckResult::Failure => Err(auth_fault("host key check failed".to_string())),
    }
}

/// A channel executing one remote command, with raw byte I/O.
pub struct CommandChannel {
    channel: ssh2::Channel,
    finished: bool,
}

impl CommandChannel {
    /// Signal EOF on the remote stdin.
    pub fn send_eof(&mut self) -> Result<()> {
        self.channel
            .send_eof()
            .map_err(|e| TetherError::Protocol(format!("send eof failed: {}", e.message())))
    }

    /// Read remaining stdout and stderr until the remote closes the stream.
    pub fn drain(&mut self) -> Result<Vec<u8>> {
        let mut output = Vec::new();
        self.channel
            .read_to_end(&mut output)
            .map_err(|e| TetherError::Protocol(format!("channel drain failed: {}", e)))?;
        self.channel
            .stderr()
            .read_to_end(&mut output)
            .map_err(|e| TetherError::Protocol(format!("stderr drain failed: {}", e)))?;
        Ok(output)
    }

    /// Close the channel and report the remote exit status. The exit status
    /// only becomes reliable once the channel has fully closed.
    pub fn finish(&mut self) -> Result<i32> {
        if !self.finished {
            let _ = self.channel.close();
            self.channel
                .wait_close()
                .map_err(|e| TetherError::Protocol(format!("channel close failed: {}", e.message())))?;
            self.finished = true;
        }
        self.channel
            .exit_status()
            .map_err(|e| TetherError::Protocol(format!("exit status unavailable: {}", e.message())))
    }
}

impl Read for CommandChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.channel.read(buf)
    }
}

impl Write for CommandChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.channel.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.channel.flush()
    }
}

impl CommandStream for CommandChannel {
    fn send_eof(&mut self) -> Result<()> {
        CommandChannel::send_eof(self)
    }

    fn drain(&mut self) -> Result<Vec<u8>> {
        CommandChannel::drain(self)
    }

    fn finish(&mut self) -> Result<i32> {
        CommandChannel::finish(self)
    }
}

impl Drop for CommandChannel {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.channel.close();
            let _ = self.channel.wait_close();
        }
    }
}
