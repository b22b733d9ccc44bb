/*!
 * Error types for Tether
 */

use std::fmt;
use std::io;

pub type Result<T> = std::result::Result<T, TetherError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_FATAL: i32 = 2;

#[derive(Debug)]
pub enum TetherError {
    /// Host exposes zero or several SSH endpoints
    NoSshEndpoint { host: String, candidates: usize },

    /// SSH session establishment failed before authentication
    Connect { host: String, message: String },

    /// SSH authentication failed
    Auth { host: String, message: String },

    /// Executable transfer failed
    Transfer(String),

    /// Remote command exited with a non-zero status
    NonZeroExit { status: i32, output: String },

    /// A frame could not be decoded, or the channel closed mid-frame
    Protocol(String),

    /// The remote side flagged an error frame
    Remote(String),

    /// I/O error on a local resource
    Io(io::Error),

    /// Configuration error
    Config(String),
}

impl TetherError {
    /// Check if this error is fatal (retrying at a higher level is pointless)
    pub fn is_fatal(&self) -> bool {
        match self {
            TetherError::NoSshEndpoint { .. } => true,
            TetherError::Auth { .. } => true,
            TetherError::Config(_) => true,

            TetherError::Connect { .. } => false,
            TetherError::Transfer(_) => false,
            TetherError::NonZeroExit { .. } => false,
            TetherError::Protocol(_) => false,
            TetherError::Remote(_) => false,
            TetherError::Io(_) => false,
        }
    }

    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        if self.is_fatal() {
            EXIT_FATAL
        } else {
            EXIT_FAILURE
        }
    }
}

impl fmt::Display for TetherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TetherError::NoSshEndpoint { host, candidates } => {
                if *candidates == 0 {
                    write!(f, "Host '{}' exposes no SSH endpoint", host)
                } else {
                    write!(
                        f,
                        "Host '{}' exposes {} SSH endpoints, expected exactly one",
                        host, candidates
                    )
                }
            }
            TetherError::Connect { host, message } => {
                write!(f, "Connection to '{}' failed: {}", host, message)
            }
            TetherError::Auth { host, message } => {
                write!(f, "Authentication to '{}' failed: {}", host, message)
            }
            TetherError::Transfer(msg) => {
                write!(f, "Executable transfer failed: {}", msg)
            }
            TetherError::NonZeroExit { status, output } => {
                if output.is_empty() {
                    write!(f, "Remote command exited with status {}", status)
                } else {
                    write!(
                        f,
                        "Remote command exited with status {}: {}",
                        status,
                        output.trim_end()
                    )
                }
            }
            TetherError::Protocol(msg) => {
                write!(f, "Protocol error: {}", msg)
            }
            TetherError::Remote(description) => {
                write!(f, "Remote task failed: {}", description)
            }
            TetherError::Io(err) => {
                write!(f, "I/O error: {}", err)
            }
            TetherError::Config(msg) => {
                write!(f, "Configuration error: {}", msg)
            }
        }
    }
}

impl std::error::Error for TetherError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TetherError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for TetherError {
    fn from(err: io::Error) -> Self {
        TetherError::Io(err)
    }
}

impl From<bincode::Error> for TetherError {
    fn from(err: bincode::Error) -> Self {
        TetherError::Protocol(format!("value serialization failed: {}", err))
    }
}

impl From<toml::de::Error> for TetherError {
    fn from(err: toml::de::Error) -> Self {
        TetherError::Config(format!("TOML parse error: {}", err))
    }
}
