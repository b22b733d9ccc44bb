/*!
 * Tether - remote worker launch and framed messaging over SSH
 *
 * A controller-side library for driving worker processes on remote hosts:
 * - One authenticated SSH session per operation, with scoped teardown
 * - Length-prefixed frame codec with an error flag on the return path
 * - Call/spawn remote task protocol over a single command channel
 * - SCP deployment with SHA-256 content verification
 * - A backend facade over named host groups
 */

pub mod backend;
pub mod config;
pub mod deploy;
pub mod error;
pub mod hosts;
pub mod logging;
pub mod protocol;
pub mod remote;
pub mod session;
pub mod task;
pub mod wire;

// Re-export commonly used types
pub use backend::Backend;
pub use config::{ConnectionParameters, SshIdentity};
pub use error::{Result, TetherError};
pub use hosts::{Endpoint, Host, HostDirectory, HostGroup, StaticDirectory};
pub use protocol::CallChannel;
pub use remote::NodeSettings;
pub use session::{CommandChannel, CommandStream, SshSession};
pub use task::{TaskDescriptor, TaskRegistry};
pub use wire::FrameFlag;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
