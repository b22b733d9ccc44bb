/*!
 * Deployment operations
 *
 * Copies the controller's executable to a remote host over SCP and checks a
 * deployed copy against the local one by content hash. Whether a mismatch
 * triggers a copy is the caller's policy; these operations neither skip nor
 * force anything on their own.
 */

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use tracing::debug;

use crate::error::{Result, TetherError};
use crate::session::SshSession;

/// Mode deployed executables are created with.
pub const DEFAULT_EXECUTABLE_MODE: i32 = 0o700;

/// Remote command fed a "<hex-hash>  <path>" line on stdin; exits zero iff
/// the file at the path matches.
pub const REMOTE_HASH_COMMAND: &str = "sha256sum --check --status -";

const COPY_CHUNK: usize = 64 * 1024;

/// Stream the local executable to the remote path, preserving `mode`.
pub fn copy_executable(
    session: &SshSession,
    local: &Path,
    remote: &Path,
    mode: i32,
) -> Result<u64> {
    let mut file = File::open(local)
        .map_err(|e| TetherError::Transfer(format!("open {}: {}", local.display(), e)))?;
    let size = file
        .metadata()
        .map_err(|e| TetherError::Transfer(format!("stat {}: {}", local.display(), e)))?
        .len();

    let mut channel = session
        .raw()
        .scp_send(remote, mode, size, None)
        .map_err(|e| {
            TetherError::Transfer(format!("scp open {}: {}", remote.display(), e.message()))
        })?;

    let mut chunk = [0u8; COPY_CHUNK];
    loop {
        let got = file
            .read(&mut chunk)
            .map_err(|e| TetherError::Transfer(format!("read {}: {}", local.display(), e)))?;
        if got == 0 {
            break;
        }
        channel
            .write_all(&chunk[..got])
            .map_err(|e| TetherError::Transfer(format!("scp write: {}", e)))?;
    }

    channel
        .send_eof()
        .map_err(|e| TetherError::Transfer(format!("scp eof: {}", e.message())))?;
    channel
        .wait_eof()
        .map_err(|e| TetherError::Transfer(format!("scp eof ack: {}", e.message())))?;
    channel
        .close()
        .map_err(|e| TetherError::Transfer(format!("scp close: {}", e.message())))?;
    channel
        .wait_close()
        .map_err(|e| TetherError::Transfer(format!("scp close ack: {}", e.message())))?;

    debug!(
        host = session.host(),
        local = %local.display(),
        remote = %remote.display(),
        size,
        mode = %format_args!("{:o}", mode),
        "executable deployed"
    );

    Ok(size)
}

/// Compute the SHA-256 content hash of a local file, streaming in chunks.
pub fn local_sha256(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut chunk = [0u8; COPY_CHUNK];

    loop {
        let got = file.read(&mut chunk)?;
        if got == 0 {
            break;
        }
        hasher.update(&chunk[..got]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Check whether the deployed executable matches the local one. Runs the
/// remote hash-verification command, feeds it the hash line, and reports
/// success iff the remote exit status is zero.
pub fn verify_remote_hash(session: &SshSession, local: &Path, remote: &Path) -> Result<bool> {
    let digest = local_sha256(local)?;

    let mut channel = session.command_channel(REMOTE_HASH_COMMAND)?;
    channel
        .write_all(hash_line(&digest, remote).as_bytes())
        .map_err(|e| TetherError::Protocol(format!("hash line write failed: {}", e)))?;
    channel.send_eof()?;
    channel.drain()?;
    let status = channel.finish()?;

    debug!(
        host = session.host(),
        remote = %remote.display(),
        status,
        "remote hash verification finished"
    );

    Ok(status == 0)
}

/// The line format the remote verification command expects: hash, two
/// spaces, path, newline.
fn hash_line(digest: &str, remote: &Path) -> String {
    format!("{}  {}\n", digest, remote.display())
}
