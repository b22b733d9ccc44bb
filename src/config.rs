/*!
 * Connection parameters shipped to remote workers
 */

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, TetherError};

/// SSH identity used to open sessions to every host in a group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshIdentity {
    /// Login user on the remote hosts
    pub username: String,

    /// Public key file; omitted when the library should derive it
    #[serde(default)]
    pub public_key: Option<PathBuf>,

    /// Private key file
    pub private_key: PathBuf,

    /// Passphrase for the private key
    #[serde(
        default,
        serialize_with = "expose_passphrase",
        deserialize_with = "restore_passphrase"
    )]
    passphrase: Option<SecretString>,

    /// known_hosts file to check the server key against
    #[serde(default)]
    pub known_hosts: Option<PathBuf>,
}

impl SshIdentity {
    pub fn new(username: impl Into<String>, private_key: impl Into<PathBuf>) -> Self {
        Self {
            username: username.into(),
            public_key: None,
            private_key: private_key.into(),
            passphrase: None,
            known_hosts: None,
        }
    }

    pub fn with_public_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.public_key = Some(path.into());
        self
    }

    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(SecretString::from(passphrase.into()));
        self
    }

    pub fn with_known_hosts(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts = Some(path.into());
        self
    }

    /// Expose the passphrase for the SSH library; never log the result.
    pub(crate) fn passphrase(&self) -> Option<&str> {
        self.passphrase.as_ref().map(|p| p.expose_secret())
    }
}

/// Immutable configuration bundle for one controller.
///
/// Constructed once at startup and shipped unchanged to the remote side as a
/// single opaque blob ahead of any application traffic. A fresh blob is
/// encoded per call; the bundle itself is never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionParameters {
    /// Opaque credentials token passed through to the remote side untouched
    #[serde(default)]
    pub credentials: Option<String>,

    /// SSH identity for session establishment
    pub identity: SshIdentity,

    /// Path of the deployed executable on remote hosts
    pub remote_path: PathBuf,

    /// Path of the executable on the controller, the source of deployments
    pub local_path: PathBuf,
}

impl ConnectionParameters {
    pub fn new(
        identity: SshIdentity,
        local_path: impl Into<PathBuf>,
        remote_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            credentials: None,
            identity,
            remote_path: remote_path.into(),
            local_path: local_path.into(),
        }
    }

    pub fn with_credentials(mut self, token: impl Into<String>) -> Self {
        self.credentials = Some(token.into());
        self
    }

    /// Encode the bundle as the opaque blob sent over the wire.
    pub fn to_blob(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode a bundle from a wire blob.
    pub fn from_blob(blob: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(blob)?)
    }

    /// Load parameters from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            TetherError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Ok(toml::from_str(&contents)?)
    }
}

fn expose_passphrase<S>(
    value: &Option<SecretString>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(secret) => serializer.serialize_some(secret.expose_secret()),
        None => serializer.serialize_none(),
    }
}

fn restore_passphrase<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(SecretString::from))
}
