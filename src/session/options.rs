//! Connect options and identity records produced by the handshake.

use crate::config::NxcpConfig;
use crate::error::Result;
use crate::protocol::codes::{CLIENT_TYPE_DESKTOP, LIBRARY_VERSION};
use crate::protocol::handshake::SERVER_KEY_SIZE;
use bitflags::bitflags;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

bitflags! {
    /// Handshake behaviour switches.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ConnectFlags: u32 {
        /// Negotiate an encryption context before login.
        const ENCRYPT = 0x0001;
        /// Require the server version string to equal the client's.
        const EXACT_VERSION_MATCH = 0x0002;
        /// Skip the protocol revision check.
        const IGNORE_PROTOCOL_VERSION = 0x0008;
    }
}

/// Signs the server's login challenge with the key matching a certificate.
pub trait ChallengeSigner: Send + Sync {
    fn sign(&self, challenge: &[u8]) -> Result<Vec<u8>>;
}

/// How the client proves its identity at login.
#[derive(Clone)]
pub enum Credentials {
    Password(String),
    Certificate {
        certificate: Bytes,
        signer: Arc<dyn ChallengeSigner>,
    },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Password(_) => f.write_str("Password(..)"),
            Credentials::Certificate { certificate, .. } => f
                .debug_struct("Certificate")
                .field("len", &certificate.len())
                .finish_non_exhaustive(),
        }
    }
}

/// Everything `Session::connect` needs to reach and log in to a server.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub login: String,
    pub credentials: Credentials,
    pub flags: ConnectFlags,
    /// Free-form client description sent at login
    pub client_info: String,
    pub client_type: u16,
    /// Compared with the server version when `EXACT_VERSION_MATCH` is set
    pub client_version: String,
    /// Ed25519 key the server signs its key offer with. Required for `ENCRYPT`.
    pub server_key: Option<[u8; SERVER_KEY_SIZE]>,
}

impl ConnectOptions {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        login: impl Into<String>,
        credentials: Credentials,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            login: login.into(),
            credentials,
            flags: ConnectFlags::empty(),
            client_info: format!("nxcp/{LIBRARY_VERSION}"),
            client_type: CLIENT_TYPE_DESKTOP,
            client_version: LIBRARY_VERSION.to_string(),
            server_key: None,
        }
    }

    /// Password login against the address in `config`, honouring its
    /// encryption preference. Encryption still needs a pinned server key.
    pub fn from_config(
        config: &NxcpConfig,
        login: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self> {
        let (host, port) = config.session.host_and_port()?;
        let mut options = Self::new(host, port, login, Credentials::Password(password.into()));
        options.flags.set(ConnectFlags::ENCRYPT, config.session.encryption);
        Ok(options)
    }

    pub fn with_flags(mut self, flags: ConnectFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn with_server_key(mut self, key: [u8; SERVER_KEY_SIZE]) -> Self {
        self.server_key = Some(key);
        self
    }

    pub fn with_client_info(mut self, info: impl Into<String>) -> Self {
        self.client_info = info.into();
        self
    }
}

/// Server identity learned from `CMD_GET_SERVER_INFO`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerInfo {
    pub version: String,
    pub protocol_version: u32,
    pub server_id: Bytes,
    pub timezone: Option<String>,
    pub challenge: Option<Bytes>,
}

/// Login outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserInfo {
    pub user_id: u32,
    pub system_rights: u64,
    pub password_change_required: bool,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config() {
        let config = NxcpConfig::default_with_overrides(|c| {
            c.session.server_address = "nms.example.org:4800".into();
            c.session.encryption = true;
        });
        let options = ConnectOptions::from_config(&config, "admin", "secret").unwrap();
        assert_eq!(options.host, "nms.example.org");
        assert_eq!(options.port, 4800);
        assert!(options.flags.contains(ConnectFlags::ENCRYPT));
        assert!(matches!(options.credentials, Credentials::Password(ref p) if p == "secret"));
        assert!(options.server_key.is_none());
        assert_eq!(options.with_server_key([3; 32]).server_key, Some([3; 32]));
    }

    #[test]
    fn test_debug_hides_password() {
        let options = ConnectOptions::new("h", 1, "u", Credentials::Password("hunter2".into()));
        assert!(!format!("{options:?}").contains("hunter2"));
    }
}
