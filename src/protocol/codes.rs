//! Protocol constants: opcodes, field ids, result codes.
//!
//! Only the vocabulary the engine itself speaks is defined here. Business
//! commands travel as opaque [`Message`](crate::core::message::Message) values
//! and carry their own opcodes.

/// Protocol revision the client advertises and expects.
pub const CLIENT_PROTOCOL_VERSION: u32 = 44;

/// Default server port.
pub const DEFAULT_PORT: u16 = 4701;

/// Client library version reported at login.
pub const LIBRARY_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Message opcodes
pub mod cmd {
    pub const LOGIN: u16 = 0x0001;
    pub const LOGIN_RESP: u16 = 0x0002;
    pub const KEEPALIVE: u16 = 0x0003;
    pub const NOTIFY: u16 = 0x0012;
    pub const REQUEST_COMPLETED: u16 = 0x001D;
    pub const GET_SERVER_INFO: u16 = 0x0067;
    pub const FILE_DATA: u16 = 0x0069;
    pub const ABORT_FILE_TRANSFER: u16 = 0x0072;
    pub const REQUEST_SESSION_KEY: u16 = 0x0082;
    pub const ENCRYPTED_MESSAGE: u16 = 0x0083;
    pub const SESSION_KEY: u16 = 0x0084;
    pub const REQUEST_ENCRYPTION: u16 = 0x0085;
}

/// Field (variable) identifiers
pub mod vid {
    pub const LOGIN_NAME: u32 = 1;
    pub const PASSWORD: u32 = 2;
    pub const NOTIFICATION_CODE: u32 = 23;
    pub const RCC: u32 = 28;
    pub const LOCKED_BY: u32 = 29;
    pub const USER_ID: u32 = 35;
    pub const USER_SYS_RIGHTS: u32 = 36;
    pub const NOTIFICATION_DATA: u32 = 92;
    pub const TIMESTAMP: u32 = 94;
    pub const SERVER_VERSION: u32 = 121;
    pub const SUPPORTED_ENCRYPTION: u32 = 122;
    pub const SERVER_ID: u32 = 142;
    pub const PROTOCOL_VERSION: u32 = 146;
    pub const PUBLIC_KEY: u32 = 154;
    pub const SESSION_KEY: u32 = 155;
    pub const CIPHER: u32 = 156;
    pub const KEY_LENGTH: u32 = 157;
    pub const SESSION_IV: u32 = 158;
    pub const CLIENT_TYPE: u32 = 170;
    pub const CLIENT_INFO: u32 = 175;
    pub const OS_INFO: u32 = 176;
    pub const LIBNXCL_VERSION: u32 = 177;
    pub const SESSION_ID: u32 = 209;
    pub const CHANGE_PASSWD_FLAG: u32 = 221;
    pub const IV_LENGTH: u32 = 238;
    pub const ERROR_TEXT: u32 = 259;
    pub const AUTH_TYPE: u32 = 275;
    pub const CERTIFICATE: u32 = 276;
    pub const SIGNATURE: u32 = 277;
    pub const CHALLENGE: u32 = 278;
    pub const TIMEZONE: u32 = 308;

    /// Ed25519 signature over the server's key offer. Lives in the extension
    /// range so it never collides with server vocabulary.
    pub const SESSION_KEY_SIGNATURE: u32 = 0x00FF_0001;
}

/// Request completion codes
pub mod rcc {
    pub const SUCCESS: u32 = 0;
    pub const COMPONENT_LOCKED: u32 = 1;
    pub const ACCESS_DENIED: u32 = 2;
    pub const INVALID_REQUEST: u32 = 3;
    pub const TIMEOUT: u32 = 4;
    pub const OUT_OF_STATE_REQUEST: u32 = 5;
    pub const COMM_FAILURE: u32 = 9;
    pub const SYSTEM_FAILURE: u32 = 10;
    pub const INVALID_ARGUMENT: u32 = 12;
    pub const IO_ERROR: u32 = 16;
    pub const VERSION_MISMATCH: u32 = 31;
    pub const BAD_PROTOCOL: u32 = 40;
    pub const NO_CIPHERS: u32 = 42;
    pub const INVALID_PUBLIC_KEY: u32 = 43;
    pub const INVALID_SESSION_KEY: u32 = 44;
    pub const NO_ENCRYPTION_SUPPORT: u32 = 45;
    pub const INTERNAL_ERROR: u32 = 46;
    pub const FILE_IO_ERROR: u32 = 52;
    pub const TRANSFER_IN_PROGRESS: u32 = 54;
    pub const CONNECTION_BROKEN: u32 = 62;
    pub const LOCAL_CRYPTO_ERROR: u32 = 71;
    pub const UNSUPPORTED_AUTH_TYPE: u32 = 72;
    pub const BAD_CERTIFICATE: u32 = 73;
    pub const ENCRYPTION_ERROR: u32 = 98;
}

/// Notification codes carried in `vid::NOTIFICATION_CODE`
pub mod notify {
    pub const SHUTDOWN: u32 = 1;
}

/// Login authentication methods (`vid::AUTH_TYPE`)
pub mod auth {
    pub const PASSWORD: u16 = 0;
    pub const CERTIFICATE: u16 = 1;
    pub const SSO_TICKET: u16 = 2;
}

/// Cipher identifiers and the bit each occupies in `vid::SUPPORTED_ENCRYPTION`
pub mod cipher {
    pub const XCHACHA20_POLY1305: u16 = 0;

    /// Bit mask of every cipher this crate can speak.
    pub const SUPPORTED_MASK: u32 = 1 << XCHACHA20_POLY1305;

    /// Picks the first cipher both sides support.
    pub fn select(server_mask: u32) -> Option<u16> {
        let common = server_mask & SUPPORTED_MASK;
        if common == 0 {
            None
        } else {
            Some(common.trailing_zeros() as u16)
        }
    }
}

/// Largest payload carried by one `CMD_FILE_DATA` message.
pub const FILE_BUFFER_SIZE: usize = 32 * 1024;

/// Client type reported at login (`vid::CLIENT_TYPE`)
pub const CLIENT_TYPE_DESKTOP: u16 = 0;
