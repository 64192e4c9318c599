//! Timeout defaults and async timeout helpers.

use crate::error::{ProtocolError, Result};
use std::future::Future;
use std::time::Duration;

/// Default TCP connect timeout.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default wait for a command reply.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Idle read timeout after which the receiver gives up on the connection.
pub const RECEIVE_TIMEOUT: Duration = Duration::from_secs(900);

/// Default keepalive period.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// How long an unclaimed reply is kept in the wait queue.
pub const HOLD_TIME: Duration = Duration::from_secs(60);

/// Upper bound on a single socket write.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(60);

/// Grace period for the receiver task to finish during disconnect.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs `fut` with a deadline, mapping expiry to `ProtocolError::Timeout`.
pub async fn with_timeout_error<F, T>(fut: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Timeout),
    }
}

/// Like [`with_timeout_error`] but with a caller-chosen error on expiry.
pub async fn with_timeout_or<F, T>(fut: F, duration: Duration, on_expiry: ProtocolError) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(on_expiry),
    }
}
