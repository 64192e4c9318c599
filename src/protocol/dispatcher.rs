use crate::protocol::codes::cmd;
use std::collections::HashMap;

/// Where the receiver sends a decoded message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Key exchange request, handled inline under the context lock.
    SessionKey,
    /// Peer keepalive; refreshes liveness and is not queued.
    Keepalive,
    /// Unsolicited; goes to the notification callback.
    Notification,
    /// File chunk or abort; goes to the transfer prepared for its id.
    FileTransfer,
    /// Everything else; goes to the wait queue.
    Correlate,
}

/// Opcode route table, fixed once the session is built.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    routes: HashMap<u16, Route>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(&[cmd::NOTIFY])
    }
}

impl Dispatcher {
    /// Standard routes plus the given notification opcodes.
    pub fn new(notification_codes: &[u16]) -> Self {
        let mut routes = HashMap::with_capacity(notification_codes.len() + 4);
        routes.insert(cmd::REQUEST_SESSION_KEY, Route::SessionKey);
        routes.insert(cmd::KEEPALIVE, Route::Keepalive);
        routes.insert(cmd::FILE_DATA, Route::FileTransfer);
        routes.insert(cmd::ABORT_FILE_TRANSFER, Route::FileTransfer);
        for &code in notification_codes {
            routes.insert(code, Route::Notification);
        }
        Self { routes }
    }

    /// Overrides the route for one opcode.
    pub fn with_route(mut self, opcode: u16, route: Route) -> Self {
        self.routes.insert(opcode, route);
        self
    }

    #[inline]
    pub fn route(&self, opcode: u16) -> Route {
        self.routes.get(&opcode).copied().unwrap_or(Route::Correlate)
    }
}
