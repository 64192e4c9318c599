//! # Client Session
//!
//! A [`Session`] owns one NXCP connection: it drives the handshake, keeps the
//! message id counter and the send lock, and runs a single receiver task that
//! feeds the wait queue and the notification callback.
//!
//! ```text
//! Unconnected -> Connecting -> ServerInfo -> [EncryptionNegotiation]
//!             -> Login -> Connected -> Disconnecting -> Disconnected
//! ```
//!
//! `Disconnected` is terminal; reconnecting means building a new session.
//! After `connect` succeeds the session may be shared (`Arc<Session>`) and
//! used from any number of tasks. A connection lost after `Connected` is
//! reported once through the connection handler.

mod options;
mod receiver;
mod transfer;

pub use options::{
    ChallengeSigner, ConnectFlags, ConnectOptions, Credentials, ServerInfo, UserInfo,
};
pub use transfer::FileReceiver;

use crate::config::NxcpConfig;
use crate::core::codec;
use crate::core::message::{Message, MessageFlags};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::codes::{auth, cmd, rcc, vid, CLIENT_PROTOCOL_VERSION, LIBRARY_VERSION};
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::encryption::EncryptionContext;
use crate::protocol::wait_queue::WaitQueue;
use crate::transport::tcp::{self, FrameWriter};
use crate::utils::metrics::{MetricsSnapshot, SessionMetrics};
use crate::utils::timeout::SHUTDOWN_TIMEOUT;
use crate::protocol::handshake::SERVER_KEY_SIZE;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unconnected,
    Connecting,
    ServerInfo,
    EncryptionNegotiation,
    Login,
    Connected,
    Disconnecting,
    Disconnected,
}

/// Connection state changes delivered to the connection handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The connection was lost without a local `disconnect`. `rcc` names the cause.
    ConnectionBroken { rcc: u32 },
}

type NotificationHandler = Arc<dyn Fn(&Message) + Send + Sync>;
type ConnectionHandler = Arc<dyn Fn(SessionEvent) + Send + Sync>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(l: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(l: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the session handle, the receiver and the keepalive task.
pub(crate) struct Shared {
    next_id: AtomicU32,
    writer: tokio::sync::Mutex<Option<FrameWriter>>,
    encryption: RwLock<Option<Arc<EncryptionContext>>>,
    wait_queue: WaitQueue,
    dispatcher: Dispatcher,
    broken: AtomicBool,
    state: Mutex<SessionState>,
    notification_handler: RwLock<Option<NotificationHandler>>,
    connection_handler: RwLock<Option<ConnectionHandler>>,
    broken_reported: AtomicBool,
    server_key: RwLock<Option<[u8; SERVER_KEY_SIZE]>>,
    file_transfers: Mutex<transfer::Transfers>,
    metrics: SessionMetrics,
    server_time: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
    receive_timeout: Duration,
    max_message_size: usize,
    compression: bool,
}

impl Shared {
    fn next_message_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    /// Moves the handshake forward unless the receiver already gave up.
    fn advance(&self, next: SessionState) -> Result<()> {
        let mut state = lock(&self.state);
        if *state == SessionState::Disconnected {
            return Err(ProtocolError::ConnectionBroken);
        }
        debug!(from = ?*state, to = ?next, "Session state change");
        *state = next;
        Ok(())
    }

    fn set_disconnected(&self) {
        *lock(&self.state) = SessionState::Disconnected;
    }

    fn encryption(&self) -> Option<Arc<EncryptionContext>> {
        read(&self.encryption).clone()
    }

    fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire)
    }

    fn mark_broken(&self) {
        self.broken.store(true, Ordering::Release);
    }

    /// Fires `ConnectionBroken` at most once per session.
    fn report_broken(&self, code: u32) {
        if self.broken_reported.swap(true, Ordering::AcqRel) {
            return;
        }
        let handler = read(&self.connection_handler).clone();
        let Some(handler) = handler else {
            return;
        };
        let event = SessionEvent::ConnectionBroken { rcc: code };
        if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
            warn!(error = constants::ERR_EVENT_HANDLER_PANIC, "Connection event lost");
        }
    }

    fn clear_transfers(&self) {
        lock(&self.file_transfers).clear();
    }

    fn signal_shutdown(&self) {
        // No receiver subscribed means there is nothing to stop.
        let _ = self.shutdown_tx.send(true);
    }

    async fn send_message(&self, msg: &Message) -> Result<()> {
        if self.is_broken() {
            return Err(ProtocolError::ConnectionBroken);
        }

        let mut frame = codec::encode_with(msg, self.compression);
        if frame.len() > self.max_message_size {
            return Err(crate::error::FrameError::FrameTooLarge {
                size: frame.len(),
                limit: self.max_message_size,
            }
            .into());
        }

        if !msg.has_flag(MessageFlags::DONT_ENCRYPT) {
            if let Some(ctx) = self.encryption() {
                frame = ctx.encrypt(&frame)?;
            }
        }

        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(ProtocolError::ConnectionBroken)?;
        writer.send(&frame).await?;
        self.metrics.message_sent(frame.len() as u64);
        Ok(())
    }

    async fn wait_for_message(&self, opcode: u16, id: u32, timeout: Duration) -> Result<Message> {
        self.wait_queue.wait(opcode, id, timeout).await
    }

    async fn wait_for_result(&self, id: u32, timeout: Duration) -> Result<Message> {
        let msg = self
            .wait_for_message(cmd::REQUEST_COMPLETED, id, timeout)
            .await?;
        match msg.get_u32(vid::RCC).unwrap_or(rcc::SUCCESS) {
            rcc::SUCCESS => Ok(msg),
            code => Err(ProtocolError::Request { rcc: code }),
        }
    }

    async fn simple_command(&self, opcode: u16, timeout: Duration) -> u32 {
        let id = self.next_message_id();
        if let Err(e) = self.send_message(&Message::new(opcode, id)).await {
            return e.rcc();
        }
        match self.wait_for_result(id, timeout).await {
            Ok(_) => rcc::SUCCESS,
            Err(e) => e.rcc(),
        }
    }
}

#[derive(Default)]
struct Tasks {
    receiver: Option<JoinHandle<()>>,
    keepalive: Option<JoinHandle<()>>,
}

/// One client connection to an NXCP server.
pub struct Session {
    shared: Arc<Shared>,
    config: NxcpConfig,
    server: RwLock<Option<ServerInfo>>,
    user: RwLock<Option<UserInfo>>,
    tasks: Mutex<Tasks>,
}

impl Session {
    /// Builds an unconnected session routing the configured notification codes.
    pub fn new(config: NxcpConfig) -> Self {
        let dispatcher = Dispatcher::new(&config.session.notification_codes);
        Self::with_dispatcher(config, dispatcher)
    }

    pub fn with_dispatcher(config: NxcpConfig, dispatcher: Dispatcher) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let shared = Shared {
            next_id: AtomicU32::new(1),
            writer: tokio::sync::Mutex::new(None),
            encryption: RwLock::new(None),
            wait_queue: WaitQueue::new(config.session.hold_time),
            dispatcher,
            broken: AtomicBool::new(false),
            state: Mutex::new(SessionState::Unconnected),
            notification_handler: RwLock::new(None),
            connection_handler: RwLock::new(None),
            broken_reported: AtomicBool::new(false),
            server_key: RwLock::new(None),
            file_transfers: Mutex::new(transfer::Transfers::new()),
            metrics: SessionMetrics::new(),
            server_time: AtomicU64::new(0),
            shutdown_tx,
            receive_timeout: config.session.receive_timeout,
            max_message_size: config.transport.max_message_size,
            compression: config.transport.compression_enabled,
        };
        Self {
            shared: Arc::new(shared),
            config,
            server: RwLock::new(None),
            user: RwLock::new(None),
            tasks: Mutex::new(Tasks::default()),
        }
    }

    /// Connects over TCP and runs the full handshake.
    ///
    /// On any failure the session is torn down and left `Disconnected`.
    ///
    /// # Errors
    /// - `ProtocolError::ConnectTimeout` / `Io` if the server is unreachable
    /// - `ProtocolError::BadProtocol` / `VersionMismatch` from the version checks
    /// - `ProtocolError::Request` with the server's code, e.g. `RCC_ACCESS_DENIED`
    /// - `ProtocolError::OutOfState` if this session was already used
    #[instrument(skip(self, options), fields(host = %options.host, port = options.port))]
    pub async fn connect(&self, options: ConnectOptions) -> Result<()> {
        self.begin_connect()?;
        let timeout = self.config.transport.connect_timeout;
        match tcp::connect(&options.host, options.port, timeout).await {
            Ok(stream) => self.establish(stream, &options).await,
            Err(e) => {
                warn!(error = %e, "Connect failed");
                self.shared.metrics.connection_error();
                self.shared.metrics.handshake_failed();
                self.disconnect().await;
                Err(e)
            }
        }
    }

    /// Runs the handshake over an already-open stream.
    pub async fn connect_with_stream<S>(&self, stream: S, options: ConnectOptions) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.begin_connect()?;
        self.establish(stream, &options).await
    }

    fn begin_connect(&self) -> Result<()> {
        let mut state = lock(&self.shared.state);
        if *state != SessionState::Unconnected {
            return Err(ProtocolError::OutOfState(constants::ERR_ALREADY_CONNECTED));
        }
        *state = SessionState::Connecting;
        self.shared.metrics.handshake_attempt();
        Ok(())
    }

    async fn establish<S>(&self, stream: S, options: &ConnectOptions) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        *write(&self.shared.server_key) = options.server_key;
        self.start(stream).await;
        match self.handshake(options).await {
            Ok(()) => {
                self.start_keepalive();
                info!(login = %options.login, "Session established");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, rcc = e.rcc(), "Handshake failed");
                self.shared.metrics.handshake_failed();
                self.disconnect().await;
                Err(e)
            }
        }
    }

    async fn start<S>(&self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tcp::split(stream, self.config.transport.send_timeout);
        *self.shared.writer.lock().await = Some(writer);

        let shutdown = self.shared.shutdown_tx.subscribe();
        let handle = tokio::spawn(receiver::run(Arc::clone(&self.shared), reader, shutdown));
        lock(&self.tasks).receiver = Some(handle);
    }

    async fn handshake(&self, options: &ConnectOptions) -> Result<()> {
        let timeout = self.config.session.command_timeout;

        self.shared.advance(SessionState::ServerInfo)?;
        let id = self.create_message_id();
        let request = Message::new(cmd::GET_SERVER_INFO, id);
        self.send_message(&request).await?;
        let reply = self.wait_for_result(id, timeout).await?;

        let server = ServerInfo {
            version: reply
                .get_str(vid::SERVER_VERSION)
                .unwrap_or_default()
                .to_string(),
            protocol_version: reply.get_u32(vid::PROTOCOL_VERSION).unwrap_or(0),
            server_id: reply.get_binary(vid::SERVER_ID).cloned().unwrap_or_default(),
            timezone: reply.get_str(vid::TIMEZONE).map(str::to_string),
            challenge: reply.get_binary(vid::CHALLENGE).cloned(),
        };
        check_server(&server, options)?;
        debug!(
            server_version = %server.version,
            protocol = server.protocol_version,
            "Server info received"
        );
        let challenge = server.challenge.clone();
        *write(&self.server) = Some(server);

        if options.flags.contains(ConnectFlags::ENCRYPT) {
            self.shared.advance(SessionState::EncryptionNegotiation)?;
            self.negotiate_encryption(timeout).await?;
        }

        self.shared.advance(SessionState::Login)?;
        let id = self.create_message_id();
        let login = login_message(id, options, challenge.as_deref())?;
        self.send_message(&login).await?;

        let resp = self.wait_for_message(cmd::LOGIN_RESP, id, timeout).await?;
        match resp.get_u32(vid::RCC).unwrap_or(rcc::SUCCESS) {
            rcc::SUCCESS => {}
            code => return Err(ProtocolError::Request { rcc: code }),
        }

        let user = UserInfo {
            user_id: resp.get_u32(vid::USER_ID).unwrap_or(0),
            system_rights: resp.get_u64(vid::USER_SYS_RIGHTS).unwrap_or(0),
            password_change_required: resp.get_bool(vid::CHANGE_PASSWD_FLAG).unwrap_or(false),
        };
        *write(&self.user) = Some(user);

        self.shared.advance(SessionState::Connected)
    }

    /// The server answers `CMD_REQUEST_ENCRYPTION` with a key request, which
    /// the receiver handles, and then with the completion for this id.
    async fn negotiate_encryption(&self, timeout: Duration) -> Result<()> {
        if read(&self.shared.server_key).is_none() {
            warn!(error = constants::ERR_NO_SERVER_KEY, "Encryption unavailable");
            return Err(ProtocolError::Request {
                rcc: rcc::INVALID_PUBLIC_KEY,
            });
        }
        let id = self.create_message_id();
        let request = Message::new(cmd::REQUEST_ENCRYPTION, id);
        self.send_message(&request).await?;
        self.wait_for_result(id, timeout).await?;

        match self.shared.encryption() {
            Some(ctx) => {
                debug!(cipher = ctx.cipher_id(), "Encryption established");
                Ok(())
            }
            None => Err(ProtocolError::Request {
                rcc: rcc::ENCRYPTION_ERROR,
            }),
        }
    }

    fn start_keepalive(&self) {
        let period = self.config.session.keepalive_interval;
        if period.is_zero() {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let timeout = self.config.session.command_timeout;
        let handle = tokio::spawn(keepalive(shared, period, timeout));
        lock(&self.tasks).keepalive = Some(handle);
    }

    /// Tears the connection down. Safe to call repeatedly and from any task
    /// except the notification callback, which runs on the receiver.
    #[instrument(skip(self))]
    pub async fn disconnect(&self) {
        {
            let mut state = lock(&self.shared.state);
            if *state != SessionState::Disconnected {
                *state = SessionState::Disconnecting;
            }
        }

        let (receiver, keepalive) = {
            let mut tasks = lock(&self.tasks);
            (tasks.receiver.take(), tasks.keepalive.take())
        };

        self.shared.mark_broken();
        self.shared.signal_shutdown();
        if let Some(handle) = keepalive {
            handle.abort();
        }

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.shared.writer.lock()).await {
            Ok(mut writer) => {
                if let Some(mut writer) = writer.take() {
                    if let Err(e) = writer.close().await {
                        debug!(error = %e, "Socket shutdown failed");
                    }
                }
            }
            Err(_) => warn!("Send lock still held, leaving socket to close on drop"),
        }

        if let Some(mut handle) = receiver {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut handle)
                .await
                .is_err()
            {
                warn!("Receiver did not stop in time");
                handle.abort();
            }
        }

        self.shared.wait_queue.shutdown();
        self.shared.clear_transfers();
        *write(&self.shared.encryption) = None;
        self.shared.set_disconnected();
        debug!("Session disconnected");
    }

    /// Next request id; unique for the life of the session.
    pub fn create_message_id(&self) -> u32 {
        self.shared.next_message_id()
    }

    /// Encodes `msg` and writes it under the send lock, encrypting it when a
    /// context exists and the message is not `DONT_ENCRYPT`.
    pub async fn send_message(&self, msg: &Message) -> Result<()> {
        self.shared.send_message(msg).await
    }

    /// Waits for the message with this opcode and request id.
    ///
    /// # Errors
    /// - `ProtocolError::Timeout` if nothing arrived in time
    /// - `ProtocolError::ConnectionBroken` once the session is torn down
    pub async fn wait_for_message(
        &self,
        opcode: u16,
        id: u32,
        timeout: Duration,
    ) -> Result<Message> {
        self.shared.wait_for_message(opcode, id, timeout).await
    }

    /// Waits for `CMD_REQUEST_COMPLETED`; a non-zero `VID_RCC` becomes
    /// `ProtocolError::Request`.
    pub async fn wait_for_result(&self, id: u32, timeout: Duration) -> Result<Message> {
        self.shared.wait_for_result(id, timeout).await
    }

    /// Like [`wait_for_result`](Self::wait_for_result) but returns the code.
    pub async fn wait_for_rcc(&self, id: u32, timeout: Duration) -> u32 {
        match self.wait_for_result(id, timeout).await {
            Ok(_) => rcc::SUCCESS,
            Err(e) => e.rcc(),
        }
    }

    /// Collects a multi-part response up to and including the part flagged
    /// `END_OF_SEQUENCE`. `timeout` bounds each part.
    pub async fn receive_sequence(
        &self,
        opcode: u16,
        id: u32,
        timeout: Duration,
    ) -> Result<Vec<Message>> {
        let mut parts = Vec::new();
        loop {
            let part = self.wait_for_message(opcode, id, timeout).await?;
            let last = part.is_end_of_sequence();
            parts.push(part);
            if last {
                return Ok(parts);
            }
        }
    }

    /// Sends an empty request and returns its result code.
    pub async fn simple_command(&self, opcode: u16) -> u32 {
        self.shared
            .simple_command(opcode, self.config.session.command_timeout)
            .await
    }

    /// Installs the callback for notification opcodes. It runs on the
    /// receiver task and must not block.
    pub fn set_notification_handler<F>(&self, handler: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        *write(&self.shared.notification_handler) = Some(Arc::new(handler));
    }

    /// Installs the callback for connection events. Like the notification
    /// handler it may run on the receiver task and must not block.
    pub fn set_connection_handler<F>(&self, handler: F)
    where
        F: Fn(SessionEvent) + Send + Sync + 'static,
    {
        *write(&self.shared.connection_handler) = Some(Arc::new(handler));
    }

    /// Registers a receiver for the file the peer will send under `id`.
    /// Call it before sending the request that starts the transfer.
    ///
    /// # Errors
    /// - `ProtocolError::Request` with `RCC_TRANSFER_IN_PROGRESS` if `id` is taken
    /// - `ProtocolError::ConnectionBroken` once the session is torn down
    pub fn prepare_file_transfer(&self, id: u32) -> Result<FileReceiver> {
        transfer::prepare(&self.shared, id)
    }

    /// Streams `reader` to the peer as file data for request `id` and returns
    /// the byte count. A read failure aborts the transfer on the wire.
    pub async fn send_file<R>(&self, id: u32, reader: &mut R) -> Result<u64>
    where
        R: AsyncRead + Unpin,
    {
        transfer::send(&self.shared, id, reader).await
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected && !self.shared.is_broken()
    }

    pub fn is_encrypted(&self) -> bool {
        self.shared.encryption().is_some()
    }

    /// True while the receiver task is alive.
    pub fn is_receiver_running(&self) -> bool {
        lock(&self.tasks)
            .receiver
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn command_timeout(&self) -> Duration {
        self.config.session.command_timeout
    }

    pub fn server_info(&self) -> Option<ServerInfo> {
        read(&self.server).clone()
    }

    pub fn server_version(&self) -> Option<String> {
        read(&self.server).as_ref().map(|s| s.version.clone())
    }

    pub fn server_timezone(&self) -> Option<String> {
        read(&self.server).as_ref().and_then(|s| s.timezone.clone())
    }

    pub fn user_info(&self) -> Option<UserInfo> {
        *read(&self.user)
    }

    pub fn user_id(&self) -> Option<u32> {
        self.user_info().map(|u| u.user_id)
    }

    pub fn system_rights(&self) -> u64 {
        self.user_info().map_or(0, |u| u.system_rights)
    }

    pub fn password_change_required(&self) -> bool {
        self.user_info().is_some_and(|u| u.password_change_required)
    }

    /// Server clock from the last peer keepalive, if any arrived.
    pub fn server_time(&self) -> Option<u64> {
        match self.shared.server_time.load(Ordering::Relaxed) {
            0 => None,
            t => Some(t),
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    pub fn log_metrics(&self) {
        self.shared.metrics.log_metrics();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shared.mark_broken();
        self.shared.signal_shutdown();
        let tasks = self.tasks.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = tasks.keepalive.take() {
            handle.abort();
        }
    }
}

fn check_server(server: &ServerInfo, options: &ConnectOptions) -> Result<()> {
    if !options.flags.contains(ConnectFlags::IGNORE_PROTOCOL_VERSION)
        && server.protocol_version != CLIENT_PROTOCOL_VERSION
    {
        return Err(ProtocolError::BadProtocol {
            server: server.protocol_version,
            expected: CLIENT_PROTOCOL_VERSION,
        });
    }
    if options.flags.contains(ConnectFlags::EXACT_VERSION_MATCH)
        && server.version != options.client_version
    {
        return Err(ProtocolError::VersionMismatch {
            server: server.version.clone(),
            client: options.client_version.clone(),
        });
    }
    Ok(())
}

fn login_message(id: u32, options: &ConnectOptions, challenge: Option<&[u8]>) -> Result<Message> {
    let mut msg = Message::new(cmd::LOGIN, id)
        .with(vid::LOGIN_NAME, options.login.as_str())
        .with(vid::LIBNXCL_VERSION, LIBRARY_VERSION)
        .with(vid::CLIENT_INFO, options.client_info.as_str())
        .with(vid::OS_INFO, format!("{} {}", std::env::consts::OS, std::env::consts::ARCH))
        .with(vid::CLIENT_TYPE, options.client_type);

    match &options.credentials {
        Credentials::Password(password) => {
            msg.set(vid::AUTH_TYPE, auth::PASSWORD);
            msg.set(vid::PASSWORD, password.as_str());
        }
        Credentials::Certificate {
            certificate,
            signer,
        } => {
            let Some(challenge) = challenge else {
                warn!(error = constants::ERR_NO_CHALLENGE, "Certificate login impossible");
                return Err(ProtocolError::Request {
                    rcc: rcc::UNSUPPORTED_AUTH_TYPE,
                });
            };
            let signature = signer.sign(challenge)?;
            msg.set(vid::AUTH_TYPE, auth::CERTIFICATE);
            msg.set(vid::CERTIFICATE, certificate.clone());
            msg.set(vid::SIGNATURE, signature);
        }
    }
    Ok(msg)
}

/// Periodic liveness probe. A failed probe breaks the connection and stops
/// the receiver, which finishes the teardown.
async fn keepalive(shared: Arc<Shared>, period: Duration, timeout: Duration) {
    let start = tokio::time::Instant::now() + period;
    let mut ticker = tokio::time::interval_at(start, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if shared.is_broken() {
            return;
        }
        let code = shared.simple_command(cmd::KEEPALIVE, timeout).await;
        if code != rcc::SUCCESS {
            warn!(rcc = code, "Keepalive failed, dropping connection");
            if shared.state() == SessionState::Connected {
                shared.report_broken(code);
            }
            shared.mark_broken();
            shared.signal_shutdown();
            return;
        }
    }
}
