//! In-process NXCP server for integration tests.
//!
//! Accepts a single connection, answers the handshake, and lets the test push
//! arbitrary frames to the client through a command channel.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use bytes::Bytes;
use futures::StreamExt;
use nxcp::core::codec::{decode, encode, FrameCodec};
use nxcp::core::message::{Message, MessageFlags};
use nxcp::protocol::codes::{auth, cmd, rcc, vid, CLIENT_PROTOCOL_VERSION};
use nxcp::protocol::encryption::{is_envelope, EncryptionContext, ENVELOPE_HEADER_SIZE};
use nxcp::protocol::handshake::{
    server_finalize_session_key, server_session_key_request, ServerHandshakeState, ServerIdentity,
};
use nxcp::utils::crypto::NONCE_SIZE;
use nxcp::{ConnectOptions, Credentials, NxcpConfig};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;

pub const LOGIN: &str = "admin";
pub const PASSWORD: &str = "correct horse";
pub const USER_ID: u32 = 42;
pub const SYSTEM_RIGHTS: u64 = 0x0000_00FF_0000_0001;

pub type Handler = Arc<dyn Fn(&Message) -> Vec<Message> + Send + Sync>;

#[derive(Clone)]
pub struct MockConfig {
    pub protocol_version: u32,
    pub server_version: String,
    pub encryption: bool,
    pub challenge: Option<Vec<u8>>,
    pub answer_keepalive: bool,
    pub password_change: bool,
    /// Signs key offers with a key the client never pinned.
    pub impostor_identity: bool,
    /// Answers opcodes the mock does not know; the default completes them.
    pub handler: Option<Handler>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            protocol_version: CLIENT_PROTOCOL_VERSION,
            server_version: "5.0.1".to_string(),
            encryption: true,
            challenge: None,
            answer_keepalive: true,
            password_change: false,
            impostor_identity: false,
            handler: None,
        }
    }
}

enum Command {
    Send(Message),
    Raw(Vec<u8>),
    Chunked(Vec<u8>, usize),
    Corrupted(Message),
    Close,
}

pub struct MockServer {
    pub port: u16,
    server_key: [u8; 32],
    wire: Arc<Mutex<Vec<u8>>>,
    received: Arc<Mutex<Vec<Message>>>,
    commands: mpsc::UnboundedSender<Command>,
}

impl MockServer {
    pub async fn start(config: MockConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (commands, rx) = mpsc::unbounded_channel();
        let wire = Arc::new(Mutex::new(Vec::new()));
        let received = Arc::new(Mutex::new(Vec::new()));

        let identity = ServerIdentity::generate().unwrap();
        let server_key = identity.public_key();
        let signer = if config.impostor_identity {
            ServerIdentity::generate().unwrap()
        } else {
            identity
        };

        let state = ServerState {
            config,
            identity: signer,
            context: None,
            pending: None,
            received: Arc::clone(&received),
        };
        tokio::spawn(serve(listener, state, rx, Arc::clone(&wire)));

        Self {
            port,
            server_key,
            wire,
            received,
            commands,
        }
    }

    /// Options with this server's identity key pinned.
    pub fn options(&self, password: &str) -> ConnectOptions {
        ConnectOptions::new(
            "127.0.0.1",
            self.port,
            LOGIN,
            Credentials::Password(password.to_string()),
        )
        .with_server_key(self.server_key)
    }

    pub fn server_key(&self) -> [u8; 32] {
        self.server_key
    }

    /// Sends `msg`, encrypted once a session key exists.
    pub fn send(&self, msg: Message) {
        let _ = self.commands.send(Command::Send(msg));
    }

    pub fn send_raw(&self, bytes: Vec<u8>) {
        let _ = self.commands.send(Command::Raw(bytes));
    }

    /// Writes `bytes` in pieces of `chunk` bytes with a short pause between them.
    pub fn send_chunked(&self, bytes: Vec<u8>, chunk: usize) {
        let _ = self.commands.send(Command::Chunked(bytes, chunk));
    }

    /// Sends an envelope for `msg` with one ciphertext byte flipped.
    pub fn send_corrupted(&self, msg: Message) {
        let _ = self.commands.send(Command::Corrupted(msg));
    }

    pub fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }

    /// Raw frames the client wrote, in order.
    pub fn client_frames(&self) -> Vec<Vec<u8>> {
        split_frames(&self.wire.lock().unwrap())
    }

    pub fn wire_bytes(&self) -> Vec<u8> {
        self.wire.lock().unwrap().clone()
    }

    /// Messages the server managed to decode, in order.
    pub fn received(&self) -> Vec<Message> {
        self.received.lock().unwrap().clone()
    }
}

/// Session settings suited to tests: short waits, no keepalive.
pub fn test_config() -> NxcpConfig {
    NxcpConfig::default_with_overrides(|c| {
        c.session.command_timeout = Duration::from_secs(2);
        c.session.keepalive_interval = Duration::ZERO;
        c.transport.connect_timeout = Duration::from_secs(2);
    })
}

pub fn split_frames(mut data: &[u8]) -> Vec<Vec<u8>> {
    let mut frames = Vec::new();
    while data.len() >= 4 {
        let size = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if size == 0 || size > data.len() {
            break;
        }
        frames.push(data[..size].to_vec());
        data = &data[size..];
    }
    frames
}

pub fn completed(id: u32, code: u32) -> Message {
    Message::new(cmd::REQUEST_COMPLETED, id).with(vid::RCC, code)
}

/// Waits until `check` holds, polling every 10 ms for up to `limit`.
pub async fn eventually<F: Fn() -> bool>(limit: Duration, check: F) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

struct ServerState {
    config: MockConfig,
    identity: ServerIdentity,
    context: Option<EncryptionContext>,
    pending: Option<ServerHandshakeState>,
    received: Arc<Mutex<Vec<Message>>>,
}

impl ServerState {
    fn outgoing(&self, msg: &Message) -> Bytes {
        let frame = encode(msg);
        match &self.context {
            Some(ctx) if !msg.has_flag(MessageFlags::DONT_ENCRYPT) => ctx.encrypt(&frame).unwrap(),
            _ => frame,
        }
    }

    fn handle(&mut self, frame: Bytes) -> Vec<Bytes> {
        let plain = if is_envelope(&frame) {
            match self.context.as_ref().map(|ctx| ctx.decrypt(&frame)) {
                Some(Ok(plain)) => plain,
                _ => return Vec::new(),
            }
        } else {
            frame
        };
        let Ok(msg) = decode(&plain) else {
            return Vec::new();
        };
        self.received.lock().unwrap().push(msg.clone());

        let replies = self.respond(&msg);
        replies.iter().map(|m| self.outgoing(m)).collect()
    }

    fn respond(&mut self, msg: &Message) -> Vec<Message> {
        let id = msg.id();
        match msg.opcode() {
            cmd::GET_SERVER_INFO => {
                let mut info = completed(id, rcc::SUCCESS)
                    .with(vid::PROTOCOL_VERSION, self.config.protocol_version)
                    .with(vid::SERVER_VERSION, self.config.server_version.as_str())
                    .with(vid::SERVER_ID, vec![0x5Eu8, 0x7E, 0x02, 0x1D])
                    .with(vid::TIMEZONE, "UTC+02:00");
                if let Some(challenge) = &self.config.challenge {
                    info.set(vid::CHALLENGE, challenge.clone());
                }
                vec![info]
            }
            cmd::REQUEST_ENCRYPTION if !self.config.encryption => {
                vec![completed(id, rcc::NO_ENCRYPTION_SUPPORT)]
            }
            cmd::REQUEST_ENCRYPTION => {
                let (state, request) = server_session_key_request(id, &self.identity);
                self.pending = Some(state);
                vec![request]
            }
            cmd::SESSION_KEY => match self.pending.take() {
                Some(state) => match server_finalize_session_key(state, msg) {
                    Ok(ctx) => {
                        self.context = Some(ctx);
                        vec![completed(id, rcc::SUCCESS)]
                    }
                    Err(e) => vec![completed(id, e.rcc())],
                },
                None => vec![completed(id, rcc::OUT_OF_STATE_REQUEST)],
            },
            cmd::LOGIN => vec![self.login(msg)],
            cmd::KEEPALIVE if self.config.answer_keepalive => vec![completed(id, rcc::SUCCESS)],
            cmd::KEEPALIVE => Vec::new(),
            cmd::FILE_DATA | cmd::ABORT_FILE_TRANSFER => Vec::new(),
            _ => match &self.config.handler {
                Some(handler) => handler(msg),
                None => vec![completed(id, rcc::SUCCESS)],
            },
        }
    }

    fn login(&self, msg: &Message) -> Message {
        let name_ok = msg.get_str(vid::LOGIN_NAME) == Some(LOGIN);
        let secret_ok = match msg.get_u16(vid::AUTH_TYPE) {
            Some(auth::PASSWORD) => msg.get_str(vid::PASSWORD) == Some(PASSWORD),
            Some(auth::CERTIFICATE) => match (&self.config.challenge, msg.get_binary(vid::SIGNATURE)) {
                (Some(challenge), Some(signature)) => {
                    let expected: Vec<u8> = challenge.iter().rev().copied().collect();
                    signature.as_ref() == expected.as_slice()
                }
                _ => false,
            },
            _ => false,
        };

        let resp = Message::new(cmd::LOGIN_RESP, msg.id());
        if name_ok && secret_ok {
            resp.with(vid::RCC, rcc::SUCCESS)
                .with(vid::USER_ID, USER_ID)
                .with(vid::USER_SYS_RIGHTS, SYSTEM_RIGHTS)
                .with(vid::CHANGE_PASSWD_FLAG, u16::from(self.config.password_change))
        } else {
            resp.with(vid::RCC, rcc::ACCESS_DENIED)
        }
    }
}

async fn serve(
    listener: TcpListener,
    mut state: ServerState,
    mut commands: mpsc::UnboundedReceiver<Command>,
    wire: Arc<Mutex<Vec<u8>>>,
) {
    let Ok((stream, _)) = listener.accept().await else {
        return;
    };
    let (read_half, mut write_half) = stream.into_split();
    let mut frames = FramedRead::new(read_half, FrameCodec::default());

    loop {
        tokio::select! {
            frame = frames.next() => {
                let Some(Ok(frame)) = frame else { break };
                wire.lock().unwrap().extend_from_slice(&frame);
                for reply in state.handle(frame.freeze()) {
                    if write_half.write_all(&reply).await.is_err() {
                        return;
                    }
                }
            }
            command = commands.recv() => {
                let bytes = match command {
                    None | Some(Command::Close) => break,
                    Some(Command::Send(msg)) => state.outgoing(&msg).to_vec(),
                    Some(Command::Raw(bytes)) => bytes,
                    Some(Command::Corrupted(msg)) => {
                        let mut envelope = state.outgoing(&msg).to_vec();
                        envelope[ENVELOPE_HEADER_SIZE + NONCE_SIZE] ^= 0xFF;
                        envelope
                    }
                    Some(Command::Chunked(bytes, chunk)) => {
                        for piece in bytes.chunks(chunk.max(1)) {
                            if write_half.write_all(piece).await.is_err() {
                                return;
                            }
                            tokio::time::sleep(Duration::from_millis(1)).await;
                        }
                        continue;
                    }
                };
                if write_half.write_all(&bytes).await.is_err() {
                    return;
                }
            }
        }
    }
}
