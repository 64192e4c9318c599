//! The per-connection receiver task.
//!
//! Slices frames off the read half, opens encryption envelopes, decodes and
//! routes each message. Undecryptable frames are dropped and the loop goes
//! on; anything else that goes wrong ends the connection, including a
//! panicking notification handler.

use super::{read, transfer, write, SessionState, Shared};
use crate::core::codec::{decode_with_limit, FrameCodec};
use crate::core::message::{Message, MessageFlags};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::codes::{cmd, notify, rcc, vid};
use crate::protocol::dispatcher::Route;
use crate::protocol::encryption::is_envelope;
use crate::protocol::handshake::{client_session_key_reply, SessionKeyReply};
use crate::transport::tcp::BoxedReader;
use crate::utils::timeout::SHUTDOWN_TIMEOUT;
use bytes::Bytes;
use futures::StreamExt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::codec::FramedRead;
use tracing::{debug, error, info, trace, warn};

enum Flow {
    Continue,
    Stop,
}

enum Exit {
    /// Local shutdown signal
    Requested,
    PeerClosed,
    ServerShutdown,
    Failed(ProtocolError),
}

pub(super) async fn run(
    shared: Arc<Shared>,
    reader: BoxedReader,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut frames = FramedRead::new(reader, FrameCodec::new(shared.max_message_size));
    let idle = shared.receive_timeout;
    debug!("Receiver started");

    let exit = loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.changed() => break Exit::Requested,
            next = tokio::time::timeout(idle, frames.next()) => next,
        };

        let frame = match next {
            Err(_) => break Exit::Failed(ProtocolError::IdleTimeout),
            Ok(None) => break Exit::PeerClosed,
            Ok(Some(Err(e))) => break Exit::Failed(e),
            Ok(Some(Ok(frame))) => frame.freeze(),
        };

        match process_frame(&shared, frame).await {
            Ok(Flow::Continue) => {}
            Ok(Flow::Stop) => break Exit::ServerShutdown,
            Err(e) => break Exit::Failed(e),
        }
    };

    finish(&shared, exit).await;
}

async fn process_frame(shared: &Shared, frame: Bytes) -> Result<Flow> {
    shared.metrics.message_received(frame.len() as u64);

    let plain = if is_envelope(&frame) {
        let Some(ctx) = shared.encryption() else {
            warn!(size = frame.len(), "Encrypted frame without a session key, dropped");
            shared.metrics.decryption_failure();
            return Ok(Flow::Continue);
        };
        match ctx.decrypt(&frame) {
            Ok(plain) => plain,
            Err(e) => {
                warn!(error = %e, size = frame.len(), "Dropping undecryptable frame");
                shared.metrics.decryption_failure();
                return Ok(Flow::Continue);
            }
        }
    } else {
        frame
    };

    let msg = decode_with_limit(&plain, shared.max_message_size)?;
    trace!(opcode = msg.opcode(), id = msg.id(), "Message received");

    match shared.dispatcher.route(msg.opcode()) {
        Route::SessionKey => answer_session_key(shared, &msg).await?,
        Route::Keepalive => {
            if let Some(ts) = msg.get_u64(vid::TIMESTAMP) {
                shared.server_time.store(ts, Ordering::Relaxed);
            }
        }
        Route::Notification => return deliver_notification(shared, &msg),
        Route::FileTransfer => transfer::deliver(shared, msg),
        Route::Correlate => shared.wait_queue.put(msg),
    }
    Ok(Flow::Continue)
}

/// Installs the session key and answers in clear. The context lock is
/// released before the reply is written.
async fn answer_session_key(shared: &Shared, request: &Message) -> Result<()> {
    let reply = {
        let mut context = write(&shared.encryption);
        if context.is_some() {
            warn!(error = constants::ERR_CONTEXT_EXISTS, "Refusing second key exchange");
            Message::new(cmd::SESSION_KEY, request.id())
                .with_flag(MessageFlags::DONT_ENCRYPT)
                .with(vid::RCC, rcc::OUT_OF_STATE_REQUEST)
        } else {
            let server_key = *read(&shared.server_key);
            let SessionKeyReply { context: ctx, reply } =
                client_session_key_reply(request, server_key.as_ref());
            if let Some(ctx) = ctx {
                *context = Some(Arc::new(ctx));
            }
            reply
        }
    };
    shared.send_message(&reply).await
}

fn deliver_notification(shared: &Shared, msg: &Message) -> Result<Flow> {
    shared.metrics.notification();

    let handler = read(&shared.notification_handler).clone();
    match handler {
        Some(handler) => {
            if catch_unwind(AssertUnwindSafe(|| handler(msg))).is_err() {
                return Err(ProtocolError::CallbackPanic(
                    constants::ERR_NOTIFICATION_PANIC,
                ));
            }
        }
        None => debug!(opcode = msg.opcode(), "Notification without handler"),
    }

    let shutdown = msg.get_u32(vid::NOTIFICATION_CODE) == Some(notify::SHUTDOWN);
    if msg.opcode() == cmd::NOTIFY && shutdown {
        shared.mark_broken();
        return Ok(Flow::Stop);
    }
    Ok(Flow::Continue)
}

async fn finish(shared: &Shared, exit: Exit) {
    let cause = match &exit {
        Exit::Requested => {
            debug!("Receiver stopped");
            None
        }
        Exit::PeerClosed => {
            info!("Connection closed by server");
            Some(rcc::CONNECTION_BROKEN)
        }
        Exit::ServerShutdown => {
            info!("Server is shutting down");
            Some(rcc::CONNECTION_BROKEN)
        }
        Exit::Failed(e) => {
            if e.is_connection_error() {
                warn!(error = %e, "Connection lost");
            } else {
                error!(error = %e, "Receiver failed");
            }
            shared.metrics.connection_error();
            Some(e.rcc())
        }
    };
    let was_connected = shared.state() == SessionState::Connected;

    shared.mark_broken();
    shared.set_disconnected();
    shared.wait_queue.shutdown();
    shared.clear_transfers();

    if let (true, Some(code)) = (was_connected, cause) {
        shared.report_broken(code);
    }

    // Release the socket unless a sender is stuck holding it.
    if let Ok(mut writer) = tokio::time::timeout(SHUTDOWN_TIMEOUT, shared.writer.lock()).await {
        if let Some(mut writer) = writer.take() {
            if let Err(e) = writer.close().await {
                debug!(error = %e, "Socket shutdown failed");
            }
        }
    }
}
