//! File transfer over `CMD_FILE_DATA` binary messages.
//!
//! A file travels as a run of binary messages sharing the request id, each
//! at most [`FILE_BUFFER_SIZE`] bytes. The last one carries `END_OF_FILE`,
//! so an empty file is a single empty message. A sender that fails midway
//! sends `CMD_ABORT_FILE_TRANSFER` with the same id.

use super::{lock, Shared};
use crate::core::message::{Message, MessageFlags};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::codes::{cmd, rcc, FILE_BUFFER_SIZE};
use bytes::Bytes;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub(super) type Transfers = HashMap<u32, mpsc::UnboundedSender<Message>>;

/// Incoming file prepared for one request id.
///
/// Registered before the request that triggers the transfer is sent, so no
/// chunk can arrive unclaimed. Dropping it releases the id.
pub struct FileReceiver {
    id: u32,
    chunks: mpsc::UnboundedReceiver<Message>,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for FileReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileReceiver").field("id", &self.id).finish_non_exhaustive()
    }
}

impl FileReceiver {
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Writes chunks to `writer` until `END_OF_FILE` and returns the byte count.
    /// `timeout` bounds the wait for each chunk.
    ///
    /// # Errors
    /// - `ProtocolError::Timeout` if a chunk did not arrive in time
    /// - `ProtocolError::Request` with `RCC_FILE_IO_ERROR` if the peer aborted
    /// - `ProtocolError::Request` with `RCC_IO_ERROR` if `writer` failed
    /// - `ProtocolError::ConnectionBroken` once the session is torn down
    pub async fn receive<W>(mut self, writer: &mut W, timeout: Duration) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let mut total = 0u64;
        loop {
            let msg = match tokio::time::timeout(timeout, self.chunks.recv()).await {
                Err(_) => {
                    warn!(id = self.id, received = total, "File transfer timed out");
                    return Err(ProtocolError::Timeout);
                }
                Ok(None) => return Err(ProtocolError::ConnectionBroken),
                Ok(Some(msg)) => msg,
            };

            if msg.opcode() == cmd::ABORT_FILE_TRANSFER {
                warn!(id = self.id, received = total, "File transfer aborted by peer");
                return Err(ProtocolError::Request {
                    rcc: rcc::FILE_IO_ERROR,
                });
            }

            let data: &[u8] = match msg.binary_payload() {
                Some(payload) => &payload[..],
                None => &[],
            };
            if let Err(e) = writer.write_all(data).await {
                return Err(local_io_failure(self.id, &e));
            }
            total += data.len() as u64;

            if msg.has_flag(MessageFlags::END_OF_FILE) {
                if let Err(e) = writer.flush().await {
                    return Err(local_io_failure(self.id, &e));
                }
                debug!(id = self.id, bytes = total, "File received");
                return Ok(total);
            }
        }
    }
}

impl Drop for FileReceiver {
    fn drop(&mut self) {
        lock(&self.shared.file_transfers).remove(&self.id);
    }
}

fn local_io_failure(id: u32, e: &io::Error) -> ProtocolError {
    warn!(id, error = %e, "Writing received file failed");
    ProtocolError::Request { rcc: rcc::IO_ERROR }
}

pub(super) fn prepare(shared: &Arc<Shared>, id: u32) -> Result<FileReceiver> {
    let mut transfers = lock(&shared.file_transfers);
    if shared.is_broken() {
        return Err(ProtocolError::ConnectionBroken);
    }
    match transfers.entry(id) {
        Entry::Occupied(_) => {
            warn!(id, error = constants::ERR_TRANSFER_IN_PROGRESS, "Transfer not prepared");
            Err(ProtocolError::Request {
                rcc: rcc::TRANSFER_IN_PROGRESS,
            })
        }
        Entry::Vacant(slot) => {
            let (tx, chunks) = mpsc::unbounded_channel();
            slot.insert(tx);
            Ok(FileReceiver {
                id,
                chunks,
                shared: Arc::clone(shared),
            })
        }
    }
}

/// Hands a chunk to the transfer prepared for its id.
pub(super) fn deliver(shared: &Shared, msg: Message) {
    let transfers = lock(&shared.file_transfers);
    match transfers.get(&msg.id()) {
        Some(tx) => {
            if tx.send(msg).is_err() {
                debug!("File chunk for a finished transfer, dropped");
            }
        }
        None => debug!(id = msg.id(), "File chunk without a prepared transfer, dropped"),
    }
}

/// Reads `reader` to the end and streams it as `CMD_FILE_DATA` messages.
pub(super) async fn send<R>(shared: &Shared, id: u32, reader: &mut R) -> Result<u64>
where
    R: AsyncRead + Unpin,
{
    let mut current = vec![0u8; FILE_BUFFER_SIZE];
    let mut next = vec![0u8; FILE_BUFFER_SIZE];
    let mut len = match fill(reader, &mut current).await {
        Ok(n) => n,
        Err(e) => return abort(shared, id, e).await,
    };

    let mut total = 0u64;
    loop {
        // Read ahead so the final chunk can carry END_OF_FILE.
        let next_len = if len == FILE_BUFFER_SIZE {
            match fill(reader, &mut next).await {
                Ok(n) => n,
                Err(e) => return abort(shared, id, e).await,
            }
        } else {
            0
        };
        let last = next_len == 0;

        let payload = Bytes::copy_from_slice(&current[..len]);
        let mut chunk = Message::binary(cmd::FILE_DATA, id, payload);
        chunk.set_flag(MessageFlags::END_OF_FILE, last);
        shared.send_message(&chunk).await?;
        total += len as u64;

        if last {
            debug!(id, bytes = total, "File sent");
            return Ok(total);
        }
        std::mem::swap(&mut current, &mut next);
        len = next_len;
    }
}

async fn abort(shared: &Shared, id: u32, e: io::Error) -> Result<u64> {
    warn!(id, error = %e, "Reading file failed, aborting transfer");
    shared
        .send_message(&Message::binary(cmd::ABORT_FILE_TRANSFER, id, Bytes::new()))
        .await?;
    Err(ProtocolError::Io(e))
}

/// Reads until `buf` is full or the reader is exhausted.
async fn fill<R>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fill_stops_at_end_of_input() {
        let mut reader: &[u8] = b"abcdef";
        let mut buf = [0u8; 4];
        assert_eq!(fill(&mut reader, &mut buf).await.unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(fill(&mut reader, &mut buf).await.unwrap(), 2);
        assert_eq!(fill(&mut reader, &mut buf).await.unwrap(), 0);
    }
}
