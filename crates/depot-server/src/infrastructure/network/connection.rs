//! Per-connection reader and writer tasks.
//!
//! Each accepted socket is split in two halves:
//!
//! - the **reader** parses frames and pushes `MessageReceived` events until
//!   the socket fails, the peer closes, a frame is malformed, or the
//!   connection's shutdown signal fires;
//! - the **writer** drains the outbound queue in FIFO order.  The registry
//!   holds the queue's only sender, so tearing the connection down closes the
//!   queue: the writer flushes what is left and exits.
//!
//! Either side ending for any reason calls
//! [`ConnectionRegistry::teardown`], which is idempotent.

use std::io;

use depot_core::protocol::{decode_payload, encode_frame, parse_length_prefix, FrameFormat, ProtocolError, SequenceCounter};
use depot_core::Message;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::application::events::{ConnectionId, Event, EventSender};
use crate::infrastructure::network::registry::ConnectionRegistry;

/// Connection-fatal failures.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("socket I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Malformed(#[from] ProtocolError),

    /// Clean end of stream between frames.
    #[error("connection closed by peer")]
    Closed,
}

/// Framing parameters shared by every connection of a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub frame_format: FrameFormat,
    pub max_frame_bytes: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            frame_format: FrameFormat::Plain,
            max_frame_bytes: depot_core::protocol::DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

// ── Frame I/O ─────────────────────────────────────────────────────────────────

/// Reads exactly one frame.
///
/// # Errors
///
/// - [`TransportError::Closed`] on EOF before the first header byte.
/// - [`TransportError::Malformed`] when the declared length is over the
///   limit, the stream ends inside the frame, or the payload envelope is bad.
/// - [`TransportError::Io`] for any other socket error.
pub async fn read_frame<R>(reader: &mut R, settings: ConnectionSettings) -> Result<Message, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 4];
    let first = reader.read(&mut prefix[..1]).await?;
    if first == 0 {
        return Err(TransportError::Closed);
    }
    read_exact_or_malformed(reader, &mut prefix[1..], "length prefix").await?;
    let len = parse_length_prefix(prefix, settings.max_frame_bytes)?;

    if settings.frame_format == FrameFormat::Sequenced {
        // reserved message id; not consulted on read
        let mut id = [0u8; 4];
        read_exact_or_malformed(reader, &mut id, "message id").await?;
    }

    let mut payload = vec![0u8; len];
    read_exact_or_malformed(reader, &mut payload, "payload").await?;
    Ok(decode_payload(&payload)?)
}

async fn read_exact_or_malformed<R>(reader: &mut R, buf: &mut [u8], what: &str) -> Result<(), TransportError>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(ProtocolError::MalformedFrame(format!(
            "stream ended inside {what}: expected {} more bytes",
            buf.len()
        ))
        .into()),
        Err(e) => Err(e.into()),
    }
}

/// Writes one frame and flushes it.
pub async fn write_frame<W>(writer: &mut W, message: &Message, format: FrameFormat, message_id: u32) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode_frame(message, format, message_id)).await?;
    writer.flush().await
}

// ── Loops ─────────────────────────────────────────────────────────────────────

/// Reads frames until failure or shutdown, then tears the connection down.
pub async fn reader_loop<R>(
    id: ConnectionId,
    mut reader: R,
    settings: ConnectionSettings,
    events: EventSender,
    registry: ConnectionRegistry,
    mut shutdown: watch::Receiver<bool>,
) where
    R: AsyncRead + Unpin,
{
    loop {
        tokio::select! {
            result = read_frame(&mut reader, settings) => match result {
                Ok(message) => {
                    let event = Event::MessageReceived { connection: id, message };
                    if events.send(event).is_err() {
                        debug!("{id}: event core gone; stopping reader");
                        break;
                    }
                }
                Err(TransportError::Closed) => {
                    debug!("{id}: peer closed the connection");
                    break;
                }
                Err(e) => {
                    warn!("{id}: {e}");
                    break;
                }
            },
            _ = shutdown.changed() => {
                debug!("{id}: reader observed shutdown");
                break;
            }
        }
    }
    registry.teardown(id);
}

/// Flushes queued messages in order until the queue closes or a write fails.
pub async fn writer_loop<W>(
    id: ConnectionId,
    mut writer: W,
    format: FrameFormat,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    registry: ConnectionRegistry,
) where
    W: AsyncWrite + Unpin,
{
    let ids = SequenceCounter::new();
    while let Some(message) = outbound.recv().await {
        if let Err(e) = write_frame(&mut writer, &message, format, ids.next()).await {
            warn!("{id}: write failed: {e}");
            break;
        }
    }
    registry.teardown(id);
    let _ = writer.shutdown().await;
    debug!("{id}: writer stopped");
}

// ── Tests ─────────────────────────────────────────────────────────────────────
