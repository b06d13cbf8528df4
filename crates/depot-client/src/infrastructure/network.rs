//! TCP connection from the client to a depot server.
//!
//! A background task reads frames and queues them; the owner sends from its
//! own task.  Replies are matched to requests by `(target, kind)`, so only
//! one request per address may be outstanding at a time, which
//! [`ClientConnection::request`] guarantees by taking `&mut self`.

use std::io;
use std::net::SocketAddr;

use depot_core::protocol::{decode_payload, encode_frame, parse_length_prefix, FrameFormat, SequenceCounter};
use depot_core::{FieldReader, Message, ProtocolError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::ClientError;

/// Framing parameters; must match the server's `[server]` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientSettings {
    pub frame_format: FrameFormat,
    pub max_frame_bytes: usize,
}

impl Default for ClientSettings {
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
/// EOF before the first header byte is [`ClientError::Closed`]; EOF anywhere
/// later is a malformed frame.
pub async fn read_frame<R>(reader: &mut R, settings: ClientSettings) -> Result<Message, ClientError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 4];
    if reader.read(&mut prefix[..1]).await? == 0 {
        return Err(ClientError::Closed);
    }
    read_exact_or_malformed(reader, &mut prefix[1..]).await?;
    let len = parse_length_prefix(prefix, settings.max_frame_bytes)?;

    if settings.frame_format == FrameFormat::Sequenced {
        let mut id = [0u8; 4];
        read_exact_or_malformed(reader, &mut id).await?;
    }

    let mut payload = vec![0u8; len];
    read_exact_or_malformed(reader, &mut payload).await?;
    Ok(decode_payload(&payload)?)
}

async fn read_exact_or_malformed<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), ClientError>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(ProtocolError::MalformedFrame(format!(
            "server closed the stream with {} bytes of a frame missing",
            buf.len()
        ))
        .into()),
        Err(e) => Err(e.into()),
    }
}

/// Reader task: forwards frames until the first error, which is forwarded
/// too and ends the task.
async fn pump_inbound<R>(mut reader: R, settings: ClientSettings, inbound: mpsc::UnboundedSender<Result<Message, ClientError>>)
where
    R: AsyncRead + Unpin,
{
    loop {
        let result = read_frame(&mut reader, settings).await;
        let failed = result.is_err();
        if inbound.send(result).is_err() || failed {
            break;
        }
    }
}

/// Returns the reply fields after the envelope, or the server's refusal.
pub fn ack_fields(reply: &Message) -> Result<FieldReader<'_>, ClientError> {
    Ok(depot_core::protocol::read_reply(reply)??)
}

// ── ClientConnection ──────────────────────────────────────────────────────────

pub struct ClientConnection {
    writer: WriteHalf<Box<dyn Transport>>,
    inbound: mpsc::UnboundedReceiver<Result<Message, ClientError>>,
    reader: JoinHandle<()>,
    settings: ClientSettings,
    ids: SequenceCounter,
    peer: Option<SocketAddr>,
}

/// Anything the connection can run over: a TCP socket, or an in-memory
/// duplex in tests.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Transport for T {}

impl ClientConnection {
    /// Connects with default framing.
    pub async fn connect(addr: SocketAddr) -> Result<Self, ClientError> {
        Self::connect_with(addr, ClientSettings::default()).await
    }

    pub async fn connect_with(addr: SocketAddr, settings: ClientSettings) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| ClientError::Connect { addr, source })?;
        stream.set_nodelay(true)?;
        info!("connected to {addr}");
        let mut conn = Self::from_stream(stream, settings);
        conn.peer = Some(addr);
        Ok(conn)
    }

    /// Runs the protocol over an already-open stream.  Must be called from
    /// within a tokio runtime.
    pub fn from_stream<S>(stream: S, settings: ClientSettings) -> Self
    where
        S: Transport + 'static,
    {
        let boxed: Box<dyn Transport> = Box::new(stream);
        let (read_half, writer) = tokio::io::split(boxed);
        let (tx, inbound) = mpsc::unbounded_channel();
        let reader = tokio::spawn(pump_inbound(read_half, settings, tx));
        Self {
            writer,
            inbound,
            reader,
            settings,
            ids: SequenceCounter::new(),
            peer: None,
        }
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Writes one message and flushes it.
    pub async fn send(&mut self, message: &Message) -> Result<(), ClientError> {
        let frame = encode_frame(message, self.settings.frame_format, self.ids.next());
        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Waits for the next message from the server.
    pub async fn recv(&mut self) -> Result<Message, ClientError> {
        match self.inbound.recv().await {
            Some(result) => result,
            None => Err(ClientError::Closed),
        }
    }

    /// Returns a message if one has already arrived.
    pub fn try_recv(&mut self) -> Result<Option<Message>, ClientError> {
        match self.inbound.try_recv() {
            Ok(result) => result.map(Some),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(ClientError::Closed),
        }
    }

    /// Drops every message that has already arrived, such as the tail of a
    /// stream that ended in an error.  Returns how many were dropped.
    pub fn discard_pending(&mut self) -> Result<usize, ClientError> {
        let mut dropped = 0;
        while let Some(message) = self.try_recv()? {
            debug!("discarding stale {}/{}", message.target(), message.kind());
            dropped += 1;
        }
        Ok(dropped)
    }

    /// Waits for the next message addressed to `(target, kind)`, dropping
    /// anything else.
    pub async fn recv_from(&mut self, target: &str, kind: &str) -> Result<Message, ClientError> {
        loop {
            let message = self.recv().await?;
            if message.is(target, kind) {
                return Ok(message);
            }
            debug!("ignoring {}/{} while waiting for {target}/{kind}", message.target(), message.kind());
        }
    }

    /// Sends `request` and waits for its reply.
    ///
    /// The returned message still carries the ACK/NACK envelope; see
    /// [`ack_fields`].
    pub async fn request(&mut self, request: &Message) -> Result<Message, ClientError> {
        self.send(request).await?;
        self.recv_from(request.target(), request.kind()).await
    }

    /// Closes the write side; the server sees EOF and tears the connection
    /// down.
    pub async fn close(mut self) -> Result<(), ClientError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

impl Drop for ClientConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
