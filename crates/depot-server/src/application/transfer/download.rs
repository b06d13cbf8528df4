//! Server half of a download: checksum short-circuit, then chunked DATA.
//!
//! ```text
//! OPEN(name, checksum)
//!   ├─ checksum == current ──► STATUS(ok) METADATA(current) END
//!   └─ otherwise           ──► STATUS(ok) METADATA(current) TRANSFER(name, size, chunk)
//!                              DATA × n  (at most `chunks_per_wake` per event)
//!                              END
//! ```
//!
//! Large files are never sent in one go: after `chunks_per_wake` chunks the
//! pump asks for a [`TimerId::WAKE`](crate::application::events::TimerId::WAKE)
//! and continues when it arrives, so other connections get their turn.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;

use depot_core::protocol::codes;
use depot_core::{StreamFrame, TransferProgress};
use tracing::{debug, info, warn};

use super::{ChecksumProvider, DownloadSource, StreamAddress, TransferSettings};
use crate::application::events::ConnectionId;
use crate::application::node::{NodeContext, NodeError};

struct DownloadSession {
    name: String,
    file: File,
    progress: TransferProgress,
}

/// Per-connection download state for one stream address.
pub struct DownloadPump<S, C> {
    address: StreamAddress,
    source: S,
    checksums: C,
    settings: TransferSettings,
    sessions: BTreeMap<ConnectionId, DownloadSession>,
    wake_pending: bool,
}

impl<S: DownloadSource, C: ChecksumProvider> DownloadPump<S, C> {
    pub fn new(address: StreamAddress, source: S, checksums: C, settings: TransferSettings) -> Self {
        Self {
            address,
            source,
            checksums,
            settings,
            sessions: BTreeMap::new(),
            wake_pending: false,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn checksums_mut(&mut self) -> &mut C {
        &mut self.checksums
    }

    pub fn is_active(&self, connection: ConnectionId) -> bool {
        self.sessions.contains_key(&connection)
    }

    pub fn active(&self) -> usize {
        self.sessions.len()
    }

    /// Feeds one frame received from `connection`.
    pub fn handle(&mut self, ctx: &NodeContext, connection: ConnectionId, frame: StreamFrame) {
        match frame {
            StreamFrame::Open { name, checksum } => {
                if self.is_active(connection) {
                    self.protocol_error(ctx, connection, "OPEN while a download is in progress");
                    return;
                }
                if let Err(e) = self.open(ctx, connection, &name, checksum.as_deref()) {
                    debug!("{connection}: download of {name} refused: {e}");
                    self.send(ctx, connection, &StreamFrame::error(e.code(), e.to_string()));
                }
            }
            StreamFrame::End => {
                if let Some(session) = self.sessions.remove(&connection) {
                    info!(
                        "{connection}: download of {} cancelled at {}/{} bytes",
                        session.name,
                        session.progress.moved(),
                        session.progress.total()
                    );
                }
            }
            StreamFrame::ProtocolError { code, message } => {
                // An open session gets END as the last frame of the stream.
                // Without one the stream already ended and nothing is sent.
                debug!("{connection}: client aborted download ({code}: {message})");
                if self.sessions.remove(&connection).is_some() {
                    self.send(ctx, connection, &StreamFrame::End);
                }
            }
            other => {
                let tag = other.tag();
                self.protocol_error(ctx, connection, &format!("unexpected {tag:?} on a download stream"));
            }
        }
    }

    /// Continues every open download; call on [`TimerId::WAKE`](crate::application::events::TimerId::WAKE).
    pub fn pump(&mut self, ctx: &NodeContext) {
        self.wake_pending = false;
        let connections: Vec<ConnectionId> = self.sessions.keys().copied().collect();
        for connection in connections {
            self.pump_one(ctx, connection);
        }
        self.request_wake(ctx);
    }

    /// Drops the download of `connection`, e.g. on disconnect.
    pub fn abort(&mut self, connection: ConnectionId) -> bool {
        self.sessions.remove(&connection).is_some()
    }

    fn open(&mut self, ctx: &NodeContext, connection: ConnectionId, name: &str, claimed: Option<&str>) -> Result<(), NodeError> {
        let path = self.source.locate(name)?;
        let current = self.checksums.checksum(&path)?;
        let checksum = StreamFrame::metadata_str(&current);

        if claimed == Some(current.as_str()) {
            self.send(ctx, connection, &StreamFrame::ok());
            self.send(ctx, connection, &checksum);
            self.send(ctx, connection, &StreamFrame::End);
            info!("{connection}: {name} is up to date");
            return Ok(());
        }

        let file = File::open(&path)?;
        let total = file.metadata()?.len();
        self.send(ctx, connection, &StreamFrame::ok());
        self.send(ctx, connection, &checksum);
        self.send(
            ctx,
            connection,
            &StreamFrame::Transfer {
                name: name.to_string(),
                total_size: total,
                chunk_size: self.settings.chunk_size,
            },
        );
        info!("{connection}: sending {name} ({total} bytes)");

        self.sessions.insert(
            connection,
            DownloadSession {
                name: name.to_string(),
                file,
                progress: TransferProgress::new(total, self.settings.chunk_size),
            },
        );
        self.pump_one(ctx, connection);
        self.request_wake(ctx);
        Ok(())
    }

    /// Sends up to `chunks_per_wake` chunks; finishes with END when done.
    fn pump_one(&mut self, ctx: &NodeContext, connection: ConnectionId) {
        let Some(session) = self.sessions.get_mut(&connection) else {
            return;
        };

        let mut failure = None;
        for _ in 0..self.settings.chunks_per_wake.max(1) {
            if session.progress.is_complete() {
                break;
            }
            let mut chunk = vec![0u8; session.progress.next_chunk_len()];
            if let Err(e) = session.file.read_exact(&mut chunk) {
                failure = Some(format!("reading {} failed: {e}", session.name));
                break;
            }
            let len = chunk.len();
            if !ctx.send(connection, self.address.message(&StreamFrame::Data(chunk))) {
                failure = Some("connection gone".to_string());
                break;
            }
            if let Err(e) = session.progress.record(len) {
                failure = Some(e.to_string());
                break;
            }
        }

        if let Some(reason) = failure {
            warn!("{connection}: download aborted: {reason}");
            self.sessions.remove(&connection);
            self.send(
                ctx,
                connection,
                &StreamFrame::ProtocolError {
                    code: codes::INTERNAL,
                    message: reason,
                },
            );
            return;
        }

        if session.progress.is_complete() {
            let bytes = session.progress.total();
            let name = std::mem::take(&mut session.name);
            self.sessions.remove(&connection);
            self.send(ctx, connection, &StreamFrame::End);
            info!("{connection}: sent {name} ({bytes} bytes)");
        }
    }

    fn request_wake(&mut self, ctx: &NodeContext) {
        if !self.sessions.is_empty() && !self.wake_pending {
            self.wake_pending = true;
            ctx.wake();
        }
    }

    fn protocol_error(&mut self, ctx: &NodeContext, connection: ConnectionId, reason: &str) {
        warn!("{connection}: download protocol error: {reason}");
        self.sessions.remove(&connection);
        self.send(
            ctx,
            connection,
            &StreamFrame::ProtocolError {
                code: codes::BAD_REQUEST,
                message: reason.to_string(),
            },
        );
    }

    fn send(&self, ctx: &NodeContext, connection: ConnectionId, frame: &StreamFrame) {
        ctx.send(connection, self.address.message(frame));
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
