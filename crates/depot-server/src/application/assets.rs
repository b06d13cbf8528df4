//! `ASSET_SVR`: download, upload and list files of an asset store.
//!
//! `DOWNLOAD` and `UPLOAD` carry stream frames (see
//! [`depot_core::protocol::stream`]); the opening frame of each stream is
//! checked against `(ASSET_SVR, DOWNLOAD|UPLOAD)` and a refusal is answered
//! with `STATUS(401)` on that stream.  `LIST` is an ordinary request:
//!
//! ```text
//! LIST() -> ACK(count:int32, {name:string, size:int64, checksum:string}*)
//! ```

use std::io;
use std::path::PathBuf;

use depot_core::protocol::services::{asset, ASSET};
use depot_core::protocol::{ack, codes};
use depot_core::{Message, StreamFrame};
use tracing::warn;

use crate::application::events::{ConnectionId, TimerId};
use crate::application::node::{Node, NodeContext, NodeError};
use crate::application::transfer::{
    ChecksumProvider, DownloadPump, DownloadSource, StreamAddress, TransferSettings, UploadHandler, UploadReceiver,
};

/// One listed asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetEntry {
    /// `/`-separated name relative to the store root.
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
}

/// Storage behind the asset node.  Cloned once so the download and upload
/// machines each own a handle.
pub trait AssetStore: DownloadSource + UploadHandler + Clone {
    /// Every visible asset, sorted by name.
    fn list(&self) -> io::Result<Vec<AssetEntry>>;
}

pub struct AssetNode<S, C> {
    downloads: DownloadPump<S, C>,
    uploads: UploadReceiver<S>,
}

impl<S: AssetStore, C: ChecksumProvider> AssetNode<S, C> {
    pub fn new(store: S, checksums: C, settings: TransferSettings) -> Self {
        Self {
            downloads: DownloadPump::new(
                StreamAddress::new(ASSET, asset::DOWNLOAD),
                store.clone(),
                checksums,
                settings,
            ),
            uploads: UploadReceiver::new(StreamAddress::new(ASSET, asset::UPLOAD), store),
        }
    }

    /// Decodes a stream frame; a bad one aborts that stream.
    fn frame(&mut self, ctx: &NodeContext, connection: ConnectionId, message: &Message) -> Option<StreamFrame> {
        match StreamFrame::from_message(message) {
            Ok(frame) => Some(frame),
            Err(e) => {
                warn!("{connection}: bad {} frame: {e}", message.kind());
                if message.kind() == asset::DOWNLOAD {
                    self.downloads.abort(connection);
                } else {
                    self.uploads.abort(connection);
                }
                let reply = StreamFrame::ProtocolError {
                    code: codes::BAD_REQUEST,
                    message: e.to_string(),
                };
                ctx.send(connection, reply.to_message(ASSET, message.kind()));
                None
            }
        }
    }

    /// Gates an opening frame; refusals are reported on the stream.
    fn admitted(ctx: &NodeContext, connection: ConnectionId, operation: &str, frame: &StreamFrame) -> bool {
        if !matches!(frame, StreamFrame::Open { .. }) {
            return true;
        }
        match ctx.authorize(connection, ASSET, operation) {
            Ok(()) => true,
            Err(e) => {
                let status = StreamFrame::error(e.code(), e.to_string());
                ctx.send(connection, status.to_message(ASSET, operation));
                false
            }
        }
    }

    fn list(&mut self, ctx: &NodeContext, connection: ConnectionId, request: &Message) -> Result<(), NodeError> {
        ctx.authorize(connection, ASSET, asset::LIST)?;
        let entries = self.downloads.source().list()?;

        let mut reply = ack(request);
        reply.push_i32(entries.len() as i32);
        for entry in &entries {
            let checksum = self.downloads.checksums_mut().checksum(&entry.path)?;
            reply
                .push_str(&entry.name)
                .push_i64(entry.size as i64)
                .push_str(&checksum);
        }
        ctx.send(connection, reply);
        Ok(())
    }
}

impl<S: AssetStore, C: ChecksumProvider> Node for AssetNode<S, C> {
    fn name(&self) -> &str {
        ASSET
    }

    fn on_message(&mut self, ctx: &mut NodeContext, connection: ConnectionId, message: &Message) -> Result<(), NodeError> {
        match message.kind() {
            asset::DOWNLOAD => {
                let Some(frame) = self.frame(ctx, connection, message) else {
                    return Ok(());
                };
                if Self::admitted(ctx, connection, asset::DOWNLOAD, &frame) {
                    self.downloads.handle(ctx, connection, frame);
                }
                Ok(())
            }
            asset::UPLOAD => {
                let Some(frame) = self.frame(ctx, connection, message) else {
                    return Ok(());
                };
                if Self::admitted(ctx, connection, asset::UPLOAD, &frame) {
                    if let Some(stored) = self.uploads.handle(ctx, connection, frame) {
                        self.downloads.checksums_mut().invalidate(&stored);
                    }
                }
                Ok(())
            }
            asset::LIST => self.list(ctx, connection, message),
            other => Err(NodeError::application(
                codes::BAD_REQUEST,
                format!("unknown {ASSET} operation {other}"),
            )),
        }
    }

    fn on_disconnect(&mut self, _ctx: &mut NodeContext, connection: ConnectionId) {
        self.downloads.abort(connection);
        self.uploads.abort(connection);
    }

    fn on_timer(&mut self, ctx: &mut NodeContext, timer: TimerId) -> Result<(), NodeError> {
        if timer == TimerId::WAKE {
            self.downloads.pump(ctx);
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
