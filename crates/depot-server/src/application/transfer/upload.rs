//! Server half of an upload.
//!
//! ```text
//! OPEN(name)                  ──► STATUS(ok)
//! METADATA(bytes)  (optional) ──► STATUS(ok)
//! TRANSFER(name, size, chunk) ──► STATUS(ok)     handler picks the destination
//! DATA × n                    ──► (no reply)     bytes go to a hidden part file
//!                                                handler hook runs at `size`
//! END                         ──► STATUS(ok)
//! ```
//!
//! Anything out of order is answered with `PROTOCOL_ERROR` and the session
//! is discarded together with its part file.  Once the server has ended an
//! upload with an error, the DATA frames the client still had in flight are
//! dropped without a reply until the next OPEN.
//!
//! A client `PROTOCOL_ERROR` on a live session is answered with a final END.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use depot_core::protocol::codes;
use depot_core::{StreamFrame, TransferProgress};
use tracing::{debug, info, warn};

use super::{CompletedUpload, PartFile, StreamAddress, UploadHandler};
use crate::application::events::ConnectionId;
use crate::application::node::{NodeContext, NodeError};

enum UploadSession {
    Opened {
        name: String,
        metadata: Option<Vec<u8>>,
    },
    Receiving {
        name: String,
        destination: PathBuf,
        metadata: Option<Vec<u8>>,
        progress: TransferProgress,
        file: PartFile,
    },
    Completed {
        destination: PathBuf,
    },
}

impl UploadSession {
    fn state(&self) -> &'static str {
        match self {
            UploadSession::Opened { .. } => "opened",
            UploadSession::Receiving { .. } => "receiving",
            UploadSession::Completed { .. } => "completed",
        }
    }
}

/// Per-connection upload state for one stream address.
pub struct UploadReceiver<H> {
    address: StreamAddress,
    handler: H,
    sessions: HashMap<ConnectionId, UploadSession>,
    /// Connections whose upload the server ended with an error.
    discarded: HashSet<ConnectionId>,
}

impl<H: UploadHandler> UploadReceiver<H> {
    pub fn new(address: StreamAddress, handler: H) -> Self {
        Self {
            address,
            handler,
            sessions: HashMap::new(),
            discarded: HashSet::new(),
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn is_active(&self, connection: ConnectionId) -> bool {
        self.sessions.contains_key(&connection)
    }

    /// Feeds one frame received from `connection`.
    ///
    /// Returns the destination of an upload that has just been stored.
    pub fn handle(&mut self, ctx: &mut NodeContext, connection: ConnectionId, frame: StreamFrame) -> Option<PathBuf> {
        if self.discarded.contains(&connection) {
            match &frame {
                StreamFrame::Open { .. } => {
                    self.discarded.remove(&connection);
                }
                StreamFrame::End | StreamFrame::ProtocolError { .. } => {
                    self.discarded.remove(&connection);
                    return None;
                }
                other => {
                    debug!("{connection}: dropping {:?} of a discarded upload", other.tag());
                    return None;
                }
            }
        }

        let session = self.sessions.remove(&connection);
        match (session, frame) {
            (None, StreamFrame::Open { name, .. }) => {
                debug!("{connection}: upload of {name} opened");
                self.sessions.insert(connection, UploadSession::Opened { name, metadata: None });
                self.send(ctx, connection, &StreamFrame::ok());
                None
            }
            (Some(UploadSession::Opened { name, .. }), StreamFrame::Metadata(bytes)) => {
                self.sessions.insert(
                    connection,
                    UploadSession::Opened {
                        name,
                        metadata: Some(bytes),
                    },
                );
                self.send(ctx, connection, &StreamFrame::ok());
                None
            }
            (
                Some(UploadSession::Opened { metadata, .. }),
                StreamFrame::Transfer {
                    name,
                    total_size,
                    chunk_size,
                },
            ) => {
                match self.begin(connection, &name, total_size, chunk_size, metadata) {
                    Ok(session) => {
                        self.sessions.insert(connection, session);
                        self.send(ctx, connection, &StreamFrame::ok());
                        if total_size == 0 {
                            return self.complete(ctx, connection);
                        }
                    }
                    Err(e) => {
                        warn!("{connection}: upload of {name} refused: {e}");
                        self.fail(ctx, connection, &StreamFrame::error(e.code(), e.to_string()));
                    }
                }
                None
            }
            (
                Some(UploadSession::Receiving {
                    name,
                    destination,
                    metadata,
                    mut progress,
                    mut file,
                }),
                StreamFrame::Data(bytes),
            ) => {
                let finished = match progress.record(bytes.len()) {
                    Ok(finished) => finished,
                    Err(overflow) => {
                        // the part file is dropped with the session
                        self.discarded.insert(connection);
                        self.protocol_error(ctx, connection, &overflow.to_string());
                        return None;
                    }
                };
                if let Err(e) = file.write_all(&bytes) {
                    warn!("{connection}: writing upload {name} failed: {e}");
                    self.fail(
                        ctx,
                        connection,
                        &StreamFrame::ProtocolError {
                            code: codes::INTERNAL,
                            message: format!("could not store {name}"),
                        },
                    );
                    return None;
                }
                self.sessions.insert(
                    connection,
                    UploadSession::Receiving {
                        name,
                        destination,
                        metadata,
                        progress,
                        file,
                    },
                );
                if finished {
                    return self.complete(ctx, connection);
                }
                None
            }
            (Some(UploadSession::Completed { destination }), StreamFrame::End) => {
                debug!("{connection}: upload to {} closed", destination.display());
                self.send(ctx, connection, &StreamFrame::ok());
                None
            }
            (Some(session), StreamFrame::ProtocolError { code, message }) => {
                debug!(
                    "{connection}: client aborted {} upload ({code}: {message})",
                    session.state()
                );
                self.send(ctx, connection, &StreamFrame::End);
                None
            }
            (None, StreamFrame::ProtocolError { .. }) => None,
            (session, frame) => {
                let state = session.as_ref().map_or("idle", UploadSession::state);
                if session.is_some() {
                    self.discarded.insert(connection);
                }
                self.protocol_error(
                    ctx,
                    connection,
                    &format!("unexpected {:?} while upload is {state}", frame.tag()),
                );
                None
            }
        }
    }

    /// Drops the upload of `connection`, e.g. on disconnect.
    pub fn abort(&mut self, connection: ConnectionId) -> bool {
        self.discarded.remove(&connection);
        match self.sessions.remove(&connection) {
            Some(UploadSession::Receiving { name, progress, .. }) => {
                info!(
                    "{connection}: upload of {name} discarded at {}/{} bytes",
                    progress.moved(),
                    progress.total()
                );
                true
            }
            Some(_) => true,
            None => false,
        }
    }

    fn begin(
        &mut self,
        connection: ConnectionId,
        name: &str,
        total_size: u64,
        chunk_size: u32,
        metadata: Option<Vec<u8>>,
    ) -> Result<UploadSession, NodeError> {
        let destination = self.handler.begin(connection, name, total_size)?;
        let file = PartFile::create_beside(&destination)?;
        info!("{connection}: receiving {name} ({total_size} bytes)");
        Ok(UploadSession::Receiving {
            name: name.to_string(),
            destination,
            metadata,
            progress: TransferProgress::new(total_size, chunk_size),
            file,
        })
    }

    /// Hands a fully received upload to the handler.
    fn complete(&mut self, ctx: &mut NodeContext, connection: ConnectionId) -> Option<PathBuf> {
        let Some(UploadSession::Receiving {
            name,
            destination,
            metadata,
            progress,
            mut file,
        }) = self.sessions.remove(&connection)
        else {
            return None;
        };
        if let Err(e) = file.close() {
            warn!("{connection}: closing upload {name} failed: {e}");
            self.fail(ctx, connection, &StreamFrame::error(codes::INTERNAL, format!("could not store {name}")));
            return None;
        }

        let upload = CompletedUpload {
            name: name.clone(),
            destination: destination.clone(),
            size: progress.total(),
            metadata,
            file,
        };
        match self.handler.completed(ctx, connection, upload) {
            Ok(()) => {
                info!("{connection}: stored {name} ({} bytes)", progress.total());
                self.sessions.insert(
                    connection,
                    UploadSession::Completed {
                        destination: destination.clone(),
                    },
                );
                Some(destination)
            }
            Err(e) => {
                warn!("{connection}: completing upload {name} failed: {e}");
                self.fail(ctx, connection, &StreamFrame::error(e.code(), e.to_string()));
                None
            }
        }
    }

    /// Ends the upload of `connection` with `frame`.
    fn fail(&mut self, ctx: &NodeContext, connection: ConnectionId, frame: &StreamFrame) {
        self.sessions.remove(&connection);
        self.discarded.insert(connection);
        self.send(ctx, connection, frame);
    }

    fn protocol_error(&mut self, ctx: &NodeContext, connection: ConnectionId, reason: &str) {
        warn!("{connection}: upload protocol error: {reason}");
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

impl UploadSession {
    #[cfg(test)]
    fn destination(&self) -> Option<&std::path::Path> {
        match self {
            UploadSession::Receiving { destination, .. } | UploadSession::Completed { destination } => Some(destination),
            UploadSession::Opened { .. } => None,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::events::event_channel;
    use crate::application::node::tests::{ManualTimers, QuietAudit, RecordingOutbound};
    use depot_core::{Catalog, PermissionResolver};
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    /// Stores uploads under a temp dir and records completions.
    struct DirHandler {
        dir: PathBuf,
        completed: Arc<Mutex<Vec<(String, u64, Option<Vec<u8>>)>>>,
        reject_hook: bool,
    }

    impl UploadHandler for DirHandler {
        fn begin(&mut self, _connection: ConnectionId, name: &str, _total_size: u64) -> Result<PathBuf, NodeError> {
            if name.contains('/') {
                return Err(NodeError::application(codes::BAD_REQUEST, "nested names not allowed"));
            }
            Ok(self.dir.join(name))
        }

        fn completed(&mut self, _ctx: &mut NodeContext, _connection: ConnectionId, upload: CompletedUpload) -> Result<(), NodeError> {
            if self.reject_hook {
                return Err(NodeError::application(codes::INTERNAL, "hook failed"));
            }
            self.completed
                .lock()
                .unwrap()
                .push((upload.name.clone(), upload.size, upload.metadata.clone()));
            upload.file.persist(&upload.destination)?;
            Ok(())
        }
    }

    struct Fixture {
        receiver: UploadReceiver<DirHandler>,
        ctx: NodeContext,
        outbound: Arc<RecordingOutbound>,
        completed: Arc<Mutex<Vec<(String, u64, Option<Vec<u8>>)>>>,
        dir: PathBuf,
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            std::fs::remove_dir_all(&self.dir).ok();
        }
    }

    fn fixture_with(reject_hook: bool) -> Fixture {
        let dir = std::env::temp_dir().join(format!("depot_ul_{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let completed = Arc::new(Mutex::new(Vec::new()));
        let outbound = Arc::new(RecordingOutbound::default());
        let (tx, _rx) = event_channel();
        let ctx = NodeContext::new(
            outbound.clone(),
            Arc::new(ManualTimers::default()),
            tx,
            PermissionResolver::new(Catalog::new()),
            Box::new(QuietAudit),
        );
        let receiver = UploadReceiver::new(
            StreamAddress::new("ASSET_SVR", "UPLOAD"),
            DirHandler {
                dir: dir.clone(),
                completed: completed.clone(),
                reject_hook,
            },
        );
        Fixture {
            receiver,
            ctx,
            outbound,
            completed,
            dir,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(false)
    }

    const CONN: ConnectionId = ConnectionId(1);

    fn feed(f: &mut Fixture, frame: StreamFrame) -> Option<PathBuf> {
        f.receiver.handle(&mut f.ctx, CONN, frame)
    }

    fn replies(f: &Fixture) -> Vec<StreamFrame> {
        f.outbound
            .take()
            .into_iter()
            .map(|(_, m)| StreamFrame::from_message(&m).unwrap())
            .collect()
    }

    fn transfer(name: &str, total: u64) -> StreamFrame {
        StreamFrame::Transfer {
            name: name.to_string(),
            total_size: total,
            chunk_size: 4,
        }
    }

    fn open(name: &str) -> StreamFrame {
        StreamFrame::Open {
            name: name.to_string(),
            checksum: None,
        }
    }

    fn part_files(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .map(|e| e.file_name().to_string_lossy().ends_with(".part"))
                    .unwrap_or(false)
            })
            .count()
    }

    #[test]
    fn test_full_upload_sequence() {
        // Arrange
        let mut f = fixture();

        // Act
        feed(&mut f, open("a.bin"));
        feed(&mut f, StreamFrame::Metadata(b"meta".to_vec()));
        feed(&mut f, transfer("a.bin", 6));
        assert_eq!(feed(&mut f, StreamFrame::Data(b"hell".to_vec())), None);
        let stored = feed(&mut f, StreamFrame::Data(b"o!".to_vec()));
        feed(&mut f, StreamFrame::End);

        // Assert
        assert_eq!(stored, Some(f.dir.join("a.bin")));
        assert_eq!(replies(&f), vec![StreamFrame::ok(); 4]);
        assert_eq!(std::fs::read(f.dir.join("a.bin")).unwrap(), b"hello!");
        assert_eq!(
            *f.completed.lock().unwrap(),
            vec![("a.bin".to_string(), 6, Some(b"meta".to_vec()))]
        );
        assert_eq!(part_files(&f.dir), 0);
    }

    #[test]
    fn test_data_is_not_acknowledged() {
        let mut f = fixture();
        feed(&mut f, open("a.bin"));
        feed(&mut f, transfer("a.bin", 8));
        replies(&f);

        feed(&mut f, StreamFrame::Data(b"1234".to_vec()));

        assert!(replies(&f).is_empty());
    }

    #[test]
    fn test_second_open_aborts_session() {
        let mut f = fixture();
        feed(&mut f, open("a.bin"));
        feed(&mut f, transfer("a.bin", 8));
        replies(&f);

        feed(&mut f, open("b.bin"));

        assert!(matches!(replies(&f)[..], [StreamFrame::ProtocolError { .. }]));
        assert!(!f.receiver.is_active(CONN));
        assert_eq!(part_files(&f.dir), 0);
    }

    #[test]
    fn test_overflowing_data_is_protocol_error() {
        let mut f = fixture();
        feed(&mut f, open("a.bin"));
        feed(&mut f, transfer("a.bin", 3));
        replies(&f);

        feed(&mut f, StreamFrame::Data(b"toolong".to_vec()));

        assert!(matches!(
            replies(&f)[..],
            [StreamFrame::ProtocolError { code: codes::BAD_REQUEST, .. }]
        ));
        assert!(!f.dir.join("a.bin").exists());
        assert_eq!(part_files(&f.dir), 0);
    }

    #[test]
    fn test_end_before_completion_discards() {
        let mut f = fixture();
        feed(&mut f, open("a.bin"));
        feed(&mut f, transfer("a.bin", 8));
        feed(&mut f, StreamFrame::Data(b"12".to_vec()));
        replies(&f);

        feed(&mut f, StreamFrame::End);

        assert!(matches!(replies(&f)[..], [StreamFrame::ProtocolError { .. }]));
        assert!(f.completed.lock().unwrap().is_empty());
        assert_eq!(part_files(&f.dir), 0);
    }

    #[test]
    fn test_data_without_transfer_is_protocol_error() {
        let mut f = fixture();
        feed(&mut f, StreamFrame::Data(vec![1]));
        assert!(matches!(replies(&f)[..], [StreamFrame::ProtocolError { .. }]));
    }

    #[test]
    fn test_rejected_destination_is_error_status() {
        let mut f = fixture();
        feed(&mut f, open("x"));
        replies(&f);
        feed(&mut f, transfer("../x", 4));
        match &replies(&f)[..] {
            [StreamFrame::Status { code, .. }] => assert_eq!(*code, codes::BAD_REQUEST),
            other => panic!("unexpected {other:?}"),
        }
        assert!(!f.receiver.is_active(CONN));
    }

    #[test]
    fn test_empty_upload_completes_at_transfer() {
        let mut f = fixture();
        feed(&mut f, open("empty.bin"));
        let stored = feed(&mut f, transfer("empty.bin", 0));
        feed(&mut f, StreamFrame::End);
        assert!(stored.is_some());
        assert_eq!(std::fs::read(f.dir.join("empty.bin")).unwrap().len(), 0);
        assert_eq!(replies(&f), vec![StreamFrame::ok(); 3]);
    }

    #[test]
    fn test_failed_hook_reports_error_and_removes_part_file() {
        let mut f = fixture_with(true);
        feed(&mut f, open("a.bin"));
        feed(&mut f, transfer("a.bin", 2));
        replies(&f);

        let stored = feed(&mut f, StreamFrame::Data(b"ok".to_vec()));

        assert_eq!(stored, None);
        assert!(matches!(
            replies(&f)[..],
            [StreamFrame::Status { code: codes::INTERNAL, .. }]
        ));
        assert_eq!(part_files(&f.dir), 0);
    }

    #[test]
    fn test_abort_on_disconnect_removes_part_file() {
        let mut f = fixture();
        feed(&mut f, open("a.bin"));
        feed(&mut f, transfer("a.bin", 8));
        feed(&mut f, StreamFrame::Data(b"12".to_vec()));
        assert_eq!(part_files(&f.dir), 1);
        assert_eq!(
            f.receiver.sessions.get(&CONN).and_then(UploadSession::destination),
            Some(f.dir.join("a.bin").as_path())
        );

        assert!(f.receiver.abort(CONN));

        assert_eq!(part_files(&f.dir), 0);
        assert!(!f.receiver.abort(CONN));
    }

    #[test]
    fn test_client_protocol_error_is_answered_with_end() {
        let mut f = fixture();
        feed(&mut f, open("a.bin"));
        feed(&mut f, transfer("a.bin", 8));
        feed(&mut f, StreamFrame::Data(b"12".to_vec()));
        replies(&f);

        feed(
            &mut f,
            StreamFrame::ProtocolError {
                code: 1,
                message: "bye".to_string(),
            },
        );

        assert_eq!(replies(&f), vec![StreamFrame::End]);
        assert!(!f.receiver.is_active(CONN));
        assert_eq!(part_files(&f.dir), 0);
    }

    #[test]
    fn test_client_protocol_error_without_session_is_ignored() {
        let mut f = fixture();
        feed(
            &mut f,
            StreamFrame::ProtocolError {
                code: 1,
                message: "bye".to_string(),
            },
        );
        assert!(replies(&f).is_empty());
    }

    #[test]
    fn test_frames_in_flight_after_failure_are_dropped() {
        // Arrange: the completion hook fails
        let mut f = fixture_with(true);
        feed(&mut f, open("a.bin"));
        feed(&mut f, transfer("a.bin", 4));
        replies(&f);
        feed(&mut f, StreamFrame::Data(b"abcd".to_vec()));
        assert!(matches!(
            replies(&f)[..],
            [StreamFrame::Status { code: codes::INTERNAL, .. }]
        ));

        // Act: the client had already sent more before seeing the error
        feed(&mut f, StreamFrame::Data(b"efgh".to_vec()));
        feed(&mut f, StreamFrame::Data(b"ijkl".to_vec()));
        feed(&mut f, StreamFrame::End);

        // Assert
        assert!(replies(&f).is_empty());
        assert!(!f.receiver.is_active(CONN));
    }

    #[test]
    fn test_open_after_failure_starts_fresh_upload() {
        let mut f = fixture();
        feed(&mut f, open("a.bin"));
        feed(&mut f, transfer("a.bin", 3));
        feed(&mut f, StreamFrame::Data(b"toolong".to_vec()));
        feed(&mut f, StreamFrame::Data(b"more".to_vec()));
        replies(&f);

        feed(&mut f, open("b.bin"));
        feed(&mut f, transfer("b.bin", 2));
        let stored = feed(&mut f, StreamFrame::Data(b"ok".to_vec()));
        feed(&mut f, StreamFrame::End);

        assert_eq!(stored, Some(f.dir.join("b.bin")));
        assert_eq!(replies(&f), vec![StreamFrame::ok(); 3]);
    }
}
