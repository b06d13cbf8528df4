//! Client halves of the transfer streams.
//!
//! # Download
//!
//! ```text
//! OPEN(name, checksum?) ──►
//!                       ◄── STATUS(ok)
//!                       ◄── METADATA(server checksum)
//!                       ◄── END                        up to date, done
//!                  or   ◄── TRANSFER(name, size, chunk)
//!                       ◄── DATA × n
//!                       ◄── END
//! ```
//!
//! [`DownloadMachine`] consumes these frames and writes DATA straight to the
//! destination file.  If the download fails or is abandoned, the file is
//! removed.
//!
//! # Upload
//!
//! [`run_upload`] drives OPEN, METADATA and TRANSFER, each answered by
//! `STATUS`, then streams DATA without waiting and closes with END.  Between
//! chunks it checks for an early error from the server so a refused upload
//! stops promptly.  Any stream error is reported as
//! [`ClientError::Transfer`].
//!
//! # Abandoning a stream
//!
//! When the client gives up on a stream the server has not ended, it sends
//! `PROTOCOL_ERROR` and reads that stream's frames up to the one that ends
//! it (END, `PROTOCOL_ERROR` or an error `STATUS`).  Nothing from the old
//! stream is left to be mistaken for the start of the next one.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use depot_core::protocol::{codes, STATUS_OK};
use depot_core::{StreamFrame, TransferProgress};
use tracing::{debug, warn};

use crate::error::ClientError;
use crate::infrastructure::network::ClientConnection;

/// How a download finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// The checksum we sent still matched; nothing was transferred.
    UpToDate { checksum: String },
    /// The file was written to the destination.
    Downloaded { checksum: Option<String>, bytes: u64 },
}

enum DownloadState {
    AwaitingStatus,
    Opened,
    Receiving { file: File, progress: TransferProgress },
    Finished,
}

/// Consumes the server's download frames.
pub struct DownloadMachine {
    destination: PathBuf,
    state: DownloadState,
    checksum: Option<String>,
    /// Set once the destination has been created and not yet completed.
    owns_file: bool,
}

impl DownloadMachine {
    pub fn new(destination: impl Into<PathBuf>) -> Self {
        Self {
            destination: destination.into(),
            state: DownloadState::AwaitingStatus,
            checksum: None,
            owns_file: false,
        }
    }

    /// The OPEN frame that starts a download of `name`.
    pub fn open_frame(name: &str, known_checksum: Option<&str>) -> StreamFrame {
        StreamFrame::Open {
            name: name.to_string(),
            checksum: known_checksum.filter(|c| !c.is_empty()).map(str::to_string),
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, DownloadState::Finished)
    }

    /// Feeds one frame from the server.
    ///
    /// Returns `Some` once the download is over.  Any error ends the machine
    /// and removes a partially written destination.
    pub fn feed(&mut self, frame: StreamFrame) -> Result<Option<DownloadOutcome>, ClientError> {
        match self.step(frame) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.fail();
                Err(e)
            }
        }
    }

    fn step(&mut self, frame: StreamFrame) -> Result<Option<DownloadOutcome>, ClientError> {
        if let StreamFrame::ProtocolError { code, message } = frame {
            return Err(ClientError::Transfer { code, message });
        }
        let state = std::mem::replace(&mut self.state, DownloadState::Finished);
        match (state, frame) {
            (DownloadState::AwaitingStatus, StreamFrame::Status { code, message }) => {
                if code != STATUS_OK {
                    return Err(ClientError::Transfer { code, message });
                }
                self.state = DownloadState::Opened;
                Ok(None)
            }
            (DownloadState::Opened, StreamFrame::Metadata(bytes)) => {
                self.checksum = Some(String::from_utf8_lossy(&bytes).into_owned());
                self.state = DownloadState::Opened;
                Ok(None)
            }
            (DownloadState::Opened, StreamFrame::End) => {
                let checksum = self.checksum.take().unwrap_or_default();
                debug!("{} is up to date", self.destination.display());
                Ok(Some(DownloadOutcome::UpToDate { checksum }))
            }
            (
                DownloadState::Opened,
                StreamFrame::Transfer {
                    total_size,
                    chunk_size,
                    ..
                },
            ) => {
                let file = File::create(&self.destination)?;
                self.owns_file = true;
                self.state = DownloadState::Receiving {
                    file,
                    progress: TransferProgress::new(total_size, chunk_size),
                };
                Ok(None)
            }
            (DownloadState::Receiving { mut file, mut progress }, StreamFrame::Data(bytes)) => {
                progress.record(bytes.len()).map_err(|e| ClientError::Transfer {
                    code: codes::BAD_REQUEST,
                    message: e.to_string(),
                })?;
                file.write_all(&bytes)?;
                self.state = DownloadState::Receiving { file, progress };
                Ok(None)
            }
            (DownloadState::Receiving { file, progress }, StreamFrame::End) => {
                if !progress.is_complete() {
                    return Err(ClientError::Transfer {
                        code: codes::BAD_REQUEST,
                        message: format!(
                            "server ended the download after {} of {} bytes",
                            progress.moved(),
                            progress.total()
                        ),
                    });
                }
                file.sync_all()?;
                self.owns_file = false;
                Ok(Some(DownloadOutcome::Downloaded {
                    checksum: self.checksum.take(),
                    bytes: progress.total(),
                }))
            }
            (state, frame) => {
                let expected = match state {
                    DownloadState::AwaitingStatus => "STATUS",
                    DownloadState::Opened => "METADATA, TRANSFER or END",
                    DownloadState::Receiving { .. } => "DATA or END",
                    DownloadState::Finished => "nothing",
                };
                Err(ClientError::Transfer {
                    code: codes::BAD_REQUEST,
                    message: format!("got {:?} while expecting {expected}", frame.tag()),
                })
            }
        }
    }

    fn fail(&mut self) {
        // closes the file before removing it
        self.state = DownloadState::Finished;
        if self.owns_file {
            self.owns_file = false;
            if let Err(e) = std::fs::remove_file(&self.destination) {
                warn!("could not remove partial {}: {e}", self.destination.display());
            }
        }
    }
}

impl Drop for DownloadMachine {
    fn drop(&mut self) {
        self.fail();
    }
}

// ── Drivers ───────────────────────────────────────────────────────────────────

/// How long an abandoned stream may take to end.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// True for the frames after which the server sends nothing more on a stream.
fn ends_stream(frame: &StreamFrame) -> bool {
    match frame {
        StreamFrame::End | StreamFrame::ProtocolError { .. } => true,
        StreamFrame::Status { code, .. } => *code != STATUS_OK,
        _ => false,
    }
}

/// Aborts the stream on `(target, kind)` because of `reason` and consumes
/// the frames the server still sends for it.
async fn abandon(conn: &mut ClientConnection, target: &str, kind: &str, reason: &ClientError) {
    let abort = StreamFrame::ProtocolError {
        code: codes::INTERNAL,
        message: reason.to_string(),
    };
    if let Err(e) = conn.send(&abort.to_message(target, kind)).await {
        warn!("could not abort {target}/{kind}: {e}");
        return;
    }

    let drain = async {
        let mut dropped = 0usize;
        loop {
            let message = conn.recv_from(target, kind).await?;
            match StreamFrame::from_message(&message) {
                Ok(frame) if ends_stream(&frame) => return Ok::<usize, ClientError>(dropped),
                Ok(_) | Err(_) => dropped += 1,
            }
        }
    };
    match tokio::time::timeout(DRAIN_TIMEOUT, drain).await {
        Ok(Ok(dropped)) => debug!("{target}/{kind} abandoned after {dropped} more frames"),
        Ok(Err(e)) => warn!("{target}/{kind} did not end cleanly: {e}"),
        Err(_) => warn!("{target}/{kind} still open after {DRAIN_TIMEOUT:?}"),
    }
}

/// Waits for the next stream frame on `(target, kind)`.
async fn next_frame(conn: &mut ClientConnection, target: &str, kind: &str) -> Result<StreamFrame, ClientError> {
    let message = conn.recv_from(target, kind).await?;
    Ok(StreamFrame::from_message(&message)?)
}

/// Sends `frame` and requires `STATUS(ok)` back.
async fn exchange(conn: &mut ClientConnection, target: &str, kind: &str, frame: StreamFrame) -> Result<(), ClientError> {
    conn.send(&frame.to_message(target, kind)).await?;
    match next_frame(conn, target, kind).await? {
        StreamFrame::Status { code, message } if code != STATUS_OK => {
            Err(ClientError::Transfer { code, message })
        }
        StreamFrame::Status { .. } => Ok(()),
        StreamFrame::ProtocolError { code, message } => Err(ClientError::Transfer { code, message }),
        other => Err(ClientError::Transfer {
            code: codes::BAD_REQUEST,
            message: format!("expected STATUS, got {:?}", other.tag()),
        }),
    }
}

/// Downloads `name` into `destination`.
pub async fn run_download(
    conn: &mut ClientConnection,
    target: &str,
    kind: &str,
    name: &str,
    destination: &Path,
    known_checksum: Option<&str>,
) -> Result<DownloadOutcome, ClientError> {
    let mut machine = DownloadMachine::new(destination);
    conn.send(&DownloadMachine::open_frame(name, known_checksum).to_message(target, kind))
        .await?;
    loop {
        let message = conn.recv_from(target, kind).await?;
        let (ended, fed) = match StreamFrame::from_message(&message) {
            Ok(frame) => (ends_stream(&frame), machine.feed(frame)),
            Err(e) => (false, Err(e.into())),
        };
        match fed {
            Ok(Some(outcome)) => return Ok(outcome),
            Ok(None) => {}
            Err(e) => {
                // the server keeps streaming unless told otherwise
                if !ended {
                    abandon(conn, target, kind, &e).await;
                }
                return Err(e);
            }
        }
    }
}

/// What to upload.
#[derive(Debug, Clone)]
pub struct UploadRequest<'a> {
    pub name: &'a str,
    pub source: &'a Path,
    pub metadata: Option<&'a [u8]>,
    pub chunk_size: u32,
}

/// Uploads a file; returns the number of bytes sent.
pub async fn run_upload(conn: &mut ClientConnection, target: &str, kind: &str, request: UploadRequest<'_>) -> Result<u64, ClientError> {
    let mut file = File::open(request.source)?;
    let total = file.metadata()?.len();

    exchange(
        conn,
        target,
        kind,
        StreamFrame::Open {
            name: request.name.to_string(),
            checksum: None,
        },
    )
    .await?;
    if let Some(metadata) = request.metadata {
        exchange(conn, target, kind, StreamFrame::Metadata(metadata.to_vec())).await?;
    }
    exchange(
        conn,
        target,
        kind,
        StreamFrame::Transfer {
            name: request.name.to_string(),
            total_size: total,
            chunk_size: request.chunk_size,
        },
    )
    .await?;

    let mut progress = TransferProgress::new(total, request.chunk_size);
    while !progress.is_complete() {
        let mut chunk = vec![0u8; progress.next_chunk_len()];
        if let Err(e) = file.read_exact(&mut chunk) {
            // the file shrank under us
            let e = ClientError::from(e);
            abandon(conn, target, kind, &e).await;
            return Err(e);
        }
        if let Err(e) = progress.record(chunk.len()) {
            let e = ClientError::Transfer {
                code: codes::INTERNAL,
                message: e.to_string(),
            };
            abandon(conn, target, kind, &e).await;
            return Err(e);
        }
        conn.send(&StreamFrame::Data(chunk).to_message(target, kind)).await?;
        check_early_error(conn, target, kind)?;
    }

    exchange(conn, target, kind, StreamFrame::End).await?;
    debug!("uploaded {} ({total} bytes)", request.name);
    Ok(total)
}

/// Fails if the server has already reported an error on this stream.
fn check_early_error(conn: &mut ClientConnection, target: &str, kind: &str) -> Result<(), ClientError> {
    while let Some(message) = conn.try_recv()? {
        if !message.is(target, kind) {
            debug!("ignoring {}/{} during upload", message.target(), message.kind());
            continue;
        }
        match StreamFrame::from_message(&message)? {
            StreamFrame::Status { code, message } if code != STATUS_OK => {
                return Err(ClientError::Transfer { code, message });
            }
            StreamFrame::ProtocolError { code, message } => {
                return Err(ClientError::Transfer { code, message });
            }
            other => debug!("ignoring {:?} during upload", other.tag()),
        }
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
