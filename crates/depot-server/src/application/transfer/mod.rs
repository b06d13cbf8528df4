//! Server side of the chunked streaming-transfer sub-protocol.
//!
//! The machines here are independent of *what* is moved: a node owns a
//! [`DownloadPump`] and/or an [`UploadReceiver`], decodes incoming
//! [`StreamFrame`]s, and forwards them.  What a name means is decided by
//! the collaborator traits:
//!
//! - [`DownloadSource`] resolves a logical name to a readable file,
//! - [`ChecksumProvider`] computes (or looks up) a content checksum,
//! - [`UploadHandler`] picks the destination of an upload and runs the
//!   "upload completed" hook.
//!
//! Sequence violations are answered with `PROTOCOL_ERROR` and abort the
//! session; the connection stays open.

pub mod download;
pub mod upload;

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use depot_core::protocol::stream::DEFAULT_CHUNK_SIZE;
use depot_core::{Message, StreamFrame};
use uuid::Uuid;

use crate::application::events::ConnectionId;
use crate::application::node::{NodeContext, NodeError};

pub use download::DownloadPump;
pub use upload::UploadReceiver;

/// Resolves logical names for downloads.
pub trait DownloadSource: Send {
    fn locate(&self, name: &str) -> Result<PathBuf, NodeError>;
}

/// Content checksum used by the download short-circuit.
pub trait ChecksumProvider: Send {
    fn checksum(&mut self, path: &Path) -> io::Result<String>;

    /// Forgets anything cached for `path`.
    fn invalidate(&mut self, _path: &Path) {}
}

/// Decides where uploads go and what happens once one is complete.
pub trait UploadHandler: Send {
    /// Returns the final destination for an upload of `name`.
    fn begin(&mut self, connection: ConnectionId, name: &str, total_size: u64) -> Result<PathBuf, NodeError>;

    /// Runs once all declared bytes are on disk.  The handler is expected to
    /// [`persist`](PartFile::persist) the file; otherwise it is discarded.
    fn completed(&mut self, ctx: &mut NodeContext, connection: ConnectionId, upload: CompletedUpload) -> Result<(), NodeError>;
}

/// Chunking parameters for the server side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferSettings {
    pub chunk_size: u32,
    /// DATA frames sent per event before the pump yields to other events.
    pub chunks_per_wake: usize,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunks_per_wake: 16,
        }
    }
}

/// `(target, kind)` every frame of one stream is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamAddress {
    pub target: String,
    pub kind: String,
}

impl StreamAddress {
    pub fn new(target: &str, kind: &str) -> Self {
        Self {
            target: target.to_string(),
            kind: kind.to_string(),
        }
    }

    pub fn message(&self, frame: &StreamFrame) -> Message {
        frame.to_message(&self.target, &self.kind)
    }
}

/// A fully received upload, handed to [`UploadHandler::completed`].
#[derive(Debug)]
pub struct CompletedUpload {
    pub name: String,
    pub destination: PathBuf,
    pub size: u64,
    pub metadata: Option<Vec<u8>>,
    pub file: PartFile,
}

// ── Part files ────────────────────────────────────────────────────────────────

/// A hidden temp file next to its final destination.
///
/// Removed on drop unless [`persist`](Self::persist)ed, so every abort
/// path (protocol error, disconnect, failed hook) cleans up by dropping.
#[derive(Debug)]
pub struct PartFile {
    path: PathBuf,
    file: Option<File>,
    persisted: bool,
}

impl PartFile {
    /// Creates `.<name>.<uuid>.part` in the destination's directory.
    pub fn create_beside(destination: &Path) -> io::Result<Self> {
        let dir = destination.parent().unwrap_or_else(|| Path::new("."));
        let stem = destination
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let path = dir.join(format!(".{stem}.{}.part", Uuid::new_v4().simple()));
        let file = File::create(&path)?;
        Ok(Self {
            path,
            file: Some(file),
            persisted: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.write_all(bytes),
            None => Err(io::Error::new(io::ErrorKind::Other, "part file already closed")),
        }
    }

    /// Flushes and closes the handle; the file stays on disk.
    pub fn close(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
            file.sync_all()?;
        }
        Ok(())
    }

    /// Closes the file and renames it over `destination`.
    pub fn persist(mut self, destination: &Path) -> io::Result<()> {
        self.close()?;
        std::fs::rename(&self.path, destination)?;
        self.persisted = true;
        Ok(())
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if self.persisted {
            return;
        }
        self.file.take();
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("depot_part_{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_part_file_removed_when_dropped() {
        let dir = temp_dir();
        let mut part = PartFile::create_beside(&dir.join("a.bin")).unwrap();
        part.write_all(b"partial").unwrap();
        let path = part.path().to_path_buf();
        assert!(path.exists());

        drop(part);

        assert!(!path.exists());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_part_file_persist_renames_into_place() {
        let dir = temp_dir();
        let dest = dir.join("b.bin");
        let mut part = PartFile::create_beside(&dest).unwrap();
        part.write_all(b"complete").unwrap();
        let temp = part.path().to_path_buf();

        part.persist(&dest).unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"complete");
        assert!(!temp.exists());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_part_file_is_hidden() {
        let dir = temp_dir();
        let part = PartFile::create_beside(&dir.join("c.bin")).unwrap();
        let name = part.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(".c.bin."));
        assert!(name.ends_with(".part"));
        drop(part);
        std::fs::remove_dir_all(&dir).ok();
    }
}
