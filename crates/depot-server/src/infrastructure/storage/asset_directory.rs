//! A directory on disk as the asset store.
//!
//! Asset names are `/`-separated paths relative to the root.  A name is
//! rejected unless every component is a plain, non-hidden file name, so
//! nothing outside the root (and no in-progress `.part` file) can be read
//! or written.

use std::io;
use std::path::{Component, Path, PathBuf};

use depot_core::protocol::codes;
use tracing::info;

use crate::application::assets::{AssetEntry, AssetStore};
use crate::application::events::ConnectionId;
use crate::application::node::{NodeContext, NodeError};
use crate::application::transfer::{CompletedUpload, DownloadSource, UploadHandler};

#[derive(Debug, Clone)]
pub struct AssetDirectory {
    root: PathBuf,
}

impl AssetDirectory {
    /// Uses `root` as the store, creating it if needed.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps an asset name to a path under the root.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, NodeError> {
        let invalid = || NodeError::application(codes::BAD_REQUEST, format!("invalid asset name {name:?}"));
        if name.is_empty() || name.contains('\\') {
            return Err(invalid());
        }
        let mut path = self.root.clone();
        for component in Path::new(name).components() {
            match component {
                Component::Normal(part) if !part.to_string_lossy().starts_with('.') => path.push(part),
                _ => return Err(invalid()),
            }
        }
        Ok(path)
    }

    fn walk(&self, dir: &Path, prefix: &str, out: &mut Vec<AssetEntry>) -> io::Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if file_name.starts_with('.') {
                continue;
            }
            let name = if prefix.is_empty() {
                file_name
            } else {
                format!("{prefix}/{file_name}")
            };
            let kind = entry.file_type()?;
            if kind.is_dir() {
                self.walk(&entry.path(), &name, out)?;
            } else if kind.is_file() {
                out.push(AssetEntry {
                    name,
                    path: entry.path(),
                    size: entry.metadata()?.len(),
                });
            }
        }
        Ok(())
    }
}

impl DownloadSource for AssetDirectory {
    fn locate(&self, name: &str) -> Result<PathBuf, NodeError> {
        let path = self.resolve(name)?;
        if path.is_file() {
            Ok(path)
        } else {
            Err(NodeError::not_found(name))
        }
    }
}

impl UploadHandler for AssetDirectory {
    fn begin(&mut self, _connection: ConnectionId, name: &str, _total_size: u64) -> Result<PathBuf, NodeError> {
        let path = self.resolve(name)?;
        if path.is_dir() {
            return Err(NodeError::application(
                codes::BAD_REQUEST,
                format!("{name} is a directory"),
            ));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(path)
    }

    fn completed(&mut self, ctx: &mut NodeContext, connection: ConnectionId, upload: CompletedUpload) -> Result<(), NodeError> {
        let who = ctx
            .session(connection)
            .and_then(|s| s.user())
            .unwrap_or("<anonymous>")
            .to_string();
        upload.file.persist(&upload.destination)?;
        info!("{connection}: {} replaced by {who}", upload.name);
        ctx.audit(&format!("upload {} size={} user={who} {connection}", upload.name, upload.size));
        Ok(())
    }
}

impl AssetStore for AssetDirectory {
    fn list(&self) -> io::Result<Vec<AssetEntry>> {
        let mut entries = Vec::new();
        self.walk(&self.root, "", &mut entries)?;
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}
