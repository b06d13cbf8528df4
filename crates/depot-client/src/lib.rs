//! depot-client library entry point.
//!
//! # What does the client do? (for beginners)
//!
//! A depot server keeps a directory of assets.  The client:
//!
//! 1. Opens one TCP connection and logs in (password or API key).
//! 2. Lists assets, each with its size and checksum.
//! 3. Downloads an asset, sending the checksum of the copy it already has;
//!    if that still matches, the server answers "up to date" and no bytes
//!    move.
//! 4. Uploads files in chunks.
//!
//! [`Session`] wraps all of this behind async methods.

/// Application layer: transfer state machines and the session facade.
pub mod application;

/// Infrastructure layer: the TCP connection and credential files.
pub mod infrastructure;

pub mod error;

pub use application::session::{PermissionRow, RemoteAsset, Session};
pub use application::transfer::DownloadOutcome;
pub use error::ClientError;
