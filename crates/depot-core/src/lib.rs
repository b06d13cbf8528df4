//! # depot-core
//!
//! Shared library for Depot containing the wire codec, the streaming-transfer
//! vocabulary, the delta codec, and the permission resolver.
//!
//! This crate is used by both the server and the client.  It has no
//! dependencies on sockets, files, or async runtimes.
//!
//! # Architecture overview (for beginners)
//!
//! Depot is a client/server platform for moving versioned files and syncing
//! shared state over a private binary protocol on plain TCP.
//!
//! This crate (`depot-core`) is the shared foundation.  It defines:
//!
//! - **`protocol`**: how bytes travel over the network.  A [`Message`] names
//!   a service (`target`) and an operation (`kind`) and carries an ordered
//!   run of typed fields; frames are a 4-byte length prefix plus payload.
//!   The module also holds the ACK/NACK reply envelope and the control
//!   vocabulary (`OPEN`, `TRANSFER`, `DATA`, `END`, ...) for chunked
//!   transfers.
//!
//! - **`domain`**: pure logic with no I/O: the [`PermissionResolver`], the
//!   run-length delta codec, and state synchronization built on it.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `depot_core::Message` instead of `depot_core::protocol::message::Message`.
pub use domain::delta::DeltaError;
pub use domain::permissions::{
    Attribute, Catalog, CatalogError, EffectivePermission, PermissionKey, PermissionResolver,
    PermissionSource,
};
pub use domain::state_sync::{StateReplica, StateTracker, SyncError};
pub use protocol::codec::{decode_frame, encode_frame, FrameFormat, ProtocolError};
pub use protocol::message::{FieldReader, Message};
pub use protocol::stream::{StreamFrame, StreamTag, TransferProgress};
