//! Pure domain logic for Depot: no sockets, no files.
//!
//! # What lives here? (for beginners)
//!
//! Code in this module only transforms values in memory, so it can be unit
//! tested without any setup:
//!
//! - **`delta`**: byte-wise difference plus run-length compression, used to
//!   ship only what changed in a piece of shared state.
//! - **`permissions`**: the authorization decision engine that gates every
//!   request a server node handles.
//! - **`state_sync`**: a tracker/replica pair that combines `bincode`
//!   serialization with the delta codec.
//!
//! The server and client crates depend on this module; it never depends on
//! them.

pub mod delta;
pub mod permissions;
pub mod state_sync;
