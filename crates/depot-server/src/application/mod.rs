//! Application layer: the event core and the nodes it drives.
//!
//! # What is the "application" layer? (for beginners)
//!
//! In Clean Architecture the *application* layer sits between the domain
//! (pure rules in `depot-core`) and the infrastructure (sockets, files).
//!
//! Code in this layer:
//!
//! - **Orchestrates** the core types to serve requests, e.g. "stream this
//!   asset to that connection unless its checksum already matches".
//! - **Depends on abstractions** ([`ports`], and the collaborator traits in
//!   [`transfer`]) rather than on `tokio` sockets or the file system layout,
//!   so tests drive it with in-memory fakes.
//!
//! # Sub-modules
//!
//! - **`events`**     – the event type funnelled into the event core.
//! - **`ports`**      – traits the infrastructure implements.
//! - **`node`**       – the `Node` trait, `NodeContext`, per-connection sessions.
//! - **`event_core`** – the single thread that calls the nodes.
//! - **`transfer`**   – server-side download/upload state machines.
//! - **`auth`**       – the `AUTH_SVR` node.
//! - **`assets`**     – the `ASSET_SVR` node.

pub mod assets;
pub mod auth;
pub mod event_core;
pub mod events;
pub mod node;
pub mod ports;
pub mod transfer;
