//! Infrastructure layer for the server.
//!
//! Contains the OS-facing adapters: TCP sockets and timers (`network`) and
//! everything that touches the file system (`storage`).
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `depot_core`, but MUST NOT be imported by the `application` layer.

pub mod network;
pub mod storage;
