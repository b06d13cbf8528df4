//! Application layer for the client.
//!
//! - **`transfer`** – client halves of the download and upload streams.
//! - **`session`**  – login, listing and transfers over one connection.

pub mod session;
pub mod transfer;
