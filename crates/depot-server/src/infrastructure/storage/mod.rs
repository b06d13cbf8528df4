//! Storage infrastructure: everything read from or written to disk.
//!
//! - **`config`**          – the TOML server configuration.
//! - **`catalog`**         – the TOML permission catalog.
//! - **`users`**           – user accounts and grants from the configuration.
//! - **`asset_directory`** – a directory tree as the asset store.
//! - **`checksum`**        – SHA-256 content checksums with a metadata cache.
//! - **`audit`**           – audit sinks (tracing target or append-only file).

pub mod asset_directory;
pub mod audit;
pub mod catalog;
pub mod checksum;
pub mod config;
pub mod users;
