//! Infrastructure layer for the client: the TCP connection to the server
//! and the on-disk API key.

pub mod credentials;
pub mod network;
