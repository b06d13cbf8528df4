//! The client's error type.

use std::net::SocketAddr;
use std::path::PathBuf;

use depot_core::protocol::Nack;
use depot_core::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// TCP connection to the server failed.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The server refused a request.
    #[error("request refused ({code}): {message}")]
    Nack { code: i32, message: String },

    /// The server reported a failure on a transfer stream, or the stream
    /// broke its own sequence.
    #[error("transfer failed ({code}): {message}")]
    Transfer { code: i32, message: String },

    #[error("connection closed by server")]
    Closed,

    #[error("API key at {path}: {reason}")]
    Credentials { path: PathBuf, reason: String },
}

impl From<Nack> for ClientError {
    fn from(nack: Nack) -> Self {
        ClientError::Nack {
            code: nack.code,
            message: nack.message,
        }
    }
}
