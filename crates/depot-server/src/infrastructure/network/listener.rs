//! TCP listener: accept loop and per-connection task spawning.
//!
//! Each accepted socket gets exactly two tasks, a reader and a writer (see
//! [`connection`](super::connection)), and an entry in the
//! [`ConnectionRegistry`].  The accept loop polls with a short timeout so it
//! notices the shutdown flag even when nobody is connecting.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::infrastructure::network::connection::{reader_loop, writer_loop, ConnectionSettings};
use crate::infrastructure::network::registry::ConnectionRegistry;

/// How often the accept loop re-checks the running flag.
const ACCEPT_POLL: Duration = Duration::from_millis(200);

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("bind failed on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("listener I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct Server {
    listener: TcpListener,
    registry: ConnectionRegistry,
    settings: ConnectionSettings,
}

impl Server {
    /// Binds the listening socket.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::BindFailed`] if the address is in use or not
    /// permitted.
    pub async fn bind(addr: SocketAddr, registry: ConnectionRegistry, settings: ConnectionSettings) -> Result<Self, NetworkError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| NetworkError::BindFailed { addr, source })?;
        Ok(Self {
            listener,
            registry,
            settings,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until `running` is cleared, then tears down every
    /// remaining connection.
    pub async fn run(self, running: Arc<AtomicBool>) {
        if let Ok(addr) = self.listener.local_addr() {
            info!("listening on {addr}");
        }
        while running.load(Ordering::Relaxed) {
            match timeout(ACCEPT_POLL, self.listener.accept()).await {
                Ok(Ok((stream, peer))) => {
                    spawn_connection(stream, peer, &self.registry, self.settings);
                }
                Ok(Err(e)) => {
                    // transient, e.g. too many open files
                    error!("accept error: {e}");
                }
                Err(_) => {}
            }
        }
        info!("accept loop stopped; closing {} connection(s)", self.registry.len());
        self.registry.close_all();
    }
}

/// Registers `stream` and spawns its reader and writer tasks.
pub fn spawn_connection(stream: TcpStream, peer: SocketAddr, registry: &ConnectionRegistry, settings: ConnectionSettings) {
    if let Err(e) = stream.set_nodelay(true) {
        warn!("{peer}: could not disable Nagle: {e}");
    }
    let channels = registry.register(peer);
    let (read_half, write_half) = stream.into_split();

    tokio::spawn(reader_loop(
        channels.id,
        read_half,
        settings,
        registry.events(),
        registry.clone(),
        channels.shutdown,
    ));
    tokio::spawn(writer_loop(
        channels.id,
        write_half,
        settings.frame_format,
        channels.outbound,
        registry.clone(),
    ));
}
