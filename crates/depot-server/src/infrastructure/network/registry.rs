//! The process-wide registry of live connections.
//!
//! The registry is the only place outbound queues are reachable from, and it
//! owns the teardown path:
//!
//! 1. remove the entry under the registry lock,
//! 2. fire the connection's shutdown signal (stops the reader) and drop the
//!    queue sender (the writer flushes and exits),
//! 3. queue exactly one `Disconnected` event.
//!
//! A second teardown of the same id finds no entry and does nothing.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use depot_core::Message;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::application::events::{ConnectionId, Event, EventSender};
use crate::application::ports::Outbound;

struct ConnectionHandle {
    peer: SocketAddr,
    outbound: mpsc::UnboundedSender<Message>,
    shutdown: watch::Sender<bool>,
}

/// Receiving ends handed to a new connection's reader and writer.
pub struct ConnectionChannels {
    pub id: ConnectionId,
    pub outbound: mpsc::UnboundedReceiver<Message>,
    pub shutdown: watch::Receiver<bool>,
}

/// Cheaply cloneable handle to the shared registry.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<Mutex<HashMap<ConnectionId, ConnectionHandle>>>,
    next_id: Arc<AtomicU64>,
    events: EventSender,
}

impl ConnectionRegistry {
    pub fn new(events: EventSender) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            events,
        }
    }

    /// Sender for the event queue this registry reports into.
    pub fn events(&self) -> EventSender {
        self.events.clone()
    }

    /// Registers a new connection and returns the ends its tasks consume.
    pub fn register(&self, peer: SocketAddr) -> ConnectionChannels {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.lock().insert(
            id,
            ConnectionHandle {
                peer,
                outbound: outbound_tx,
                shutdown: shutdown_tx,
            },
        );
        info!("{id}: connected from {peer}");
        ConnectionChannels {
            id,
            outbound: outbound_rx,
            shutdown: shutdown_rx,
        }
    }

    /// Removes the connection and announces it.  Returns `false` when the
    /// connection was already gone.
    pub fn teardown(&self, id: ConnectionId) -> bool {
        let removed = self.lock().remove(&id);
        let Some(handle) = removed else {
            debug!("{id}: teardown of already removed connection");
            return false;
        };
        let _ = handle.shutdown.send(true);
        drop(handle);
        info!("{id}: disconnected");
        let _ = self.events.send(Event::Disconnected { connection: id });
        true
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.lock().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Tears down every connection, e.g. on shutdown.
    pub fn close_all(&self) {
        for id in self.ids() {
            self.teardown(id);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, ConnectionHandle>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Outbound for ConnectionRegistry {
    fn send(&self, connection: ConnectionId, message: Message) -> bool {
        match self.lock().get(&connection) {
            Some(handle) => handle.outbound.send(message).is_ok(),
            None => false,
        }
    }

    fn disconnect(&self, connection: ConnectionId) {
        self.teardown(connection);
    }

    fn is_open(&self, connection: ConnectionId) -> bool {
        self.lock().contains_key(&connection)
    }

    fn peer_addr(&self, connection: ConnectionId) -> Option<SocketAddr> {
        self.lock().get(&connection).map(|h| h.peer)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
