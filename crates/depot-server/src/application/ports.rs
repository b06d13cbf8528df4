//! Abstractions the application layer depends on.
//!
//! The infrastructure layer provides the implementations (the connection
//! registry, the tokio timer service, the audit sinks); nodes and the event
//! core only ever see these traits, so they can be tested with in-memory
//! fakes.

use std::net::SocketAddr;
use std::time::Duration;

use depot_core::Message;

use crate::application::events::{ConnectionId, NodeId, TimerId};

/// Outbound side of the live connections.
pub trait Outbound: Send + Sync {
    /// Queues `message` for `connection`.  Returns `false` when the
    /// connection is already gone; the message is dropped.
    fn send(&self, connection: ConnectionId, message: Message) -> bool;

    /// Tears the connection down.  Safe to call more than once.
    fn disconnect(&self, connection: ConnectionId);

    /// Whether `connection` is still registered.
    fn is_open(&self, connection: ConnectionId) -> bool;

    fn peer_addr(&self, connection: ConnectionId) -> Option<SocketAddr>;
}

/// Schedules recurring timer events on behalf of nodes.
///
/// Implementations must only *enqueue* `Event::Timer`; they never call into
/// a node directly.
pub trait TimerScheduler: Send + Sync {
    fn schedule_interval(&self, node: NodeId, interval: Duration) -> TimerId;

    fn cancel(&self, timer: TimerId);
}

/// Write-only sink for audit lines.
#[cfg_attr(test, mockall::automock)]
pub trait AuditSink: Send {
    fn log(&self, line: &str);
}
