//! Identifiers and the [`Event`] type consumed by the event core.

use std::fmt;

use depot_core::Message;
use tokio::sync::mpsc;

/// Identifies one accepted connection for its whole lifetime.
///
/// Ids are never reused within a process, so a stale id simply refers to
/// nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Index of a registered node inside the event core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub usize);

/// Identifies a timer registered by a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

impl TimerId {
    /// Reserved id carried by one-shot wake-ups requested with
    /// [`NodeContext::wake`](crate::application::node::NodeContext::wake).
    pub const WAKE: TimerId = TimerId(0);
}

/// One unit of work for the event core.
#[derive(Debug)]
pub enum Event {
    /// A reader parsed a complete frame.
    MessageReceived {
        connection: ConnectionId,
        message: Message,
    },
    /// A connection was removed from the registry.
    Disconnected { connection: ConnectionId },
    /// A node's timer fired.
    Timer { node: NodeId, timer: TimerId },
    /// Stop the event core after the events already queued.
    Shutdown,
}

pub type EventSender = mpsc::UnboundedSender<Event>;
pub type EventReceiver = mpsc::UnboundedReceiver<Event>;

/// Creates the process-wide event queue.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
