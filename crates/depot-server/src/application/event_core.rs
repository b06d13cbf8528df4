//! The event core: one thread that serializes every event into the nodes.
//!
//! # Why a single thread? (for beginners)
//!
//! Readers on many connections produce events concurrently, but node state
//! (open transfers, caches, sessions) is only ever touched here, one event
//! at a time.  Handlers therefore need no locks, and two messages from one
//! connection are always handled in the order they arrived.
//!
//! ```text
//! reader tasks ──┐
//! timer tasks  ──┼──► event queue ──► EventCore (depot-event-core thread)
//! registry     ──┘                       └─► every Node, in registration order
//! ```
//!
//! A node that panics or returns an error is logged and skipped; the loop
//! and the other nodes keep running.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::JoinHandle;

use depot_core::protocol::nack;
use depot_core::Message;
use tracing::{debug, error, info, warn};

use crate::application::events::{ConnectionId, Event, EventReceiver, NodeId, TimerId};
use crate::application::node::{Node, NodeContext, NodeError};

/// Name of the OS thread running [`EventCore::run`].
pub const EVENT_CORE_THREAD: &str = "depot-event-core";

pub struct EventCore {
    nodes: Vec<Box<dyn Node>>,
    context: NodeContext,
    started: bool,
}

impl EventCore {
    pub fn new(context: NodeContext) -> Self {
        Self {
            nodes: Vec::new(),
            context,
            started: false,
        }
    }

    /// Adds a node.  Nodes receive events in registration order.
    pub fn register(&mut self, node: Box<dyn Node>) -> NodeId {
        let id = NodeId(self.nodes.len());
        info!("registered node {} as {:?}", node.name(), id);
        self.nodes.push(node);
        id
    }

    pub fn context(&self) -> &NodeContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut NodeContext {
        &mut self.context
    }

    /// Runs every node's `on_start` once.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        for (index, node) in self.nodes.iter_mut().enumerate() {
            self.context.set_current_node(NodeId(index));
            let name = node.name().to_string();
            let outcome = catch_unwind(AssertUnwindSafe(|| node.on_start(&mut self.context)));
            if outcome.is_err() {
                error!("node {name} panicked in on_start");
            }
        }
    }

    /// Handles one event.  Returns `false` once [`Event::Shutdown`] arrives.
    pub fn process(&mut self, event: Event) -> bool {
        match event {
            Event::MessageReceived {
                connection,
                message,
            } => self.deliver_message(connection, &message),
            Event::Disconnected { connection } => self.deliver_disconnect(connection),
            Event::Timer { node, timer } => self.deliver_timer(node, timer),
            Event::Shutdown => {
                info!("event core shutting down");
                return false;
            }
        }
        true
    }

    /// Blocks on `events` until shutdown or until every sender is gone.
    pub fn run(mut self, mut events: EventReceiver) {
        self.start();
        while let Some(event) = events.blocking_recv() {
            if !self.process(event) {
                break;
            }
        }
        debug!("event core stopped");
    }

    fn deliver_message(&mut self, connection: ConnectionId, message: &Message) {
        if !self.context.is_connected(connection) {
            debug!(
                "{connection}: dropping {}.{} from departed connection",
                message.target(),
                message.kind()
            );
            return;
        }
        self.context.open_session(connection);

        for (index, node) in self.nodes.iter_mut().enumerate() {
            self.context.set_current_node(NodeId(index));
            let name = node.name().to_string();
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                node.dispatch(&mut self.context, connection, message)
            }));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => report_failure(&self.context, &name, connection, message, &e),
                Err(_) => error!(
                    "node {name} panicked handling {}.{} from {connection}",
                    message.target(),
                    message.kind()
                ),
            }
        }
    }

    fn deliver_disconnect(&mut self, connection: ConnectionId) {
        for (index, node) in self.nodes.iter_mut().enumerate() {
            self.context.set_current_node(NodeId(index));
            let name = node.name().to_string();
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                node.on_disconnect(&mut self.context, connection)
            }));
            if outcome.is_err() {
                error!("node {name} panicked releasing {connection}");
            }
        }
        self.context.close_session(connection);
        debug!("{connection}: session released");
    }

    fn deliver_timer(&mut self, id: NodeId, timer: TimerId) {
        let Some(node) = self.nodes.get_mut(id.0) else {
            warn!("timer {timer:?} for unknown node {id:?}");
            return;
        };
        self.context.set_current_node(id);
        let name = node.name().to_string();
        let outcome = catch_unwind(AssertUnwindSafe(|| node.on_timer(&mut self.context, timer)));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("node {name} timer {timer:?} failed: {e}"),
            Err(_) => error!("node {name} panicked in timer {timer:?}"),
        }
    }
}

/// Logs a node failure and answers the request with a `NACK`.
fn report_failure(ctx: &NodeContext, node: &str, connection: ConnectionId, request: &Message, err: &NodeError) {
    warn!(
        "node {node} failed {}.{} from {connection}: {err}",
        request.target(),
        request.kind()
    );
    ctx.send(connection, nack(request, err.code(), &err.to_string()));
}

/// Moves `core` onto its own OS thread and starts the loop.
///
/// # Errors
///
/// Returns the OS error if the thread cannot be spawned.
pub fn spawn_event_core(core: EventCore, events: EventReceiver) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name(EVENT_CORE_THREAD.to_string())
        .spawn(move || core.run(events))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::events::event_channel;
    use crate::application::node::tests::{ManualTimers, QuietAudit, RecordingOutbound};
    use crate::application::ports::Outbound;
    use depot_core::protocol::{codes, read_reply};
    use depot_core::{Catalog, PermissionResolver};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Records every callback into a shared log.
    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Node for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn on_start(&mut self, ctx: &mut NodeContext) {
            ctx.add_timer(Duration::from_secs(1));
            self.log.lock().unwrap().push(format!("{}:start", self.name));
        }

        fn on_message(&mut self, _ctx: &mut NodeContext, connection: ConnectionId, message: &Message) -> Result<(), NodeError> {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:{}:{}", self.name, connection.0, message.kind()));
            match message.kind() {
                "BOOM" => panic!("boom"),
                "FAIL" => Err(NodeError::application(409, "level locked")),
                "SHORT" => {
                    message.fields().read_i32()?;
                    Ok(())
                }
                _ => Ok(()),
            }
        }

        fn on_disconnect(&mut self, _ctx: &mut NodeContext, connection: ConnectionId) {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:gone:{}", self.name, connection.0));
        }

        fn on_timer(&mut self, _ctx: &mut NodeContext, timer: TimerId) -> Result<(), NodeError> {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:timer:{}", self.name, timer.0));
            Ok(())
        }
    }

    struct Fixture {
        core: EventCore,
        outbound: Arc<RecordingOutbound>,
        timers: Arc<ManualTimers>,
        log: Arc<Mutex<Vec<String>>>,
    }

    fn fixture() -> Fixture {
        let outbound = Arc::new(RecordingOutbound::default());
        let timers = Arc::new(ManualTimers::default());
        let (tx, _rx) = event_channel();
        let ctx = NodeContext::new(
            outbound.clone(),
            timers.clone(),
            tx,
            PermissionResolver::new(Catalog::new()),
            Box::new(QuietAudit),
        );
        let mut core = EventCore::new(ctx);
        let log = Arc::new(Mutex::new(Vec::new()));
        core.register(Box::new(Recorder {
            name: "A",
            log: log.clone(),
        }));
        core.register(Box::new(Recorder {
            name: "B",
            log: log.clone(),
        }));
        Fixture {
            core,
            outbound,
            timers,
            log,
        }
    }

    fn message(conn: u64, target: &str, kind: &str) -> Event {
        Event::MessageReceived {
            connection: ConnectionId(conn),
            message: Message::new(target, kind),
        }
    }

    #[test]
    fn test_start_runs_each_node_once_with_its_own_id() {
        let mut f = fixture();
        f.core.start();
        f.core.start();
        assert_eq!(*f.log.lock().unwrap(), vec!["A:start", "B:start"]);
        let scheduled = f.timers.scheduled.lock().unwrap();
        assert_eq!(scheduled[0].0, NodeId(0));
        assert_eq!(scheduled[1].0, NodeId(1));
    }

    #[test]
    fn test_message_reaches_only_matching_node() {
        let mut f = fixture();
        assert!(f.core.process(message(1, "B", "PING")));
        assert_eq!(*f.log.lock().unwrap(), vec!["B:1:PING"]);
        assert!(f.core.context().session(ConnectionId(1)).is_some());
    }

    #[test]
    fn test_panicking_node_does_not_stop_the_loop() {
        let mut f = fixture();
        f.core.process(message(1, "A", "BOOM"));
        f.core.process(message(1, "A", "NEXT"));
        assert_eq!(*f.log.lock().unwrap(), vec!["A:1:BOOM", "A:1:NEXT"]);
    }

    #[test]
    fn test_node_error_becomes_nack_with_its_code() {
        let mut f = fixture();
        f.core.process(message(3, "A", "FAIL"));

        let sent = f.outbound.take();
        assert_eq!(sent.len(), 1);
        let nack = read_reply(&sent[0].1).unwrap().unwrap_err();
        assert_eq!(nack.code, 409);
        assert_eq!(nack.message, "level locked");
    }

    #[test]
    fn test_field_overrun_is_bad_request_not_fatal() {
        let mut f = fixture();
        f.core.process(message(3, "A", "SHORT"));
        let sent = f.outbound.take();
        assert_eq!(read_reply(&sent[0].1).unwrap().unwrap_err().code, codes::BAD_REQUEST);
        assert!(f.outbound.closed.lock().unwrap().is_empty());
    }

    #[test]
    fn test_disconnect_notifies_all_nodes_and_drops_session() {
        let mut f = fixture();
        f.core.process(message(5, "A", "HELLO"));
        f.core.process(Event::Disconnected {
            connection: ConnectionId(5),
        });
        let log = f.log.lock().unwrap();
        assert!(log.contains(&"A:gone:5".to_string()));
        assert!(log.contains(&"B:gone:5".to_string()));
        assert!(f.core.context().session(ConnectionId(5)).is_none());
    }

    #[test]
    fn test_messages_from_departed_connection_are_dropped() {
        let mut f = fixture();
        f.outbound.disconnect(ConnectionId(9));
        f.core.process(message(9, "A", "LATE"));
        assert!(f.log.lock().unwrap().is_empty());
        assert_eq!(f.core.context().session_count(), 0);
    }

    #[test]
    fn test_timer_goes_to_owning_node_only() {
        let mut f = fixture();
        f.core.process(Event::Timer {
            node: NodeId(1),
            timer: TimerId(4),
        });
        f.core.process(Event::Timer {
            node: NodeId(42),
            timer: TimerId(4),
        });
        assert_eq!(*f.log.lock().unwrap(), vec!["B:timer:4"]);
    }

    #[test]
    fn test_shutdown_stops_processing() {
        let mut f = fixture();
        assert!(!f.core.process(Event::Shutdown));
    }

    #[test]
    fn test_run_on_thread_exits_on_shutdown() {
        let f = fixture();
        let (tx, rx) = event_channel();
        let handle = spawn_event_core(f.core, rx).unwrap();
        tx.send(message(1, "A", "X")).unwrap();
        tx.send(Event::Shutdown).unwrap();
        handle.join().unwrap();
        assert!(f.log.lock().unwrap().contains(&"A:1:X".to_string()));
    }
}
