//! The [`Node`] trait and the [`NodeContext`] handed to every node callback.
//!
//! # What is a node? (for beginners)
//!
//! A node is a named, long-lived service such as `"ASSET_SVR"`.  Every node
//! sees every event; the provided [`Node::dispatch`] drops messages whose
//! `target` is not the node's name and forwards the rest to
//! [`Node::on_message`].
//!
//! Nodes are owned by the event core and only ever called from its single
//! thread.  That is why node state needs no locks: there is never a second
//! thread touching it.
//!
//! Everything a node may do to the outside world goes through
//! [`NodeContext`]: queue replies, tear a connection down, read or change
//! the caller's session, ask the permission resolver, write audit lines,
//! and register timers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use depot_core::protocol::{codes, nack, ProtocolError};
use depot_core::{Message, PermissionResolver};
use thiserror::Error;
use tracing::debug;

use crate::application::events::{ConnectionId, Event, EventSender, NodeId, TimerId};
use crate::application::ports::{AuditSink, Outbound, TimerScheduler};

// ── Errors ────────────────────────────────────────────────────────────────────

/// Failure of a node while handling one request.
///
/// Returned from node callbacks; the event core turns it into a `NACK`
/// for the request that caused it.  None of these close the connection.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Not logged in, or the user lacks the permission.
    #[error("authorization denied for {service}.{operation}")]
    AuthorizationDenied { service: String, operation: String },

    /// Handler-specific failure, reported to the caller as-is.
    #[error("{message}")]
    Application { code: i32, message: String },

    /// The request did not carry the fields its `(target, kind)` requires.
    #[error("bad request: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NodeError {
    pub fn application(code: i32, message: impl Into<String>) -> Self {
        NodeError::Application {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::application(codes::NOT_FOUND, format!("{what} not found"))
    }

    /// The NACK code reported to the caller.
    pub fn code(&self) -> i32 {
        match self {
            NodeError::AuthorizationDenied { .. } => codes::AUTHORIZATION_DENIED,
            NodeError::Application { code, .. } => *code,
            NodeError::Protocol(_) => codes::BAD_REQUEST,
            NodeError::Io(_) => codes::INTERNAL,
        }
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

/// Typed per-connection session state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub logged_in: bool,
    pub user_name: Option<String>,
    /// Name of the level the caller currently has open, if any.
    pub current_level: Option<String>,
}

impl Session {
    pub fn login(&mut self, user: &str) {
        self.logged_in = true;
        self.user_name = Some(user.to_string());
    }

    pub fn logout(&mut self) {
        *self = Session::default();
    }

    /// The logged-in user, if any.
    pub fn user(&self) -> Option<&str> {
        if self.logged_in {
            self.user_name.as_deref()
        } else {
            None
        }
    }
}

// ── Node trait ────────────────────────────────────────────────────────────────

/// A named logical service driven by the event core.
///
/// Implement only the callbacks you need; the rest default to no-ops.
pub trait Node: Send {
    /// The `target` string this node answers to.
    fn name(&self) -> &str;

    /// Called once on the event-core thread before the first event.
    fn on_start(&mut self, _ctx: &mut NodeContext) {}

    /// Entry point for every received message.
    ///
    /// The default drops messages addressed to other nodes.
    fn dispatch(&mut self, ctx: &mut NodeContext, connection: ConnectionId, message: &Message) -> Result<(), NodeError> {
        if message.target() != self.name() {
            return Ok(());
        }
        self.on_message(ctx, connection, message)
    }

    fn on_message(&mut self, _ctx: &mut NodeContext, _connection: ConnectionId, _message: &Message) -> Result<(), NodeError> {
        Ok(())
    }

    /// The connection is gone; release anything held for it.
    fn on_disconnect(&mut self, _ctx: &mut NodeContext, _connection: ConnectionId) {}

    fn on_timer(&mut self, _ctx: &mut NodeContext, _timer: TimerId) -> Result<(), NodeError> {
        Ok(())
    }
}

// ── Context ───────────────────────────────────────────────────────────────────

/// Collaborator hooks available to nodes.
///
/// Constructed once at startup and owned by the event core, which passes it
/// by `&mut` into every callback.
pub struct NodeContext {
    outbound: Arc<dyn Outbound>,
    timers: Arc<dyn TimerScheduler>,
    events: EventSender,
    sessions: HashMap<ConnectionId, Session>,
    permissions: PermissionResolver,
    audit: Box<dyn AuditSink>,
    current_node: NodeId,
}

impl NodeContext {
    pub fn new(
        outbound: Arc<dyn Outbound>,
        timers: Arc<dyn TimerScheduler>,
        events: EventSender,
        permissions: PermissionResolver,
        audit: Box<dyn AuditSink>,
    ) -> Self {
        Self {
            outbound,
            timers,
            events,
            sessions: HashMap::new(),
            permissions,
            audit,
            current_node: NodeId(0),
        }
    }

    // ── Messaging ───────────────────────────────────────────────────────────

    /// Queues `message` on the connection's outbound queue.
    pub fn send(&self, connection: ConnectionId, message: Message) -> bool {
        let queued = self.outbound.send(connection, message);
        if !queued {
            debug!("{connection}: dropped reply for departed connection");
        }
        queued
    }

    /// Queues a bare `ACK` reply to `request`.
    pub fn ack(&self, connection: ConnectionId, request: &Message) -> bool {
        self.send(connection, depot_core::protocol::ack(request))
    }

    pub fn nack(&self, connection: ConnectionId, request: &Message, code: i32, message: &str) -> bool {
        self.send(connection, nack(request, code, message))
    }

    /// Tears the connection down; the matching `Disconnected` event follows.
    pub fn disconnect(&self, connection: ConnectionId) {
        self.outbound.disconnect(connection);
    }

    // ── Sessions ────────────────────────────────────────────────────────────

    pub fn session(&self, connection: ConnectionId) -> Option<&Session> {
        self.sessions.get(&connection)
    }

    pub fn session_mut(&mut self, connection: ConnectionId) -> &mut Session {
        self.sessions.entry(connection).or_default()
    }

    pub(crate) fn open_session(&mut self, connection: ConnectionId) {
        self.sessions.entry(connection).or_default();
    }

    pub(crate) fn close_session(&mut self, connection: ConnectionId) -> Option<Session> {
        self.sessions.remove(&connection)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_connected(&self, connection: ConnectionId) -> bool {
        self.outbound.is_open(connection)
    }

    // ── Authorization ───────────────────────────────────────────────────────

    /// Logged in *and* allowed by the permission resolver.
    pub fn is_authorized(&self, connection: ConnectionId, service: &str, operation: &str) -> bool {
        self.session(connection)
            .and_then(Session::user)
            .is_some_and(|user| self.permissions.is_allowed(user, service, operation))
    }

    /// Like [`is_authorized`](Self::is_authorized), but audits and returns
    /// [`NodeError::AuthorizationDenied`] on refusal.
    pub fn authorize(&self, connection: ConnectionId, service: &str, operation: &str) -> Result<(), NodeError> {
        if self.is_authorized(connection, service, operation) {
            return Ok(());
        }
        let who = self
            .session(connection)
            .and_then(Session::user)
            .unwrap_or("<anonymous>");
        let peer = self
            .outbound
            .peer_addr(connection)
            .map(|a| a.to_string())
            .unwrap_or_else(|| "-".to_string());
        self.audit(&format!(
            "denied {service}.{operation} user={who} {connection} peer={peer}"
        ));
        Err(NodeError::AuthorizationDenied {
            service: service.to_string(),
            operation: operation.to_string(),
        })
    }

    pub fn permissions(&self) -> &PermissionResolver {
        &self.permissions
    }

    pub fn permissions_mut(&mut self) -> &mut PermissionResolver {
        &mut self.permissions
    }

    pub fn audit(&self, line: &str) {
        self.audit.log(line);
    }

    // ── Timers ──────────────────────────────────────────────────────────────

    /// Registers a recurring timer for the node currently being called.
    pub fn add_timer(&self, interval: Duration) -> TimerId {
        self.timers.schedule_interval(self.current_node, interval)
    }

    pub fn cancel_timer(&self, timer: TimerId) {
        self.timers.cancel(timer);
    }

    /// Queues a one-shot [`TimerId::WAKE`] for the current node behind the
    /// events already waiting.
    pub fn wake(&self) {
        let _ = self.events.send(Event::Timer {
            node: self.current_node,
            timer: TimerId::WAKE,
        });
    }

    pub fn current_node(&self) -> NodeId {
        self.current_node
    }

    pub(crate) fn set_current_node(&mut self, node: NodeId) {
        self.current_node = node;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
