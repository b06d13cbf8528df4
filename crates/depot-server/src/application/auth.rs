//! `AUTH_SVR`: login, logout and the effective-permission listing.
//!
//! | kind          | request fields                  | reply                                  |
//! |---------------|---------------------------------|----------------------------------------|
//! | `LOGIN`       | `user:string password:string`   | `ACK(user)` / `NACK 403`               |
//! | `LOGIN_KEY`   | `api_key:string`                | `ACK(user)` / `NACK 403`               |
//! | `LOGOUT`      |                                 | `ACK`                                  |
//! | `PERMISSIONS` |                                 | `ACK(count, {svc, op, attr, source}*)` |
//!
//! Logging in only flips the caller's [`Session`](crate::application::node::Session);
//! every other node reads it through `NodeContext::authorize`.

use depot_core::protocol::services::{auth, AUTH};
use depot_core::protocol::{ack, codes};
use depot_core::Message;
use tracing::info;

use crate::application::events::ConnectionId;
use crate::application::node::{Node, NodeContext, NodeError};

/// Credential checks backing `LOGIN` and `LOGIN_KEY`.
#[cfg_attr(test, mockall::automock)]
pub trait UserDirectory: Send {
    fn verify_password(&self, user: &str, password: &str) -> bool;

    /// The user an API key belongs to.
    fn user_for_api_key(&self, api_key: &str) -> Option<String>;
}

pub struct AuthNode<D> {
    users: D,
}

impl<D: UserDirectory> AuthNode<D> {
    pub fn new(users: D) -> Self {
        Self { users }
    }

    fn logged_in(ctx: &mut NodeContext, connection: ConnectionId, request: &Message, user: &str) {
        ctx.session_mut(connection).login(user);
        info!("{connection}: logged in as {user}");
        let mut reply = ack(request);
        reply.push_str(user);
        ctx.send(connection, reply);
    }

    /// A failed login also ends any earlier login on the connection.
    fn rejected(ctx: &mut NodeContext, connection: ConnectionId, what: &str) -> NodeError {
        ctx.session_mut(connection).logout();
        ctx.audit(&format!("login failed {what} {connection}"));
        NodeError::application(codes::INVALID_CREDENTIALS, "invalid credentials")
    }

    fn permissions(ctx: &NodeContext, connection: ConnectionId, request: &Message) -> Result<(), NodeError> {
        let user = ctx
            .session(connection)
            .and_then(|s| s.user())
            .ok_or_else(|| NodeError::AuthorizationDenied {
                service: AUTH.to_string(),
                operation: auth::PERMISSIONS.to_string(),
            })?;
        let rows = ctx.permissions().effective_permissions(user);

        let mut reply = ack(request);
        reply.push_i32(rows.len() as i32);
        for row in &rows {
            reply
                .push_str(&row.service)
                .push_str(&row.operation)
                .push_str(row.attribute.as_str())
                .push_str(row.source.as_str());
        }
        ctx.send(connection, reply);
        Ok(())
    }
}

impl<D: UserDirectory> Node for AuthNode<D> {
    fn name(&self) -> &str {
        AUTH
    }

    fn on_message(&mut self, ctx: &mut NodeContext, connection: ConnectionId, message: &Message) -> Result<(), NodeError> {
        match message.kind() {
            auth::LOGIN => {
                let mut fields = message.fields();
                let user = fields.read_string()?;
                let password = fields.read_string()?;
                if !self.users.verify_password(&user, &password) {
                    return Err(Self::rejected(ctx, connection, &format!("user={user}")));
                }
                Self::logged_in(ctx, connection, message, &user);
                Ok(())
            }
            auth::LOGIN_KEY => {
                let key = message.fields().read_string()?;
                let Some(user) = self.users.user_for_api_key(&key) else {
                    return Err(Self::rejected(ctx, connection, "api_key"));
                };
                Self::logged_in(ctx, connection, message, &user);
                Ok(())
            }
            auth::LOGOUT => {
                ctx.session_mut(connection).logout();
                ctx.ack(connection, message);
                Ok(())
            }
            auth::PERMISSIONS => Self::permissions(ctx, connection, message),
            other => Err(NodeError::application(
                codes::BAD_REQUEST,
                format!("unknown {AUTH} operation {other}"),
            )),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
