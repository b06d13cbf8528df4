//! Integration tests for connection teardown through a running server.
//!
//! A small recording node is mounted under the `RECORDER` target.  It answers
//! `PING` with an ACK and answers `DROP` by disconnecting the caller twice,
//! so the tests can check that nodes see exactly one `Disconnected` per
//! connection however many times teardown is requested.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use depot_client::infrastructure::network::{ack_fields, ClientConnection};
use depot_client::ClientError;
use depot_core::{Message, PermissionResolver};
use depot_server::application::events::ConnectionId;
use depot_server::application::node::{Node, NodeContext, NodeError};
use depot_server::infrastructure::network::ConnectionSettings;
use depot_server::infrastructure::storage::audit::TracingAuditSink;
use depot_server::infrastructure::storage::catalog::builtin_catalog;
use depot_server::runtime::{Assembly, Runtime};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const RECORDER: &str = "RECORDER";

#[derive(Clone, Default)]
struct Disconnects(Arc<Mutex<Vec<ConnectionId>>>);

impl Disconnects {
    fn snapshot(&self) -> Vec<ConnectionId> {
        self.0.lock().unwrap().clone()
    }
}

struct RecorderNode {
    seen: Disconnects,
}

impl Node for RecorderNode {
    fn name(&self) -> &str {
        RECORDER
    }

    fn on_message(&mut self, ctx: &mut NodeContext, connection: ConnectionId, message: &Message) -> Result<(), NodeError> {
        match message.kind() {
            "PING" => {
                ctx.ack(connection, message);
            }
            "DROP" => {
                ctx.disconnect(connection);
                ctx.disconnect(connection);
            }
            _ => {}
        }
        Ok(())
    }

    fn on_disconnect(&mut self, _ctx: &mut NodeContext, connection: ConnectionId) {
        self.seen.0.lock().unwrap().push(connection);
    }
}

async fn launch() -> (Runtime, SocketAddr, Disconnects) {
    let seen = Disconnects::default();
    let assembly = Assembly {
        permissions: PermissionResolver::new(builtin_catalog()),
        audit: Box::new(TracingAuditSink),
        nodes: vec![Box::new(RecorderNode { seen: seen.clone() })],
    };
    let runtime = Runtime::launch("127.0.0.1:0".parse().unwrap(), ConnectionSettings::default(), assembly)
        .await
        .expect("launch");
    let addr = runtime.local_addr();
    (runtime, addr, seen)
}

/// Polls `check` for up to two seconds.
async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

// ── Teardown tests ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_repeated_disconnect_notifies_nodes_once() {
    // Arrange
    let (runtime, addr, seen) = launch().await;
    let mut conn = ClientConnection::connect(addr).await.unwrap();

    // Act
    conn.send(&Message::new(RECORDER, "DROP")).await.unwrap();

    // Assert: the server closes the socket and the node hears about it once.
    assert!(matches!(conn.recv().await, Err(ClientError::Closed)));
    assert!(eventually(|| seen.snapshot().len() == 1).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(seen.snapshot().len(), 1);
    assert!(eventually(|| runtime.connections() == 0).await);

    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_client_close_is_reported_as_disconnect() {
    let (runtime, addr, seen) = launch().await;
    let mut conn = ClientConnection::connect(addr).await.unwrap();
    let reply = conn.request(&Message::new(RECORDER, "PING")).await.unwrap();
    ack_fields(&reply).unwrap();

    conn.close().await.unwrap();

    assert!(eventually(|| seen.snapshot().len() == 1).await);
    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_malformed_frame_closes_only_that_connection() {
    // Arrange
    let (runtime, addr, seen) = launch().await;
    let mut healthy = ClientConnection::connect(addr).await.unwrap();
    let mut broken = TcpStream::connect(addr).await.unwrap();
    assert!(eventually(|| runtime.connections() == 2).await);

    // Act: a length prefix far beyond the frame limit.
    broken.write_all(&u32::MAX.to_le_bytes()).await.unwrap();

    // Assert
    let mut buf = [0u8; 16];
    let read = tokio::time::timeout(Duration::from_secs(2), broken.read(&mut buf))
        .await
        .expect("server should close the broken connection");
    assert!(matches!(read, Ok(0) | Err(_)));
    assert!(eventually(|| seen.snapshot().len() == 1).await);

    let reply = healthy.request(&Message::new(RECORDER, "PING")).await.unwrap();
    assert!(ack_fields(&reply).is_ok());
    assert_eq!(runtime.connections(), 1);

    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_disconnects_everyone() {
    let (runtime, addr, seen) = launch().await;
    let mut a = ClientConnection::connect(addr).await.unwrap();
    let mut b = ClientConnection::connect(addr).await.unwrap();
    assert!(eventually(|| runtime.connections() == 2).await);

    runtime.shutdown().await.unwrap();

    assert!(matches!(a.recv().await, Err(ClientError::Closed)));
    assert!(matches!(b.recv().await, Err(ClientError::Closed)));
    assert_eq!(seen.snapshot().len(), 2);
}
