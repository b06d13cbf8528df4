//! Network infrastructure.
//!
//! # Sub-modules
//!
//! - **`listener`**   – binds the TCP port and spawns two tasks per accepted
//!   connection.
//! - **`connection`** – frame reading/writing and the reader/writer loops.
//! - **`registry`**   – the live-connection table, outbound queues and the
//!   single idempotent teardown path.  Implements the `Outbound` port.
//! - **`timers`**     – interval timers that enqueue timer events.  Implements
//!   the `TimerScheduler` port.

pub mod connection;
pub mod listener;
pub mod registry;
pub mod timers;

pub use connection::{ConnectionSettings, TransportError};
pub use listener::{NetworkError, Server};
pub use registry::ConnectionRegistry;
pub use timers::TimerService;
