//! Composition root: builds the nodes from configuration and starts the
//! listener and the event core.
//!
//! ```text
//! Runtime::launch()
//!  ├─ ConnectionRegistry   (Outbound port)
//!  ├─ TimerService         (TimerScheduler port)
//!  ├─ EventCore            on the `depot-event-core` thread
//!  │    ├─ AuthNode        AUTH_SVR
//!  │    └─ AssetNode       ASSET_SVR
//!  └─ Server::run          accept loop (tokio task)
//! ```
//!
//! Shutdown order: stop accepting, tear down every connection (nodes see a
//! `Disconnected` for each), then stop the event core.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use depot_core::PermissionResolver;
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{info, warn};

use crate::application::assets::AssetNode;
use crate::application::auth::AuthNode;
use crate::application::event_core::{spawn_event_core, EventCore};
use crate::application::events::{event_channel, Event, EventSender};
use crate::application::node::{Node, NodeContext};
use crate::application::ports::AuditSink;
use crate::application::transfer::TransferSettings;
use crate::infrastructure::network::{ConnectionRegistry, ConnectionSettings, NetworkError, Server, TimerService};
use crate::infrastructure::storage::asset_directory::AssetDirectory;
use crate::infrastructure::storage::audit::{FileAuditSink, TracingAuditSink};
use crate::infrastructure::storage::catalog::{builtin_catalog, load_catalog, CatalogLoadError};
use crate::infrastructure::storage::checksum::{CachedChecksums, Sha256Checksum};
use crate::infrastructure::storage::config::{ConfigError, ServerConfig};
use crate::infrastructure::storage::users::{apply_grants, ConfiguredUsers};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Catalog(#[from] CatalogLoadError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot use {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not start the event core thread: {0}")]
    Thread(#[source] std::io::Error),

    #[error("the event core thread panicked")]
    CorePanicked,
}

/// Everything the event core needs, assembled before launch.
pub struct Assembly {
    pub permissions: PermissionResolver,
    pub audit: Box<dyn AuditSink>,
    pub nodes: Vec<Box<dyn Node>>,
}

impl Assembly {
    /// Builds the standard node set from configuration.
    ///
    /// # Errors
    ///
    /// Fails if the transfer settings are out of range, the catalog cannot be
    /// loaded, or the asset root or audit log cannot be opened.
    pub fn from_config(config: &ServerConfig) -> Result<Self, RuntimeError> {
        config.transfer.validate()?;
        let catalog = match &config.storage.catalog_path {
            Some(path) => load_catalog(path)?,
            None => builtin_catalog(),
        };
        let mut permissions = PermissionResolver::new(catalog);
        apply_grants(
            &mut permissions,
            &config.users,
            &config.user_overrides,
            &config.group_overrides,
        );

        let audit: Box<dyn AuditSink> = match &config.storage.audit_log {
            Some(path) => Box::new(FileAuditSink::open(path).map_err(|source| RuntimeError::Storage {
                path: path.clone(),
                source,
            })?),
            None => Box::new(TracingAuditSink),
        };

        let root = &config.storage.asset_root;
        let store = AssetDirectory::open(root).map_err(|source| RuntimeError::Storage {
            path: root.clone(),
            source,
        })?;
        let settings = TransferSettings {
            chunk_size: config.transfer.chunk_size,
            chunks_per_wake: config.transfer.chunks_per_wake,
        };

        let nodes: Vec<Box<dyn Node>> = vec![
            Box::new(AuthNode::new(ConfiguredUsers::from_entries(&config.users))),
            Box::new(AssetNode::new(store, CachedChecksums::new(Sha256Checksum), settings)),
        ];
        Ok(Self {
            permissions,
            audit,
            nodes,
        })
    }
}

/// Framing settings from the `[server]` section.
pub fn connection_settings(config: &ServerConfig) -> ConnectionSettings {
    ConnectionSettings {
        frame_format: config.server.frame_format,
        max_frame_bytes: config.server.max_frame_bytes,
    }
}

/// A running server.
pub struct Runtime {
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    events: EventSender,
    registry: ConnectionRegistry,
    accept: Option<tokio::task::JoinHandle<()>>,
    core: Option<std::thread::JoinHandle<()>>,
}

impl Runtime {
    /// Binds `bind` and starts serving.  Must be called from within a tokio
    /// runtime; timers are spawned on it.
    pub async fn launch(bind: SocketAddr, settings: ConnectionSettings, assembly: Assembly) -> Result<Self, RuntimeError> {
        let (events, receiver) = event_channel();
        let registry = ConnectionRegistry::new(events.clone());
        let server = Server::bind(bind, registry.clone(), settings).await?;
        let local_addr = server.local_addr()?;

        let timers = Arc::new(TimerService::new(Handle::current(), events.clone()));
        let context = NodeContext::new(
            Arc::new(registry.clone()),
            timers,
            events.clone(),
            assembly.permissions,
            assembly.audit,
        );
        let mut core = EventCore::new(context);
        for node in assembly.nodes {
            core.register(node);
        }
        let core = spawn_event_core(core, receiver).map_err(RuntimeError::Thread)?;

        let running = Arc::new(AtomicBool::new(true));
        let accept = tokio::spawn(server.run(Arc::clone(&running)));
        info!("depot server ready on {local_addr}");

        Ok(Self {
            local_addr,
            running,
            events,
            registry,
            accept: Some(accept),
            core: Some(core),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of live connections.
    pub fn connections(&self) -> usize {
        self.registry.len()
    }

    /// Stops accepting, closes every connection and stops the event core.
    pub async fn shutdown(mut self) -> Result<(), RuntimeError> {
        self.running.store(false, Ordering::Relaxed);
        if let Some(accept) = self.accept.take() {
            if let Err(e) = accept.await {
                warn!("accept loop ended abnormally: {e}");
            }
        }
        // the accept loop already closed its connections; this covers an
        // aborted loop
        self.registry.close_all();
        let _ = self.events.send(Event::Shutdown);

        if let Some(core) = self.core.take() {
            let joined = tokio::task::spawn_blocking(move || core.join())
                .await
                .map_err(|_| RuntimeError::CorePanicked)?;
            joined.map_err(|_| RuntimeError::CorePanicked)?;
        }
        info!("depot server stopped");
        Ok(())
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if self.core.is_some() {
            self.running.store(false, Ordering::Relaxed);
            self.registry.close_all();
            let _ = self.events.send(Event::Shutdown);
        }
    }
}
