//! A logged-in (or not yet logged-in) connection to a depot server.

use std::net::SocketAddr;
use std::path::Path;

use depot_core::protocol::services::{asset, auth, ASSET, AUTH};
use depot_core::protocol::stream::DEFAULT_CHUNK_SIZE;
use depot_core::{FieldReader, Message, ProtocolError};
use tracing::info;

use crate::application::transfer::{run_download, run_upload, DownloadOutcome, UploadRequest};
use crate::error::ClientError;
use crate::infrastructure::credentials::{default_api_key_path, load_api_key};
use crate::infrastructure::network::{ack_fields, ClientConnection, ClientSettings};

/// One row of the effective permission table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionRow {
    pub service: String,
    pub operation: String,
    /// `allow`, `deny` or `default`.
    pub attribute: String,
    /// Where the decision came from: `user`, `group` or `default`.
    pub source: String,
}

/// One asset as listed by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAsset {
    pub name: String,
    pub size: u64,
    pub checksum: String,
}

pub struct Session {
    conn: ClientConnection,
    user: Option<String>,
    chunk_size: u32,
}

impl Session {
    pub async fn connect(addr: SocketAddr) -> Result<Self, ClientError> {
        Self::connect_with(addr, ClientSettings::default()).await
    }

    pub async fn connect_with(addr: SocketAddr, settings: ClientSettings) -> Result<Self, ClientError> {
        Ok(Self::over(ClientConnection::connect_with(addr, settings).await?))
    }

    /// Wraps an existing connection.
    pub fn over(conn: ClientConnection) -> Self {
        Self {
            conn,
            user: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Sets the chunk size used for uploads.
    pub fn with_chunk_size(mut self, chunk_size: u32) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn connection_mut(&mut self) -> &mut ClientConnection {
        &mut self.conn
    }

    async fn call(&mut self, request: Message) -> Result<Message, ClientError> {
        self.conn.discard_pending()?;
        self.conn.request(&request).await
    }

    // ── Authentication ────────────────────────────────────────────────────────

    /// Logs in with a user name and password; returns the user name the
    /// server confirmed.
    pub async fn login(&mut self, user: &str, password: &str) -> Result<String, ClientError> {
        let request = Message::new(AUTH, auth::LOGIN).with_str(user).with_str(password);
        self.finish_login(request).await
    }

    pub async fn login_with_api_key(&mut self, api_key: &str) -> Result<String, ClientError> {
        let request = Message::new(AUTH, auth::LOGIN_KEY).with_str(api_key);
        self.finish_login(request).await
    }

    /// Logs in with the key stored at `path`, or at the default location.
    pub async fn login_with_api_key_file(&mut self, path: Option<&Path>) -> Result<String, ClientError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => default_api_key_path().ok_or_else(|| ClientError::Credentials {
                path: "api_key".into(),
                reason: "no platform config directory".to_string(),
            })?,
        };
        let key = load_api_key(&path)?;
        self.login_with_api_key(&key).await
    }

    async fn finish_login(&mut self, request: Message) -> Result<String, ClientError> {
        let reply = self.call(request).await?;
        let user = ack_fields(&reply)?.read_string()?;
        info!("logged in as {user}");
        self.user = Some(user.clone());
        Ok(user)
    }

    pub async fn logout(&mut self) -> Result<(), ClientError> {
        let reply = self.call(Message::new(AUTH, auth::LOGOUT)).await?;
        ack_fields(&reply)?;
        self.user = None;
        Ok(())
    }

    /// The logged-in user's effective permissions.
    pub async fn permissions(&mut self) -> Result<Vec<PermissionRow>, ClientError> {
        let reply = self.call(Message::new(AUTH, auth::PERMISSIONS)).await?;
        let mut fields = ack_fields(&reply)?;
        let count = read_count(&mut fields)?;
        let mut rows = Vec::with_capacity(count);
        for _ in 0..count {
            rows.push(PermissionRow {
                service: fields.read_string()?,
                operation: fields.read_string()?,
                attribute: fields.read_string()?,
                source: fields.read_string()?,
            });
        }
        Ok(rows)
    }

    // ── Assets ────────────────────────────────────────────────────────────────

    pub async fn list(&mut self) -> Result<Vec<RemoteAsset>, ClientError> {
        let reply = self.call(Message::new(ASSET, asset::LIST)).await?;
        let mut fields = ack_fields(&reply)?;
        let count = read_count(&mut fields)?;
        let mut assets = Vec::with_capacity(count);
        for _ in 0..count {
            let name = fields.read_string()?;
            let size = fields.read_i64()?;
            let checksum = fields.read_string()?;
            assets.push(RemoteAsset {
                name,
                size: u64::try_from(size)
                    .map_err(|_| ProtocolError::MalformedFrame(format!("negative asset size {size}")))?,
                checksum,
            });
        }
        Ok(assets)
    }

    /// Downloads `name` to `destination`.
    ///
    /// Pass the checksum of the copy already at `destination` to skip the
    /// transfer when it is still current.
    pub async fn download(
        &mut self,
        name: &str,
        destination: &Path,
        known_checksum: Option<&str>,
    ) -> Result<DownloadOutcome, ClientError> {
        self.conn.discard_pending()?;
        let outcome = run_download(&mut self.conn, ASSET, asset::DOWNLOAD, name, destination, known_checksum).await?;
        info!("download {name}: {outcome:?}");
        Ok(outcome)
    }

    /// Uploads `source` as `name`; returns the bytes sent.
    pub async fn upload(&mut self, source: &Path, name: &str, metadata: Option<&[u8]>) -> Result<u64, ClientError> {
        self.conn.discard_pending()?;
        let request = UploadRequest {
            name,
            source,
            metadata,
            chunk_size: self.chunk_size,
        };
        let sent = run_upload(&mut self.conn, ASSET, asset::UPLOAD, request).await?;
        info!("uploaded {name} ({sent} bytes)");
        Ok(sent)
    }

    /// Closes the connection.
    pub async fn close(self) -> Result<(), ClientError> {
        self.conn.close().await
    }
}

fn read_count(fields: &mut FieldReader<'_>) -> Result<usize, ClientError> {
    let count = fields.read_i32()?;
    usize::try_from(count)
        .map_err(|_| ProtocolError::MalformedFrame(format!("negative row count {count}")).into())
}
