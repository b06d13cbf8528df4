//! TOML configuration for the depot server.
//!
//! The file is read once at startup.  Without `--config` the server looks in
//! the platform-appropriate location:
//! - Windows:  `%APPDATA%\Depot\server.toml`
//! - Linux:    `~/.config/depot/server.toml`
//! - macOS:    `~/Library/Application Support/Depot/server.toml`
//!
//! # Example
//!
//! ```toml
//! [server]
//! bind_address = "0.0.0.0"
//! port = 9888
//!
//! [storage]
//! asset_root = "/srv/depot/assets"
//! catalog_path = "/etc/depot/catalog.toml"
//!
//! [[users]]
//! name = "alice"
//! password_sha256 = "2bd806c97f0e00af1a1fc3328fa763a9269723c8db8fac4f93af71db186d6e90"
//! groups = ["artists"]
//!
//! [[group_overrides]]
//! subject = "artists"
//! service = "ASSET_SVR"
//! operation = "UPLOAD"
//! attribute = "allow"
//! ```
//!
//! # Serde default values
//!
//! Every field carries `#[serde(default = "...")]` (or `#[serde(default)]`),
//! so a missing file, a missing section, and a missing key all fall back
//! to the values below.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use depot_core::{Attribute, FrameFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid bind address {0:?}")]
    InvalidBindAddress(String),

    /// TRANSFER frames carry the chunk size as a positive `i32`.
    #[error("transfer chunk_size {0} is out of range (expected 1..={})", i32::MAX)]
    InvalidChunkSize(u32),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level server configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub transfer: TransferSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub users: Vec<UserEntry>,
    #[serde(default)]
    pub user_overrides: Vec<OverrideEntry>,
    #[serde(default)]
    pub group_overrides: Vec<OverrideEntry>,
}

/// Listener and logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    /// IP address to bind to.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// `tracing` log level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Frames declaring a larger payload are rejected before allocation.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    #[serde(default)]
    pub frame_format: FrameFormat,
}

/// Chunking of server-side transfers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransferSection {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u32,
    /// DATA frames one download may send per event-core turn.
    #[serde(default = "default_chunks_per_wake")]
    pub chunks_per_wake: usize,
}

impl TransferSection {
    /// Checks that `chunk_size` fits a TRANSFER frame.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidChunkSize`] for 0 or anything above
    /// `i32::MAX`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 || i32::try_from(self.chunk_size).is_err() {
            return Err(ConfigError::InvalidChunkSize(self.chunk_size));
        }
        Ok(())
    }
}

/// Where assets, the permission catalog and the audit log live.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageSection {
    #[serde(default = "default_asset_root")]
    pub asset_root: PathBuf,
    /// Without a catalog file the built-in catalog is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_path: Option<PathBuf>,
    /// Without an audit file audit lines go to the `audit` tracing target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_log: Option<PathBuf>,
}

/// A user account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserEntry {
    pub name: String,
    /// Lowercase hex SHA-256 of the password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default)]
    pub groups: Vec<String>,
}

/// One explicit allow/deny for a user or group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OverrideEntry {
    /// User or group name.
    pub subject: String,
    pub service: String,
    pub operation: String,
    pub attribute: Attribute,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    9888
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_frame_bytes() -> usize {
    depot_core::protocol::DEFAULT_MAX_FRAME_BYTES
}
fn default_chunk_size() -> u32 {
    depot_core::protocol::stream::DEFAULT_CHUNK_SIZE
}
fn default_chunks_per_wake() -> usize {
    16
}
fn default_asset_root() -> PathBuf {
    PathBuf::from("assets")
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            log_level: default_log_level(),
            max_frame_bytes: default_max_frame_bytes(),
            frame_format: FrameFormat::default(),
        }
    }
}

impl Default for TransferSection {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunks_per_wake: default_chunks_per_wake(),
        }
    }
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            asset_root: default_asset_root(),
            catalog_path: None,
            audit_log: None,
        }
    }
}

impl ServerConfig {
    /// The socket address the listener binds.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBindAddress`] if `bind_address` is not
    /// an IP address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self
            .server
            .bind_address
            .parse()
            .map_err(|_| ConfigError::InvalidBindAddress(self.server.bind_address.clone()))?;
        Ok(SocketAddr::new(ip, self.server.port))
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Resolves the default config file location.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    Ok(platform_config_dir()
        .ok_or(ConfigError::NoPlatformConfigDir)?
        .join("server.toml"))
}

/// Loads [`ServerConfig`] from `path`, returning the defaults if the file
/// does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// [`ConfigError::Parse`] if the TOML is malformed and
/// [`ConfigError::InvalidChunkSize`] for an unusable `[transfer]` section.
pub fn load_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let config: ServerConfig = toml::from_str(&content)?;
            config.transfer.validate()?;
            Ok(config)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ServerConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Writes `config` to `path`, creating the parent directory if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(config: &ServerConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolves the platform config directory including the `Depot` subdirectory.
pub(crate) fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        // %APPDATA% e.g. C:\Users\<user>\AppData\Roaming
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("Depot"))
    }

    #[cfg(target_os = "linux")]
    {
        // XDG_CONFIG_HOME or ~/.config
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("depot"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("Depot")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_default_config_listens_on_9888() {
        // Arrange / Act
        let cfg = ServerConfig::default();

        // Assert
        assert_eq!(cfg.server.port, 9888);
        assert_eq!(cfg.server.bind_address, "0.0.0.0");
        assert_eq!(cfg.server.log_level, "info");
        assert_eq!(cfg.server.frame_format, FrameFormat::Plain);
        assert_eq!(cfg.transfer.chunk_size, 65_536);
        assert_eq!(cfg.transfer.chunks_per_wake, 16);
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let cfg: ServerConfig = toml::from_str("").expect("deserialize empty");
        assert_eq!(cfg, ServerConfig::default());
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let toml_str = r#"
[server]
port = 7000
frame_format = "sequenced"
"#;
        let cfg: ServerConfig = toml::from_str(toml_str).expect("deserialize partial");
        assert_eq!(cfg.server.port, 7000);
        assert_eq!(cfg.server.frame_format, FrameFormat::Sequenced);
        assert_eq!(cfg.server.bind_address, "0.0.0.0");
        assert_eq!(cfg.transfer.chunks_per_wake, 16);
    }

    #[test]
    fn test_users_and_overrides_parse() {
        // Arrange
        let toml_str = r#"
[[users]]
name = "alice"
password_sha256 = "abc"
groups = ["artists", "leads"]

[[users]]
name = "ci"
api_key = "k-123"

[[user_overrides]]
subject = "ci"
service = "ASSET_SVR"
operation = "UPLOAD"
attribute = "deny"
"#;

        // Act
        let cfg: ServerConfig = toml::from_str(toml_str).expect("deserialize users");

        // Assert
        assert_eq!(cfg.users.len(), 2);
        assert_eq!(cfg.users[0].groups, vec!["artists", "leads"]);
        assert_eq!(cfg.users[1].api_key.as_deref(), Some("k-123"));
        assert!(cfg.users[1].groups.is_empty());
        assert_eq!(cfg.user_overrides[0].attribute, Attribute::Deny);
        assert!(cfg.group_overrides.is_empty());
    }

    #[test]
    fn test_unknown_attribute_is_parse_error() {
        let toml_str = r#"
[[group_overrides]]
subject = "g"
service = "S"
operation = "O"
attribute = "maybe"
"#;
        assert!(toml::from_str::<ServerConfig>(toml_str).is_err());
    }

    #[test]
    fn test_socket_addr_combines_address_and_port() {
        let mut cfg = ServerConfig::default();
        cfg.server.bind_address = "127.0.0.1".to_string();
        cfg.server.port = 1234;
        assert_eq!(cfg.socket_addr().unwrap(), "127.0.0.1:1234".parse().unwrap());

        cfg.server.bind_address = "not-an-ip".to_string();
        assert!(matches!(
            cfg.socket_addr(),
            Err(ConfigError::InvalidBindAddress(_))
        ));
    }

    #[test]
    fn test_load_config_returns_default_when_file_absent() {
        let path = std::env::temp_dir()
            .join(format!("depot_missing_{}", Uuid::new_v4()))
            .join("server.toml");
        assert_eq!(load_config(&path).unwrap(), ServerConfig::default());
    }

    #[test]
    fn test_save_and_load_config_round_trip_via_temp_dir() {
        // Arrange
        let dir = std::env::temp_dir().join(format!("depot_test_{}", Uuid::new_v4()));
        let path = dir.join("nested").join("server.toml");
        let mut cfg = ServerConfig::default();
        cfg.server.port = 12345;
        cfg.storage.audit_log = Some(PathBuf::from("/var/log/depot/audit.log"));
        cfg.users.push(UserEntry {
            name: "bob".to_string(),
            password_sha256: None,
            api_key: Some("secret".to_string()),
            groups: vec!["qa".to_string()],
        });

        // Act
        save_config(&cfg, &path).unwrap();
        let loaded = load_config(&path).unwrap();

        // Assert
        assert_eq!(loaded, cfg);

        // Cleanup
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let dir = std::env::temp_dir().join(format!("depot_test_{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("server.toml");
        std::fs::write(&path, "[[[ not valid toml").unwrap();

        assert!(matches!(load_config(&path), Err(ConfigError::Parse(_))));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_out_of_range_chunk_size_is_rejected() {
        let dir = std::env::temp_dir().join(format!("depot_test_{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("server.toml");

        std::fs::write(&path, "[transfer]\nchunk_size = 0\n").unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::InvalidChunkSize(0))));

        std::fs::write(&path, "[transfer]\nchunk_size = 2147483648\n").unwrap();
        assert!(matches!(
            load_config(&path),
            Err(ConfigError::InvalidChunkSize(2_147_483_648))
        ));

        std::fs::write(&path, "[transfer]\nchunk_size = 2147483647\n").unwrap();
        assert_eq!(load_config(&path).unwrap().transfer.chunk_size, 2_147_483_647);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_default_config_path_ends_with_server_toml() {
        // NoPlatformConfigDir is acceptable in a stripped environment
        if let Ok(path) = default_config_path() {
            assert!(path.ends_with("server.toml"), "got {path:?}");
        }
    }
}
