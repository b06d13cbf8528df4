//! The API key file.
//!
//! The key is stored as a single line of text.  Surrounding whitespace
//! (including the trailing newline editors add) is ignored on load.

use std::path::{Path, PathBuf};

use crate::error::ClientError;

const API_KEY_FILE: &str = "api_key";

/// Returns the default API key location:
///
/// | Platform | Path                                                   |
/// |----------|--------------------------------------------------------|
/// | Windows  | `%APPDATA%\Depot\api_key`                              |
/// | Linux    | `$XDG_CONFIG_HOME/depot/api_key` or `~/.config/depot/` |
/// | macOS    | `~/Library/Application Support/Depot/api_key`          |
pub fn default_api_key_path() -> Option<PathBuf> {
    platform_config_dir().map(|dir| dir.join(API_KEY_FILE))
}

/// Reads the key stored at `path`.
///
/// # Errors
///
/// [`ClientError::Credentials`] when the file cannot be read or holds only
/// whitespace.
pub fn load_api_key(path: &Path) -> Result<String, ClientError> {
    let text = std::fs::read_to_string(path).map_err(|e| ClientError::Credentials {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let key = text.trim();
    if key.is_empty() {
        return Err(ClientError::Credentials {
            path: path.to_path_buf(),
            reason: "file is empty".to_string(),
        });
    }
    Ok(key.to_string())
}

/// Writes `key` to `path`, creating parent directories.  On Unix the file
/// is made readable by its owner only.
pub fn save_api_key(path: &Path, key: &str) -> Result<(), ClientError> {
    let fail = |e: std::io::Error| ClientError::Credentials {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(fail)?;
    }
    std::fs::write(path, format!("{}\n", key.trim())).map_err(fail)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).map_err(fail)?;
    }
    Ok(())
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("Depot"))
    }

    #[cfg(target_os = "linux")]
    {
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

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("depot_key_{}", Uuid::new_v4()))
            .join(API_KEY_FILE)
    }

    #[test]
    fn test_save_then_load_trims() {
        let path = temp_path();
        save_api_key(&path, "  k-123 ").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "k-123\n");
        assert_eq!(load_api_key(&path).unwrap(), "k-123");
        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_missing_file_is_credentials_error() {
        let path = temp_path();
        assert!(matches!(load_api_key(&path), Err(ClientError::Credentials { .. })));
    }

    #[test]
    fn test_blank_file_is_rejected() {
        let path = temp_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "\n  \n").unwrap();
        assert!(matches!(load_api_key(&path), Err(ClientError::Credentials { .. })));
        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[cfg(unix)]
    #[test]
    fn test_saved_key_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let path = temp_path();
        save_api_key(&path, "secret").unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_default_path_ends_with_file_name() {
        if let Some(path) = default_api_key_path() {
            assert!(path.ends_with("depot/api_key"));
        }
    }
}
