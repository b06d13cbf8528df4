//! Audit sinks: where "denied" and "failed login" lines end up.
//!
//! Audit lines are not diagnostics, so they are kept apart from ordinary
//! logging: either on their own `audit` tracing target, or appended to a
//! dedicated file.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

use crate::application::ports::AuditSink;

/// Emits each line as an `info` event on the `audit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn log(&self, line: &str) {
        info!(target: "audit", "{line}");
    }
}

/// Appends `"<unix seconds> <line>"` to a file.
#[derive(Debug)]
pub struct FileAuditSink {
    file: File,
}

impl FileAuditSink {
    /// Opens (or creates) `path` for appending, creating parent directories.
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file })
    }
}

impl AuditSink for FileAuditSink {
    fn log(&self, line: &str) {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        // `&File` implements `Write`, so no `&mut self` is needed
        let mut file = &self.file;
        if let Err(e) = writeln!(file, "{secs} {line}") {
            warn!("audit write failed: {e}; line was: {line}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_file_sink_appends_timestamped_lines() {
        // Arrange
        let dir = std::env::temp_dir().join(format!("depot_audit_{}", Uuid::new_v4()));
        let path = dir.join("logs").join("audit.log");
        let sink = FileAuditSink::open(&path).unwrap();

        // Act
        sink.log("denied ASSET_SVR.UPLOAD user=bob");
        sink.log("login failed user=eve");
        drop(sink);
        let reopened = FileAuditSink::open(&path).unwrap();
        reopened.log("third");

        // Assert
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with(" denied ASSET_SVR.UPLOAD user=bob"));
        let (secs, _) = lines[1].split_once(' ').unwrap();
        assert!(secs.parse::<u64>().unwrap() > 0);
        assert!(lines[2].ends_with(" third"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_tracing_sink_does_not_panic_without_subscriber() {
        TracingAuditSink.log("anything");
    }
}
