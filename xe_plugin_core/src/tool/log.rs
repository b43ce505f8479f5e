use crate::error::Result;
use chrono::{DateTime, Utc};
use std::fmt::Display;
use std::panic::Location;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Append-only log file for a single operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationLog {
    path: PathBuf,
}

impl OperationLog {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    /// `<dir>/plugin-YYYYmmddHHMMSS.log`
    pub fn for_start(dir: &Path, started_at: DateTime<Utc>) -> Self {
        Self::new(dir.join(format!(
            "plugin-{}.log",
            started_at.format("%Y%m%d%H%M%S")
        )))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn open_append(&self) -> Result<File> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        Ok(file)
    }

    pub async fn append(&self, line: &str) -> Result<()> {
        let mut file = self.open_append().await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(())
    }

    /// Best effort: a log that cannot be written must not hide `error`.
    pub async fn record_failure(
        &self,
        error: &dyn Display,
        location: &Location<'_>,
        at: DateTime<Utc>,
    ) {
        let line = format!(
            "{} [file: {}, line: {}] at {}",
            error,
            location.file(),
            location.line(),
            at.to_rfc3339()
        );
        if let Err(e) = self.append(&line).await {
            warn!(log = %self.path.display(), "Failed to record failure in operation log: {}", e);
        }
    }
}
