//! Append-only file log sink.

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    time::{LogEntry, LogLevel, LoggerSink},
};
use core_async::sync::Mutex;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Writes one rendered line per entry to a log file such as a replica's
/// `.dj-app/sync.log`.
///
/// Appends are serialized so concurrent tasks never interleave lines.
pub struct FileLoggerSink {
    path: PathBuf,
    min_level: LogLevel,
    write_lock: Mutex<()>,
}

impl FileLoggerSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            min_level: LogLevel::Info,
            write_lock: Mutex::new(()),
        }
    }

    pub fn with_min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl LoggerSink for FileLoggerSink {
    async fn log(&self, entry: LogEntry) -> Result<()> {
        if entry.level < self.min_level {
            return Ok(());
        }

        let mut line = entry.render_line();
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| {
                BridgeError::OperationFailed(format!("open {}: {}", self.path.display(), e))
            })?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    fn min_level(&self) -> LogLevel {
        self.min_level
    }
}
