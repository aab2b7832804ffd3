//! Append-only operations log
//!
//! One line per repository mutation (`commit`, `checkout`), kept next to
//! the object store for post-mortems. Purely informational; nothing reads
//! it back during normal operation.

use anyhow::Result;
use snow_core::util::current_timestamp_ms;
use snow_core::SnowError;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct OpLog {
    path: PathBuf,
}

impl OpLog {
    /// Create the log file if it does not exist yet
    pub fn init(commondir: &Path) -> Result<Self> {
        let log = Self::open(commondir);
        if !log.path.exists() {
            std::fs::write(&log.path, b"")
                .map_err(|e| SnowError::io(log.path.to_string_lossy(), e))?;
        }
        Ok(log)
    }

    pub fn open(commondir: &Path) -> Self {
        Self {
            path: commondir.join("log"),
        }
    }

    /// Append one entry: `<timestamp-ms> <op> <detail>`
    pub fn append(&self, op: &str, detail: &str) -> Result<()> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| SnowError::io(self.path.to_string_lossy(), e))?;
        writeln!(file, "{} {} {}", current_timestamp_ms(), op, detail)
            .map_err(|e| SnowError::io(self.path.to_string_lossy(), e))?;
        Ok(())
    }

    /// All entries, oldest first
    pub fn read_entries(&self) -> Result<Vec<String>> {
        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| SnowError::io(self.path.to_string_lossy(), e))?;
        Ok(content.lines().map(|l| l.to_string()).collect())
    }
}
