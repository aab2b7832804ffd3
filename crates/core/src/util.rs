//! Small filesystem helpers shared across the snow crates

use anyhow::Result;
use std::fs::Metadata;
use std::io::Write;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in Unix milliseconds
pub fn current_timestamp_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(not(unix))]
fn system_time_ms(t: std::io::Result<SystemTime>) -> i64 {
    t.ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Extract (atime, mtime, ctime) in Unix milliseconds from file metadata.
///
/// On Unix the ctime is the inode change time; elsewhere the creation time
/// stands in for it.
#[cfg(unix)]
pub fn fs_times_ms(meta: &Metadata) -> (i64, i64, i64) {
    use std::os::unix::fs::MetadataExt;
    let atime = meta.atime() * 1000 + meta.atime_nsec() / 1_000_000;
    let mtime = meta.mtime() * 1000 + meta.mtime_nsec() / 1_000_000;
    let ctime = meta.ctime() * 1000 + meta.ctime_nsec() / 1_000_000;
    (atime, mtime, ctime)
}

#[cfg(not(unix))]
pub fn fs_times_ms(meta: &Metadata) -> (i64, i64, i64) {
    (
        system_time_ms(meta.accessed()),
        system_time_ms(meta.modified()),
        system_time_ms(meta.created()),
    )
}

/// Atomic write helper.
///
/// Writes data to a temporary file, fsyncs it, then renames it to the
/// target path, fsyncing the parent directory afterwards.
pub fn atomic_write(tmp_dir: &Path, target: &Path, data: &[u8]) -> Result<()> {
    std::fs::create_dir_all(tmp_dir)?;

    let temp_path = tmp_dir.join(uuid::Uuid::new_v4().to_string());
    let mut temp_file = std::fs::File::create(&temp_path)?;
    temp_file.write_all(data)?;
    temp_file.sync_all()?;
    drop(temp_file);

    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::rename(&temp_path, target)?;

    if let Some(parent) = target.parent() {
        if let Ok(dir) = std::fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }

    Ok(())
}
