//! Write-lock detection
//!
//! Before blobs are ingested into the object store the engine checks that
//! no other process is still writing them. Unix platforms ask `lsof` for
//! open handles under the directory; Windows samples file sizes twice with
//! a delay and treats growth as an active writer.

use anyhow::Result;
use rayon::prelude::*;
use snow_core::SnowError;
#[cfg(unix)]
use std::path::Path;
use std::path::PathBuf;
#[cfg(unix)]
use std::process::Command;
use std::time::Duration;

/// Sampling delay for the double-stat strategy
pub const STAT_SAMPLE_DELAY: Duration = Duration::from_millis(500);

/// An open file handle reported by the OS open-files utility
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle {
    pub pid: u32,
    pub process_name: String,
    /// Access mode character: `r`, `w`, `u`, `W`, ...
    pub lock_type: char,
    pub filepath: String,
}

impl FileHandle {
    /// Whether the handle can write to the file
    pub fn is_write_capable(&self) -> bool {
        matches!(self.lock_type, 'w' | 'W' | 'u')
    }
}

/// Parse `lsof -F pcan` field-prefixed records.
///
/// Each process record starts with a `p<pid>` line followed by `c<name>`;
/// file records repeat `a<mode>` / `n<path>` pairs under the current
/// process.
pub fn parse_lsof_records(output: &str) -> Vec<FileHandle> {
    let mut handles = Vec::new();
    let mut pid: u32 = 0;
    let mut process_name = String::new();
    let mut lock_type = ' ';

    for line in output.lines() {
        let Some(prefix) = line.chars().next() else {
            continue;
        };
        let value = &line[prefix.len_utf8()..];
        match prefix {
            'p' => {
                pid = value.parse().unwrap_or(0);
                process_name.clear();
            }
            'c' => process_name = value.to_string(),
            'a' => lock_type = value.chars().next().unwrap_or(' '),
            'n' => handles.push(FileHandle {
                pid,
                process_name: process_name.clone(),
                lock_type,
                filepath: value.to_string(),
            }),
            _ => {}
        }
    }
    handles
}

/// Ask `lsof` for open handles under `dir` and report write-capable ones
/// among the given absolute paths.
#[cfg(unix)]
pub fn lsof_write_handles(dir: &Path, abs_paths: &[PathBuf]) -> Result<Vec<SnowError>> {
    let output = match Command::new("lsof").args(["-F", "pcan", "+D"]).arg(dir).output() {
        Ok(output) => output,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            // No lsof on this system; nothing to scan with
            tracing::warn!("lsof not available, skipping write-lock scan");
            return Ok(Vec::new());
        }
        Err(e) => return Err(SnowError::io("lsof", e).into()),
    };

    // lsof exits 1 when it simply found nothing under the directory
    let stdout = String::from_utf8_lossy(&output.stdout);
    let handles = parse_lsof_records(&stdout);

    let dir_str = dir.to_string_lossy();
    let mut errors = Vec::new();
    for handle in handles {
        if !handle.filepath.starts_with(dir_str.as_ref()) {
            // Scoped invocation should not report outside paths; skip them
            tracing::warn!(path = %handle.filepath, "lsof reported a path outside the scanned dir");
            continue;
        }
        if !handle.is_write_capable() {
            continue;
        }
        if abs_paths.iter().any(|p| p.to_string_lossy() == handle.filepath) {
            errors.push(SnowError::FileWrittenByAnotherProcess {
                path: handle.filepath.clone(),
                process_name: Some(handle.process_name.clone()),
            });
        }
    }
    Ok(errors)
}

/// Stat every path, wait, stat again; a size change means an active writer.
///
/// The strategy of choice where no open-files utility exists (Windows).
pub fn double_stat_write_handles(abs_paths: &[PathBuf]) -> Result<Vec<SnowError>> {
    let sample = |paths: &[PathBuf]| -> Vec<Option<u64>> {
        paths
            .par_iter()
            .map(|p| std::fs::metadata(p).map(|m| m.len()).ok())
            .collect()
    };

    let before = sample(abs_paths);
    std::thread::sleep(STAT_SAMPLE_DELAY);
    let after = sample(abs_paths);

    let errors = abs_paths
        .iter()
        .zip(before.iter().zip(after.iter()))
        .filter(|(_, (b, a))| b != a)
        .map(|(path, _)| SnowError::FileWrittenByAnotherProcess {
            path: path.to_string_lossy().into_owned(),
            process_name: None,
        })
        .collect();
    Ok(errors)
}
