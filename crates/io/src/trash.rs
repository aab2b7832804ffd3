//! Move files to the platform recycle bin
//!
//! macOS and Windows use a bundled helper executable; Linux goes through
//! `gio trash`. The helper path can be overridden once per process for
//! callers that relocate the resources directory.

use anyhow::Result;
use parking_lot::Mutex;
use snow_core::SnowError;
use std::path::{Path, PathBuf};
use std::process::Command;

static TRASH_EXEC_OVERRIDE: Mutex<Option<PathBuf>> = Mutex::new(None);

/// Override the trash helper executable, process-wide.
///
/// One-shot: a second call fails. Prefer threading paths through
/// construction; this exists for callers that cannot.
pub fn set_trash_exec_path(path: PathBuf) -> Result<()> {
    let mut guard = TRASH_EXEC_OVERRIDE.lock();
    if guard.is_some() {
        anyhow::bail!("trash helper override already set");
    }
    *guard = Some(path);
    Ok(())
}

/// Locate a bundled helper resource.
///
/// Search order: `<executable-dir>/resources/<name>`, then the crate's
/// own `resources/<name>`.
pub fn find_bundled_resource(name: &str) -> Result<PathBuf> {
    let mut candidates = Vec::new();
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            candidates.push(dir.join("resources").join(name));
        }
    }
    candidates.push(
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("resources")
            .join(name),
    );

    for candidate in candidates {
        if candidate.exists() {
            return Ok(candidate);
        }
    }
    Err(SnowError::HelperNotFound(name.to_string()).into())
}

#[cfg(target_os = "macos")]
const TRASH_HELPER: &str = "trash";

#[cfg(target_os = "windows")]
const TRASH_HELPER: &str = "recycle-bin.exe";

/// Move a file to the recycle bin.
///
/// Fails when the file does not exist, when no helper can be located, or
/// when the helper exits non-zero.
pub fn put_to_trash(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(SnowError::io(
            path.to_string_lossy(),
            std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        )
        .into());
    }

    let mut cmd = trash_command(path)?;
    let helper = cmd.get_program().to_string_lossy().into_owned();
    let output = match cmd.output() {
        Ok(output) => output,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(SnowError::HelperNotFound(helper).into());
        }
        Err(e) => return Err(SnowError::io(path.to_string_lossy(), e).into()),
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(SnowError::HelperExitNonZero {
            code: output.status.code().unwrap_or(-1),
            stderr: (!stderr.is_empty()).then_some(stderr),
        }
        .into());
    }
    tracing::debug!(path = %path.display(), "moved to trash");
    Ok(())
}

#[cfg(any(target_os = "macos", target_os = "windows"))]
fn trash_command(path: &Path) -> Result<Command> {
    let helper = match TRASH_EXEC_OVERRIDE.lock().clone() {
        Some(overridden) => overridden,
        None => find_bundled_resource(TRASH_HELPER)?,
    };
    let mut cmd = Command::new(helper);
    cmd.arg(path);
    Ok(cmd)
}

#[cfg(target_os = "linux")]
fn trash_command(path: &Path) -> Result<Command> {
    // No bundled helper on Linux; gio ships with glib and talks to the
    // freedesktop trash. The override still wins when set.
    let mut cmd = match TRASH_EXEC_OVERRIDE.lock().clone() {
        Some(overridden) => {
            if !overridden.exists() {
                return Err(
                    SnowError::HelperNotFound(overridden.to_string_lossy().into_owned()).into(),
                );
            }
            Command::new(overridden)
        }
        None => {
            let mut gio = Command::new("gio");
            gio.arg("trash");
            gio
        }
    };
    cmd.arg(path);
    Ok(cmd)
}

#[cfg(not(any(target_os = "macos", target_os = "windows", target_os = "linux")))]
fn trash_command(_path: &Path) -> Result<Command> {
    Err(SnowError::UnsupportedPlatform(std::env::consts::OS.to_string()).into())
}
