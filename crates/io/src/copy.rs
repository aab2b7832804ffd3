//! Copy primitives: reflink-first copying with portable fallback
//!
//! On copy-on-write filesystems a reflink makes the destination alias the
//! source's blocks until either side is written, so copying a multi-gigabyte
//! blob into the object store is near-instant. Every primitive here degrades
//! to a plain byte copy when the kernel or filesystem refuses the clone.

use anyhow::{Context, Result};
use snow_core::SnowError;
use std::path::Path;
use std::process::Command;

/// Files below this size are copied plainly even where a clone tool
/// exists: the per-call overhead of the tool exceeds the copy cost
/// (observed on APFS)
pub const SMALL_COPY_THRESHOLD: u64 = 1_000_000;

/// Copy `src` to `dst`, attempting a reflink first.
///
/// On Linux this issues the `FICLONE` ioctl and falls back to a byte copy
/// when the filesystem rejects it (EOPNOTSUPP/EXDEV). On other platforms
/// the plain copy is the portable stand-in.
pub fn reflink_copy(src: &Path, dst: &Path) -> Result<()> {
    #[cfg(target_os = "linux")]
    {
        match try_ficlone(src, dst) {
            Ok(true) => return Ok(()),
            Ok(false) => {
                tracing::debug!(
                    src = %src.display(),
                    "filesystem refused reflink, falling back to byte copy"
                );
            }
            Err(e) => return Err(SnowError::io(src.to_string_lossy(), e).into()),
        }
    }

    std::fs::copy(src, dst)
        .map_err(|e| SnowError::io(src.to_string_lossy(), e))
        .with_context(|| format!("failed to copy {} -> {}", src.display(), dst.display()))?;
    Ok(())
}

/// Attempt a `FICLONE` clone; `Ok(false)` means the filesystem cannot
/// reflink and the caller should fall back
#[cfg(target_os = "linux")]
fn try_ficlone(src: &Path, dst: &Path) -> std::io::Result<bool> {
    use std::os::fd::AsRawFd;

    // Linux UAPI: #define FICLONE _IOW(0x94, 9, int)
    const FICLONE: libc::c_ulong = 0x40049409;

    let src_file = std::fs::File::open(src)?;
    let dst_file = std::fs::File::create(dst)?;

    let rc = unsafe { libc::ioctl(dst_file.as_raw_fd(), FICLONE, src_file.as_raw_fd()) };
    if rc == 0 {
        return Ok(true);
    }

    let err = std::io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::EOPNOTSUPP) | Some(libc::EXDEV) | Some(libc::EINVAL) => {
            // Leave no truncated destination behind before the fallback copy
            drop(dst_file);
            let _ = std::fs::remove_file(dst);
            Ok(false)
        }
        _ => Err(err),
    }
}

/// Clone via the platform copy tool with reflink support (`cp -c` on APFS)
pub fn clone_via_cp(src: &Path, dst: &Path) -> Result<()> {
    let output = Command::new("cp")
        .arg("-c")
        .arg(src)
        .arg(dst)
        .output()
        .map_err(|e| SnowError::io("cp", e))?;
    check_helper_status("cp -c", &output)
}

/// Clone via the bundled ReFS block-clone PowerShell script
pub fn clone_via_powershell(script: &Path, src: &Path, dst: &Path) -> Result<()> {
    let output = Command::new("powershell.exe")
        .args(["-NoProfile", "-ExecutionPolicy", "Bypass", "-File"])
        .arg(script)
        .arg(src)
        .arg(dst)
        .output()
        .map_err(|e| SnowError::io(script.to_string_lossy(), e))?;
    check_helper_status("Clone-FileViaBlockClone.ps1", &output)
}

/// Turn a non-zero helper exit into the typed error kind
pub fn check_helper_status(helper: &str, output: &std::process::Output) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    tracing::warn!(helper, stderr = %stderr, "helper exited non-zero");
    Err(SnowError::HelperExitNonZero {
        code: output.status.code().unwrap_or(-1),
        stderr: (!stderr.is_empty()).then_some(stderr),
    }
    .into())
}
