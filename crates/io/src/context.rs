//! The I/O context: volume map plus platform-selected copy and lock logic
//!
//! One context is shared by every file-mutating step of a high-level
//! operation. It is read-only after `init()`.

use crate::drives::{Drive, DriveMap, Filesystem};
use crate::platform::{create_platform_io, CopyStrategy, PlatformIo};
use ahash::AHashMap;
use anyhow::Result;
use snow_core::path::normalize;
use snow_core::SnowError;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct IoContext {
    mountpoints: Vec<String>,
    drives: AHashMap<String, Drive>,
    platform: Box<dyn PlatformIo>,
}

impl IoContext {
    /// Discover mounted volumes and select the platform implementation
    pub fn init() -> Result<Self> {
        let platform = create_platform_io()?;
        let map = platform.enumerate_drives()?;
        tracing::debug!(volumes = map.mountpoints.len(), "io context initialized");
        Ok(Self::assemble(map, platform))
    }

    /// Build a context over a fixed drive map (tests, dry runs)
    pub fn with_drive_map(map: DriveMap) -> Result<Self> {
        let platform = create_platform_io()?;
        Ok(Self::assemble(map, platform))
    }

    fn assemble(map: DriveMap, platform: Box<dyn PlatformIo>) -> Self {
        let mountpoints = map
            .mountpoints
            .iter()
            .map(|m| normalize(m))
            .collect();
        let drives = map
            .drives
            .into_iter()
            .map(|(mount, drive)| (normalize(&mount), drive))
            .collect();
        Self {
            mountpoints,
            drives,
            platform,
        }
    }

    pub fn mountpoints(&self) -> &[String] {
        &self.mountpoints
    }

    pub fn drives(&self) -> &AHashMap<String, Drive> {
        &self.drives
    }

    /// Drive of the deepest mountpoint containing the path
    pub fn drive_for_path(&self, path: &Path) -> Option<&Drive> {
        let p = normalize(&path.to_string_lossy());
        self.mountpoints
            .iter()
            .filter(|m| mount_contains(m, &p))
            .max_by_key(|m| m.len())
            .and_then(|m| self.drives.get(m))
    }

    /// Coarse same-volume heuristic: both paths sit under the same number
    /// of known mountpoints.
    ///
    /// Two paths under the same deepest mountpoint agree; so do two paths
    /// under no known mountpoint at all, which this heuristic cannot tell
    /// apart from a genuine match.
    pub fn are_files_on_same_drive(&self, a: &Path, b: &Path) -> bool {
        self.mount_count(a) == self.mount_count(b)
    }

    fn mount_count(&self, path: &Path) -> usize {
        let p = normalize(&path.to_string_lossy());
        self.mountpoints
            .iter()
            .filter(|m| mount_contains(m, &p))
            .count()
    }

    /// Copy a file using the best strategy the destination volume supports
    pub fn copy_file(&self, src: &Path, dst: &Path) -> Result<()> {
        let strategy = CopyStrategy {
            same_drive: self.are_files_on_same_drive(src, dst),
            filesystem: self
                .drive_for_path(dst)
                .or_else(|| self.drive_for_path(src))
                .map(|d| d.filesystem)
                .unwrap_or(Filesystem::Other),
        };
        self.platform.copy_file(src, dst, strategy)
    }

    /// Pre-flight check that none of the given files is being written by
    /// another process.
    ///
    /// Per-file findings aggregate into one
    /// [`SnowError::WriteLockViolation`].
    pub fn perform_write_lock_checks(&self, dir: &Path, rel_paths: &[String]) -> Result<()> {
        if rel_paths.is_empty() {
            return Ok(());
        }
        let abs_paths: Vec<PathBuf> = rel_paths.iter().map(|p| dir.join(p)).collect();
        let errors = self.platform.find_write_handles(dir, &abs_paths)?;
        if errors.is_empty() {
            Ok(())
        } else {
            Err(SnowError::WriteLockViolation { errors }.into())
        }
    }
}

/// True when `path` equals the mountpoint or lives below it
fn mount_contains(mount: &str, path: &str) -> bool {
    if path == mount {
        return true;
    }
    if mount.ends_with('/') {
        // Bare roots ("/", "C:/") keep their separator after normalization
        path.starts_with(mount)
    } else {
        path.len() > mount.len() && path.starts_with(mount) && path.as_bytes()[mount.len()] == b'/'
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_map() -> DriveMap {
        let mut map = DriveMap::default();
        map.insert(
            "/".to_string(),
            Drive {
                display_name: "root".to_string(),
                filesystem: Filesystem::Other,
            },
        );
        map.insert(
            "/mnt/assets".to_string(),
            Drive {
                display_name: "assets".to_string(),
                filesystem: Filesystem::Other,
            },
        );
        map
    }

    #[test]
    fn test_mount_contains() {
        assert!(mount_contains("/", "/anything"));
        assert!(mount_contains("/mnt/assets", "/mnt/assets"));
        assert!(mount_contains("/mnt/assets", "/mnt/assets/a/b"));
        assert!(!mount_contains("/mnt/assets", "/mnt/assets2/a"));
        assert!(!mount_contains("/mnt/assets", "/mnt"));
    }

    #[test]
    fn test_drive_for_path_picks_deepest() {
        let ctx = IoContext::with_drive_map(test_map()).unwrap();
        assert_eq!(
            ctx.drive_for_path(Path::new("/mnt/assets/f.bin"))
                .unwrap()
                .display_name,
            "assets"
        );
        assert_eq!(
            ctx.drive_for_path(Path::new("/home/u/f.bin")).unwrap().display_name,
            "root"
        );
    }

    #[test]
    fn test_same_drive_heuristic() {
        let ctx = IoContext::with_drive_map(test_map()).unwrap();

        // Same deepest mountpoint
        assert!(ctx.are_files_on_same_drive(
            Path::new("/mnt/assets/a.bin"),
            Path::new("/mnt/assets/deep/b.bin"),
        ));

        // Different volumes: one sits under an extra mountpoint
        assert!(!ctx.are_files_on_same_drive(
            Path::new("/mnt/assets/a.bin"),
            Path::new("/home/u/b.bin"),
        ));

        // Known limitation: two unmapped paths count as same drive
        assert!(ctx.are_files_on_same_drive(
            Path::new("C:/one.bin"),
            Path::new("D:/two.bin"),
        ));
    }

    #[test]
    fn test_copy_file_roundtrip() {
        let ctx = IoContext::init().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin");
        let dst = dir.path().join("dst.bin");
        std::fs::write(&src, b"payload").unwrap();

        ctx.copy_file(&src, &dst).unwrap();
        assert_eq!(std::fs::read(&dst).unwrap(), b"payload");
    }

    #[test]
    fn test_write_lock_check_on_quiet_dir() {
        #[cfg(unix)]
        if std::process::Command::new("lsof").arg("-v").output().is_err() {
            // Environment without lsof; nothing to exercise here
            return;
        }

        let ctx = IoContext::init().unwrap();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.bin"), b"quiet").unwrap();

        ctx.perform_write_lock_checks(dir.path(), &["f.bin".to_string()])
            .unwrap();
    }
}
