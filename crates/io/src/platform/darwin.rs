//! macOS I/O: mount/diskutil enumeration, APFS clone copies, lsof lock checks

use super::{CopyStrategy, PlatformIo};
use crate::copy::{clone_via_cp, reflink_copy, SMALL_COPY_THRESHOLD};
use crate::drives::{
    parse_bsd_mount_output, parse_diskutil_field, Drive, DriveMap, Filesystem,
    MACOS_SYSTEM_PREFIX,
};
use crate::lock::lsof_write_handles;
use anyhow::Result;
use snow_core::SnowError;
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Debug)]
pub struct DarwinIo;

impl PlatformIo for DarwinIo {
    fn enumerate_drives(&self) -> Result<DriveMap> {
        let output = Command::new("mount")
            .output()
            .map_err(|e| SnowError::io("mount", e))?;
        let stdout = String::from_utf8_lossy(&output.stdout);

        let mut map = DriveMap::default();
        for (device, mountpoint) in parse_bsd_mount_output(&stdout) {
            if mountpoint.starts_with(MACOS_SYSTEM_PREFIX) {
                continue;
            }
            map.insert(mountpoint, classify_device(&device));
        }
        Ok(map)
    }

    fn copy_file(&self, src: &Path, dst: &Path, strategy: CopyStrategy) -> Result<()> {
        if strategy.same_drive && strategy.filesystem == Filesystem::Apfs {
            let size = std::fs::metadata(src)
                .map_err(|e| SnowError::io(src.to_string_lossy(), e))?
                .len();
            // Small files: a plain copy beats the clone tool's spawn cost
            if size < SMALL_COPY_THRESHOLD {
                std::fs::copy(src, dst).map_err(|e| SnowError::io(src.to_string_lossy(), e))?;
                return Ok(());
            }
            return clone_via_cp(src, dst);
        }
        reflink_copy(src, dst)
    }

    fn find_write_handles(&self, dir: &Path, abs_paths: &[PathBuf]) -> Result<Vec<SnowError>> {
        lsof_write_handles(dir, abs_paths)
    }
}

/// Ask diskutil about a device and classify APFS media
fn classify_device(device: &str) -> Drive {
    let info = Command::new("diskutil")
        .args(["info", device])
        .output()
        .ok()
        .map(|o| String::from_utf8_lossy(&o.stdout).into_owned())
        .unwrap_or_default();

    let description = parse_diskutil_field(&info, "Device / Media Name").unwrap_or("");
    let filesystem = if description == "AppleAPFSMedia" {
        Filesystem::Apfs
    } else {
        Filesystem::Other
    };

    let display_name = parse_diskutil_field(&info, "Volume Name")
        .filter(|name| !name.is_empty())
        .unwrap_or(device)
        .to_string();

    Drive {
        display_name,
        filesystem,
    }
}
