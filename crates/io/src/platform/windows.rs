//! Windows I/O: fsutil enumeration, ReFS block clones, double-stat lock checks

use super::{CopyStrategy, PlatformIo};
use crate::copy::{clone_via_powershell, reflink_copy, SMALL_COPY_THRESHOLD};
use crate::drives::{parse_fsutil_volume_info, Drive, DriveMap, Filesystem};
use crate::lock::double_stat_write_handles;
use crate::trash::find_bundled_resource;
use anyhow::Result;
use snow_core::SnowError;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Bundled ReFS block-clone script
const BLOCK_CLONE_SCRIPT: &str = "Clone-FileViaBlockClone.ps1";

#[derive(Debug)]
pub struct WindowsIo;

impl PlatformIo for WindowsIo {
    fn enumerate_drives(&self) -> Result<DriveMap> {
        let mut map = DriveMap::default();
        for letter in b'A'..=b'Z' {
            let letter = letter as char;
            let root = format!("{}:\\", letter);
            if std::fs::metadata(&root).is_err() {
                continue;
            }
            let output = match Command::new("fsutil")
                .args(["fsinfo", "volumeinfo", &format!("{}:", letter)])
                .output()
            {
                Ok(o) if o.status.success() => o,
                // Card readers and empty optical drives fail the query
                _ => continue,
            };
            let stdout = String::from_utf8_lossy(&output.stdout);
            let (volume_name, filesystem) = parse_fsutil_volume_info(&stdout);
            map.insert(
                format!("{}:/", letter),
                Drive {
                    display_name: volume_name.unwrap_or_else(|| format!("{}:", letter)),
                    filesystem,
                },
            );
        }
        Ok(map)
    }

    fn copy_file(&self, src: &Path, dst: &Path, strategy: CopyStrategy) -> Result<()> {
        if strategy.same_drive && strategy.filesystem == Filesystem::ReFs {
            let size = std::fs::metadata(src)
                .map_err(|e| SnowError::io(src.to_string_lossy(), e))?
                .len();
            if size >= SMALL_COPY_THRESHOLD {
                match find_bundled_resource(BLOCK_CLONE_SCRIPT) {
                    Ok(script) => return clone_via_powershell(&script, src, dst),
                    Err(e) => {
                        tracing::warn!(error = %e, "block-clone script missing, copying instead");
                    }
                }
            }
        }
        reflink_copy(src, dst)
    }

    fn find_write_handles(&self, _dir: &Path, abs_paths: &[PathBuf]) -> Result<Vec<SnowError>> {
        double_stat_write_handles(abs_paths)
    }
}
