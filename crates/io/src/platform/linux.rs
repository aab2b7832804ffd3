//! Linux I/O: /proc/mounts enumeration, FICLONE copies, lsof lock checks

use super::{CopyStrategy, PlatformIo};
use crate::copy::reflink_copy;
use crate::drives::{parse_proc_mounts, DriveMap};
use crate::lock::lsof_write_handles;
use anyhow::Result;
use snow_core::SnowError;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct LinuxIo;

impl PlatformIo for LinuxIo {
    fn enumerate_drives(&self) -> Result<DriveMap> {
        let content = std::fs::read_to_string("/proc/mounts")
            .map_err(|e| SnowError::io("/proc/mounts", e))?;
        Ok(parse_proc_mounts(&content))
    }

    fn copy_file(&self, src: &Path, dst: &Path, _strategy: CopyStrategy) -> Result<()> {
        // Linux filesystems classify as Other; the FICLONE attempt inside
        // reflink_copy covers btrfs/xfs and degrades everywhere else
        reflink_copy(src, dst)
    }

    fn find_write_handles(&self, dir: &Path, abs_paths: &[PathBuf]) -> Result<Vec<SnowError>> {
        lsof_write_handles(dir, abs_paths)
    }
}
