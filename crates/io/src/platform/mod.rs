//! Platform-specific I/O implementations
//!
//! Provides a unified interface (PlatformIo trait) with implementations
//! for macOS, Linux and Windows. The implementation is selected once at
//! context construction, not per call.

#[cfg(target_os = "macos")]
pub mod darwin;

#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(target_os = "windows")]
pub mod windows;

use crate::drives::{DriveMap, Filesystem};
use anyhow::Result;
use snow_core::SnowError;
use std::path::{Path, PathBuf};

#[cfg(target_os = "macos")]
pub use darwin::DarwinIo;

#[cfg(target_os = "linux")]
pub use linux::LinuxIo;

#[cfg(target_os = "windows")]
pub use windows::WindowsIo;

/// Copy dispatch inputs computed by the I/O context
#[derive(Debug, Clone, Copy)]
pub struct CopyStrategy {
    /// Both endpoints resolve to the same volume
    pub same_drive: bool,
    /// Filesystem of the destination volume
    pub filesystem: Filesystem,
}

/// Platform-specific I/O services
pub trait PlatformIo: Send + Sync + std::fmt::Debug {
    /// Enumerate mounted volumes and classify their filesystems
    fn enumerate_drives(&self) -> Result<DriveMap>;

    /// Copy a file using the cheapest strategy the volume supports
    fn copy_file(&self, src: &Path, dst: &Path, strategy: CopyStrategy) -> Result<()>;

    /// Report files among `abs_paths` currently held by another writer.
    ///
    /// `dir` scopes the scan; returned errors are
    /// [`SnowError::FileWrittenByAnotherProcess`] values, one per file.
    fn find_write_handles(&self, dir: &Path, abs_paths: &[PathBuf]) -> Result<Vec<SnowError>>;
}

/// Create the I/O implementation for the current platform
#[cfg(target_os = "macos")]
pub fn create_platform_io() -> Result<Box<dyn PlatformIo>> {
    Ok(Box::new(DarwinIo))
}

#[cfg(target_os = "linux")]
pub fn create_platform_io() -> Result<Box<dyn PlatformIo>> {
    Ok(Box::new(LinuxIo))
}

#[cfg(target_os = "windows")]
pub fn create_platform_io() -> Result<Box<dyn PlatformIo>> {
    Ok(Box::new(WindowsIo))
}

#[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
pub fn create_platform_io() -> Result<Box<dyn PlatformIo>> {
    Err(SnowError::UnsupportedPlatform(std::env::consts::OS.to_string()).into())
}
