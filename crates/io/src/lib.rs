//! Snow I/O - filesystem-aware I/O services for the snow engine
//!
//! This crate provides:
//! - Volume discovery and filesystem classification (APFS/ReFS/NTFS/FAT)
//! - Copy dispatch that prefers copy-on-write reflinks where the
//!   filesystem supports them
//! - Write-lock detection (is another process writing these files?)
//! - Moving files to the platform recycle bin via bundled helpers

pub mod context;
pub mod copy;
pub mod drives;
pub mod lock;
pub mod platform;
pub mod trash;

// Re-export main types for convenience
pub use context::IoContext;
pub use drives::{Drive, DriveMap, Filesystem};
pub use lock::FileHandle;
pub use trash::{put_to_trash, set_trash_exec_path};

/// Result type for snow-io operations
pub type Result<T> = anyhow::Result<T>;
