//! Snow core - content-addressed primitives for the snow engine
//!
//! This crate provides the foundational layer:
//! - SHA-256 chunked hashing for large files
//! - Tree representation (files, directories, per-file metadata)
//! - Forward-slash path normalization
//! - Glob-based ignore matching
//! - Typed error kinds shared by all snow crates

pub mod error;
pub mod hash;
pub mod ignore;
pub mod path;
pub mod tree;
pub mod util;

// Re-export main types for convenience
pub use error::SnowError;
pub use hash::{FileHash, HashBlock, Sha256Hash};
pub use ignore::IgnoreMatcher;
pub use tree::{FileInfo, TreeDir, TreeEntry, TreeFile};

/// Common result type used throughout the snow crates
pub type Result<T> = anyhow::Result<T>;
