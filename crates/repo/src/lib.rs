//! Snow repo - the repository state machine of the snow engine
//!
//! This crate provides:
//! - The commit graph, references and HEAD
//! - The index (add/delete intents, blob ingestion)
//! - The object store contract plus its filesystem implementation
//! - Checkout (working-tree reconciliation) and status

pub mod commit;
pub mod index;
pub mod odb;
pub mod oplog;
pub mod reference;
pub mod repository;
pub mod status;

// Re-export main types for convenience
pub use commit::Commit;
pub use index::Index;
pub use odb::{FsObjectStore, ObjectStore};
pub use reference::{Head, RefType, Reference};
pub use repository::{CommitOptions, Repository, RepositoryInitOptions, Reset, Target};
pub use status::{FilterFlags, StatusEntry, StatusFlags};

/// Result type for snow-repo operations
pub type Result<T> = anyhow::Result<T>;
