//! Shared fixtures for repository integration tests
//!
//! Each test binary compiles its own copy; not every binary uses every
//! helper.
#![allow(dead_code)]

use snow_core::Sha256Hash;
use snow_repo::{CommitOptions, Repository};

/// A fresh repository in a temp directory; keep the guard alive
pub fn temp_repo() -> (tempfile::TempDir, Repository) {
    let dir = tempfile::tempdir().unwrap();
    let workdir = dir.path().join("project");
    let repo = Repository::init(&workdir).unwrap();
    (dir, repo)
}

/// Write a file into the working tree
pub fn write_file(repo: &Repository, rel: &str, data: &[u8]) {
    let abs = repo.workdir().join(rel);
    if let Some(parent) = abs.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&abs, data).unwrap();
}

/// Stage one file and commit it
pub fn stage_and_commit(
    repo: &mut Repository,
    rel: &str,
    data: &[u8],
    message: &str,
) -> Sha256Hash {
    write_file(repo, rel, data);
    let mut index = repo.main_index().unwrap();
    index.add(rel).unwrap();
    repo.write_index_files(&mut index).unwrap();
    repo.create_commit(&mut index, message, CommitOptions::default(), None, None)
        .unwrap()
}

/// Read a working file back
pub fn read_file(repo: &Repository, rel: &str) -> Vec<u8> {
    std::fs::read(repo.workdir().join(rel)).unwrap()
}

/// True when the working file exists
pub fn file_exists(repo: &Repository, rel: &str) -> bool {
    repo.workdir().join(rel).exists()
}

pub fn assert_clean_status(repo: &Repository) {
    use snow_repo::{FilterFlags, StatusFlags};
    let entries = repo
        .get_status(FilterFlags::DEFAULT | FilterFlags::INCLUDE_UNMODIFIED, None)
        .unwrap();
    for entry in &entries {
        assert_eq!(
            entry.status,
            StatusFlags::UNMODIFIED,
            "expected clean tree, found {:?}",
            entry
        );
    }
}
