//! Object store: blob, commit, reference and HEAD persistence
//!
//! The engine only depends on the [`ObjectStore`] contract; the bundled
//! [`FsObjectStore`] keeps everything as plain files under the commondir:
//!
//! ```text
//! <commondir>/
//!   commits/<hash>.json
//!   refs/<name>.json
//!   HEAD
//!   indexes/<id>.json
//!   objects/<hh>/<rest-of-hash>
//!   tmp/
//!   log
//! ```

use crate::commit::Commit;
use crate::reference::{Head, Reference};
use anyhow::{Context, Result};
use dashmap::DashSet;
use snow_core::hash::{hash_file, FileHash};
use snow_core::util::atomic_write;
use snow_core::{Sha256Hash, SnowError};
use snow_io::IoContext;
use std::path::{Path, PathBuf};

/// Persistence contract the repository depends on.
///
/// Blob writes must be idempotent; every mutation of a single record must
/// be atomic.
pub trait ObjectStore: Send + Sync + std::fmt::Debug {
    /// Copy a source file into the store under its content hash
    fn write(&self, src: &Path, ioctx: &IoContext) -> Result<FileHash>;

    /// Materialize the blob at the destination path
    fn read(&self, hash: &Sha256Hash, dst: &Path, ioctx: &IoContext) -> Result<()>;

    /// Drop a blob from the store
    fn delete(&self, hash: &Sha256Hash) -> Result<()>;

    fn write_commit(&self, commit: &Commit) -> Result<()>;
    fn read_commits(&self) -> Result<Vec<Commit>>;

    fn write_reference(&self, reference: &Reference) -> Result<()>;
    fn delete_reference(&self, reference: &Reference) -> Result<()>;
    fn read_references(&self) -> Result<Vec<Reference>>;

    fn write_head_reference(&self, head: &Head) -> Result<()>;
    /// The raw HEAD value: a reference name or a commit hash, `None` when
    /// empty
    fn read_head_reference(&self) -> Result<Option<String>>;
}

/// Filesystem-backed object store
#[derive(Debug)]
pub struct FsObjectStore {
    commondir: PathBuf,
    /// Blobs known to exist on disk; spares an exists() stat per write
    present: DashSet<Sha256Hash>,
}

const SUBDIRS: &[&str] = &["commits", "refs", "indexes", "objects", "tmp"];

impl FsObjectStore {
    /// Create the commondir layout
    pub fn create(commondir: &Path) -> Result<Self> {
        if commondir.join("HEAD").exists() {
            return Err(SnowError::InvalidCommondir(format!(
                "already initialized: {}",
                commondir.display()
            ))
            .into());
        }
        for sub in SUBDIRS {
            std::fs::create_dir_all(commondir.join(sub))
                .map_err(|e| SnowError::io(commondir.to_string_lossy(), e))?;
        }
        std::fs::write(commondir.join("HEAD"), "")
            .map_err(|e| SnowError::io(commondir.to_string_lossy(), e))?;
        Ok(Self {
            commondir: commondir.to_path_buf(),
            present: DashSet::new(),
        })
    }

    /// Open an existing commondir
    pub fn open(commondir: &Path) -> Result<Self> {
        for sub in SUBDIRS {
            let dir = commondir.join(sub);
            if !dir.is_dir() {
                return Err(SnowError::InvalidCommondir(format!(
                    "missing {} in {}",
                    sub,
                    commondir.display()
                ))
                .into());
            }
        }
        Ok(Self {
            commondir: commondir.to_path_buf(),
            present: DashSet::new(),
        })
    }

    pub fn commondir(&self) -> &Path {
        &self.commondir
    }

    fn tmp_dir(&self) -> PathBuf {
        self.commondir.join("tmp")
    }

    /// Fan-out path of a blob: `objects/<hh>/<rest>`
    fn object_path(&self, hash: &Sha256Hash) -> PathBuf {
        let hex = hash.to_hex();
        let (prefix, suffix) = hex.split_at(2);
        self.commondir.join("objects").join(prefix).join(suffix)
    }

    fn commit_path(&self, hash: &Sha256Hash) -> PathBuf {
        self.commondir
            .join("commits")
            .join(format!("{}.json", hash.to_hex()))
    }

    fn reference_path(&self, name: &str) -> PathBuf {
        self.commondir.join("refs").join(format!("{}.json", name))
    }
}

impl ObjectStore for FsObjectStore {
    fn write(&self, src: &Path, ioctx: &IoContext) -> Result<FileHash> {
        let file_hash = hash_file(src)?;
        let target = self.object_path(&file_hash.hash);

        if self.present.contains(&file_hash.hash) || target.exists() {
            self.present.insert(file_hash.hash);
            return Ok(file_hash);
        }

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SnowError::io(parent.to_string_lossy(), e))?;
        }

        // Land the blob in tmp first so a torn copy never looks like a
        // stored object
        let staging = self.tmp_dir().join(uuid::Uuid::new_v4().to_string());
        ioctx.copy_file(src, &staging)?;
        std::fs::rename(&staging, &target)
            .map_err(|e| SnowError::io(target.to_string_lossy(), e))?;

        self.present.insert(file_hash.hash);
        tracing::debug!(hash = %file_hash.hash, src = %src.display(), "blob stored");
        Ok(file_hash)
    }

    fn read(&self, hash: &Sha256Hash, dst: &Path, ioctx: &IoContext) -> Result<()> {
        let src = self.object_path(hash);
        if !src.exists() {
            anyhow::bail!("blob not found in object store: {}", hash);
        }
        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SnowError::io(parent.to_string_lossy(), e))?;
        }
        ioctx.copy_file(&src, dst)
    }

    fn delete(&self, hash: &Sha256Hash) -> Result<()> {
        let path = self.object_path(hash);
        std::fs::remove_file(&path).map_err(|e| SnowError::io(path.to_string_lossy(), e))?;
        self.present.remove(hash);
        Ok(())
    }

    fn write_commit(&self, commit: &Commit) -> Result<()> {
        let data = serde_json::to_vec_pretty(commit)
            .with_context(|| format!("failed to serialize commit {}", commit.hash))?;
        atomic_write(&self.tmp_dir(), &self.commit_path(&commit.hash), &data)
    }

    fn read_commits(&self) -> Result<Vec<Commit>> {
        let dir = self.commondir.join("commits");
        let mut commits = Vec::new();
        for entry in std::fs::read_dir(&dir).map_err(|e| SnowError::io(dir.to_string_lossy(), e))? {
            let entry = entry.map_err(|e| SnowError::io(dir.to_string_lossy(), e))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let data = std::fs::read(&path).map_err(|e| SnowError::io(path.to_string_lossy(), e))?;
            let commit: Commit = serde_json::from_slice(&data)
                .with_context(|| format!("malformed commit record {}", path.display()))?;
            commits.push(commit);
        }
        Ok(commits)
    }

    fn write_reference(&self, reference: &Reference) -> Result<()> {
        let data = serde_json::to_vec_pretty(reference)
            .with_context(|| format!("failed to serialize reference {}", reference.name))?;
        atomic_write(&self.tmp_dir(), &self.reference_path(&reference.name), &data)
    }

    fn delete_reference(&self, reference: &Reference) -> Result<()> {
        let path = self.reference_path(&reference.name);
        std::fs::remove_file(&path).map_err(|e| SnowError::io(path.to_string_lossy(), e))?;
        Ok(())
    }

    fn read_references(&self) -> Result<Vec<Reference>> {
        let dir = self.commondir.join("refs");
        let mut references = Vec::new();
        for entry in walkdir::WalkDir::new(&dir) {
            let entry = entry.map_err(|e| {
                anyhow::anyhow!("failed to walk refs dir {}: {}", dir.display(), e)
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let data = std::fs::read(path).map_err(|e| SnowError::io(path.to_string_lossy(), e))?;
            let reference: Reference = serde_json::from_slice(&data)
                .with_context(|| format!("malformed reference record {}", path.display()))?;
            references.push(reference);
        }
        // Stable order regardless of directory iteration
        references.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(references)
    }

    fn write_head_reference(&self, head: &Head) -> Result<()> {
        let value = if head.is_detached() {
            head.hash.map(|h| h.to_hex()).unwrap_or_default()
        } else {
            head.name.clone()
        };
        atomic_write(&self.tmp_dir(), &self.commondir.join("HEAD"), value.as_bytes())
    }

    fn read_head_reference(&self) -> Result<Option<String>> {
        let path = self.commondir.join("HEAD");
        let content =
            std::fs::read_to_string(&path).map_err(|e| SnowError::io(path.to_string_lossy(), e))?;
        let trimmed = content.trim();
        Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::RefType;
    use snow_core::hash::hash_bytes;
    use snow_core::TreeDir;

    fn store() -> (tempfile::TempDir, FsObjectStore, IoContext) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::create(&dir.path().join(".snow")).unwrap();
        let ioctx = IoContext::init().unwrap();
        (dir, store, ioctx)
    }

    #[test]
    fn test_blob_write_read_roundtrip() {
        let (dir, store, ioctx) = store();
        let src = dir.path().join("asset.bin");
        std::fs::write(&src, b"blob payload").unwrap();

        let file_hash = store.write(&src, &ioctx).unwrap();
        assert_eq!(file_hash.hash, hash_bytes(b"blob payload"));

        let dst = dir.path().join("restored/asset.bin");
        store.read(&file_hash.hash, &dst, &ioctx).unwrap();
        assert_eq!(std::fs::read(&dst).unwrap(), b"blob payload");
    }

    #[test]
    fn test_blob_write_idempotent() {
        let (dir, store, ioctx) = store();
        let src = dir.path().join("asset.bin");
        std::fs::write(&src, b"same bytes").unwrap();

        let first = store.write(&src, &ioctx).unwrap();
        let second = store.write(&src, &ioctx).unwrap();
        assert_eq!(first.hash, second.hash);
    }

    #[test]
    fn test_blob_missing_read_fails() {
        let (dir, store, ioctx) = store();
        let err = store
            .read(&hash_bytes(b"never stored"), &dir.path().join("out"), &ioctx)
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_blob_delete() {
        let (dir, store, ioctx) = store();
        let src = dir.path().join("asset.bin");
        std::fs::write(&src, b"deletable").unwrap();

        let file_hash = store.write(&src, &ioctx).unwrap();
        store.delete(&file_hash.hash).unwrap();
        assert!(store
            .read(&file_hash.hash, &dir.path().join("out"), &ioctx)
            .is_err());
    }

    #[test]
    fn test_commit_persistence_roundtrip() {
        let (_dir, store, _ioctx) = store();
        let commit = Commit::new("first".to_string(), 1_000, TreeDir::root(), vec![]);
        store.write_commit(&commit).unwrap();

        let commits = store.read_commits().unwrap();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].hash, commit.hash);
        assert_eq!(commits[0].message, "first");
    }

    #[test]
    fn test_reference_persistence_roundtrip() {
        let (_dir, store, _ioctx) = store();
        let main = Reference::new(RefType::Branch, "Main".to_string(), hash_bytes(b"c1"));
        let feat = Reference::new(RefType::Branch, "feat".to_string(), hash_bytes(b"c1"));
        store.write_reference(&main).unwrap();
        store.write_reference(&feat).unwrap();

        let refs = store.read_references().unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].name, "Main");
        assert_eq!(refs[1].name, "feat");

        store.delete_reference(&feat).unwrap();
        assert_eq!(store.read_references().unwrap().len(), 1);
    }

    #[test]
    fn test_head_record_states() {
        let (_dir, store, _ioctx) = store();

        // Empty after create
        assert_eq!(store.read_head_reference().unwrap(), None);

        // Attached: the reference name round-trips
        let head = Head {
            name: "Main".to_string(),
            hash: Some(hash_bytes(b"c1")),
        };
        store.write_head_reference(&head).unwrap();
        assert_eq!(store.read_head_reference().unwrap().as_deref(), Some("Main"));

        // Detached: the raw hash round-trips
        let detached = Head {
            name: Head::DETACHED.to_string(),
            hash: Some(hash_bytes(b"c2")),
        };
        store.write_head_reference(&detached).unwrap();
        assert_eq!(
            store.read_head_reference().unwrap().as_deref(),
            Some(hash_bytes(b"c2").to_hex().as_str())
        );
    }

    #[test]
    fn test_create_rejects_existing_store() {
        let dir = tempfile::tempdir().unwrap();
        let commondir = dir.path().join(".snow");
        FsObjectStore::create(&commondir).unwrap();

        let err = FsObjectStore::create(&commondir).unwrap_err();
        assert!(err.to_string().contains("already initialized"));
    }

    #[test]
    fn test_open_rejects_missing_layout() {
        let dir = tempfile::tempdir().unwrap();
        let err = FsObjectStore::open(&dir.path().join(".snow")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SnowError>(),
            Some(SnowError::InvalidCommondir(_))
        ));
    }
}
