//! The index: add/delete intents waiting to become a commit
//!
//! An index accumulates paths, ingests the added files into the object
//! store (`write_files`), and is invalidated once its commit lands. Every
//! mutator rejects calls after invalidation.

use crate::odb::ObjectStore;
use ahash::AHashMap;
use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use snow_core::path::normalize;
use snow_core::util::atomic_write;
use snow_core::{FileInfo, SnowError};
use snow_io::IoContext;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// In-progress set of add/delete intents, persisted between sessions
#[derive(Debug, Clone)]
pub struct Index {
    /// 6 hex chars; empty for the main index
    id: String,
    add_rel_paths: BTreeSet<String>,
    delete_rel_paths: BTreeSet<String>,
    /// Files already hashed and ingested, keyed by relative path
    processed: AHashMap<String, FileInfo>,
    valid: bool,
    commondir: PathBuf,
}

/// On-disk shape of an index; invalidated indexes are deleted, so a
/// record on disk is always valid
#[derive(Serialize, Deserialize)]
struct IndexRecord {
    id: String,
    add_rel_paths: BTreeSet<String>,
    delete_rel_paths: BTreeSet<String>,
    processed: AHashMap<String, FileInfo>,
}

impl Index {
    /// The main index, auto-created on demand
    pub fn main(commondir: &Path) -> Self {
        Self::with_id(String::new(), commondir)
    }

    /// A secondary index with a fresh random id
    pub fn with_random_id(commondir: &Path) -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string()[..6].to_string();
        Self::with_id(id, commondir)
    }

    fn with_id(id: String, commondir: &Path) -> Self {
        Self {
            id,
            add_rel_paths: BTreeSet::new(),
            delete_rel_paths: BTreeSet::new(),
            processed: AHashMap::new(),
            valid: true,
            commondir: commondir.to_path_buf(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_main(&self) -> bool {
        self.id.is_empty()
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn add_rel_paths(&self) -> &BTreeSet<String> {
        &self.add_rel_paths
    }

    pub fn delete_rel_paths(&self) -> &BTreeSet<String> {
        &self.delete_rel_paths
    }

    pub fn processed(&self) -> &AHashMap<String, FileInfo> {
        &self.processed
    }

    fn ensure_valid(&self) -> Result<()> {
        if self.valid {
            Ok(())
        } else {
            Err(SnowError::IndexInvalidated.into())
        }
    }

    /// Stage a file for the next commit
    pub fn add(&mut self, rel_path: &str) -> Result<()> {
        self.ensure_valid()?;
        let p = normalize(rel_path);
        self.delete_rel_paths.remove(&p);
        self.add_rel_paths.insert(p);
        Ok(())
    }

    /// Stage a deletion for the next commit
    pub fn remove(&mut self, rel_path: &str) -> Result<()> {
        self.ensure_valid()?;
        let p = normalize(rel_path);
        self.add_rel_paths.remove(&p);
        self.delete_rel_paths.insert(p);
        Ok(())
    }

    /// Hash every added file and ingest its content into the object store.
    ///
    /// Runs the write-lock pre-flight first: files still being written by
    /// another process abort the whole ingest. Results land in the
    /// processed map; already processed paths are skipped.
    pub fn write_files(
        &mut self,
        store: &dyn ObjectStore,
        workdir: &Path,
        ioctx: &IoContext,
    ) -> Result<()> {
        self.ensure_valid()?;

        let pending: Vec<String> = self
            .add_rel_paths
            .iter()
            .filter(|p| !self.processed.contains_key(*p))
            .cloned()
            .collect();
        if pending.is_empty() {
            return self.save();
        }

        ioctx.perform_write_lock_checks(workdir, &pending)?;

        let processed: Vec<(String, FileInfo)> = pending
            .par_iter()
            .map(|rel| {
                let abs = workdir.join(rel);
                let file_hash = store.write(&abs, ioctx)?;
                let meta = std::fs::metadata(&abs)
                    .map_err(|e| SnowError::io(abs.to_string_lossy(), e))?;
                Ok((rel.clone(), FileInfo::new(file_hash, &meta)))
            })
            .collect::<Result<_>>()?;

        for (rel, info) in processed {
            self.processed.insert(rel, info);
        }
        self.save()
    }

    fn record_path(&self) -> PathBuf {
        let file = if self.is_main() { "main" } else { &self.id };
        self.commondir.join("indexes").join(format!("{}.json", file))
    }

    /// Persist the current state
    pub fn save(&self) -> Result<()> {
        let record = IndexRecord {
            id: self.id.clone(),
            add_rel_paths: self.add_rel_paths.clone(),
            delete_rel_paths: self.delete_rel_paths.clone(),
            processed: self.processed.clone(),
        };
        let data = serde_json::to_vec_pretty(&record).context("failed to serialize index")?;
        atomic_write(&self.commondir.join("tmp"), &self.record_path(), &data)
    }

    /// Retire the index: drop its record and refuse further mutation
    pub fn invalidate(&mut self) -> Result<()> {
        let path = self.record_path();
        if path.exists() {
            std::fs::remove_file(&path).map_err(|e| SnowError::io(path.to_string_lossy(), e))?;
        }
        self.valid = false;
        Ok(())
    }

    /// Load every persisted index under the commondir
    pub fn load_all(commondir: &Path) -> Result<Vec<Index>> {
        let dir = commondir.join("indexes");
        let mut indexes = Vec::new();
        if !dir.is_dir() {
            return Ok(indexes);
        }
        for entry in std::fs::read_dir(&dir).map_err(|e| SnowError::io(dir.to_string_lossy(), e))? {
            let entry = entry.map_err(|e| SnowError::io(dir.to_string_lossy(), e))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let data = std::fs::read(&path).map_err(|e| SnowError::io(path.to_string_lossy(), e))?;
            let record: IndexRecord = serde_json::from_slice(&data)
                .with_context(|| format!("malformed index record {}", path.display()))?;
            indexes.push(Index {
                id: record.id,
                add_rel_paths: record.add_rel_paths,
                delete_rel_paths: record.delete_rel_paths,
                processed: record.processed,
                valid: true,
                commondir: commondir.to_path_buf(),
            });
        }
        Ok(indexes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::odb::FsObjectStore;

    fn setup() -> (tempfile::TempDir, PathBuf, FsObjectStore, IoContext) {
        let dir = tempfile::tempdir().unwrap();
        let commondir = dir.path().join(".snow");
        let store = FsObjectStore::create(&commondir).unwrap();
        let ioctx = IoContext::init().unwrap();
        (dir, commondir, store, ioctx)
    }

    #[test]
    fn test_add_remove_opposing_sets() {
        let (_dir, commondir, _store, _ioctx) = setup();
        let mut index = Index::main(&commondir);

        index.add("a.bin").unwrap();
        index.remove("a.bin").unwrap();
        assert!(index.add_rel_paths().is_empty());
        assert!(index.delete_rel_paths().contains("a.bin"));

        index.add("a.bin").unwrap();
        assert!(index.add_rel_paths().contains("a.bin"));
        assert!(index.delete_rel_paths().is_empty());
    }

    #[test]
    fn test_paths_normalized_on_entry() {
        let (_dir, commondir, _store, _ioctx) = setup();
        let mut index = Index::main(&commondir);
        index.add("dir\\file.bin").unwrap();
        index.add("./other.bin").unwrap();
        assert!(index.add_rel_paths().contains("dir/file.bin"));
        assert!(index.add_rel_paths().contains("other.bin"));
    }

    #[test]
    fn test_write_files_ingests_blobs() {
        let (dir, commondir, store, ioctx) = setup();
        std::fs::write(dir.path().join("asset.bin"), b"payload").unwrap();

        let mut index = Index::main(&commondir);
        index.add("asset.bin").unwrap();
        index.write_files(&store, dir.path(), &ioctx).unwrap();

        let info = &index.processed()["asset.bin"];
        assert_eq!(info.size, 7);

        // The blob is readable back from the store
        let out = dir.path().join("out.bin");
        store.read(&info.hash, &out, &ioctx).unwrap();
        assert_eq!(std::fs::read(&out).unwrap(), b"payload");
    }

    #[test]
    fn test_mutators_rejected_after_invalidate() {
        let (_dir, commondir, store, ioctx) = setup();
        let mut index = Index::main(&commondir);
        index.add("a.bin").unwrap();
        index.save().unwrap();
        index.invalidate().unwrap();

        let is_invalidated = |r: Result<()>| {
            matches!(
                r.unwrap_err().downcast_ref::<SnowError>(),
                Some(SnowError::IndexInvalidated)
            )
        };
        assert!(is_invalidated(index.add("b.bin")));
        assert!(is_invalidated(index.remove("a.bin")));
        assert!(is_invalidated(index.write_files(
            &store,
            Path::new("/nonexistent"),
            &ioctx
        )));
    }

    #[test]
    fn test_persistence_roundtrip() {
        let (_dir, commondir, _store, _ioctx) = setup();
        let mut index = Index::with_random_id(&commondir);
        assert_eq!(index.id().len(), 6);
        index.add("x.bin").unwrap();
        index.remove("y.bin").unwrap();
        index.save().unwrap();

        let loaded = Index::load_all(&commondir).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id(), index.id());
        assert!(loaded[0].add_rel_paths().contains("x.bin"));
        assert!(loaded[0].delete_rel_paths().contains("y.bin"));

        // Invalidation removes the record
        index.invalidate().unwrap();
        assert!(Index::load_all(&commondir).unwrap().is_empty());
    }
}
