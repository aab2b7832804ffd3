//! Tree representation for commit snapshots
//!
//! A commit owns exactly one root [`TreeDir`]; directories hold an ordered
//! list of child entries, files carry the content hash plus the stat
//! metadata used for fast modification checks.

use crate::hash::{compare_file_hash, FileHash, HashBlock, Sha256Hash};
use crate::util::fs_times_ms;
use ahash::AHashMap;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs::Metadata;
use std::path::Path;

/// Metadata captured when a file is hashed at index time.
///
/// Produced by the index, consumed by tree construction, discarded after
/// the commit is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub hash: Sha256Hash,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub blocks: Option<Vec<HashBlock>>,
    pub size: u64,
    pub atime_ms: i64,
    pub mtime_ms: i64,
    pub ctime_ms: i64,
}

impl FileInfo {
    /// Combine a computed fingerprint with the file's stat data
    pub fn new(file_hash: FileHash, meta: &Metadata) -> Self {
        let (atime_ms, mtime_ms, ctime_ms) = fs_times_ms(meta);
        Self {
            hash: file_hash.hash,
            blocks: file_hash.blocks,
            size: meta.len(),
            atime_ms,
            mtime_ms,
            ctime_ms,
        }
    }
}

/// A file inside a committed tree. Immutable once part of a commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeFile {
    /// Relative forward-slash path from the workdir root
    pub path: String,
    pub hash: Sha256Hash,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub blocks: Option<Vec<HashBlock>>,
    pub size: u64,
    pub mtime_ms: i64,
    pub ctime_ms: i64,
}

impl TreeFile {
    /// Build a tree file from index-time metadata
    pub fn from_info(path: String, info: &FileInfo) -> Self {
        Self {
            path,
            hash: info.hash,
            blocks: info.blocks.clone(),
            size: info.size,
            mtime_ms: info.mtime_ms,
            ctime_ms: info.ctime_ms,
        }
    }

    /// Check whether the working copy of this file differs from the
    /// committed content.
    ///
    /// Size and mtime/ctime are consulted first; only when the timestamps
    /// moved does the content get re-hashed (block-wise for large files).
    pub fn is_file_modified(&self, workdir: &Path) -> Result<bool> {
        let abs = workdir.join(&self.path);
        let meta = match std::fs::metadata(&abs) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(crate::error::SnowError::io(self.path.clone(), e).into()),
        };

        if meta.len() != self.size {
            return Ok(true);
        }

        let (_, mtime_ms, ctime_ms) = fs_times_ms(&meta);
        if mtime_ms == self.mtime_ms && ctime_ms == self.ctime_ms {
            return Ok(false);
        }

        Ok(!compare_file_hash(&abs, &self.hash, self.blocks.as_deref())?)
    }
}

/// One entry in a directory: a file or a nested directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TreeEntry {
    File(TreeFile),
    Dir(TreeDir),
}

impl TreeEntry {
    /// Relative path of the entry
    pub fn path(&self) -> &str {
        match self {
            TreeEntry::File(f) => &f.path,
            TreeEntry::Dir(d) => &d.path,
        }
    }
}

/// A directory inside a committed tree; the commit root is the `""` dir
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeDir {
    /// Relative forward-slash path; empty for the root
    pub path: String,
    /// Child entries, ordered by path
    pub children: Vec<TreeEntry>,
}

impl TreeDir {
    /// Create an empty directory node
    pub fn new(path: String) -> Self {
        Self {
            path,
            children: Vec::new(),
        }
    }

    /// Empty root tree
    pub fn root() -> Self {
        Self::new(String::new())
    }

    /// Build a tree from a mapping of relative paths to file metadata
    pub fn from_file_map(files: &AHashMap<String, FileInfo>) -> Self {
        let mut sorted: Vec<(&String, &FileInfo)> = files.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(b.0));

        let mut root = TreeDir::root();
        for (path, info) in sorted {
            root.insert_file(path, info);
        }
        root.sort_recursive();
        root
    }

    fn insert_file(&mut self, rel_path: &str, info: &FileInfo) {
        let segments: Vec<&str> = rel_path.split('/').collect();
        let mut node = self;
        for depth in 0..segments.len() - 1 {
            let dir_path = segments[..=depth].join("/");
            node = node.child_dir(dir_path);
        }
        node.children
            .push(TreeEntry::File(TreeFile::from_info(rel_path.to_string(), info)));
    }

    /// Get or create the child directory with the given full path
    fn child_dir(&mut self, dir_path: String) -> &mut TreeDir {
        let idx = self
            .children
            .iter()
            .position(|c| matches!(c, TreeEntry::Dir(d) if d.path == dir_path));
        let idx = match idx {
            Some(i) => i,
            None => {
                self.children.push(TreeEntry::Dir(TreeDir::new(dir_path)));
                self.children.len() - 1
            }
        };
        match &mut self.children[idx] {
            TreeEntry::Dir(d) => d,
            // position() above only matches Dir entries
            TreeEntry::File(_) => unreachable!(),
        }
    }

    fn sort_recursive(&mut self) {
        self.children.sort_by(|a, b| a.path().cmp(b.path()));
        for child in &mut self.children {
            if let TreeEntry::Dir(d) = child {
                d.sort_recursive();
            }
        }
    }

    /// Collect every file of the tree, keyed by relative path
    pub fn files(&self) -> AHashMap<String, TreeFile> {
        let mut out = AHashMap::new();
        self.collect_files(&mut out);
        out
    }

    fn collect_files(&self, out: &mut AHashMap<String, TreeFile>) {
        for child in &self.children {
            match child {
                TreeEntry::File(f) => {
                    out.insert(f.path.clone(), f.clone());
                }
                TreeEntry::Dir(d) => d.collect_files(out),
            }
        }
    }

    /// Number of files in the tree
    pub fn file_count(&self) -> usize {
        self.children
            .iter()
            .map(|c| match c {
                TreeEntry::File(_) => 1,
                TreeEntry::Dir(d) => d.file_count(),
            })
            .sum()
    }

    /// Remove the entry (file or directory) at the given relative path.
    ///
    /// Directories left empty by the removal are pruned. Returns true when
    /// an entry was removed.
    pub fn remove(&mut self, rel_path: &str) -> bool {
        let before = self.children.len();
        self.children.retain(|c| c.path() != rel_path);
        let mut removed = self.children.len() != before;

        if !removed {
            for child in &mut self.children {
                if let TreeEntry::Dir(d) = child {
                    if rel_path.starts_with(&format!("{}/", d.path)) && d.remove(rel_path) {
                        removed = true;
                        break;
                    }
                }
            }
        }

        self.children.retain(|c| match c {
            TreeEntry::Dir(d) => !d.children.is_empty(),
            TreeEntry::File(_) => true,
        });
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_bytes;

    fn info(data: &[u8]) -> FileInfo {
        FileInfo {
            hash: hash_bytes(data),
            blocks: None,
            size: data.len() as u64,
            atime_ms: 0,
            mtime_ms: 1_000,
            ctime_ms: 1_000,
        }
    }

    fn sample_map() -> AHashMap<String, FileInfo> {
        let mut files = AHashMap::new();
        files.insert("scene.blend".to_string(), info(b"scene"));
        files.insert("assets/tex/wood.png".to_string(), info(b"wood"));
        files.insert("assets/tex/iron.png".to_string(), info(b"iron"));
        files.insert("assets/model.fbx".to_string(), info(b"model"));
        files
    }

    #[test]
    fn test_build_from_file_map() {
        let tree = TreeDir::from_file_map(&sample_map());

        assert_eq!(tree.path, "");
        assert_eq!(tree.file_count(), 4);

        // Root has the assets dir and the top-level file
        let names: Vec<&str> = tree.children.iter().map(|c| c.path()).collect();
        assert_eq!(names, vec!["assets", "scene.blend"]);

        let files = tree.files();
        assert!(files.contains_key("assets/tex/wood.png"));
        assert_eq!(files["scene.blend"].hash, hash_bytes(b"scene"));
    }

    #[test]
    fn test_children_ordered_by_path() {
        let tree = TreeDir::from_file_map(&sample_map());
        let assets = match &tree.children[0] {
            TreeEntry::Dir(d) => d,
            other => panic!("expected dir, got {:?}", other),
        };
        let names: Vec<&str> = assets.children.iter().map(|c| c.path()).collect();
        assert_eq!(names, vec!["assets/model.fbx", "assets/tex"]);
    }

    #[test]
    fn test_remove_file_prunes_empty_dirs() {
        let mut tree = TreeDir::from_file_map(&sample_map());

        assert!(tree.remove("assets/tex/wood.png"));
        assert!(tree.files().contains_key("assets/tex/iron.png"));

        // Removing the last file of a dir prunes the dir itself
        assert!(tree.remove("assets/tex/iron.png"));
        assert!(!tree.files().keys().any(|p| p.starts_with("assets/tex")));

        assert!(!tree.remove("assets/tex/iron.png"), "already gone");
    }

    #[test]
    fn test_remove_directory() {
        let mut tree = TreeDir::from_file_map(&sample_map());
        assert!(tree.remove("assets"));
        assert_eq!(tree.file_count(), 1);
        assert!(tree.files().contains_key("scene.blend"));
    }

    #[test]
    fn test_serde_roundtrip() {
        let tree = TreeDir::from_file_map(&sample_map());
        let json = serde_json::to_string(&tree).unwrap();
        let back: TreeDir = serde_json::from_str(&json).unwrap();
        assert_eq!(tree, back);
    }

    #[test]
    fn test_is_file_modified_states() {
        let dir = tempfile::tempdir().unwrap();
        let abs = dir.path().join("f.bin");
        std::fs::write(&abs, b"original").unwrap();

        let meta = std::fs::metadata(&abs).unwrap();
        let fh = crate::hash::hash_file(&abs).unwrap();
        let tf = TreeFile::from_info("f.bin".to_string(), &FileInfo::new(fh, &meta));

        // Untouched: timestamps match, fast path says clean
        assert!(!tf.is_file_modified(dir.path()).unwrap());

        // Rewritten with identical content: timestamps move, hash agrees
        std::fs::write(&abs, b"original").unwrap();
        assert!(!tf.is_file_modified(dir.path()).unwrap());

        // Same size, different content
        std::fs::write(&abs, b"0riginal").unwrap();
        assert!(tf.is_file_modified(dir.path()).unwrap());

        // Different size
        std::fs::write(&abs, b"grown content").unwrap();
        assert!(tf.is_file_modified(dir.path()).unwrap());

        // Deleted counts as modified
        std::fs::remove_file(&abs).unwrap();
        assert!(tf.is_file_modified(dir.path()).unwrap());
    }
}
