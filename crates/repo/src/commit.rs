//! Commit data structures

use serde::{Deserialize, Serialize};
use snow_core::hash::hash_bytes;
use snow_core::{Sha256Hash, TreeDir};
use std::collections::BTreeSet;

/// An immutable snapshot of the working tree plus metadata.
///
/// The hash is derived from the commit's identity fields (message, date,
/// parents, root tree); tags and user data ride along without affecting it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    pub hash: Sha256Hash,
    pub message: String,
    /// Creation time, Unix milliseconds
    pub date_ms: i64,
    /// Root of the snapshot; exactly one per commit
    pub root: TreeDir,
    /// Parent commit hashes, first parent first (0 or more)
    #[serde(default)]
    pub parents: Vec<Sha256Hash>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub user_data: serde_json::Map<String, serde_json::Value>,
}

impl Commit {
    /// Create a commit, deriving its content hash
    pub fn new(message: String, date_ms: i64, root: TreeDir, parents: Vec<Sha256Hash>) -> Self {
        let hash = derive_commit_hash(&message, date_ms, &parents, &root);
        Self {
            hash,
            message,
            date_ms,
            root,
            parents,
            tags: BTreeSet::new(),
            user_data: serde_json::Map::new(),
        }
    }

    /// First parent, if any
    pub fn first_parent(&self) -> Option<&Sha256Hash> {
        self.parents.first()
    }
}

/// Content-derived commit id: sha256 over the canonical JSON of the
/// identity fields
fn derive_commit_hash(
    message: &str,
    date_ms: i64,
    parents: &[Sha256Hash],
    root: &TreeDir,
) -> Sha256Hash {
    let payload = serde_json::json!({
        "message": message,
        "date": date_ms,
        "parents": parents,
        "root": root,
    });
    // serde_json::Value maps serialize with sorted keys, so the byte
    // stream is canonical
    let bytes = serde_json::to_vec(&payload).expect("commit payload serializes");
    hash_bytes(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_hash_deterministic() {
        let a = derive_commit_hash("msg", 42, &[], &TreeDir::root());
        let b = derive_commit_hash("msg", 42, &[], &TreeDir::root());
        assert_eq!(a, b);
    }

    #[test]
    fn test_commit_hash_depends_on_identity_fields() {
        let base = derive_commit_hash("msg", 42, &[], &TreeDir::root());
        assert_ne!(derive_commit_hash("other", 42, &[], &TreeDir::root()), base);
        assert_ne!(derive_commit_hash("msg", 43, &[], &TreeDir::root()), base);

        let parent = hash_bytes(b"parent");
        assert_ne!(
            derive_commit_hash("msg", 42, &[parent], &TreeDir::root()),
            base
        );
    }

    #[test]
    fn test_tags_and_user_data_do_not_change_hash() {
        let mut commit = Commit::new("msg".to_string(), 42, TreeDir::root(), vec![]);
        let original = commit.hash;
        commit.tags.insert("approved".to_string());
        commit
            .user_data
            .insert("artist".to_string(), serde_json::json!("sam"));
        assert_eq!(commit.hash, original);
    }

    #[test]
    fn test_serde_roundtrip() {
        let mut commit = Commit::new("snapshot".to_string(), 1_700_000_000_000, TreeDir::root(), vec![]);
        commit.tags.insert("milestone".to_string());

        let json = serde_json::to_string(&commit).unwrap();
        let back: Commit = serde_json::from_str(&json).unwrap();

        assert_eq!(back.hash, commit.hash);
        assert_eq!(back.message, commit.message);
        assert_eq!(back.tags, commit.tags);
        assert_eq!(back.root, commit.root);
    }
}
