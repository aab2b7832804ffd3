//! References and HEAD

use serde::{Deserialize, Serialize};
use snow_core::Sha256Hash;

/// Kind of reference; branches are the only kind today
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefType {
    Branch,
}

/// A named, mutable pointer to a commit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reference {
    pub ref_type: RefType,
    /// Unique within the repository, case-sensitive
    pub name: String,
    /// Current target commit
    pub hash: Option<Sha256Hash>,
    /// Commit the reference was created at
    pub start: Option<Sha256Hash>,
    #[serde(default)]
    pub user_data: serde_json::Map<String, serde_json::Value>,
}

impl Reference {
    pub fn new(ref_type: RefType, name: String, start: Sha256Hash) -> Self {
        Self {
            ref_type,
            name,
            hash: Some(start),
            start: Some(start),
            user_data: serde_json::Map::new(),
        }
    }
}

/// The pointer that defines "current".
///
/// Attached when `name` equals a real reference's name; detached when it is
/// the literal `"HEAD"`. The `hash` field is authoritative either way.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Head {
    pub name: String,
    pub hash: Option<Sha256Hash>,
}

impl Head {
    /// Name a detached HEAD carries
    pub const DETACHED: &'static str = "HEAD";

    /// HEAD of a freshly created repository: detached, no commit yet
    pub fn unborn() -> Self {
        Self {
            name: Self::DETACHED.to_string(),
            hash: None,
        }
    }

    pub fn is_detached(&self) -> bool {
        self.name == Self::DETACHED
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snow_core::hash::hash_bytes;

    #[test]
    fn test_new_reference_points_at_start() {
        let target = hash_bytes(b"commit");
        let reference = Reference::new(RefType::Branch, "Main".to_string(), target);
        assert_eq!(reference.hash, Some(target));
        assert_eq!(reference.start, Some(target));
    }

    #[test]
    fn test_head_detached_state() {
        let mut head = Head::unborn();
        assert!(head.is_detached());
        assert!(head.hash.is_none());

        head.name = "Main".to_string();
        assert!(!head.is_detached());
    }
}
