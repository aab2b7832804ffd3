//! SHA-256 chunked hashing for content-addressed storage
//!
//! Small files are hashed in a single streaming pass. Large files are split
//! into fixed-size blocks hashed in parallel; the per-block digests are kept
//! so later verification can pinpoint a changed block without recomputing
//! the whole file, and the file-level digest is the fold of the block
//! digests in index order, independent of worker scheduling.

use crate::error::SnowError;
use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Size of one hash block for large files (100 MB)
pub const HASH_BLOCK_SIZE: u64 = 100_000_000;

/// Files below this size are hashed in a single pass (20 MB)
pub const SMALL_FILE_THRESHOLD: u64 = 20_000_000;

/// Internal stream buffer (2 MB)
const STREAM_BUF_SIZE: usize = 2_000_000;

/// A SHA-256 hash (32 bytes)
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Sha256Hash([u8; 32]);

impl Sha256Hash {
    /// Create a new Sha256Hash from bytes
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the hash as a byte slice
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string (64 characters)
    pub fn to_hex(&self) -> String {
        const HEX_CHARS: &[u8] = b"0123456789abcdef";
        let mut hex = String::with_capacity(64);
        for &byte in &self.0 {
            hex.push(HEX_CHARS[(byte >> 4) as usize] as char);
            hex.push(HEX_CHARS[(byte & 0xf) as usize] as char);
        }
        hex
    }

    /// Parse from hex string (64 characters)
    pub fn from_hex(hex: &str) -> Result<Self> {
        if hex.len() != 64 {
            anyhow::bail!(
                "Invalid hex length: expected 64 characters (SHA-256), got {}",
                hex.len()
            );
        }

        let mut bytes = [0u8; 32];
        for i in 0..32 {
            let high = hex_char_to_nibble(hex.as_bytes()[i * 2])?;
            let low = hex_char_to_nibble(hex.as_bytes()[i * 2 + 1])?;
            bytes[i] = (high << 4) | low;
        }
        Ok(Self(bytes))
    }
}

fn hex_char_to_nibble(c: u8) -> Result<u8> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => anyhow::bail!("Invalid hex character: {}", c as char),
    }
}

impl std::fmt::Debug for Sha256Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sha256Hash({})", self.to_hex())
    }
}

impl std::fmt::Display for Sha256Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

// Hashes persist as lowercase hex inside JSON records
impl Serialize for Sha256Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Sha256Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        Sha256Hash::from_hex(&hex).map_err(serde::de::Error::custom)
    }
}

/// One hashed segment of a large file.
///
/// `start == end == -1` denotes a whole-file block (small-file fast path);
/// otherwise `end` is the inclusive offset of the block's last byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashBlock {
    pub hash: Sha256Hash,
    pub start: i64,
    pub end: i64,
}

impl HashBlock {
    /// Block covering the whole file (small-file fast path)
    pub fn whole_file(hash: Sha256Hash) -> Self {
        Self {
            hash,
            start: -1,
            end: -1,
        }
    }
}

/// Result of hashing one file: the file-level digest plus, for large
/// files, the ordered per-block digests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHash {
    pub hash: Sha256Hash,
    pub blocks: Option<Vec<HashBlock>>,
}

/// Hash a byte slice
pub fn hash_bytes(data: &[u8]) -> Sha256Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&result);
    Sha256Hash::from_bytes(bytes)
}

/// Partition `[0, size)` into contiguous block ranges `[start, end)` of at
/// most [`HASH_BLOCK_SIZE`] bytes
fn block_ranges(size: u64) -> Vec<(u64, u64)> {
    let count = size.div_ceil(HASH_BLOCK_SIZE);
    (0..count)
        .map(|i| {
            let start = i * HASH_BLOCK_SIZE;
            (start, (start + HASH_BLOCK_SIZE).min(size))
        })
        .collect()
}

/// Hash the byte range `[start, end)` of a file
fn hash_block_range(path: &Path, start: u64, end: u64) -> Result<Sha256Hash> {
    let mut file = File::open(path)
        .map_err(|e| SnowError::io(path.to_string_lossy(), e))
        .with_context(|| format!("failed to open {} for hashing", path.display()))?;
    file.seek(SeekFrom::Start(start))
        .map_err(|e| SnowError::io(path.to_string_lossy(), e))?;

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; STREAM_BUF_SIZE];
    let mut remaining = end - start;

    while remaining > 0 {
        let want = remaining.min(STREAM_BUF_SIZE as u64) as usize;
        let read = file
            .read(&mut buf[..want])
            .map_err(|e| SnowError::io(path.to_string_lossy(), e))?;
        if read == 0 {
            anyhow::bail!(
                "unexpected end of file hashing {} ({} bytes short)",
                path.display(),
                remaining
            );
        }
        hasher.update(&buf[..read]);
        remaining -= read as u64;
    }

    let result = hasher.finalize();
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&result);
    Ok(Sha256Hash::from_bytes(bytes))
}

/// Fold block hashes, in index order, into the file-level digest.
///
/// The fold is over the lowercase hex of each block hash so the file-level
/// identifier is reproducible from a printed block list alone.
fn fold_block_hashes<'a>(blocks: impl IntoIterator<Item = &'a Sha256Hash>) -> Sha256Hash {
    let mut hasher = Sha256::new();
    for block_hash in blocks {
        hasher.update(block_hash.to_hex().as_bytes());
    }
    let result = hasher.finalize();
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&result);
    Sha256Hash::from_bytes(bytes)
}

/// Compute the content fingerprint of a file.
///
/// Files under [`SMALL_FILE_THRESHOLD`] get a single whole-file digest and
/// no block list. Larger files are hashed block-by-block in parallel and
/// the block digests are folded in index order.
pub fn hash_file(path: &Path) -> Result<FileHash> {
    let size = std::fs::metadata(path)
        .map_err(|e| SnowError::io(path.to_string_lossy(), e))?
        .len();

    if size < SMALL_FILE_THRESHOLD {
        return Ok(FileHash {
            hash: hash_block_range(path, 0, size)?,
            blocks: None,
        });
    }

    let blocks: Vec<HashBlock> = block_ranges(size)
        .par_iter()
        .map(|&(start, end)| {
            let hash = hash_block_range(path, start, end)?;
            Ok(HashBlock {
                hash,
                start: start as i64,
                end: end as i64 - 1,
            })
        })
        .collect::<Result<_>>()?;

    let hash = fold_block_hashes(blocks.iter().map(|b| &b.hash));
    Ok(FileHash {
        hash,
        blocks: Some(blocks),
    })
}

/// Re-verify a file against a previously computed fingerprint.
///
/// For large files the per-block digests are compared first when supplied;
/// a differing block short-circuits the verification to `false` without
/// surfacing an error. Returns `Ok(false)` on any content difference.
pub fn compare_file_hash(
    path: &Path,
    expected: &Sha256Hash,
    expected_blocks: Option<&[HashBlock]>,
) -> Result<bool> {
    let size = std::fs::metadata(path)
        .map_err(|e| SnowError::io(path.to_string_lossy(), e))?
        .len();

    if size < SMALL_FILE_THRESHOLD {
        if expected_blocks.is_some() {
            tracing::warn!(
                path = %path.display(),
                "block list supplied for a small file; comparing whole-file hash only"
            );
        }
        return Ok(hash_block_range(path, 0, size)? == *expected);
    }

    let ranges = block_ranges(size);
    if let Some(exp) = expected_blocks {
        // A different block count means a different file
        if exp.len() != ranges.len() {
            return Ok(false);
        }
    }

    let hashed: Result<Vec<Sha256Hash>> = ranges
        .par_iter()
        .enumerate()
        .map(|(index, &(start, end))| {
            let hash = hash_block_range(path, start, end)?;
            if let Some(exp) = expected_blocks {
                if exp[index].hash != hash {
                    return Err(SnowError::HashBlockMismatch { index }.into());
                }
            }
            Ok(hash)
        })
        .collect();

    match hashed {
        Ok(hashes) => Ok(fold_block_hashes(hashes.iter()) == *expected),
        Err(e) => match e.downcast_ref::<SnowError>() {
            Some(SnowError::HashBlockMismatch { index }) => {
                tracing::debug!(index, path = %path.display(), "hash block differs");
                Ok(false)
            }
            _ => Err(e),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_file(dir: &Path, name: &str, data: &[u8]) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    #[test]
    fn test_hash_consistency() {
        let data = b"hello world";
        assert_eq!(hash_bytes(data), hash_bytes(data));
    }

    #[test]
    fn test_hex_encoding_roundtrip() {
        let original = Sha256Hash::from_bytes([42; 32]);
        let hex = original.to_hex();
        let decoded = Sha256Hash::from_hex(&hex).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_hex_encoding_lowercase() {
        let hash = hash_bytes(b"abc");
        let hex = hash.to_hex();
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        // Known vector: sha256("abc")
        assert_eq!(
            hex,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_hex_decoding_invalid() {
        assert!(Sha256Hash::from_hex("abc").is_err());
        assert!(Sha256Hash::from_hex(&"a".repeat(40)).is_err());
        assert!(Sha256Hash::from_hex(&"g".repeat(64)).is_err());
    }

    #[test]
    fn test_serde_as_hex() {
        let hash = hash_bytes(b"serde");
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", hash.to_hex()));
        let back: Sha256Hash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
    }

    #[test]
    fn test_block_ranges_cover_contiguously() {
        for size in [
            1,
            HASH_BLOCK_SIZE - 1,
            HASH_BLOCK_SIZE,
            HASH_BLOCK_SIZE + 1,
            3 * HASH_BLOCK_SIZE + 7,
        ] {
            let ranges = block_ranges(size);
            assert_eq!(ranges.len() as u64, size.div_ceil(HASH_BLOCK_SIZE));
            assert_eq!(ranges[0].0, 0);
            assert_eq!(ranges[ranges.len() - 1].1, size);
            for pair in ranges.windows(2) {
                assert_eq!(pair[0].1, pair[1].0, "ranges must be contiguous");
            }
        }
    }

    #[test]
    fn test_small_file_has_no_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "small.bin", b"small file content");

        let result = hash_file(&path).unwrap();
        assert!(result.blocks.is_none());
        assert_eq!(result.hash, hash_bytes(b"small file content"));
    }

    #[test]
    fn test_large_file_single_block() {
        // Exactly at the threshold: one block spanning the whole file
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("threshold.bin");
        let data = vec![0u8; SMALL_FILE_THRESHOLD as usize];
        std::fs::write(&path, &data).unwrap();

        let result = hash_file(&path).unwrap();
        let blocks = result.blocks.expect("threshold file must carry blocks");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].start, 0);
        assert_eq!(blocks[0].end, SMALL_FILE_THRESHOLD as i64 - 1);
        assert_eq!(blocks[0].hash, hash_bytes(&data));

        // The file hash is the fold of the block-hash hex strings
        assert_eq!(result.hash, hash_bytes(blocks[0].hash.to_hex().as_bytes()));
    }

    #[test]
    fn test_multi_block_boundaries() {
        // Sparse file one byte past the block size: exactly two blocks
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("two_blocks.bin");
        let file = File::create(&path).unwrap();
        file.set_len(HASH_BLOCK_SIZE + 1).unwrap();
        drop(file);

        let result = hash_file(&path).unwrap();
        let blocks = result.blocks.unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].start, 0);
        assert_eq!(blocks[0].end, HASH_BLOCK_SIZE as i64 - 1);
        assert_eq!(blocks[1].start, HASH_BLOCK_SIZE as i64);
        assert_eq!(blocks[1].end, HASH_BLOCK_SIZE as i64);
    }

    #[test]
    fn test_compare_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.bin");
        let data = vec![0xABu8; SMALL_FILE_THRESHOLD as usize + 100];
        std::fs::write(&path, &data).unwrap();

        let result = hash_file(&path).unwrap();
        assert!(compare_file_hash(&path, &result.hash, result.blocks.as_deref()).unwrap());
        // Also valid without the block list
        assert!(compare_file_hash(&path, &result.hash, None).unwrap());
    }

    #[test]
    fn test_compare_small_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "s.bin", b"content");
        let result = hash_file(&path).unwrap();
        assert!(compare_file_hash(&path, &result.hash, None).unwrap());
        assert!(!compare_file_hash(&path, &hash_bytes(b"other"), None).unwrap());
    }

    #[test]
    fn test_flipped_byte_detected_not_errored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flip.bin");
        let mut data = vec![0u8; SMALL_FILE_THRESHOLD as usize + 1000];
        std::fs::write(&path, &data).unwrap();
        let result = hash_file(&path).unwrap();

        // Flip one byte in place; the block digest must differ and the
        // comparison must resolve to false, not an error
        data[500] ^= 0xFF;
        std::fs::write(&path, &data).unwrap();

        assert!(!compare_file_hash(&path, &result.hash, result.blocks.as_deref()).unwrap());
        assert!(!compare_file_hash(&path, &result.hash, None).unwrap());

        // The differing block is exactly the one containing the byte
        let modified = hash_file(&path).unwrap();
        let old_blocks = result.blocks.unwrap();
        let new_blocks = modified.blocks.unwrap();
        assert_ne!(old_blocks[0].hash, new_blocks[0].hash);
        assert_eq!(&old_blocks[1..], &new_blocks[1..]);
    }

    #[test]
    fn test_compare_length_change_is_false() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grow.bin");
        std::fs::write(&path, vec![1u8; SMALL_FILE_THRESHOLD as usize]).unwrap();
        let result = hash_file(&path).unwrap();

        // Grow the file past another block boundary
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(HASH_BLOCK_SIZE + 10).unwrap();
        drop(file);

        assert!(!compare_file_hash(&path, &result.hash, result.blocks.as_deref()).unwrap());
    }
}
